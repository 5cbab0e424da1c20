//! # Study Guide Prompts
//!
//! Each pass of a generation gets the same system prompt and a user prompt that names
//! only the fields the pass is responsible for.

use crate::generation::plan::PassPlan;
use crate::types::{GenerationMode, GuideRequest, InputType};

/// The system prompt for every generation pass.
///
/// Placeholders: `{language}`, `{mode_instruction}`
pub const GUIDE_SYSTEM_PROMPT: &str = "You are a careful Bible teacher writing study guides for personal devotion and small groups. \
Write in the language with code `{language}`. Stay faithful to the text, avoid speculation, and cite scripture references in a standard format (e.g. `John 3:16`).\n\n\
{mode_instruction}\n\n\
Respond with a single JSON object and nothing else. Do not wrap it in markdown.";

/// The user prompt for one pass.
///
/// Placeholders: `{input_type}`, `{input}`, `{pass}`, `{passes}`, `{fields}`
pub const GUIDE_USER_PROMPT: &str = "# INPUT\nType: {input_type}\n{input}\n\n\
# TASK\nThis is part {pass} of {passes}. Return a JSON object with exactly these fields, in this order:\n{fields}";

fn mode_instruction(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Quick => "Keep every section brief: two or three sentences, three list items at most.",
        GenerationMode::Standard => "Write a balanced guide: a paragraph or two per section and four to six list items.",
        GenerationMode::Deep => "Write an in-depth guide with original-language insights, historical setting, and careful exegesis.",
        GenerationMode::Lectio => "Shape the guide for Lectio Divina: slow reading, meditation, prayer, and contemplation.",
        GenerationMode::Sermon => "Shape the guide for a preacher: a structured outline, illustrations, and practical application.",
    }
}

fn input_label(input_type: InputType) -> &'static str {
    match input_type {
        InputType::Scripture => "scripture passage",
        InputType::Topic => "topic",
        InputType::Question => "question",
    }
}

fn field_instruction(name: &str) -> &'static str {
    match name {
        "summary" => "a short overview of the passage or topic",
        "interpretation" => "the meaning of the text and its theological significance",
        "interpretation_part1" => "the first half of the interpretation: the text's immediate meaning",
        "interpretation_part2" => "the second half of the interpretation: theological significance and connections, continuing from part one",
        "context" => "literary and canonical context",
        "historical_background" => "historical and cultural background",
        "related_verses" => "scripture references that illuminate this one",
        "reflection_questions" => "open questions for personal or group reflection",
        "prayer_points" => "short prayer prompts",
        "lectio" => "guidance for a slow, attentive reading",
        "meditatio" => "a meditation on a word or phrase",
        "oratio" => "a prayer responding to the text",
        "contemplatio" => "an invitation to rest in God's presence",
        "sermon_outline" => "an object with `title` and `points` (array of strings)",
        "illustrations" => "illustrations or stories that make the points concrete",
        "application_points" => "practical applications for the week ahead",
        _ => "",
    }
}

fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
}

/// Builds the system and user prompts for pass `pass_index` (zero-based).
pub fn build_prompts(
    request: &GuideRequest,
    plan: &PassPlan,
    pass_index: usize,
    passes: usize,
) -> (String, String) {
    let system = fill(
        GUIDE_SYSTEM_PROMPT,
        &[
            ("{language}", request.language.as_str()),
            ("{mode_instruction}", mode_instruction(request.mode)),
        ],
    );

    let fields = plan
        .fields
        .iter()
        .map(|f| format!("- `{}` ({}): {}", f.name, f.shape.describe(), field_instruction(f.name)))
        .collect::<Vec<_>>()
        .join("\n");
    let pass = (pass_index + 1).to_string();
    let passes = passes.to_string();
    let user = fill(
        GUIDE_USER_PROMPT,
        &[
            ("{input_type}", input_label(request.input_type)),
            ("{input}", request.input.trim()),
            ("{pass}", pass.as_str()),
            ("{passes}", passes.as_str()),
            ("{fields}", fields.as_str()),
        ],
    );
    (system, user)
}
