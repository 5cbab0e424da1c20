//! Which fields each generation pass asks the model for.

use crate::types::{GenerationMode, SectionKind};

/// One top-level JSON field requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub section: SectionKind,
    pub shape: FieldShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Text,
    List,
    Object,
}

impl FieldShape {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldShape::Text => "string",
            FieldShape::List => "array of strings",
            FieldShape::Object => "object",
        }
    }
}

const fn field(name: &'static str, section: SectionKind, shape: FieldShape) -> FieldSpec {
    FieldSpec {
        name,
        section,
        shape,
    }
}

const SUMMARY: FieldSpec = field("summary", SectionKind::Summary, FieldShape::Text);
const INTERPRETATION: FieldSpec =
    field("interpretation", SectionKind::Interpretation, FieldShape::Text);
const INTERPRETATION_PART1: FieldSpec =
    field("interpretation_part1", SectionKind::Interpretation, FieldShape::Text);
const INTERPRETATION_PART2: FieldSpec =
    field("interpretation_part2", SectionKind::Interpretation, FieldShape::Text);
const CONTEXT: FieldSpec = field("context", SectionKind::Context, FieldShape::Text);
const HISTORICAL_BACKGROUND: FieldSpec = field(
    "historical_background",
    SectionKind::HistoricalBackground,
    FieldShape::Text,
);
const RELATED_VERSES: FieldSpec =
    field("related_verses", SectionKind::RelatedVerses, FieldShape::List);
const REFLECTION_QUESTIONS: FieldSpec = field(
    "reflection_questions",
    SectionKind::ReflectionQuestions,
    FieldShape::List,
);
const PRAYER_POINTS: FieldSpec = field("prayer_points", SectionKind::PrayerPoints, FieldShape::List);
const LECTIO: FieldSpec = field("lectio", SectionKind::Lectio, FieldShape::Text);
const MEDITATIO: FieldSpec = field("meditatio", SectionKind::Meditatio, FieldShape::Text);
const ORATIO: FieldSpec = field("oratio", SectionKind::Oratio, FieldShape::Text);
const CONTEMPLATIO: FieldSpec = field("contemplatio", SectionKind::Contemplatio, FieldShape::Text);
const SERMON_OUTLINE: FieldSpec =
    field("sermon_outline", SectionKind::SermonOutline, FieldShape::Object);
const ILLUSTRATIONS: FieldSpec = field("illustrations", SectionKind::Illustrations, FieldShape::List);
const APPLICATION_POINTS: FieldSpec = field(
    "application_points",
    SectionKind::ApplicationPoints,
    FieldShape::List,
);

/// The fields of one model call, in logical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub fields: Vec<FieldSpec>,
}

impl PassPlan {
    fn of(fields: &[FieldSpec]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Splits a mode into passes. Long modes are split so no single response runs into
/// output limits; their interpretation is written in two fragments.
pub fn plan_for(mode: GenerationMode) -> Vec<PassPlan> {
    match mode {
        GenerationMode::Quick | GenerationMode::Standard => vec![PassPlan::of(&[
            SUMMARY,
            INTERPRETATION,
            CONTEXT,
            RELATED_VERSES,
            REFLECTION_QUESTIONS,
            PRAYER_POINTS,
        ])],
        GenerationMode::Lectio => vec![PassPlan::of(&[
            SUMMARY,
            INTERPRETATION,
            CONTEXT,
            RELATED_VERSES,
            REFLECTION_QUESTIONS,
            PRAYER_POINTS,
            LECTIO,
            MEDITATIO,
            ORATIO,
            CONTEMPLATIO,
        ])],
        GenerationMode::Deep => vec![
            PassPlan::of(&[SUMMARY, INTERPRETATION_PART1, CONTEXT, HISTORICAL_BACKGROUND]),
            PassPlan::of(&[
                INTERPRETATION_PART2,
                RELATED_VERSES,
                REFLECTION_QUESTIONS,
                PRAYER_POINTS,
            ]),
        ],
        GenerationMode::Sermon => vec![
            PassPlan::of(&[SUMMARY, INTERPRETATION, CONTEXT, SERMON_OUTLINE]),
            PassPlan::of(&[
                RELATED_VERSES,
                REFLECTION_QUESTIONS,
                PRAYER_POINTS,
                ILLUSTRATIONS,
                APPLICATION_POINTS,
            ]),
        ],
    }
}
