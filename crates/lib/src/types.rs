//! # Domain Types
//!
//! Input classification, generation modes, and the ordered set of guide sections.

use crate::errors::GuideError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Scripture,
    Topic,
    Question,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Scripture => "scripture",
            InputType::Topic => "topic",
            InputType::Question => "question",
        }
    }
}

impl FromStr for InputType {
    type Err = GuideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scripture" => Ok(InputType::Scripture),
            "topic" => Ok(InputType::Topic),
            "question" => Ok(InputType::Question),
            other => Err(GuideError::Validation(format!("Unknown input type '{other}'"))),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Quick,
    #[default]
    Standard,
    Deep,
    Lectio,
    Sermon,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 5] = [
        GenerationMode::Quick,
        GenerationMode::Standard,
        GenerationMode::Deep,
        GenerationMode::Lectio,
        GenerationMode::Sermon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Quick => "quick",
            GenerationMode::Standard => "standard",
            GenerationMode::Deep => "deep",
            GenerationMode::Lectio => "lectio",
            GenerationMode::Sermon => "sermon",
        }
    }

    /// Every section a finished guide in this mode carries, in logical order.
    pub fn sections(&self) -> Vec<SectionKind> {
        let mut sections = SectionKind::BASE.to_vec();
        sections.extend_from_slice(match self {
            GenerationMode::Quick | GenerationMode::Standard => &[],
            GenerationMode::Deep => &[SectionKind::HistoricalBackground],
            GenerationMode::Lectio => &[
                SectionKind::Lectio,
                SectionKind::Meditatio,
                SectionKind::Oratio,
                SectionKind::Contemplatio,
            ],
            GenerationMode::Sermon => &[
                SectionKind::SermonOutline,
                SectionKind::Illustrations,
                SectionKind::ApplicationPoints,
            ],
        });
        sections.sort();
        sections
    }
}

impl FromStr for GenerationMode {
    type Err = GuideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GenerationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| GuideError::Validation(format!("Unknown generation mode '{s}'")))
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guide section. Declaration order is the logical presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Summary,
    Interpretation,
    Context,
    HistoricalBackground,
    RelatedVerses,
    ReflectionQuestions,
    PrayerPoints,
    Lectio,
    Meditatio,
    Oratio,
    Contemplatio,
    SermonOutline,
    Illustrations,
    ApplicationPoints,
}

impl SectionKind {
    /// Sections present in every mode.
    pub const BASE: [SectionKind; 6] = [
        SectionKind::Summary,
        SectionKind::Interpretation,
        SectionKind::Context,
        SectionKind::RelatedVerses,
        SectionKind::ReflectionQuestions,
        SectionKind::PrayerPoints,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Summary => "summary",
            SectionKind::Interpretation => "interpretation",
            SectionKind::Context => "context",
            SectionKind::HistoricalBackground => "historical_background",
            SectionKind::RelatedVerses => "related_verses",
            SectionKind::ReflectionQuestions => "reflection_questions",
            SectionKind::PrayerPoints => "prayer_points",
            SectionKind::Lectio => "lectio",
            SectionKind::Meditatio => "meditatio",
            SectionKind::Oratio => "oratio",
            SectionKind::Contemplatio => "contemplatio",
            SectionKind::SermonOutline => "sermon_outline",
            SectionKind::Illustrations => "illustrations",
            SectionKind::ApplicationPoints => "application_points",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.to_string())).ok()
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Section contents keyed by kind. Iteration follows logical order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuideSections(BTreeMap<SectionKind, Value>);

impl GuideSections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: SectionKind, value: Value) -> Option<Value> {
        self.0.insert(kind, value)
    }

    pub fn get(&self, kind: SectionKind) -> Option<&Value> {
        self.0.get(&kind)
    }

    pub fn contains(&self, kind: SectionKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionKind, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Sections the mode requires that are not present yet.
    pub fn missing_for(&self, mode: GenerationMode) -> Vec<SectionKind> {
        mode.sections()
            .into_iter()
            .filter(|kind| !self.contains(*kind))
            .collect()
    }
}

impl FromIterator<(SectionKind, Value)> for GuideSections {
    fn from_iter<T: IntoIterator<Item = (SectionKind, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn default_language() -> String {
    "en".to_string()
}

/// A request for a study guide, as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideRequest {
    pub input: String,
    pub input_type: InputType,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub mode: GenerationMode,
}

impl GuideRequest {
    pub fn new(input: impl Into<String>, input_type: InputType) -> Self {
        Self {
            input: input.into(),
            input_type,
            language: default_language(),
            mode: GenerationMode::default(),
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_sections_are_in_logical_order() {
        let sections = GenerationMode::Deep.sections();
        assert_eq!(sections.first(), Some(&SectionKind::Summary));
        let interp = sections.iter().position(|s| *s == SectionKind::Interpretation);
        let verses = sections.iter().position(|s| *s == SectionKind::RelatedVerses);
        assert!(interp < verses);
        assert!(sections.contains(&SectionKind::HistoricalBackground));
        assert_eq!(GenerationMode::Standard.sections().len(), 6);
        assert_eq!(GenerationMode::Sermon.sections().len(), 9);
    }

    #[test]
    fn test_guide_sections_serialize_as_named_map() {
        let mut sections = GuideSections::new();
        sections.insert(SectionKind::PrayerPoints, json!(["a"]));
        sections.insert(SectionKind::Summary, json!("s"));
        let value = serde_json::to_value(&sections).unwrap();
        assert_eq!(value, json!({"summary": "s", "prayer_points": ["a"]}));

        let back: GuideSections = serde_json::from_value(value).unwrap();
        assert_eq!(back, sections);
        assert_eq!(
            back.missing_for(GenerationMode::Quick),
            vec![
                SectionKind::Interpretation,
                SectionKind::Context,
                SectionKind::RelatedVerses,
                SectionKind::ReflectionQuestions
            ]
        );
    }

    #[test]
    fn test_request_defaults() {
        let request: GuideRequest =
            serde_json::from_value(json!({"input": "John 3:16", "input_type": "scripture"}))
                .unwrap();
        assert_eq!(request.language, "en");
        assert_eq!(request.mode, GenerationMode::Standard);
        assert_eq!(SectionKind::parse("related_verses"), Some(SectionKind::RelatedVerses));
        assert_eq!(SectionKind::parse("nope"), None);
        assert!("lectio".parse::<GenerationMode>().is_ok());
        assert!("poem".parse::<GenerationMode>().is_err());
    }
}
