//! Token prices per generation mode.

use crate::types::GenerationMode;
use serde::{Deserialize, Serialize};

/// One price per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCosts {
    pub quick: u64,
    pub standard: u64,
    pub deep: u64,
    pub lectio: u64,
    pub sermon: u64,
}

impl ModeCosts {
    pub fn for_mode(&self, mode: GenerationMode) -> u64 {
        match mode {
            GenerationMode::Quick => self.quick,
            GenerationMode::Standard => self.standard,
            GenerationMode::Deep => self.deep,
            GenerationMode::Lectio => self.lectio,
            GenerationMode::Sermon => self.sermon,
        }
    }
}

fn default_generation_costs() -> ModeCosts {
    ModeCosts {
        quick: 5,
        standard: 10,
        deep: 20,
        lectio: 12,
        sermon: 25,
    }
}

fn default_access_costs() -> ModeCosts {
    ModeCosts {
        quick: 2,
        standard: 5,
        deep: 10,
        lectio: 6,
        sermon: 12,
    }
}

fn default_translation_surcharge() -> u64 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost of generating a guide that is not cached yet.
    #[serde(default = "default_generation_costs")]
    pub generation: ModeCosts,
    /// Cost of reading a cached guide created by somebody else.
    #[serde(default = "default_access_costs")]
    pub access: ModeCosts,
    /// Added to generation cost for languages other than English.
    #[serde(default = "default_translation_surcharge")]
    pub translation_surcharge: u64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            generation: default_generation_costs(),
            access: default_access_costs(),
            translation_surcharge: default_translation_surcharge(),
        }
    }
}

fn is_english(language: &str) -> bool {
    language == "en" || language.starts_with("en-")
}

impl Pricing {
    pub fn generation_cost(&self, mode: GenerationMode, language: &str) -> u64 {
        let base = self.generation.for_mode(mode);
        if is_english(language) {
            base
        } else {
            base + self.translation_surcharge
        }
    }

    pub fn access_cost(&self, mode: GenerationMode, _language: &str) -> u64 {
        self.access.for_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_cost_adds_surcharge_outside_english() {
        let pricing = Pricing::default();
        assert_eq!(pricing.generation_cost(GenerationMode::Standard, "en"), 10);
        assert_eq!(pricing.generation_cost(GenerationMode::Standard, "en-gb"), 10);
        assert_eq!(pricing.generation_cost(GenerationMode::Standard, "es"), 13);
        assert_eq!(pricing.access_cost(GenerationMode::Sermon, "es"), 12);
    }
}
