//! # Input Fingerprinting
//!
//! Derives the content-addressing key for a guide. The key is a SHA-256 digest over
//! the input type, language, mode, and normalized input, so identical text under a
//! different mode or language never collides.

use crate::types::{GenerationMode, GuideRequest, InputType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FINGERPRINT_VERSION: &str = "v1";
const FIELD_SEPARATOR: char = '\u{1f}';

/// Lowercases, trims, and collapses internal whitespace runs to a single space.
pub fn normalize_input(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_language(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Hex-encoded SHA-256 over the versioned, separator-delimited payload.
pub fn fingerprint(
    input_type: InputType,
    raw_input: &str,
    language: &str,
    mode: GenerationMode,
) -> String {
    let language = normalize_language(language);
    let input = normalize_input(raw_input);
    let parts: [&str; 5] = [
        FINGERPRINT_VERSION,
        input_type.as_str(),
        &language,
        mode.as_str(),
        &input,
    ];

    let mut separator = [0u8; 4];
    let separator = FIELD_SEPARATOR.encode_utf8(&mut separator).as_bytes();

    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(separator);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// The unique key of a guide: one content row and at most one in-flight attempt each.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuideKey {
    pub input_type: InputType,
    pub fingerprint: String,
    pub language: String,
    pub mode: GenerationMode,
}

impl GuideKey {
    pub fn for_request(request: &GuideRequest) -> Self {
        Self {
            input_type: request.input_type,
            fingerprint: fingerprint(
                request.input_type,
                &request.input,
                &request.language,
                request.mode,
            ),
            language: normalize_language(&request.language),
            mode: request.mode,
        }
    }

    pub fn short(&self) -> &str {
        &self.fingerprint[..12.min(self.fingerprint.len())]
    }
}
