pub mod gemini;
pub mod local;
pub mod sse;

use crate::errors::PromptError;
use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub use gemini::GeminiProvider;
pub use local::LocalAiProvider;

/// A streamed response: text deltas, then at most one `Usage` at the end.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, PromptError>>;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Usage(Usage),
}

/// Token accounting reported by the provider for one call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Usage {
    pub provider: String,
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    /// Sums two calls made during the same attempt.
    pub fn merge(&mut self, other: &Usage) {
        if self.provider.is_empty() {
            self.provider = other.provider.clone();
        }
        if self.model.is_none() {
            self.model = other.model.clone();
        }
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Prices used to estimate the dollar cost of a call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenRates {
    #[serde(default)]
    pub prompt_usd_per_million: f64,
    #[serde(default)]
    pub completion_usd_per_million: f64,
}

impl TokenRates {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_usd_per_million
            + completion_tokens as f64 * self.completion_usd_per_million)
            / 1_000_000.0
    }
}

/// A streaming large language model.
///
/// Safety-filter rejections must surface as `PromptError::ContentFiltered`, either from
/// `stream_generate` itself or as an item of the stream, so callers can fall back to
/// another provider.
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    /// A short name used in logs and usage records.
    fn name(&self) -> &str;

    async fn stream_generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChunkStream, PromptError>;

    /// Collects the whole streamed response into a string.
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PromptError> {
        let mut stream = self.stream_generate(system_prompt, user_prompt).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Text(delta) = chunk? {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }
}

dyn_clone::clone_trait_object!(AiProvider);

/// Maps a non-success HTTP body to the right error.
pub(crate) fn classify_api_error(status: reqwest::StatusCode, body: String) -> PromptError {
    let lowered = body.to_lowercase();
    if lowered.contains("content_filter") || lowered.contains("safety") {
        PromptError::ContentFiltered(body)
    } else {
        PromptError::AiApi(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge_and_rates() {
        let rates = TokenRates {
            prompt_usd_per_million: 1.0,
            completion_usd_per_million: 2.0,
        };
        let mut total = Usage::default();
        total.merge(&Usage {
            provider: "gemini".into(),
            model: Some("flash".into()),
            prompt_tokens: 1_000,
            completion_tokens: 500,
            cost_usd: rates.cost(1_000, 500),
        });
        total.merge(&Usage {
            provider: "local".into(),
            model: None,
            prompt_tokens: 10,
            completion_tokens: 0,
            cost_usd: 0.0,
        });
        assert_eq!(total.provider, "gemini");
        assert_eq!(total.prompt_tokens, 1_010);
        assert!((total.cost_usd - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_classify_api_error() {
        let filtered = classify_api_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"content_filter"}}"#.into(),
        );
        assert!(filtered.is_content_filter());
        let other = classify_api_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops".into());
        assert!(matches!(other, PromptError::AiApi(msg) if msg.contains("500")));
    }
}
