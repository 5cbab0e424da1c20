use super::{
    classify_api_error,
    sse::{chunk_stream, data_events, DecodedEvent},
    AiProvider, ChunkStream, TokenRates, Usage,
};
use crate::errors::PromptError;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

// --- Gemini-specific request and response structures ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize, Debug)]
struct PartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Finish reasons that mean the output was withheld for policy reasons.
const FILTERED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

fn decode_event(data: &str, rates: &TokenRates) -> Result<DecodedEvent, PromptError> {
    let response: GeminiStreamResponse = serde_json::from_str(data)
        .map_err(|e| PromptError::AiDeserialization(format!("{e}: {data}")))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(PromptError::ContentFiltered(format!("prompt blocked: {reason}")));
    }

    let mut decoded = DecodedEvent::default();
    for candidate in response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if FILTERED_FINISH_REASONS.contains(&reason) {
                return Err(PromptError::ContentFiltered(format!("finish reason {reason}")));
            }
        }
        if let Some(content) = candidate.content {
            decoded.texts.extend(content.parts.into_iter().map(|p| p.text));
        }
    }

    decoded.usage = response.usage_metadata.map(|u| Usage {
        provider: "gemini".to_string(),
        model: response.model_version,
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        cost_usd: rates.cost(u.prompt_token_count, u.candidates_token_count),
    });
    Ok(decoded)
}

// --- Gemini Provider implementation ---

/// A provider for the Google Gemini `streamGenerateContent` API.
///
/// `api_url` is the model's streaming endpoint, e.g.
/// `https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent`.
#[derive(Clone, Debug)]
pub struct GeminiProvider {
    client: ReqwestClient,
    api_url: String,
    api_key: String,
    rates: TokenRates,
}

impl GeminiProvider {
    pub fn new(api_url: String, api_key: String) -> Result<Self, PromptError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(PromptError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            api_url,
            api_key,
            rates: TokenRates::default(),
        })
    }

    pub fn with_rates(mut self, rates: TokenRates) -> Self {
        self.rates = rates;
        self
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChunkStream, PromptError> {
        let request_body = GeminiRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: user_prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        debug!(url = %self.api_url, "--> Streaming from Gemini");
        let response = self
            .client
            .post(&self.api_url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&request_body)
            .send()
            .await
            .map_err(PromptError::AiRequest)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, error_text));
        }

        let rates = self.rates;
        Ok(chunk_stream(
            data_events(response.bytes_stream()),
            move |data| decode_event(data, &rates),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_and_usage() {
        let decoded = decode_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"summ"}],"role":"model"}}],
                "usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":3},
                "modelVersion":"gemini-2.0-flash"}"#,
            &TokenRates::default(),
        )
        .unwrap();
        assert_eq!(decoded.texts, vec!["{\"summ".to_string()]);
        let usage = decoded.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.model.as_deref(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn test_safety_signals_are_content_filtered() {
        let blocked = decode_event(
            r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#,
            &TokenRates::default(),
        )
        .unwrap_err();
        assert!(blocked.is_content_filter());

        let stopped = decode_event(
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
            &TokenRates::default(),
        )
        .unwrap_err();
        assert!(stopped.is_content_filter());

        let ok = decode_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"}"}]},"finishReason":"STOP"}]}"#,
            &TokenRates::default(),
        )
        .unwrap();
        assert_eq!(ok.texts, vec!["}".to_string()]);
    }
}
