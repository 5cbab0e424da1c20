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

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize)]
struct LocalAiRequest<'a> {
    messages: Vec<LocalAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f32,
    max_tokens: i32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize, Debug, Clone)]
struct LocalAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct LocalAiChunk {
    #[serde(default)]
    choices: Vec<LocalAiChoice>,
    usage: Option<LocalAiUsage>,
    model: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct LocalAiChoice {
    delta: Option<LocalAiDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct LocalAiDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct LocalAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn decode_event(data: &str, rates: &TokenRates) -> Result<DecodedEvent, PromptError> {
    if data.trim() == "[DONE]" {
        return Ok(DecodedEvent::default());
    }
    let chunk: LocalAiChunk = serde_json::from_str(data)
        .map_err(|e| PromptError::AiDeserialization(format!("{e}: {data}")))?;

    if let Some(error) = chunk.error {
        let message = error.to_string();
        return Err(if message.contains("content_filter") {
            PromptError::ContentFiltered(message)
        } else {
            PromptError::AiApi(message)
        });
    }

    let mut decoded = DecodedEvent::default();
    for choice in chunk.choices {
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(PromptError::ContentFiltered(
                "finish reason content_filter".to_string(),
            ));
        }
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            decoded.texts.push(text);
        }
    }
    decoded.usage = chunk.usage.map(|u| Usage {
        provider: "local".to_string(),
        model: chunk.model,
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        cost_usd: rates.cost(u.prompt_tokens, u.completion_tokens),
    });
    Ok(decoded)
}

// --- Local Provider implementation ---

/// A provider for a local or OpenAI-compatible chat completions endpoint.
#[derive(Clone, Debug)]
pub struct LocalAiProvider {
    client: ReqwestClient,
    api_url: String,
    api_key: Option<String>,
    model: Option<String>,
    rates: TokenRates,
}

impl LocalAiProvider {
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Result<Self, PromptError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(PromptError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            rates: TokenRates::default(),
        })
    }

    pub fn with_rates(mut self, rates: TokenRates) -> Self {
        self.rates = rates;
        self
    }
}

#[async_trait]
impl AiProvider for LocalAiProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn stream_generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChunkStream, PromptError> {
        let request_body = LocalAiRequest {
            messages: vec![
                LocalAiMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                LocalAiMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            model: self.model.as_deref(),
            temperature: 0.4,
            max_tokens: 4096,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let mut request_builder = self.client.post(&self.api_url);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        debug!(url = %self.api_url, model = ?self.model, "--> Streaming from local AI");
        let response = request_builder
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
    fn test_decode_delta_done_and_usage() {
        let rates = TokenRates::default();
        let delta = decode_event(
            r#"{"choices":[{"delta":{"content":"{\"a\""},"finish_reason":null}]}"#,
            &rates,
        )
        .unwrap();
        assert_eq!(delta.texts, vec!["{\"a\"".to_string()]);

        assert!(decode_event("[DONE]", &rates).unwrap().texts.is_empty());

        let usage = decode_event(
            r#"{"choices":[],"model":"llama","usage":{"prompt_tokens":7,"completion_tokens":9}}"#,
            &rates,
        )
        .unwrap()
        .usage
        .unwrap();
        assert_eq!(usage.completion_tokens, 9);
        assert_eq!(usage.model.as_deref(), Some("llama"));
    }

    #[test]
    fn test_content_filter_finish_reason() {
        let err = decode_event(
            r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#,
            &TokenRates::default(),
        )
        .unwrap_err();
        assert!(err.is_content_filter());

        let err = decode_event(r#"{"error":{"message":"rate limited"}}"#, &TokenRates::default())
            .unwrap_err();
        assert!(!err.is_content_filter());
    }
}
