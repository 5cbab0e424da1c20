//! # Common Test Utilities
//!
//! `TestApp` spawns a real server on a random port, backed by a temporary SQLite file
//! and an `httpmock::MockServer` standing in for an OpenAI-compatible model endpoint.

// Not every test file uses every helper.
#![allow(unused)]

use anyhow::Result;
use devotio::generation::plan_for;
use devotio::types::GenerationMode;
use devotio_server::{
    auth::middleware::Claims,
    config, router,
    state::{build_app_state, AppState},
};
use devotio_test_utils::{chunked, guide_json};
use httpmock::{Method::POST, Mock, MockServer};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::{
    fs::File,
    io::Write,
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::{tempdir, NamedTempFile, TempDir};
use tokio::{net::TcpListener, task::JoinHandle};

pub const TEST_JWT_SECRET: &str = "test-secret";
pub const CHAT_PATH: &str = "/v1/chat/completions";

/// A parsed server-sent event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub name: String,
    pub data: Value,
}

/// Splits a complete SSE body into its named events. Keep-alive comments are skipped.
pub fn parse_sse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push_str(value.trim_start());
                }
            }
            let name = name?;
            let data = serde_json::from_str(&data).unwrap_or(Value::Null);
            Some(SseEvent { name, data })
        })
        .collect()
}

/// An OpenAI-compatible streaming body carrying the given text.
pub fn chat_sse_body(text: &str) -> String {
    let mut body = String::new();
    for delta in chunked(text, 16) {
        let event = json!({"model": "mock-chat-model", "choices": [{"delta": {"content": delta}}]});
        body.push_str(&format!("data: {event}\n\n"));
    }
    let usage = json!({
        "model": "mock-chat-model",
        "choices": [],
        "usage": {"prompt_tokens": 12, "completion_tokens": 34}
    });
    body.push_str(&format!("data: {usage}\n\ndata: [DONE]\n\n"));
    body
}

/// Mints a token for `sub` signed with the test secret.
pub fn token_for(sub: &str) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize
        + 3600;
    let claims = Claims {
        sub: sub.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// A harness for end-to-end testing of the Axum server.
pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub mock_server: MockServer,
    pub app_state: AppState,
    _db_file: NamedTempFile,
    _config_dir: TempDir,
    _server_handle: JoinHandle<()>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestApp {
    /// Spawns the application server and returns a `TestApp` instance.
    pub async fn spawn() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .try_init();

        let mock_server = MockServer::start_async().await;
        let db_file = NamedTempFile::new()?;
        let db_path = db_file.path().to_path_buf();

        let config_dir = tempdir()?;
        let config_path = config_dir.path().join("config.yml");
        let config_content = format!(
            r#"
port: 0
db_url: "{}"
jwt_secret: "{TEST_JWT_SECRET}"
providers:
  local_default:
    provider: "local"
    api_url: "{}"
    api_key: null
    model_name: "mock-chat-model"
generation:
  provider_chain: ["local_default"]
  poll_interval_ms: 20
  poll_ceiling_secs: 10
  keepalive_secs: 1
billing:
  starting_balance: 50
"#,
            db_path.to_string_lossy(),
            mock_server.url(CHAT_PATH)
        );
        let mut file = File::create(&config_path)?;
        file.write_all(config_content.as_bytes())?;

        let config_path = config_path.to_string_lossy().into_owned();
        let config = config::get_config(Some(config_path.as_str()))?;
        let app_state = build_app_state(config).await?;
        let app_state_for_harness = app_state.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let address = format!("http://{addr}");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server_handle = tokio::spawn(async move {
            let app = router::create_router(app_state);
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                tracing::error!("[TestApp] Server error: {}", e);
            }
        });

        Ok(Self {
            address,
            client: Client::new(),
            mock_server,
            app_state: app_state_for_harness,
            _db_file: db_file,
            _config_dir: config_dir,
            _server_handle: server_handle,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Answers every chat completion with a full quick-mode guide.
    pub async fn mock_quick_guide(&self) -> Mock<'_> {
        let body = chat_sse_body(&guide_json(&plan_for(GenerationMode::Quick)[0]));
        self.mock_server
            .mock_async(|when, then| {
                when.method(POST).path(CHAT_PATH);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.address)
    }

    /// Posts a guide request and reads the whole event stream.
    pub async fn stream_guide(&self, auth: Auth<'_>, payload: Value) -> Result<Vec<SseEvent>> {
        let request = self.client.post(self.url("/guides/stream")).json(&payload);
        let response = auth.apply(request).send().await?;
        anyhow::ensure!(
            response.status().is_success(),
            "stream request failed with {}",
            response.status()
        );
        Ok(parse_sse(&response.text().await?))
    }

    pub async fn get_json(&self, auth: Auth<'_>, path: &str) -> Result<(u16, Value)> {
        let response = auth.apply(self.client.get(self.url(path))).send().await?;
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// How a test request identifies its caller.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    Bearer(&'a str),
    Session(&'a str),
    None,
}

impl Auth<'_> {
    pub fn apply(self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Session(id) => request.header("X-Session-Id", id),
            Auth::None => request,
        }
    }
}

pub fn quick_request(input: &str) -> Value {
    json!({"input": input, "input_type": "scripture", "mode": "quick"})
}
