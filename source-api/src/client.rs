//! Backend client: command and status-pull interfaces

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::command::{Command, CommandOutcome};
use crate::error::{ApiError, Result};
use crate::types::StateSnapshot;

/// Route of the full-state fetch
const STATE_PATH: &str = "api/audio/state";

/// Outbound interface to the backend process
///
/// `execute` returns `Ok(CommandOutcome::Rejected)` when the backend refused
/// the command and `Err` when no usable answer came back.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send a command to the backend control interface
    async fn execute(&self, command: &Command) -> Result<CommandOutcome>;

    /// Fetch the backend's full current state
    async fn fetch_state(&self) -> Result<StateSnapshot>;
}

/// Configuration for [`HttpBackendClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend REST interface
    /// Default: http://127.0.0.1:8000
    pub base_url: String,

    /// Per-request timeout
    /// Default: 5 seconds
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`BackendClient`] speaking the backend's JSON-over-HTTP interface
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBackendClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn execute(&self, command: &Command) -> Result<CommandOutcome> {
        let request = command.request();
        let url = self.url(&request.path)?;
        debug!(command = command.name(), %url, "Sending backend command");

        let mut builder = self.http.post(url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let outcome = interpret_response(status, &text)?;
        if let CommandOutcome::Rejected { reason } = &outcome {
            warn!(command = command.name(), status, %reason, "Backend rejected command");
        }
        Ok(outcome)
    }

    async fn fetch_state(&self) -> Result<StateSnapshot> {
        let url = self.url(STATE_PATH)?;
        debug!(%url, "Fetching backend state");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Classify a command response
///
/// 2xx is acceptance unless the body says `"success": false`; 4xx is a
/// rejection carrying the backend's `detail`/`error` text; anything else is
/// an error.
fn interpret_response(status: u16, text: &str) -> Result<CommandOutcome> {
    let body = parse_body(text);

    match status {
        200..=299 => {
            if body.get("success").and_then(Value::as_bool) == Some(false) {
                let reason = rejection_reason(&body).unwrap_or_else(|| "rejected by backend".into());
                Ok(CommandOutcome::Rejected { reason })
            } else {
                Ok(CommandOutcome::Accepted { response: body })
            }
        }
        400..=499 => {
            let reason = rejection_reason(&body).unwrap_or_else(|| format!("HTTP {}", status));
            Ok(CommandOutcome::Rejected { reason })
        }
        _ => Err(ApiError::Http {
            status,
            body: text.to_string(),
        }),
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn rejection_reason(body: &Value) -> Option<String> {
    if let Value::String(s) = body {
        return Some(s.clone());
    }
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string)
}
