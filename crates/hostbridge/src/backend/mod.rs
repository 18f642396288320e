//! Model backends and the registry of connected models.
//!
//! Each backend kind implements [`ModelBackend`]; the registry picks the
//! implementation at connect time and only ever talks to the trait.

mod claude;
mod claude_desktop;
mod error;
mod ollama;
mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};

pub use claude::ClaudeBackend;
pub use claude_desktop::ClaudeDesktopBackend;
pub use error::{BackendError, BackendResult};
pub use ollama::OllamaBackend;
pub use registry::BackendRegistry;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ollama,
    Claude,
    ClaudeDesktop,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::Claude => "claude",
            BackendKind::ClaudeDesktop => "claude_desktop",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "claude" | "anthropic" => Ok(BackendKind::Claude),
            "claude_desktop" | "claude-desktop" => Ok(BackendKind::ClaudeDesktop),
            _ => Err(BackendError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Text produced by a backend plus whatever usage data it reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub response: String,
    pub metrics: Value,
}

/// A connected inference backend.
#[async_trait]
pub trait ModelBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Verify the backend is usable. Runs once, before registration.
    async fn check(&self) -> BackendResult<()>;

    /// Send a prompt and return the model's answer.
    async fn generate(&self, prompt: &str) -> BackendResult<Generation>;
}

/// Build the adapter for `kind` from a connection config.
pub fn build_backend(
    model_id: &str,
    kind: BackendKind,
    config: &Value,
    client: &Client,
) -> BackendResult<Arc<dyn ModelBackend>> {
    let config = config_object(config)?;
    let backend: Arc<dyn ModelBackend> = match kind {
        BackendKind::Ollama => Arc::new(OllamaBackend::from_config(model_id, config, client.clone())?),
        BackendKind::Claude => Arc::new(ClaudeBackend::from_config(config, client.clone())?),
        BackendKind::ClaudeDesktop => {
            Arc::new(ClaudeDesktopBackend::from_config(config, client.clone())?)
        }
    };
    Ok(backend)
}

static EMPTY_CONFIG: std::sync::LazyLock<Map<String, Value>> = std::sync::LazyLock::new(Map::new);

fn config_object(config: &Value) -> BackendResult<&Map<String, Value>> {
    match config {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(&EMPTY_CONFIG),
        other => Err(BackendError::InvalidConfig(format!(
            "config must be an object, got {other}"
        ))),
    }
}

/// Read an optional string setting.
fn config_str<'a>(config: &'a Map<String, Value>, key: &str) -> BackendResult<Option<&'a str>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(BackendError::InvalidConfig(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// Normalize a base URL: require a scheme and drop trailing slashes.
fn base_url(value: &str, key: &str) -> BackendResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(BackendError::InvalidConfig(format!(
            "{key} must start with http:// or https://, got '{value}'"
        )));
    }
    Ok(trimmed.to_string())
}

/// Send a request, turning transport failures into `ConnectionFailed`.
async fn send(request: reqwest::RequestBuilder, url: &str) -> BackendResult<reqwest::Response> {
    request
        .send()
        .await
        .map_err(|e| BackendError::ConnectionFailed {
            url: url.to_string(),
            message: e.to_string(),
        })
}

/// Parse a JSON body, or turn a non-success status into `BackendError::Api`.
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> BackendResult<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    } else {
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.chars().take(500).collect()
        };
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Ollama);
        assert_eq!("Claude".parse::<BackendKind>().unwrap(), BackendKind::Claude);
        assert_eq!(
            "claude_desktop".parse::<BackendKind>().unwrap(),
            BackendKind::ClaudeDesktop
        );
        assert!(matches!(
            "openai".parse::<BackendKind>(),
            Err(BackendError::UnsupportedKind(k)) if k == "openai"
        ));
    }

    #[test]
    fn test_config_must_be_object() {
        let client = Client::new();
        let err = build_backend("m", BackendKind::Ollama, &json!([1, 2]), &client).unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));

        assert!(build_backend("m", BackendKind::Ollama, &Value::Null, &client).is_ok());
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(
            base_url("http://localhost:11434/", "host").unwrap(),
            "http://localhost:11434"
        );
        assert!(base_url("localhost:11434", "host").is_err());
    }
}
