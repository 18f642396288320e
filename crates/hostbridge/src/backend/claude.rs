//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{
    BackendError, BackendKind, BackendResult, Generation, ModelBackend, base_url, config_str,
    handle_response, send,
};

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Client for a Claude model behind the Anthropic API.
#[derive(Clone)]
pub struct ClaudeBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f64,
}

impl std::fmt::Debug for ClaudeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl ClaudeBackend {
    pub fn from_config(config: &Map<String, Value>, client: Client) -> BackendResult<Self> {
        Self::from_config_with_env(config, client, |name| std::env::var(name).ok())
    }

    fn from_config_with_env(
        config: &Map<String, Value>,
        client: Client,
        env: impl Fn(&str) -> Option<String>,
    ) -> BackendResult<Self> {
        let api_key = resolve_api_key(config_str(config, "api_key")?, &env)?;

        let model = config_str(config, "model")?
            .or(config_str(config, "model_id")?)
            .unwrap_or(DEFAULT_CLAUDE_MODEL)
            .to_string();

        let base_url = base_url(
            config_str(config, "base_url")?.unwrap_or(DEFAULT_ANTHROPIC_URL),
            "base_url",
        )?;

        let max_tokens = match config.get("max_tokens") {
            None | Some(Value::Null) => 1000,
            Some(value) => value
                .as_u64()
                .filter(|n| *n > 0 && *n <= u32::MAX as u64)
                .map(|n| n as u32)
                .ok_or_else(|| {
                    BackendError::InvalidConfig("max_tokens must be a positive integer".to_string())
                })?,
        };

        let temperature = match config.get("temperature") {
            None | Some(Value::Null) => 0.7,
            Some(value) => value
                .as_f64()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| {
                    BackendError::InvalidConfig(
                        "temperature must be a number between 0.0 and 1.0".to_string(),
                    )
                })?,
        };

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
            max_tokens,
            temperature,
        })
    }
}

/// Config value, `env:VAR` indirection, or the standard environment variable.
fn resolve_api_key(
    configured: Option<&str>,
    env: &impl Fn(&str) -> Option<String>,
) -> BackendResult<String> {
    let configured = configured.map(str::trim).filter(|v| !v.is_empty());
    let key = match configured {
        Some(value) => match value.strip_prefix("env:") {
            Some(var) => env(var).ok_or_else(|| {
                BackendError::InvalidConfig(format!("environment variable {var} is not set"))
            })?,
            None => value.to_string(),
        },
        None => env(API_KEY_ENV).ok_or_else(|| {
            BackendError::InvalidConfig(format!(
                "missing api_key (set it in config or {API_KEY_ENV})"
            ))
        })?,
    };

    if key.trim().is_empty() {
        return Err(BackendError::InvalidConfig("api_key is empty".to_string()));
    }
    Ok(key)
}

#[async_trait]
impl ModelBackend for ClaudeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
    }

    /// Configuration was validated on construction; no request is spent here.
    async fn check(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> BackendResult<Generation> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = send(
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request),
            &url,
        )
        .await?;
        let body: MessagesResponse = handle_response(response).await?;

        let text = body
            .content
            .into_iter()
            .find(|block| block.kind == "text" || block.kind.is_empty())
            .and_then(|block| block.text)
            .ok_or_else(|| BackendError::Parse("No content in response".to_string()))?;

        Ok(Generation {
            response: text,
            metrics: json!({
                "model": body.model.unwrap_or_else(|| self.model.clone()),
                "usage": body.usage.unwrap_or_else(|| json!({})),
            }),
        })
    }
}
