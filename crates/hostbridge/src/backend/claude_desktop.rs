//! Local Claude Desktop bridge backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::info;

use super::{
    BackendKind, BackendResult, Generation, ModelBackend, base_url, config_str, handle_response,
    send,
};

pub const DEFAULT_DESKTOP_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    tokens: u64,
}

/// Client for the desktop app's local HTTP bridge.
#[derive(Debug)]
pub struct ClaudeDesktopBackend {
    client: Client,
    api_url: String,
    /// `model_name` reported by `/models/info` during the check.
    model_name: RwLock<Option<String>>,
}

impl ClaudeDesktopBackend {
    pub fn from_config(config: &Map<String, Value>, client: Client) -> BackendResult<Self> {
        let api_url = base_url(
            config_str(config, "api_url")?.unwrap_or(DEFAULT_DESKTOP_URL),
            "api_url",
        )?;
        Ok(Self {
            client,
            api_url,
            model_name: RwLock::new(None),
        })
    }
}

#[async_trait]
impl ModelBackend for ClaudeDesktopBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ClaudeDesktop
    }

    async fn check(&self) -> BackendResult<()> {
        let url = format!("{}/models/info", self.api_url);
        let response = send(self.client.get(&url), &url).await?;
        let model_info: Value = handle_response(response).await?;

        let name = model_info
            .get("model_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(api_url = %self.api_url, model = ?name, "connected to Claude Desktop");
        *self.model_name.write().await = name;
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> BackendResult<Generation> {
        let url = format!("{}/generate", self.api_url);
        let request = GenerateRequest {
            prompt,
            temperature: 0.7,
            max_tokens: 1000,
        };
        let response = send(self.client.post(&url).json(&request), &url).await?;
        let body: GenerateResponse = handle_response(response).await?;

        let model = self
            .model_name
            .read()
            .await
            .clone()
            .unwrap_or_else(|| "Claude".to_string());

        Ok(Generation {
            response: body.response,
            metrics: json!({"tokens": body.tokens, "model": model}),
        })
    }
}
