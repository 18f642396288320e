//! Ollama HTTP backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    BackendError, BackendKind, BackendResult, Generation, ModelBackend, base_url, config_str,
    handle_response, send,
};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Usage fields copied from an Ollama generate response into the metrics.
const METRIC_FIELDS: &[&str] = &[
    "total_duration",
    "load_duration",
    "prompt_eval_count",
    "prompt_eval_duration",
    "eval_count",
    "eval_duration",
];

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Client for a model served by Ollama.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    /// Base URL (e.g., "http://localhost:11434").
    host: String,
    /// Model name as Ollama knows it.
    model: String,
}

impl OllamaBackend {
    pub fn new(client: Client, host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
            model: model.into(),
        }
    }

    /// Config keys: `host` (default local Ollama), `model` (defaults to the model id).
    pub fn from_config(
        model_id: &str,
        config: &Map<String, Value>,
        client: Client,
    ) -> BackendResult<Self> {
        let host = base_url(
            config_str(config, "host")?.unwrap_or(DEFAULT_OLLAMA_HOST),
            "host",
        )?;
        let model = config_str(config, "model")?.unwrap_or(model_id);
        if model.trim().is_empty() {
            return Err(BackendError::InvalidConfig(
                "model name must not be empty".to_string(),
            ));
        }
        Ok(Self::new(client, host, model))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn serves(&self, name: &str) -> bool {
        name == self.model || name.strip_suffix(":latest") == Some(self.model.as_str())
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    /// Confirm the host lists the model among its tags.
    async fn check(&self) -> BackendResult<()> {
        let url = format!("{}/api/tags", self.host);
        let response = send(self.client.get(&url), &url).await?;
        let tags: TagsResponse = handle_response(response).await?;

        debug!(host = %self.host, count = tags.models.len(), "ollama tags fetched");

        if tags.models.iter().any(|m| self.serves(&m.name)) {
            Ok(())
        } else {
            Err(BackendError::ModelUnavailable(format!(
                "Model {} not found in Ollama at {}",
                self.model, self.host
            )))
        }
    }

    async fn generate(&self, prompt: &str) -> BackendResult<Generation> {
        let url = format!("{}/api/generate", self.host);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let response = send(self.client.post(&url).json(&request), &url).await?;
        let body: Value = handle_response(response).await?;

        let text = body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut metrics = Map::new();
        if let Some(Value::Object(reported)) = body.get("metrics") {
            metrics.extend(reported.clone());
        }
        for field in METRIC_FIELDS {
            if let Some(value) = body.get(*field) {
                metrics.insert((*field).to_string(), value.clone());
            }
        }

        Ok(Generation {
            response: text,
            metrics: Value::Object(metrics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_config_defaults() {
        let backend = OllamaBackend::from_config("llama3", &Map::new(), Client::new()).unwrap();
        assert_eq!(backend.host(), DEFAULT_OLLAMA_HOST);
        assert_eq!(backend.model, "llama3");
    }

    #[test]
    fn test_from_config_overrides() {
        let backend = OllamaBackend::from_config(
            "local",
            &config(json!({"host": "http://gpu-box:11434/", "model": "mistral"})),
            Client::new(),
        )
        .unwrap();
        assert_eq!(backend.host(), "http://gpu-box:11434");
        assert_eq!(backend.model, "mistral");
    }

    #[test]
    fn test_from_config_rejects_bad_host() {
        let err = OllamaBackend::from_config("m", &config(json!({"host": 42})), Client::new())
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));
    }

    #[test]
    fn test_latest_tag_matches() {
        let backend = OllamaBackend::new(Client::new(), DEFAULT_OLLAMA_HOST, "llama3");
        assert!(backend.serves("llama3"));
        assert!(backend.serves("llama3:latest"));
        assert!(!backend.serves("llama3:70b"));
        assert!(!backend.serves("llama"));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let backend = OllamaBackend::new(Client::new(), "http://127.0.0.1:1", "llama3");
        let err = backend.check().await.unwrap_err();
        assert!(matches!(err, BackendError::ConnectionFailed { .. }));
    }
}
