//! Registry of connected models.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{BackendError, BackendKind, BackendResult, ModelBackend, build_backend};
use crate::protocol::ModelInfo;

/// Config keys whose values never leave the registry.
const SECRET_MARKERS: &[&str] = &["api_key", "token", "secret", "password"];

#[derive(Debug)]
struct Registration {
    kind: BackendKind,
    config: Value,
    backend: Arc<dyn ModelBackend>,
    connected_at: DateTime<Utc>,
}

/// Maps model ids to connected backends.
#[derive(Debug)]
pub struct BackendRegistry {
    models: RwLock<HashMap<String, Registration>>,
    client: Client,
}

impl BackendRegistry {
    /// Create an empty registry whose adapters share one HTTP client.
    pub fn new(request_timeout: Duration) -> BackendResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            models: RwLock::new(HashMap::new()),
            client,
        })
    }

    /// Build and check an adapter, then register it under `model_id`.
    ///
    /// Reconnecting an existing id replaces its registration. Nothing is
    /// registered if the check fails.
    pub async fn connect(&self, model_id: &str, model_type: &str, config: Value) -> BackendResult<()> {
        if model_id.trim().is_empty() {
            return Err(BackendError::InvalidConfig(
                "model_id must not be empty".to_string(),
            ));
        }
        let kind: BackendKind = model_type.parse()?;
        let backend = build_backend(model_id, kind, &config, &self.client)?;

        // Network check happens outside the lock.
        if let Err(e) = backend.check().await {
            warn!(model_id, kind = %kind, error = %e, "model connection check failed");
            return Err(e);
        }

        let registration = Registration {
            kind,
            config,
            backend,
            connected_at: Utc::now(),
        };
        let replaced = self
            .models
            .write()
            .await
            .insert(model_id.to_string(), registration)
            .is_some();

        info!(model_id, kind = %kind, replaced, "model connected");
        Ok(())
    }

    /// Remove a registration. Unknown ids are an error.
    pub async fn disconnect(&self, model_id: &str) -> BackendResult<()> {
        match self.models.write().await.remove(model_id) {
            Some(registration) => {
                info!(
                    model_id,
                    kind = %registration.kind,
                    connected_for_secs = (Utc::now() - registration.connected_at).num_seconds(),
                    "model disconnected"
                );
                Ok(())
            }
            None => Err(BackendError::NotConnected(model_id.to_string())),
        }
    }

    /// Snapshot of all registrations, secrets redacted, ordered by id.
    pub async fn list(&self) -> Vec<ModelInfo> {
        let models = self.models.read().await;
        let mut infos: Vec<ModelInfo> = models
            .iter()
            .map(|(model_id, registration)| ModelInfo {
                model_id: model_id.clone(),
                model_type: registration.kind.to_string(),
                config: redact(&registration.config),
            })
            .collect();
        infos.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        infos
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Send `prompt` to a connected model.
    ///
    /// Returns `{success, model_id, type, response, metrics}`.
    pub async fn query(&self, model_id: &str, prompt: &str) -> BackendResult<Value> {
        let (kind, backend) = {
            let models = self.models.read().await;
            let registration = models
                .get(model_id)
                .ok_or_else(|| BackendError::NotConnected(model_id.to_string()))?;
            (registration.kind, Arc::clone(&registration.backend))
        };

        debug!(model_id, kind = %kind, prompt_len = prompt.len(), "querying model");
        let generation = backend.generate(prompt).await?;

        Ok(json!({
            "success": true,
            "model_id": model_id,
            "type": kind.as_str(),
            "response": generation.response,
            "metrics": generation.metrics,
        }))
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

fn redact(config: &Value) -> Value {
    match config {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_secret_key(key) {
                        Value::String("***".to_string())
                    } else {
                        redact(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get, routing::post};

    fn registry() -> BackendRegistry {
        BackendRegistry::new(Duration::from_secs(5)).unwrap()
    }

    /// Serve a minimal Ollama API on an ephemeral port.
    async fn fake_ollama(models: &'static [&'static str]) -> String {
        let app = Router::new()
            .route(
                "/api/tags",
                get(move || async move {
                    let models: Vec<Value> = models.iter().map(|m| json!({"name": m})).collect();
                    Json(json!({ "models": models }))
                }),
            )
            .route(
                "/api/generate",
                post(|Json(body): Json<Value>| async move {
                    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                    Json(json!({
                        "model": body["model"],
                        "response": format!("echo: {prompt}"),
                        "done": true,
                        "eval_count": 7,
                    }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_connect_query_disconnect() {
        let host = fake_ollama(&["llama3:latest", "mistral:7b"]).await;
        let registry = registry();

        registry
            .connect("llama3", "ollama", json!({ "host": host }))
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);

        let result = registry.query("llama3", "hi").await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["type"], "ollama");
        assert_eq!(result["response"], "echo: hi");
        assert_eq!(result["metrics"]["eval_count"], 7);

        registry.disconnect("llama3").await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_model_is_not_registered() {
        let host = fake_ollama(&["mistral:7b"]).await;
        let registry = registry();

        let err = registry
            .connect("llama3", "ollama", json!({ "host": host }))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ModelUnavailable(_)));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_registered() {
        let registry = registry();
        let err = registry
            .connect("m1", "ollama", json!({"host": "http://127.0.0.1:1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ConnectionFailed { .. }));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_and_ids() {
        let registry = registry();
        assert!(matches!(
            registry.connect("m", "gpt", json!({})).await,
            Err(BackendError::UnsupportedKind(_))
        ));
        assert!(matches!(
            registry.disconnect("ghost").await,
            Err(BackendError::NotConnected(_))
        ));
        assert!(matches!(
            registry.query("ghost", "hello").await,
            Err(BackendError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_list_redacts_secrets() {
        let registry = registry();
        registry
            .connect(
                "claude",
                "claude",
                json!({"api_key": "sk-secret", "model": "claude-3-haiku", "extra": {"auth_token": "t"}}),
            )
            .await
            .unwrap();

        let models = registry.list().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_type, "claude");
        assert_eq!(models[0].config["api_key"], "***");
        assert_eq!(models[0].config["extra"]["auth_token"], "***");
        assert_eq!(models[0].config["model"], "claude-3-haiku");
    }

    #[tokio::test]
    async fn test_reconnect_replaces() {
        let host = fake_ollama(&["llama3"]).await;
        let registry = registry();

        registry
            .connect("llama3", "ollama", json!({ "host": host.clone() }))
            .await
            .unwrap();
        registry
            .connect("llama3", "ollama", json!({ "host": host, "note": "second" }))
            .await
            .unwrap();

        let models = registry.list().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].config["note"], "second");
    }
}
