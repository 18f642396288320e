//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Placeholder key shipped in sample configs; never accepted.
pub const PLACEHOLDER_API_KEY: &str = "your-secret-api-key";

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static bearer token clients must present.
    /// Supports `env:VAR_NAME` to read it from the environment.
    pub api_key: Option<String>,

    /// Allowed CORS origins. Empty disables CORS; `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl AuthConfig {
    /// Create a config with a literal key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Resolve the API key, expanding `env:VAR_NAME` syntax.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigValidationError> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, ConfigValidationError> {
        match &self.api_key {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match env(var_name) {
                        Some(key) if !key.is_empty() => Ok(Some(key)),
                        Some(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        None => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Validate the configuration and return the resolved key.
    pub fn validate(&self) -> Result<String, ConfigValidationError> {
        Self::check_key(self.resolve_api_key()?)
    }

    fn check_key(key: Option<String>) -> Result<String, ConfigValidationError> {
        match key {
            None => Err(ConfigValidationError::MissingApiKey),
            Some(key) if key.trim().is_empty() => Err(ConfigValidationError::MissingApiKey),
            Some(key) if key == PLACEHOLDER_API_KEY => Err(ConfigValidationError::InsecureApiKey),
            Some(key) => Ok(key),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// No API key configured.
    MissingApiKey,
    /// API key is the sample placeholder.
    InsecureApiKey,
    /// Environment variable not found (for `env:VAR_NAME` syntax).
    EnvVarNotFound(String),
    /// Environment variable is empty (for `env:VAR_NAME` syntax).
    EnvVarEmpty(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => {
                write!(
                    f,
                    "API key is required. Set auth.api_key in config or HOSTBRIDGE_AUTH__API_KEY."
                )
            }
            Self::InsecureApiKey => {
                write!(
                    f,
                    "API key cannot be the sample placeholder '{}'. Please configure a real secret.",
                    PLACEHOLDER_API_KEY
                )
            }
            Self::EnvVarNotFound(var) => {
                write!(
                    f,
                    "Environment variable '{}' not found (referenced via env:{} in config).",
                    var, var
                )
            }
            Self::EnvVarEmpty(var) => {
                write!(
                    f,
                    "Environment variable '{}' is empty (referenced via env:{} in config).",
                    var, var
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}
