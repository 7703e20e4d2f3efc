//! Configuration module for loading environment variables and settings.

use crate::error::ConfigError;

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "GOOGLE_AI_API_KEY";

/// Environment variable holding the process-start default model id.
pub const MODEL_ID_ENV: &str = "IMAGEN_MODEL_ID";

/// Environment variable overriding the provider base URL.
pub const BASE_URL_ENV: &str = "IMAGEN_BASE_URL";

/// Environment variable overriding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "IMAGEN_TIMEOUT_SECS";

/// Default base URL of the Gemini model API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default client-side timeout for generation requests, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Pipeline configuration.
///
/// The API key is carried here verbatim; how a credential is sourced
/// (environment, OS keychain, host configuration) is the caller's concern.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API key, sent as the `x-goog-api-key` header
    pub api_key: String,
    /// Base URL of the model API
    pub base_url: String,
    /// Default model id supplied by the environment at process start
    pub default_model: Option<String>,
    /// Client-side request timeout in seconds
    pub timeout_secs: u64,
}

impl Config {
    /// Create a configuration with the given API key and built-in defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if `GOOGLE_AI_API_KEY` is not set,
    /// or `ConfigError::InvalidValue` if `IMAGEN_TIMEOUT_SECS` is not a
    /// positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::missing_env_var(API_KEY_ENV))?;

        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let default_model = std::env::var(MODEL_ID_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty());

        let timeout_secs = match std::env::var(TIMEOUT_ENV) {
            Ok(raw) => raw.parse::<u64>().ok().filter(|t| *t > 0).ok_or_else(|| {
                ConfigError::invalid_value(TIMEOUT_ENV, format!("expected a positive integer, got '{raw}'"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_key,
            base_url,
            default_model,
            timeout_secs,
        })
    }

    /// Override the base URL (useful for pointing at a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the environment-supplied default model.
    pub fn with_default_model(mut self, model_id: impl Into<String>) -> Self {
        self.default_model = Some(model_id.into());
        self
    }

    /// Override the request timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Get the generation endpoint URL for a given model.
    pub fn generate_endpoint(&self, model_id: &str) -> String {
        format!("{}/{}:generateContent", self.base_url.trim_end_matches('/'), model_id)
    }

    /// Get the catalog listing endpoint URL.
    pub fn list_models_endpoint(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}
