//! Error types for the generation and processing pipeline.
//!
//! This module provides a unified error hierarchy using `thiserror` so every
//! pipeline component surfaces exactly one structured failure kind.
//!
//! # Error Categories
//!
//! - `ConfigError`: Missing or invalid configuration
//! - `Error::Validation`: Malformed request parameters, detected before any network call
//! - `Error::Transport`: Network-level failures (timeout, DNS, connection refused)
//! - `Error::Auth`: Credential rejected by the provider
//! - `Error::Api`: Provider errors with endpoint and HTTP status context
//! - `Error::EmptyResult`: Provider succeeded but produced no image
//! - `Error::Decode`: Malformed image payload in a provider response
//! - `Error::Conversion`: Malformed or unsupported image data, named by path
//! - `Error::Io`: File system failures, named by path

use std::path::Path;

use thiserror::Error;

/// Unified error type for the pipeline.
///
/// No component swallows an error and substitutes a default silently; the one
/// internal correction (the aspect-ratio retry in the generation client) never
/// surfaces through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing env vars, invalid values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input validation errors, detected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/transport failures (timeout, DNS, connection refused)
    #[error("Transport error for {endpoint}: {message}")]
    Transport {
        /// The endpoint that was being called
        endpoint: String,
        /// Description of the transport failure
        message: String,
    },

    /// Credential rejected by the provider; never retried
    #[error("Authentication rejected by provider (HTTP {status_code}): {message}")]
    Auth {
        /// HTTP status code returned by the provider
        status_code: u16,
        /// Error message from the provider
        message: String,
    },

    /// Provider API errors with endpoint and HTTP status context
    #[error("API error for {endpoint} (HTTP {status_code}): {message}")]
    Api {
        /// The API endpoint that was called
        endpoint: String,
        /// HTTP status code returned by the API
        status_code: u16,
        /// Error message from the API or describing the failure
        message: String,
    },

    /// Provider returned success but the response contains no image part
    #[error("Provider response contains no image part")]
    EmptyResult,

    /// Malformed image payload in a provider response
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed or unsupported image data during format conversion
    #[error("Conversion error for {path}: {message}")]
    Conversion {
        /// The path of the offending image
        path: String,
        /// Description of the failure
        message: String,
    },

    /// File system I/O errors with the offending path
    #[error("I/O error for {path}: {source}")]
    Io {
        /// The path being read or written
        path: String,
        /// The underlying I/O error
        source: std::io::Error,
    },
}

impl Error {
    /// Create a new validation error.
    ///
    /// # Example
    ///
    /// ```
    /// use gemini_imagen::error::Error;
    ///
    /// let err = Error::validation("prompt cannot be empty");
    /// assert!(err.to_string().contains("prompt cannot be empty"));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create a new transport error for the given endpoint.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new authentication error.
    pub fn auth(status_code: u16, message: impl Into<String>) -> Self {
        Error::Auth {
            status_code,
            message: message.into(),
        }
    }

    /// Create a new API error with endpoint, status code, and message.
    ///
    /// # Example
    ///
    /// ```
    /// use gemini_imagen::error::Error;
    ///
    /// let err = Error::api("https://api.example.com/v1/generate", 500, "Internal server error");
    /// assert!(err.to_string().contains("api.example.com"));
    /// assert!(err.to_string().contains("500"));
    /// ```
    pub fn api(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode(message.into())
    }

    /// Create a new conversion error naming the offending path.
    pub fn conversion(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Error::Conversion {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Create a new I/O error naming the offending path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Configuration errors.
///
/// These errors occur when loading or validating configuration from
/// environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    /// Create a new missing environment variable error.
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        ConfigError::MissingEnvVar(name.into())
    }

    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// Validation failure for a single request field.
///
/// Parameter validation collects every failing field before reporting, so a
/// caller sees all problems at once rather than one per round-trip.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error for a field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Fold a list of per-field failures into a single [`Error::Validation`].
pub fn validation_failure(errors: Vec<ValidationError>) -> Error {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    Error::validation(messages.join("; "))
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
