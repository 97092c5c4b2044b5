//! Error types for browser verification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    /// A comparison did not hold. Carries the rendered matcher diagnostic.
    #[error("{0}")]
    Expectation(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Could not resolve {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Unsupported selector: {0}")]
    UnsupportedSelector(String),

    #[error("Unknown matcher: {0}")]
    UnknownMatcher(String),

    #[error("Visual regression: {0}")]
    VisualRegression(String),

    #[error("Baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl E2eError {
    pub fn resolution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        E2eError::Resolution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a failed expectation rather than a fault.
    pub fn is_expectation(&self) -> bool {
        matches!(self, E2eError::Expectation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, E2eError::Timeout(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
