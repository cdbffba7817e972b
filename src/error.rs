//! Error types for the bridge.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Conversion error: {message}")]
    Conversion { message: String },

    #[error("Stream parse error: {message} (line: {line})")]
    StreamParse { message: String, line: String },

    #[error("Unsupported capability: {family} does not support {capability}")]
    UnsupportedCapability {
        family: &'static str,
        capability: &'static str,
    },

    #[error("Image processing error: {message}")]
    ImageProcessing { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    pub fn stream_parse(msg: impl Into<String>, line: &str) -> Self {
        Self::StreamParse {
            message: msg.into(),
            line: truncate(line, 200).to_string(),
        }
    }

    pub fn unsupported(family: &'static str, capability: &'static str) -> Self {
        Self::UnsupportedCapability { family, capability }
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageProcessing {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    /// Errors after which the call must not proceed to the backend.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Validation { .. } | Self::UnsupportedCapability { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
