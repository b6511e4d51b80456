use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PreloadError>;

/// Failures raised while loading configuration, discovering files or
/// writing the preload script.
#[derive(Debug, Error)]
pub enum PreloadError {
    /// Missing or malformed `extra.preload` section, bad types, missing template.
    #[error("{0}")]
    Configuration(String),

    /// A configured file or root directory is missing or of the wrong kind.
    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A derived value was requested before it was computed.
    #[error("{0}")]
    State(&'static str),
}

impl PreloadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
