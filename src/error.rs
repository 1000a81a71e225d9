//! Error taxonomy shared by every stage of the download pipeline.
//!
//! Each variant maps to one failure class. Nothing in the library retries, so
//! callers are expected to print the error and stop.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::metadata::MediaKind;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URL or missing video identifier.
    #[error("invalid input: {0}")]
    Input(String),

    /// Filtering left nothing to download for one media kind.
    #[error("no {kind} format found after filtering")]
    NoFormat { kind: MediaKind },

    /// The requested itag is not part of the video's format set.
    #[error("format with itag {itag} not found")]
    FormatNotFound { itag: u32 },

    /// Remote metadata or stream failure (network, authorization, expired URL).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Local filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external merge tool could not be launched or exited non-zero.
    #[error("merge failed: {0}")]
    Merge(String),

    /// The shared cancellation token fired (Ctrl-C or deadline).
    #[error("operation cancelled")]
    Cancelled,

    /// Unreadable or malformed configuration file.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            source: None,
        }
    }

    pub fn provider_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Provider {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
