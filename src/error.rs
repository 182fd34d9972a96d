//! Error types for Cliniq
//!
//! This module defines the error taxonomy of the conversation engine,
//! using `thiserror` for ergonomic error handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed generation stream
///
/// Every failed stream is reduced to exactly one of these kinds. The kind
/// selects the fallback text shown in place of the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFailure {
    /// The user has exhausted their question allowance
    RateLimited,
    /// The client could not reach the generation service
    Offline,
    /// Anything else: overload, malformed payloads, missing ids
    ServerError,
}

impl StreamFailure {
    /// Parses a wire-level failure kind, mapping unknown kinds to `ServerError`
    ///
    /// # Examples
    ///
    /// ```
    /// use cliniq::error::StreamFailure;
    ///
    /// assert_eq!(StreamFailure::from_kind("rate_limited"), StreamFailure::RateLimited);
    /// assert_eq!(StreamFailure::from_kind("teapot"), StreamFailure::ServerError);
    /// ```
    pub fn from_kind(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "rate_limited" | "rate_limit" | "ratelimited" => Self::RateLimited,
            "offline" | "network" => Self::Offline,
            _ => Self::ServerError,
        }
    }

    /// Returns the wire name of this failure kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Offline => "offline",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for Cliniq operations
#[derive(Error, Debug)]
pub enum CliniqError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generation stream ended in failure
    #[error("Stream failed: {0}")]
    Stream(StreamFailure),

    /// A terminal success payload carried no thread id
    #[error("Completion payload is missing a thread id")]
    MissingThreadId,

    /// Thread store errors (read, write or delete)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The submitted question was empty after trimming
    #[error("Question must not be empty")]
    EmptyQuestion,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CliniqError {
    /// Reduces this error to the stream failure kind it represents
    ///
    /// A missing thread id and any non-stream error count as a server error.
    pub fn as_stream_failure(&self) -> StreamFailure {
        match self {
            Self::Stream(kind) => *kind,
            _ => StreamFailure::ServerError,
        }
    }
}

/// Result type alias for Cliniq operations
///
/// Uses `anyhow::Error` so callers keep rich context while still being able
/// to downcast to [`CliniqError`].
pub type Result<T> = anyhow::Result<T>;
