//! KBI-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, KbError>;

/// Top-level error type for the knowledge-base indexer.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("[KBI-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[KBI-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[KBI-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[KBI-2001] no handler claims path: {path}")]
    HandlerResolution { path: PathBuf },

    #[error("[KBI-2002] path mapping failure for {path}: {details}")]
    PathMapping { path: PathBuf, details: String },

    #[error("[KBI-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[KBI-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[KBI-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KBI-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[KBI-4001] plan validation failure: {details}")]
    PlanValidation { details: String },

    #[error("[KBI-4101] task {task_id} failed: {details}")]
    TaskFailed { task_id: String, details: String },

    #[error("[KBI-4102] task {task_id} blocked: dependency failed: {failed_dependency}")]
    DependencyFailed {
        task_id: String,
        failed_dependency: String,
    },

    #[error("[KBI-5001] summarizer failure: {details}")]
    Summarizer { details: String },

    #[error("[KBI-5002] summarizer response truncated for conversation {conversation_id}")]
    SummarizerTruncated { conversation_id: String },

    #[error("[KBI-5003] summarizer timed out after {secs}s")]
    SummarizerTimeout { secs: u64 },

    #[error("[KBI-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl KbError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "KBI-1001",
            Self::MissingConfig { .. } => "KBI-1002",
            Self::ConfigParse { .. } => "KBI-1003",
            Self::HandlerResolution { .. } => "KBI-2001",
            Self::PathMapping { .. } => "KBI-2002",
            Self::Serialization { .. } => "KBI-2101",
            Self::PermissionDenied { .. } => "KBI-3001",
            Self::Io { .. } => "KBI-3002",
            Self::ChannelClosed { .. } => "KBI-3003",
            Self::PlanValidation { .. } => "KBI-4001",
            Self::TaskFailed { .. } => "KBI-4101",
            Self::DependencyFailed { .. } => "KBI-4102",
            Self::Summarizer { .. } => "KBI-5001",
            Self::SummarizerTruncated { .. } => "KBI-5002",
            Self::SummarizerTimeout { .. } => "KBI-5003",
            Self::Runtime { .. } => "KBI-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Summarizer { .. }
                | Self::SummarizerTimeout { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for KbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for KbError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
