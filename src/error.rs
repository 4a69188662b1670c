//! Error types for the topic registry and message log.

use crate::transport::RemoteError;
use thiserror::Error;

/// Main error type for registry, log and facade operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Topic already exists in this application: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Invalid topic name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Data directory is locked by another process")]
    Locked,

    #[error("Unknown subscription protocol: {0:?}")]
    UnknownProtocol(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Coarse classification of [`NotifyError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    Remote,
    Storage,
    Invalid,
}

impl NotifyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifyError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            NotifyError::NotFound(_) => ErrorKind::NotFound,
            NotifyError::Remote(_) => ErrorKind::Remote,
            NotifyError::Io(_)
            | NotifyError::Serialization(_)
            | NotifyError::Deserialization(_)
            | NotifyError::Corruption(_)
            | NotifyError::Locked => ErrorKind::Storage,
            NotifyError::InvalidName { .. }
            | NotifyError::UnknownProtocol(_)
            | NotifyError::NotConfigured(_) => ErrorKind::Invalid,
        }
    }

    /// True for durable read/write failures.
    pub fn is_storage(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        NotifyError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(e: serde_json::Error) -> Self {
        NotifyError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for NotifyError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        NotifyError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for NotifyError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        NotifyError::Deserialization(e.to_string())
    }
}

/// Result type for registry and log operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
