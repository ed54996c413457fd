//! Coordinator Error Types
//!
//! Error taxonomy for matchmaking operations. Per-collaborator errors are
//! folded into `CoordinatorError` at the lifecycle boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::Phase;

/// Errors reported by a directory service implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Session name already advertised: {0}")]
    DuplicateName(String),

    #[error("Invalid attributes: {0}")]
    InvalidAttributes(String),

    #[error("Unknown advertisement: {0}")]
    UnknownAdvertisement(String),

    #[error("Directory request timed out")]
    Timeout,
}

/// Errors reported by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable")]
    Unavailable,

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Transport timed out")]
    TimedOut,

    #[error("Host migrated away from {0}")]
    HostMigrated(String),
}

impl TransportError {
    /// Whether a retry against the same host may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::TimedOut)
    }
}

/// Advertisement publishing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Duplicate session name: {0}")]
    DuplicateName(String),

    #[error("Invalid attributes: {0}")]
    InvalidAttributes(String),

    #[error("Session already published: {0}")]
    AlreadyPublished(String),

    #[error("No advertisement is published")]
    NotPublished,

    #[error("Publish timed out")]
    Timeout,
}

impl From<DirectoryError> for PublishError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable(msg) => PublishError::DirectoryUnavailable(msg),
            DirectoryError::DuplicateName(name) => PublishError::DuplicateName(name),
            DirectoryError::InvalidAttributes(msg) => PublishError::InvalidAttributes(msg),
            DirectoryError::UnknownAdvertisement(_) => PublishError::NotPublished,
            DirectoryError::Timeout => PublishError::Timeout,
        }
    }
}

/// Join failures, also used as the join completion result code
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "camelCase")]
pub enum JoinError {
    #[error("Session interface unavailable")]
    InvalidInterface,

    #[error("Join timed out")]
    Timeout,

    #[error("Already in a session or joining one")]
    AlreadyInSession,

    #[error("Join rejected: {0}")]
    Rejected(String),
}

impl From<TransportError> for JoinError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable => JoinError::InvalidInterface,
            TransportError::Rejected(reason) => JoinError::Rejected(reason),
            TransportError::Unreachable(_)
            | TransportError::TimedOut
            | TransportError::HostMigrated(_) => JoinError::Timeout,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Interface unavailable: {0}")]
    InterfaceUnavailable(String),

    #[error("Operation already in progress: {0}")]
    AlreadyInProgress(Phase),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Coordinator has shut down")]
    ShutDown,

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Join failed: {0}")]
    Join(#[from] JoinError),
}

impl From<ConfigError> for CoordinatorError {
    fn from(err: ConfigError) -> Self {
        CoordinatorError::InvalidConfig(err.to_string())
    }
}

impl From<DirectoryError> for CoordinatorError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable(msg) => CoordinatorError::InterfaceUnavailable(msg),
            DirectoryError::Timeout => CoordinatorError::Timeout(Duration::ZERO),
            other => CoordinatorError::Rejected(other.to_string()),
        }
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
