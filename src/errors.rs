// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::SubTaskStatus;
use crate::types::{NodeId, RequestId};

#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid transition for node {node}: {event} while {status:?}")]
    InvalidTransition {
        node: NodeId,
        status: SubTaskStatus,
        event: &'static str,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Request already active: {0}")]
    RequestAlreadyActive(RequestId),

    #[error("Runtime is not running")]
    RuntimeStopped,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompositorError {
    pub fn storage(msg: impl Into<String>) -> Self {
        CompositorError::Storage(msg.into())
    }

    /// Whether this error is the "stale or duplicate event" kind that the core
    /// logs and drops instead of surfacing.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, CompositorError::InvalidTransition { .. })
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CompositorError>;
