//! Error types for graph definition, state persistence and provisioning.
//!
//! Errors are split by when they can occur: definition errors are caught
//! before any provider call, state errors before scheduling, provider
//! errors per node while the run is in progress.

use crate::types::NodeId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors in the declared graph, detected before anything runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Two nodes resolve to the same id
    #[error("duplicate resource id: {id}")]
    DuplicateId { id: NodeId },

    /// A name that cannot be used as a path segment
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A dependency or output reference to something not declared in this stack
    #[error("{from} references {missing}, which is not declared in this stack")]
    UnknownReference { from: NodeId, missing: NodeId },

    /// A node that depends on itself
    #[error("{id} depends on itself")]
    SelfDependency { id: NodeId },

    /// A dependency cycle, listed from the first node back to itself
    #[error("dependency cycle: {}", format_path(path))]
    Cycle { path: Vec<NodeId> },
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors reading or writing persisted state
#[derive(Debug, Error)]
pub enum StateError {
    /// Persisted state exists but cannot be parsed
    #[error("state for stack {stack} is corrupt: {message}")]
    Corrupt { stack: String, message: String },

    /// Reading or writing the state document failed
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State could not be serialized
    #[error("failed to serialize state: {message}")]
    Serialize { message: String },
}

/// Errors resolving a deferred value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// The producing node failed or was skipped
    #[error("output of {producer} is unavailable: the resource did not provision")]
    ProducerFailed { producer: NodeId },

    /// The producing node has not completed yet
    #[error("output of {producer} is not known yet")]
    NotReady { producer: NodeId },

    /// The producer completed but has no such output property
    #[error("{producer} has no output named {property:?}")]
    MissingProperty { producer: NodeId, property: String },
}

impl OutputError {
    /// Whether resolution may succeed once more producers complete
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Error returned by a provider operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Detailed error message from the provider
    pub message: String,
    /// Whether the failure is transient and worth retrying
    pub transient: bool,
}

impl ProviderError {
    /// A permanent failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// A failure that may succeed if retried (throttling, timeouts)
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.transient
    }
}

/// Errors that abort a run before scheduling
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {message}")]
    Pool { message: String },
}

/// Result type for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = DefinitionError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(!ProviderError::new("invalid cidr").is_retryable());
    }
}
