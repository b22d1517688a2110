//! Error types for the graph module.

use thiserror::Error;

use crate::RunState;

/// Errors that can occur during graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The media runtime could not be initialized.
    #[error("Media runtime initialization failed: {0}")]
    Init(String),

    /// A node type could not be instantiated.
    #[error("Could not create {kind} node '{name}'")]
    NodeCreation { kind: String, name: String },

    /// Static wiring between nodes failed.
    #[error("Graph assembly failed: {0}")]
    Assembly(String),

    /// A port that should exist was not found.
    #[error("Port not found: {0}")]
    MissingPort(String),

    /// A boundary port could not be created or added.
    #[error("Could not create boundary port '{name}': {reason}")]
    BoundaryPort { name: String, reason: String },

    /// Link failed.
    #[error("Failed to link {src} -> {sink}: {reason}")]
    Link {
        src: String,
        sink: String,
        reason: String,
    },

    /// Unlink failed.
    #[error("Failed to unlink {src} -> {sink}: {reason}")]
    Unlink {
        src: String,
        sink: String,
        reason: String,
    },

    /// An event interceptor could not be installed.
    #[error("Could not install event interceptor on {0}")]
    Interceptor(String),

    /// Run state change failed.
    #[error("Failed to change run state to {state:?}: {reason}")]
    StateChange { state: RunState, reason: String },
}
