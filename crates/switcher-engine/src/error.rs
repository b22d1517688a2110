//! Error types for the switch controller.

use std::path::PathBuf;

use switcher_graph::GraphError;
use thiserror::Error;

/// Configuration rejected before any graph object is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No media file given.
    #[error("File path is empty")]
    EmptyFilePath,

    /// Switching every zero seconds is meaningless.
    #[error("Switch interval is zero")]
    ZeroInterval,

    /// The media file does not exist.
    #[error("File {} does not exist", .0.display())]
    FileNotFound(PathBuf),
}

/// Errors that can occur while constructing or running a switcher.
#[derive(Debug, Error)]
pub enum SwitcherError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Graph runtime error.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The switch worker thread could not be started.
    #[error("Failed to spawn switch worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// `run` was called while the switcher was already running.
    #[error("Switcher is already running")]
    AlreadyRunning,
}
