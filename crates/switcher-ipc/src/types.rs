//! Common types used across the switcher crates.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default live source location.
pub const DEFAULT_LIVE_URI: &str = "rtsp://127.0.0.1:8554/live";

/// Default live source transport timeout.
pub const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// One of the two upstream producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// The continuously-live feed.
    Live,

    /// The finite file feed.
    File,
}

impl Branch {
    /// Returns the other branch.
    pub fn other(self) -> Self {
        match self {
            Self::Live => Self::File,
            Self::File => Self::Live,
        }
    }

    /// The consumer this branch is linked to when it is first discovered.
    pub fn initial_consumer(self) -> Consumer {
        match self {
            Self::Live => Consumer::Display,
            Self::File => Consumer::Discard,
        }
    }

    /// Returns the display name for this branch.
    pub fn name(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::File => "file",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One of the two downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consumer {
    /// The visible output.
    Display,

    /// Clock-synchronized sink that drops everything it receives.
    Discard,
}

impl Consumer {
    /// Returns the display name for this consumer.
    pub fn name(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Discard => "discard",
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for a switcher instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitcherConfig {
    /// Time each branch stays on the display before the next swap.
    pub switch_interval: Duration,

    /// Media file played by the file branch.
    pub file_path: PathBuf,

    /// Location of the live source (e.g., "rtsp://camera.local/stream").
    pub live_uri: String,

    /// Transport timeout for the live source.
    pub live_timeout: Duration,
}

impl SwitcherConfig {
    /// Create a configuration with default live source settings.
    pub fn new(switch_interval: Duration, file_path: impl Into<PathBuf>) -> Self {
        Self {
            switch_interval,
            file_path: file_path.into(),
            ..Default::default()
        }
    }
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            switch_interval: Duration::from_secs(5),
            file_path: PathBuf::new(),
            live_uri: DEFAULT_LIVE_URI.to_string(),
            live_timeout: DEFAULT_LIVE_TIMEOUT,
        }
    }
}
