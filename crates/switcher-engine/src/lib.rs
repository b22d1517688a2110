//! Live/file failover controller.
//!
//! A [`Switcher`] owns a [`MediaGraph`](switcher_graph::MediaGraph) with two
//! producers (a live feed and a finite file feed) and two consumers (the
//! display and a discard sink). It keeps exactly one producer on the display
//! and the other draining into the discard sink, swaps them on a fixed
//! interval once both producers are discovered, and pins the live producer to
//! the display for good once the file producer ends.

mod config;
mod discovery;
mod eos;
mod error;
mod switcher;
mod topology;
mod worker;

pub use config::validate;
pub use error::{ConfigError, SwitcherError};
pub use switcher::Switcher;

/// Result type for switcher operations.
pub type SwitcherResult<T> = Result<T, SwitcherError>;

/// Name of the live branch's boundary output port.
pub const LIVE_OUTPUT_PORT: &str = "liveBinGhost";

/// Name of the file branch's boundary output port.
pub const FILE_OUTPUT_PORT: &str = "fileBinGhost";

/// Name of the discard consumer's boundary input port.
pub const DISCARD_INPUT_PORT: &str = "discardSinkGhost";

/// Name of the switch worker thread.
pub const WORKER_THREAD_NAME: &str = "switch-worker";
