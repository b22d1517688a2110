//! Shared types for the source switcher.
//!
//! This crate defines the vocabulary used between the media graph backends,
//! the switch controller, and the process that hosts it.

mod events;
mod state;
mod types;

pub use events::SwitcherEvent;
pub use state::{StopReason, SwitchPhase};
pub use types::{Branch, Consumer, SwitcherConfig, DEFAULT_LIVE_TIMEOUT, DEFAULT_LIVE_URI};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (controller → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SwitcherEvent>, Receiver<SwitcherEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
