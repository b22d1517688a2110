//! Events sent from the switch controller to its host.

use serde::{Deserialize, Serialize};

use crate::state::{StopReason, SwitchPhase};
use crate::types::Branch;

/// Events that the controller emits while running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitcherEvent {
    /// Controller phase has changed.
    PhaseChanged {
        /// Previous phase.
        previous: SwitchPhase,

        /// Current phase.
        current: SwitchPhase,
    },

    /// A branch exposed its output and was linked to its first consumer.
    BranchReady { branch: Branch },

    /// The display is now fed by `active`.
    Swapped {
        /// Branch now linked to the display.
        active: Branch,

        /// Whether the swap was forced by the file branch ending.
        forced: bool,
    },

    /// The file branch reached its end; periodic switching is over.
    FileExhausted {
        /// Branch left on the display.
        active: Option<Branch>,
    },

    /// A fatal error occurred.
    Error { message: String },

    /// Controller has stopped.
    Stopped { reason: StopReason },
}
