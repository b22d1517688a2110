//! Switch controller state machine types.

use serde::{Deserialize, Serialize};

/// The phase of the switch controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchPhase {
    /// Waiting for both branches to expose their boundary ports.
    #[default]
    AwaitingBoth,

    /// Both branches linked; waiting out the switch interval.
    Armed,

    /// Exchanging which branch feeds the display.
    Swapping,

    /// Periodic switching has halted; the live branch stays on the display.
    Draining,

    /// The controller has been stopped.
    Terminated,
}

impl SwitchPhase {
    /// Returns true if `next` is a legal successor of this phase.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SwitchPhase::*;

        match (self, next) {
            (AwaitingBoth, Armed) => true,
            (Armed, Swapping) => true,
            (Swapping, Armed) => true,
            (AwaitingBoth | Armed | Swapping, Draining) => true,
            (AwaitingBoth | Armed | Swapping | Draining, Terminated) => true,
            _ => false,
        }
    }

    /// Returns true if the controller has been stopped.
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns a simple string representation of the phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::AwaitingBoth => "AwaitingBoth",
            Self::Armed => "Armed",
            Self::Swapping => "Swapping",
            Self::Draining => "Draining",
            Self::Terminated => "Terminated",
        }
    }
}

/// Reason the controller stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The owner requested a stop.
    Requested,

    /// The graph runtime reported an error.
    UpstreamError { message: String },

    /// The whole graph reached end-of-stream.
    EndOfStream,

    /// A link or unlink operation failed.
    GraphFailure { message: String },
}

impl StopReason {
    /// Returns true if this stop should be reported as a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Requested)
    }

    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Requested => "Stopped on request".to_string(),
            Self::UpstreamError { message } => format!("Upstream error: {message}"),
            Self::EndOfStream => "Pipeline reached end-of-stream".to_string(),
            Self::GraphFailure { message } => format!("Graph failure: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_cycle_is_legal() {
        assert!(SwitchPhase::AwaitingBoth.can_transition_to(SwitchPhase::Armed));
        assert!(SwitchPhase::Armed.can_transition_to(SwitchPhase::Swapping));
        assert!(SwitchPhase::Swapping.can_transition_to(SwitchPhase::Armed));
    }

    #[test]
    fn test_terminated_is_absorbing() {
        for next in [
            SwitchPhase::AwaitingBoth,
            SwitchPhase::Armed,
            SwitchPhase::Swapping,
            SwitchPhase::Draining,
            SwitchPhase::Terminated,
        ] {
            assert!(!SwitchPhase::Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_draining_never_rearms() {
        assert!(!SwitchPhase::Draining.can_transition_to(SwitchPhase::Armed));
        assert!(!SwitchPhase::Draining.can_transition_to(SwitchPhase::Swapping));
        assert!(SwitchPhase::Draining.can_transition_to(SwitchPhase::Terminated));
    }

    #[test]
    fn test_stop_reason_fatality() {
        assert!(!StopReason::Requested.is_fatal());
        assert!(StopReason::EndOfStream.is_fatal());
        assert!(StopReason::GraphFailure {
            message: "link".into()
        }
        .is_fatal());
    }
}
