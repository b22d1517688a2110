//! Printing controller events.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use switcher_ipc::SwitcherEvent;

/// Drain `rx` on its own thread until every sender is gone.
///
/// With `json` set each event is written to stdout as one JSON line,
/// otherwise it goes to the log.
pub fn spawn_printer(rx: Receiver<SwitcherEvent>, json: bool) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            for event in rx {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("Failed to encode event: {}", e),
                    }
                } else {
                    log_event(&event);
                }
            }
            debug!("Event channel closed");
        })
}

fn log_event(event: &SwitcherEvent) {
    match event {
        SwitcherEvent::BranchReady { branch } => info!(%branch, "Branch ready"),
        SwitcherEvent::FileExhausted { active } => {
            info!(active = ?active, "File finished, staying on live")
        }
        SwitcherEvent::Stopped { reason } => info!(reason = %reason.message(), "Stopped"),
        // Swaps, phase changes and errors are already logged by the controller.
        other => debug!(event = ?other, "Switcher event"),
    }
}
