//! The periodic switch worker.
//!
//! Sleeps on the controller condvar until both branches are linked, then
//! exchanges the display and discard feeds once per interval. Every wait is
//! a timed wait on the same condvar, so shutdown and file exhaustion wake it
//! immediately.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use switcher_graph::MediaGraph;
use switcher_ipc::{Consumer, SwitchPhase};

use crate::switcher::Controller;

impl<G: MediaGraph> Controller<G> {
    pub(crate) fn run_switch_worker(self: Arc<Self>) {
        debug!(interval = ?self.config.switch_interval, "Switch worker started");

        let mut topo = self.topology.lock();
        loop {
            match topo.phase {
                SwitchPhase::AwaitingBoth => {
                    if topo.matching().is_some() {
                        self.transition(&mut topo, SwitchPhase::Armed);
                    } else {
                        self.wake.wait(&mut topo);
                    }
                }
                SwitchPhase::Armed => {
                    let deadline = Instant::now() + self.config.switch_interval;
                    while topo.phase == SwitchPhase::Armed {
                        if self.wake.wait_until(&mut topo, deadline).timed_out() {
                            break;
                        }
                    }
                    if topo.phase != SwitchPhase::Armed {
                        continue;
                    }

                    self.transition(&mut topo, SwitchPhase::Swapping);

                    let Some(matching) = topo.matching() else {
                        continue;
                    };
                    let active = matching
                        .active(&self.graph)
                        .or_else(|| topo.feeder(&self.graph, Consumer::Display));
                    let Some(active) = active else {
                        warn!("Nothing feeds the display, switching stopped");
                        self.transition(&mut topo, SwitchPhase::Draining);
                        break;
                    };

                    let next = active.other();
                    match matching.relink(&self.graph, next) {
                        Ok(()) => {
                            self.swapped(next, false);
                            self.transition(&mut topo, SwitchPhase::Armed);
                        }
                        Err(e) => {
                            drop(topo);
                            self.fail(e);
                            debug!("Switch worker exiting after failure");
                            return;
                        }
                    }
                }
                SwitchPhase::Swapping => {
                    self.transition(&mut topo, SwitchPhase::Armed);
                }
                SwitchPhase::Draining | SwitchPhase::Terminated => break,
            }
        }

        debug!(phase = %topo.phase.name(), "Switch worker exiting");
    }
}
