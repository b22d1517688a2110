//! End-of-stream interception and forced failover.
//!
//! Both consumer inputs carry an interceptor that swallows end-of-stream so a
//! producer ending never tears the pipeline down. When the producer behind the
//! event is the file branch, the live branch is forced onto the display and
//! periodic switching stops for good.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use switcher_graph::{GraphResult, InterceptVerdict, MediaGraph, StreamEvent};
use switcher_ipc::{Branch, Consumer, SwitchPhase, SwitcherEvent};

use crate::switcher::Controller;
use crate::topology::Topology;

impl<G: MediaGraph> Controller<G> {
    /// Install the end-of-stream interceptor for `consumer` on `port`.
    pub(crate) fn intercept_end_of_stream(
        self: &Arc<Self>,
        port: &G::Port,
        consumer: Consumer,
    ) -> GraphResult<()> {
        let weak = Arc::downgrade(self);
        self.graph.install_event_interceptor(
            port,
            Arc::new(move |event| {
                if event != StreamEvent::EndOfStream {
                    return InterceptVerdict::PassThrough;
                }
                if let Some(controller) = weak.upgrade() {
                    controller.on_consumer_end_of_stream(consumer);
                }
                InterceptVerdict::Handled
            }),
        )
    }

    fn on_consumer_end_of_stream(&self, consumer: Consumer) {
        if self.file_exhausted.load(Ordering::Acquire) {
            trace!(%consumer, "End-of-stream after file exhaustion suppressed");
            return;
        }

        let result = {
            let mut topo = self.topology.lock();
            match topo.feeder(&self.graph, consumer) {
                Some(Branch::File) => self.fail_over(&mut topo),
                Some(Branch::Live) => {
                    warn!(%consumer, "Live branch reached end-of-stream, suppressed");
                    Ok(())
                }
                None => {
                    debug!(%consumer, "End-of-stream from unknown producer suppressed");
                    Ok(())
                }
            }
        };

        self.wake.notify_all();
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// The file producer has ended.
    pub(crate) fn on_file_ended(&self) {
        if self.file_exhausted.load(Ordering::Acquire) {
            return;
        }

        let result = {
            let mut topo = self.topology.lock();
            self.fail_over(&mut topo)
        };

        self.wake.notify_all();
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Latch file exhaustion and make sure the live branch is on the display.
    /// Runs at most once.
    fn fail_over(&self, topo: &mut Topology<G::Port>) -> GraphResult<()> {
        if self.file_exhausted.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if topo.phase.is_terminated() {
            debug!("File ended after stop");
            return Ok(());
        }

        info!("File branch exhausted");
        self.transition(topo, SwitchPhase::Draining);

        let active = match topo.matching() {
            None => topo.feeder(&self.graph, Consumer::Display),
            Some(matching) => match self.graph.peer(&matching.live) {
                Some(peer) if peer == matching.display => {
                    debug!("Live branch already on display");
                    Some(Branch::Live)
                }
                Some(_) => {
                    matching.relink(&self.graph, Branch::Live)?;
                    self.swapped(Branch::Live, true);
                    Some(Branch::Live)
                }
                None => {
                    warn!("Live branch is not linked, nothing to fail over to");
                    None
                }
            },
        };

        self.send_event(SwitcherEvent::FileExhausted { active });
        Ok(())
    }
}
