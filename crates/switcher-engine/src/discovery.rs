//! Branch discovery: exposing producer outputs and making their first link.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use switcher_graph::{Container, GraphResult, MediaGraph, NodeRole};
use switcher_ipc::{Branch, Consumer, SwitcherEvent};

use crate::switcher::Controller;
use crate::topology::Topology;
use crate::{DISCARD_INPUT_PORT, FILE_OUTPUT_PORT, LIVE_OUTPUT_PORT};

impl<G: MediaGraph> Controller<G> {
    /// A producer's decoded output port appeared.
    ///
    /// The first notification per branch wins; later ones are ignored.
    #[instrument(name = "port_discovered", skip(self, port))]
    pub(crate) fn on_port_discovered(self: &Arc<Self>, branch: Branch, port: G::Port) {
        let outcome = {
            let mut topo = self.topology.lock();
            if topo.phase.is_terminated() {
                debug!("Switcher stopped, ignoring port");
                return;
            }
            if topo.slot(branch).sink_claimed {
                debug!("Branch already linked, ignoring duplicate port");
                return;
            }
            topo.slot_mut(branch).sink_claimed = true;

            match branch {
                Branch::Live => self.claim_live(&mut topo, &port),
                Branch::File => self.claim_file(&mut topo, &port),
            }
        };

        match outcome {
            Ok(()) => {
                info!(consumer = %branch.initial_consumer(), "Branch linked");
                self.send_event(SwitcherEvent::BranchReady { branch });
                self.wake.notify_all();
            }
            Err(e) => self.fail(e),
        }
    }

    fn claim_live(self: &Arc<Self>, topo: &mut Topology<G::Port>, port: &G::Port) -> GraphResult<()> {
        let display = self.graph.static_port(NodeRole::DisplaySink)?;
        self.intercept_end_of_stream(&display, Consumer::Display)?;

        let container = Container::for_branch(Branch::Live);
        let output = self
            .graph
            .create_boundary_port(container, port, LIVE_OUTPUT_PORT)?;
        self.graph.link(&output, &display)?;

        topo.set_consumer(Consumer::Display, display);
        topo.live.port = Some(output);
        Ok(())
    }

    fn claim_file(self: &Arc<Self>, topo: &mut Topology<G::Port>, port: &G::Port) -> GraphResult<()> {
        // The discard consumer only gets a boundary once there is a file feed
        // for it to drain.
        let sync = self.graph.static_port(NodeRole::DiscardSync)?;
        self.intercept_end_of_stream(&sync, Consumer::Discard)?;

        let container = Container::for_branch(Branch::File);
        let output = self
            .graph
            .create_boundary_port(container, port, FILE_OUTPUT_PORT)?;
        let discard = self
            .graph
            .create_boundary_port(Container::Discard, &sync, DISCARD_INPUT_PORT)?;
        self.graph.link(&output, &discard)?;

        topo.set_consumer(Consumer::Discard, discard);
        topo.file.port = Some(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use switcher_graph::{GraphEvent, MediaGraph, MemoryGraph, NodeRole, RunState};
    use switcher_ipc::{Branch, StopReason, SwitchPhase, SwitcherConfig, SwitcherEvent};

    use crate::Switcher;

    fn switcher() -> (Switcher<MemoryGraph>, crossbeam_channel::Receiver<SwitcherEvent>) {
        let (tx, rx) = switcher_ipc::event_channel();
        let config = SwitcherConfig::new(
            Duration::from_secs(60),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
        );
        let switcher = Switcher::new(config, tx, |_| Ok(MemoryGraph::new())).unwrap();
        (switcher, rx)
    }

    #[test]
    fn test_live_links_to_display() {
        let (switcher, rx) = switcher();
        let graph = switcher.graph();
        let live = graph.producer_port(Branch::Live);

        switcher.on_live_port_discovered(live);

        let display = graph.static_port(NodeRole::DisplaySink).unwrap();
        let peer = graph.peer(&display).expect("display linked");
        assert_eq!(graph.port_name(peer), crate::LIVE_OUTPUT_PORT);
        assert!(rx
            .try_iter()
            .any(|e| e == SwitcherEvent::BranchReady { branch: Branch::Live }));
    }

    #[test]
    fn test_file_links_to_lazy_discard_boundary() {
        let (switcher, _rx) = switcher();
        let graph = switcher.graph();
        let file = graph.producer_port(Branch::File);

        switcher.on_file_port_discovered(file);

        let display = graph.static_port(NodeRole::DisplaySink).unwrap();
        let sync = graph.static_port(NodeRole::DiscardSync).unwrap();
        assert_eq!(graph.peer(&display), None);
        // Linked through the discard boundary, not to the inner port.
        assert_eq!(graph.peer(&sync), None);
        assert_eq!(switcher.phase(), SwitchPhase::AwaitingBoth);
    }

    #[test]
    fn test_discovery_order_does_not_matter() {
        let (switcher, _rx) = switcher();
        let graph = switcher.graph();

        switcher.on_file_port_discovered(graph.producer_port(Branch::File));
        assert_eq!(switcher.active_branch(), None);
        switcher.on_live_port_discovered(graph.producer_port(Branch::Live));

        assert_eq!(switcher.active_branch(), Some(Branch::Live));
    }

    #[test]
    fn test_duplicate_notification_is_ignored() {
        let (switcher, rx) = switcher();
        let graph = switcher.graph();
        let first = graph.producer_port(Branch::Live);
        let second = graph.producer_port(Branch::Live);

        switcher.on_live_port_discovered(first);
        switcher.on_live_port_discovered(first);
        switcher.on_live_port_discovered(second);

        assert_eq!(switcher.stop_reason(), None);
        assert_eq!(graph.run_state(), None);
        let ready = rx
            .try_iter()
            .filter(|e| matches!(e, SwitcherEvent::BranchReady { .. }))
            .count();
        assert_eq!(ready, 1);
    }

    #[test]
    fn test_link_failure_is_fatal() {
        let (switcher, _rx) = switcher();
        let graph = switcher.graph();
        graph.fail_links_after(0);

        switcher.on_live_port_discovered(graph.producer_port(Branch::Live));

        assert_eq!(switcher.phase(), SwitchPhase::Terminated);
        assert!(matches!(
            switcher.stop_reason(),
            Some(StopReason::GraphFailure { .. })
        ));
        assert_eq!(graph.run_state(), Some(RunState::Idle));
    }

    #[test]
    fn test_port_after_stop_is_ignored() {
        let (switcher, _rx) = switcher();
        switcher.stop();

        let graph = switcher.graph();
        switcher.on_live_port_discovered(graph.producer_port(Branch::Live));

        let display = graph.static_port(NodeRole::DisplaySink).unwrap();
        assert_eq!(graph.peer(&display), None);
    }

    #[test]
    fn test_port_appeared_notification_routes_to_branch() {
        let (switcher, _rx) = switcher();
        let graph = switcher.graph().clone();
        let file = graph.producer_port(Branch::File);
        let live = graph.producer_port(Branch::Live);

        graph.post(GraphEvent::PortAppeared {
            branch: Branch::File,
            port: file,
        });
        graph.post(GraphEvent::PortAppeared {
            branch: Branch::Live,
            port: live,
        });
        graph.quit_dispatch_loop();
        graph.run_dispatch_loop();

        assert_eq!(switcher.active_branch(), Some(Branch::Live));
    }
}
