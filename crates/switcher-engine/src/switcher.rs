//! Switcher lifecycle: construction, run, and shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, instrument, warn};

use switcher_graph::{GraphError, GraphEvent, GraphResult, MediaGraph, RunState};
use switcher_ipc::{Branch, StopReason, SwitchPhase, SwitcherConfig, SwitcherEvent};

use crate::config::validate;
use crate::error::SwitcherError;
use crate::topology::Topology;
use crate::{SwitcherResult, WORKER_THREAD_NAME};

/// State shared between the owner, the dispatch thread, and the switch
/// worker.
pub(crate) struct Controller<G: MediaGraph> {
    pub(crate) graph: G,
    pub(crate) config: SwitcherConfig,
    pub(crate) topology: Mutex<Topology<G::Port>>,
    /// Signalled when a branch becomes ready and on shutdown.
    pub(crate) wake: Condvar,
    /// Latched by the first end-of-stream from the file branch.
    pub(crate) file_exhausted: AtomicBool,
    pub(crate) swaps: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop_reason: Mutex<Option<StopReason>>,
    event_tx: Sender<SwitcherEvent>,
}

impl<G: MediaGraph> Controller<G> {
    fn new(graph: G, config: SwitcherConfig, event_tx: Sender<SwitcherEvent>) -> Self {
        Self {
            graph,
            config,
            topology: Mutex::new(Topology::new()),
            wake: Condvar::new(),
            file_exhausted: AtomicBool::new(false),
            swaps: AtomicU64::new(0),
            worker: Mutex::new(None),
            stop_reason: Mutex::new(None),
            event_tx,
        }
    }

    /// Move to `next` if that is a legal transition. Returns whether the
    /// phase changed.
    pub(crate) fn transition(&self, topo: &mut Topology<G::Port>, next: SwitchPhase) -> bool {
        let previous = topo.phase;
        if previous == next {
            return false;
        }
        if !previous.can_transition_to(next) {
            debug!(
                previous = %previous.name(),
                requested = %next.name(),
                "Ignoring illegal phase transition"
            );
            return false;
        }

        topo.phase = next;
        debug!(
            previous = %previous.name(),
            current = %next.name(),
            "Phase transition"
        );
        self.send_event(SwitcherEvent::PhaseChanged {
            previous,
            current: next,
        });
        true
    }

    pub(crate) fn send_event(&self, event: SwitcherEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }

    /// Record a completed swap.
    pub(crate) fn swapped(&self, active: Branch, forced: bool) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
        info!(%active, forced, "Display switched");
        self.send_event(SwitcherEvent::Swapped { active, forced });
    }

    /// React to a notification from the graph runtime.
    fn handle_graph_event(self: &Arc<Self>, event: GraphEvent<G::Port>) {
        match event {
            GraphEvent::PortAppeared { branch, port } => self.on_port_discovered(branch, port),
            GraphEvent::Error { source, message } => {
                error!(%source, %message, "Graph runtime error");
                self.send_event(SwitcherEvent::Error {
                    message: message.clone(),
                });
                self.shutdown(StopReason::UpstreamError { message });
            }
            GraphEvent::EndOfStream => {
                warn!("Pipeline reached end-of-stream");
                self.shutdown(StopReason::EndOfStream);
            }
        }
    }

    /// Treat a graph failure as unrecoverable.
    pub(crate) fn fail(&self, error: GraphError) {
        error!(%error, "Fatal graph failure");
        let message = error.to_string();
        self.send_event(SwitcherEvent::Error {
            message: message.clone(),
        });
        self.shutdown(StopReason::GraphFailure { message });
    }

    /// Stop everything. Only the first call does the teardown; every call
    /// joins the worker unless made from the worker itself.
    pub(crate) fn shutdown(&self, reason: StopReason) {
        let first = {
            // Serializes against `run` arming the worker.
            let _worker = self.worker.lock();
            let mut topo = self.topology.lock();
            self.transition(&mut topo, SwitchPhase::Terminated)
        };
        self.wake.notify_all();

        if first {
            info!(reason = %reason.message(), "Stopping switcher");
            *self.stop_reason.lock() = Some(reason.clone());

            self.graph.quit_dispatch_loop();
            if let Err(e) = self.graph.set_run_state(RunState::Idle) {
                error!("Failed to idle graph: {}", e);
            }

            self.send_event(SwitcherEvent::Stopped { reason });
        }

        self.join_worker();
    }

    fn join_worker(&self) {
        let mut slot = self.worker.lock();
        let Some(handle) = slot.take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            // The owner joins us later.
            *slot = Some(handle);
            return;
        }
        drop(slot);

        if handle.join().is_err() {
            error!("Switch worker panicked");
        }
        debug!("Switch worker joined");
    }
}

/// Live/file failover controller over a [`MediaGraph`].
pub struct Switcher<G: MediaGraph> {
    controller: Arc<Controller<G>>,
}

impl<G: MediaGraph> Switcher<G> {
    /// Validate `config`, build the graph with `build`, and register for its
    /// notifications.
    ///
    /// Configuration errors are reported before `build` is called.
    #[instrument(name = "switcher_new", skip_all)]
    pub fn new<F>(
        config: SwitcherConfig,
        event_tx: Sender<SwitcherEvent>,
        build: F,
    ) -> SwitcherResult<Self>
    where
        F: FnOnce(&SwitcherConfig) -> GraphResult<G>,
    {
        validate(&config)?;
        let graph = build(&config)?;

        info!(
            interval = ?config.switch_interval,
            file = %config.file_path.display(),
            "Switcher created"
        );

        let controller = Arc::new(Controller::new(graph, config, event_tx));

        let weak = Arc::downgrade(&controller);
        controller.graph.set_event_handler(Arc::new(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_graph_event(event);
            }
        }));

        Ok(Self { controller })
    }

    /// Start the graph and the switch worker, then run the dispatch loop on
    /// the calling thread until the switcher is stopped.
    #[instrument(name = "switcher_run", skip(self))]
    pub fn run(&self) -> SwitcherResult<()> {
        let controller = &self.controller;

        {
            let mut worker = controller.worker.lock();
            if controller.topology.lock().phase.is_terminated() {
                debug!("Switcher already stopped, not running");
                return Ok(());
            }
            if worker.is_some() {
                return Err(SwitcherError::AlreadyRunning);
            }

            controller.graph.set_run_state(RunState::Playing)?;

            let shared = Arc::clone(controller);
            let handle = thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || shared.run_switch_worker())?;
            *worker = Some(handle);
        }

        info!("Dispatch loop starting");
        controller.graph.run_dispatch_loop();
        info!("Dispatch loop returned");

        Ok(())
    }

    /// Stop the dispatch loop, idle the graph, and join the switch worker.
    ///
    /// Safe to call more than once and from any thread.
    #[instrument(name = "switcher_stop", skip(self))]
    pub fn stop(&self) {
        self.controller.shutdown(StopReason::Requested);
    }

    /// The live producer's decoded output appeared.
    pub fn on_live_port_discovered(&self, port: G::Port) {
        self.controller.on_port_discovered(Branch::Live, port);
    }

    /// The file producer's decoded output appeared.
    pub fn on_file_port_discovered(&self, port: G::Port) {
        self.controller.on_port_discovered(Branch::File, port);
    }

    /// The file producer has ended: force the live branch onto the display
    /// and stop periodic switching.
    pub fn on_file_ended(&self) {
        self.controller.on_file_ended();
    }

    /// Current controller phase.
    pub fn phase(&self) -> SwitchPhase {
        self.controller.topology.lock().phase
    }

    /// The branch feeding the display, if the links currently form a
    /// complete matching.
    pub fn active_branch(&self) -> Option<Branch> {
        let topo = self.controller.topology.lock();
        topo.matching()?.active(&self.controller.graph)
    }

    /// Number of swaps performed, periodic and forced.
    pub fn swap_count(&self) -> u64 {
        self.controller.swaps.load(Ordering::Relaxed)
    }

    /// Whether the file branch has ended.
    pub fn is_file_exhausted(&self) -> bool {
        self.controller.file_exhausted.load(Ordering::Acquire)
    }

    /// Why the switcher stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.controller.stop_reason.lock().clone()
    }

    /// The configuration this switcher was built with.
    pub fn config(&self) -> &SwitcherConfig {
        &self.controller.config
    }

    /// The underlying graph.
    pub fn graph(&self) -> &G {
        &self.controller.graph
    }
}

impl<G: MediaGraph> Drop for Switcher<G> {
    fn drop(&mut self) {
        self.controller.shutdown(StopReason::Requested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use crossbeam_channel::Receiver;
    use switcher_graph::{MemoryGraph, PortId};

    use crate::error::ConfigError;

    const INTERVAL: Duration = Duration::from_millis(150);

    fn config(interval: Duration) -> SwitcherConfig {
        SwitcherConfig::new(
            interval,
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
        )
    }

    fn switcher(interval: Duration) -> (Switcher<MemoryGraph>, Receiver<SwitcherEvent>) {
        let (tx, rx) = switcher_ipc::event_channel();
        let graph = MemoryGraph::new();
        let switcher = Switcher::new(config(interval), tx, move |_| Ok(graph)).unwrap();
        (switcher, rx)
    }

    /// Run the switcher on its own thread.
    fn start(switcher: &Arc<Switcher<MemoryGraph>>) -> thread::JoinHandle<()> {
        let runner = Arc::clone(switcher);
        thread::spawn(move || runner.run().unwrap())
    }

    fn discover_both(switcher: &Switcher<MemoryGraph>) -> (PortId, PortId) {
        let live = switcher.graph().producer_port(Branch::Live);
        let file = switcher.graph().producer_port(Branch::File);
        switcher.on_live_port_discovered(live);
        switcher.on_file_port_discovered(file);
        (live, file)
    }

    fn wait_for(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + timeout;
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn next_swap(rx: &Receiver<SwitcherEvent>, timeout: Duration) -> Option<(Branch, bool)> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match rx.recv_timeout(remaining) {
                Ok(SwitcherEvent::Swapped { active, forced }) => return Some((active, forced)),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    fn idle_count(graph: &MemoryGraph) -> usize {
        graph
            .run_state_history()
            .into_iter()
            .filter(|s| *s == RunState::Idle)
            .count()
    }

    #[test]
    fn test_invalid_path_fails_before_graph_is_built() {
        let (tx, _rx) = switcher_ipc::event_channel();
        let built = AtomicBool::new(false);
        let config = SwitcherConfig::new(Duration::from_secs(2), "/no/such/file.mp4");

        let result = Switcher::new(config, tx, |_| {
            built.store(true, Ordering::SeqCst);
            Ok(MemoryGraph::new())
        });

        assert!(matches!(
            result,
            Err(SwitcherError::Config(ConfigError::FileNotFound(_)))
        ));
        assert!(!built.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let (tx, _rx) = switcher_ipc::event_channel();
        let result = Switcher::new(config(Duration::ZERO), tx, |_| Ok(MemoryGraph::new()));

        assert!(matches!(
            result,
            Err(SwitcherError::Config(ConfigError::ZeroInterval))
        ));
    }

    #[test]
    fn test_node_creation_failure_surfaces() {
        let (tx, _rx) = switcher_ipc::event_channel();
        let result: SwitcherResult<Switcher<MemoryGraph>> =
            Switcher::new(config(INTERVAL), tx, |_| {
                Err(GraphError::NodeCreation {
                    kind: "clocksync".into(),
                    name: "clocksync".into(),
                })
            });

        assert!(matches!(
            result,
            Err(SwitcherError::Graph(GraphError::NodeCreation { .. }))
        ));
    }

    #[test]
    fn test_periodic_swaps_alternate() {
        let (switcher, rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        discover_both(&switcher);
        assert_eq!(switcher.active_branch(), Some(Branch::Live));

        assert_eq!(next_swap(&rx, INTERVAL * 4), Some((Branch::File, false)));
        assert_eq!(switcher.active_branch(), Some(Branch::File));
        assert_eq!(next_swap(&rx, INTERVAL * 4), Some((Branch::Live, false)));
        assert_eq!(switcher.active_branch(), Some(Branch::Live));

        switcher.stop();
        runner.join().unwrap();
        assert_eq!(switcher.phase(), SwitchPhase::Terminated);
    }

    #[test]
    fn test_first_swap_waits_for_interval() {
        let interval = Duration::from_millis(200);
        let (switcher, rx) = switcher(interval);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        wait_for("worker", Duration::from_secs(1), || {
            switcher.graph().run_state() == Some(RunState::Playing)
        });
        let discovered_at = Instant::now();
        discover_both(&switcher);

        assert!(next_swap(&rx, interval * 5).is_some());
        let elapsed = discovered_at.elapsed();
        assert!(elapsed >= interval, "swapped after {elapsed:?}");
        assert!(elapsed < interval + Duration::from_millis(150), "swapped after {elapsed:?}");

        switcher.stop();
        runner.join().unwrap();
    }

    #[test]
    fn test_no_swap_until_both_discovered() {
        let (switcher, rx) = switcher(Duration::from_millis(30));
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        let live = switcher.graph().producer_port(Branch::Live);
        switcher.on_live_port_discovered(live);

        assert_eq!(next_swap(&rx, Duration::from_millis(200)), None);
        assert_eq!(switcher.phase(), SwitchPhase::AwaitingBoth);
        assert_eq!(switcher.active_branch(), None);

        switcher.stop();
        runner.join().unwrap();
    }

    #[test]
    fn test_matching_holds_while_swapping() {
        let (switcher, _rx) = switcher(Duration::from_millis(5));
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);
        discover_both(&switcher);

        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            assert!(switcher.active_branch().is_some());
        }
        assert!(switcher.swap_count() > 2);

        switcher.stop();
        runner.join().unwrap();
    }

    #[test]
    fn test_stop_before_discovery() {
        let (switcher, _rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        wait_for("playing", Duration::from_secs(1), || {
            switcher.graph().run_state() == Some(RunState::Playing)
        });
        let stopped_at = Instant::now();
        switcher.stop();
        runner.join().unwrap();

        assert!(stopped_at.elapsed() < Duration::from_millis(500));
        assert_eq!(switcher.stop_reason(), Some(StopReason::Requested));
        assert_eq!(idle_count(switcher.graph()), 1);
    }

    #[test]
    fn test_stop_while_armed_is_prompt() {
        let (switcher, rx) = switcher(Duration::from_secs(30));
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);
        discover_both(&switcher);

        wait_for("armed", Duration::from_secs(1), || {
            switcher.phase() == SwitchPhase::Armed
        });
        let stopped_at = Instant::now();
        switcher.stop();
        runner.join().unwrap();

        assert!(stopped_at.elapsed() < Duration::from_millis(500));
        assert_eq!(next_swap(&rx, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (switcher, rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        switcher.stop();
        switcher.stop();
        runner.join().unwrap();
        switcher.stop();

        assert_eq!(idle_count(switcher.graph()), 1);
        let stops = rx
            .try_iter()
            .filter(|e| matches!(e, SwitcherEvent::Stopped { .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_run_after_stop_returns_immediately() {
        let (switcher, _rx) = switcher(INTERVAL);
        switcher.stop();

        switcher.run().unwrap();
        assert_eq!(switcher.graph().run_state(), Some(RunState::Idle));
    }

    #[test]
    fn test_link_failure_during_swap_shuts_down() {
        let (switcher, _rx) = switcher(Duration::from_millis(30));
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);
        discover_both(&switcher);

        // Both unlinks succeed, the first new link is refused.
        switcher.graph().fail_links_after(0);

        runner.join().unwrap();
        assert_eq!(switcher.phase(), SwitchPhase::Terminated);
        assert!(matches!(
            switcher.stop_reason(),
            Some(StopReason::GraphFailure { .. })
        ));
        assert_eq!(switcher.graph().run_state(), Some(RunState::Idle));

        // The owner's stop joins the worker that stopped itself.
        switcher.stop();
        assert_eq!(idle_count(switcher.graph()), 1);
    }

    #[test]
    fn test_bus_error_shuts_down() {
        let (switcher, rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        switcher.graph().post(GraphEvent::Error {
            source: "decoder".into(),
            message: "not negotiated".into(),
        });

        runner.join().unwrap();
        assert_eq!(
            switcher.stop_reason(),
            Some(StopReason::UpstreamError {
                message: "not negotiated".into()
            })
        );
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, SwitcherEvent::Error { .. })));
    }

    #[test]
    fn test_pipeline_end_of_stream_shuts_down() {
        let (switcher, _rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        switcher.graph().post(GraphEvent::EndOfStream);

        runner.join().unwrap();
        assert_eq!(switcher.stop_reason(), Some(StopReason::EndOfStream));
    }

    #[test]
    fn test_discovery_through_dispatch_loop() {
        let (switcher, _rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        switcher.graph().announce(Branch::File);
        switcher.graph().announce(Branch::Live);

        wait_for("both branches", Duration::from_secs(1), || {
            switcher.active_branch().is_some()
        });
        assert_eq!(switcher.active_branch(), Some(Branch::Live));

        switcher.stop();
        runner.join().unwrap();
    }

    #[test]
    fn test_second_run_rejected() {
        let (switcher, _rx) = switcher(INTERVAL);
        let switcher = Arc::new(switcher);
        let runner = start(&switcher);

        wait_for("playing", Duration::from_secs(1), || {
            switcher.graph().run_state() == Some(RunState::Playing)
        });
        assert!(matches!(switcher.run(), Err(SwitcherError::AlreadyRunning)));

        switcher.stop();
        runner.join().unwrap();
    }
}
