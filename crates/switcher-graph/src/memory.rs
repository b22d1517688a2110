//! In-memory media graph.
//!
//! Models just enough of a media runtime for the switch controller: ports
//! with a direction, proxy ports on container boundaries, one-to-one links,
//! event interceptors, run state, and a dispatch queue drained by
//! [`MediaGraph::run_dispatch_loop`]. Used by tests and by the binary when it
//! is built without a real media runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use switcher_ipc::Branch;

use crate::{
    Container, EventInterceptor, GraphError, GraphEvent, GraphEventHandler, GraphResult,
    InterceptVerdict, MediaGraph, NodeRole, RunState, StreamEvent,
};

/// Identifier of a port in a [`MemoryGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Output,
    Input,
}

struct PortRecord {
    name: String,
    direction: Direction,
    container: Option<Container>,
    /// Inner port this one proxies.
    target: Option<PortId>,
}

#[derive(Default)]
struct GraphState {
    ports: Vec<PortRecord>,
    /// Links, stored in both directions.
    peers: HashMap<PortId, PortId>,
    interceptors: HashMap<PortId, Vec<EventInterceptor>>,
    run_state: Option<RunState>,
    run_state_history: Vec<RunState>,
    /// Successful links left before every further link fails.
    links_until_failure: Option<usize>,
    producer_ports: usize,
}

impl GraphState {
    fn add_port(
        &mut self,
        name: String,
        direction: Direction,
        container: Option<Container>,
        target: Option<PortId>,
    ) -> PortId {
        let id = PortId(self.ports.len() as u32);
        self.ports.push(PortRecord {
            name,
            direction,
            container,
            target,
        });
        id
    }

    fn port(&self, id: PortId) -> GraphResult<&PortRecord> {
        self.ports
            .get(id.0 as usize)
            .ok_or_else(|| GraphError::MissingPort(id.to_string()))
    }

    fn name(&self, id: PortId) -> String {
        self.ports
            .get(id.0 as usize)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// The boundary port exposing `producer`, or `producer` itself if it is
    /// not exposed.
    fn exit_port(&self, producer: PortId) -> PortId {
        self.ports
            .iter()
            .position(|p| p.target == Some(producer) && p.direction == Direction::Output)
            .map(|i| PortId(i as u32))
            .unwrap_or(producer)
    }

    /// Interceptors met by an event entering `port`, outermost first.
    fn interceptors_along(&self, port: PortId) -> Vec<EventInterceptor> {
        let mut chain = Vec::new();
        let mut current = Some(port);
        while let Some(id) = current {
            if let Some(list) = self.interceptors.get(&id) {
                chain.extend(list.iter().cloned());
            }
            current = self.ports.get(id.0 as usize).and_then(|p| p.target);
        }
        chain
    }
}

enum Dispatch {
    Event(GraphEvent<PortId>),
    Quit,
}

struct Inner {
    state: Mutex<GraphState>,
    handler: Mutex<Option<GraphEventHandler<PortId>>>,
    dispatch_tx: Sender<Dispatch>,
    dispatch_rx: Receiver<Dispatch>,
    display_sink: PortId,
    discard_sync: PortId,
}

/// In-memory [`MediaGraph`]. Clones share the same graph.
#[derive(Clone)]
pub struct MemoryGraph {
    inner: Arc<Inner>,
}

impl MemoryGraph {
    /// Create a graph containing the display sink and the discard clock-sync
    /// stage.
    pub fn new() -> Self {
        let mut state = GraphState::default();
        let display_sink = state.add_port("display:sink".into(), Direction::Input, None, None);
        let discard_sync = state.add_port("clocksync:sink".into(), Direction::Input, None, None);
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                handler: Mutex::new(None),
                dispatch_tx,
                dispatch_rx,
                display_sink,
                discard_sync,
            }),
        }
    }

    /// Create a decoded output port for a producer.
    pub fn producer_port(&self, branch: Branch) -> PortId {
        let mut state = self.inner.state.lock();
        let index = state.producer_ports;
        state.producer_ports += 1;
        state.add_port(
            format!("{branch}Decoder:src_{index}"),
            Direction::Output,
            None,
            None,
        )
    }

    /// Queue a notification for the dispatch loop.
    pub fn post(&self, event: GraphEvent<PortId>) {
        let _ = self.inner.dispatch_tx.send(Dispatch::Event(event));
    }

    /// Create a producer port and queue its `PortAppeared` notification.
    pub fn announce(&self, branch: Branch) -> PortId {
        let port = self.producer_port(branch);
        self.post(GraphEvent::PortAppeared { branch, port });
        port
    }

    /// Push end-of-stream out of a producer port.
    ///
    /// The event follows the producer's boundary port to whatever it is
    /// linked to, meeting every interceptor on the way. An event nobody
    /// handles reaches the sink and is reported as a graph-wide
    /// [`GraphEvent::EndOfStream`].
    pub fn end_of_stream(&self, producer: PortId) -> InterceptVerdict {
        let chain = {
            let state = self.inner.state.lock();
            match state.peers.get(&state.exit_port(producer)) {
                Some(&entry) => state.interceptors_along(entry),
                None => {
                    trace!(port = %state.name(producer), "End-of-stream on unlinked port dropped");
                    return InterceptVerdict::PassThrough;
                }
            }
        };

        for interceptor in chain {
            if interceptor(StreamEvent::EndOfStream) == InterceptVerdict::Handled {
                return InterceptVerdict::Handled;
            }
        }

        self.post(GraphEvent::EndOfStream);
        InterceptVerdict::PassThrough
    }

    /// The port that data leaving `producer` reaches, following its boundary
    /// port if it has one.
    pub fn downstream_peer(&self, producer: PortId) -> Option<PortId> {
        let state = self.inner.state.lock();
        state.peers.get(&state.exit_port(producer)).copied()
    }

    /// Let `successes` more links succeed, then fail every link after that.
    pub fn fail_links_after(&self, successes: usize) {
        self.inner.state.lock().links_until_failure = Some(successes);
    }

    /// Current run state, if one was ever set.
    pub fn run_state(&self) -> Option<RunState> {
        self.inner.state.lock().run_state
    }

    /// Every run state requested so far, in order.
    pub fn run_state_history(&self) -> Vec<RunState> {
        self.inner.state.lock().run_state_history.clone()
    }

    /// Name of a port.
    pub fn port_name(&self, port: PortId) -> String {
        self.inner.state.lock().name(port)
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaGraph for MemoryGraph {
    type Port = PortId;

    fn static_port(&self, node: NodeRole) -> GraphResult<PortId> {
        Ok(match node {
            NodeRole::DisplaySink => self.inner.display_sink,
            NodeRole::DiscardSync => self.inner.discard_sync,
        })
    }

    fn create_boundary_port(
        &self,
        container: Container,
        inner: &PortId,
        name: &str,
    ) -> GraphResult<PortId> {
        let mut state = self.inner.state.lock();
        let direction = state.port(*inner)?.direction;

        let taken = state
            .ports
            .iter()
            .any(|p| p.container == Some(container) && p.name == name);
        if taken {
            return Err(GraphError::BoundaryPort {
                name: name.to_string(),
                reason: format!("{} already has a port with this name", container.name()),
            });
        }

        let id = state.add_port(name.to_string(), direction, Some(container), Some(*inner));
        debug!(port = name, container = container.name(), "Boundary port created");
        Ok(id)
    }

    fn link(&self, src: &PortId, sink: &PortId) -> GraphResult<()> {
        let mut state = self.inner.state.lock();
        let error = |state: &GraphState, reason: &str| GraphError::Link {
            src: state.name(*src),
            sink: state.name(*sink),
            reason: reason.to_string(),
        };

        if state.port(*src)?.direction != Direction::Output
            || state.port(*sink)?.direction != Direction::Input
        {
            return Err(error(&*state, "wrong direction"));
        }
        if state.peers.contains_key(src) || state.peers.contains_key(sink) {
            return Err(error(&*state, "already linked"));
        }
        match state.links_until_failure {
            Some(0) => return Err(error(&*state, "refused")),
            Some(n) => state.links_until_failure = Some(n - 1),
            None => {}
        }

        state.peers.insert(*src, *sink);
        state.peers.insert(*sink, *src);
        trace!(src = %state.name(*src), sink = %state.name(*sink), "Linked");
        Ok(())
    }

    fn unlink(&self, src: &PortId, sink: &PortId) -> GraphResult<()> {
        let mut state = self.inner.state.lock();
        if state.peers.get(src) != Some(sink) {
            return Err(GraphError::Unlink {
                src: state.name(*src),
                sink: state.name(*sink),
                reason: "not linked".to_string(),
            });
        }

        state.peers.remove(src);
        state.peers.remove(sink);
        trace!(src = %state.name(*src), sink = %state.name(*sink), "Unlinked");
        Ok(())
    }

    fn peer(&self, port: &PortId) -> Option<PortId> {
        self.inner.state.lock().peers.get(port).copied()
    }

    fn install_event_interceptor(
        &self,
        port: &PortId,
        interceptor: EventInterceptor,
    ) -> GraphResult<()> {
        let mut state = self.inner.state.lock();
        state
            .port(*port)
            .map_err(|_| GraphError::Interceptor(port.to_string()))?;
        state.interceptors.entry(*port).or_default().push(interceptor);
        Ok(())
    }

    fn set_event_handler(&self, handler: GraphEventHandler<PortId>) {
        *self.inner.handler.lock() = Some(handler);
    }

    fn set_run_state(&self, run_state: RunState) -> GraphResult<()> {
        let mut state = self.inner.state.lock();
        state.run_state = Some(run_state);
        state.run_state_history.push(run_state);
        debug!(state = ?run_state, "Run state changed");
        Ok(())
    }

    fn run_dispatch_loop(&self) {
        debug!("Dispatch loop running");

        while let Ok(Dispatch::Event(event)) = self.inner.dispatch_rx.recv() {
            let handler = self.inner.handler.lock().clone();
            match handler {
                Some(handler) => handler(event),
                None => trace!(?event, "No handler registered, notification dropped"),
            }
        }

        debug!("Dispatch loop returned");
    }

    fn quit_dispatch_loop(&self) {
        let _ = self.inner.dispatch_tx.send(Dispatch::Quit);
    }
}
