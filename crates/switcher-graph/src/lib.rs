//! Media graph abstraction for the source switcher.
//!
//! The switch controller never talks to a media runtime directly. It drives a
//! [`MediaGraph`], which exposes the handful of port-level primitives the
//! controller needs: boundary ports, link/unlink, peer queries, event
//! interceptors, run state, and a blocking dispatch loop that delivers
//! [`GraphEvent`]s.
//!
//! Two backends are provided:
//! - [`MemoryGraph`], an in-process model of ports and links.
//! - `GstGraph` (feature `gstreamer`), backed by a GStreamer pipeline.

mod error;
#[cfg(feature = "gstreamer")]
mod gst;
mod memory;

pub use error::GraphError;
#[cfg(feature = "gstreamer")]
pub use gst::GstGraph;
pub use memory::{MemoryGraph, PortId};

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switcher_ipc::Branch;

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Handler invoked on the dispatch thread for every graph notification.
pub type GraphEventHandler<P> = Arc<dyn Fn(GraphEvent<P>) + Send + Sync>;

/// Callback installed on a port to observe in-band stream events.
pub type EventInterceptor = Arc<dyn Fn(StreamEvent) -> InterceptVerdict + Send + Sync>;

/// Overall run state of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Media is flowing.
    Playing,

    /// Nothing is flowing; resources released.
    Idle,
}

/// Asynchronous notifications delivered by the graph runtime.
#[derive(Debug, Clone)]
pub enum GraphEvent<P> {
    /// A producer's decoded output port appeared.
    PortAppeared { branch: Branch, port: P },

    /// The runtime reported an error.
    Error { source: String, message: String },

    /// The whole graph reached end-of-stream.
    EndOfStream,
}

/// In-band events seen by an [`EventInterceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The upstream producer has no more data.
    EndOfStream,

    /// Any other event.
    Other,
}

/// What an interceptor did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptVerdict {
    /// The event is consumed and does not travel further.
    Handled,

    /// The event continues downstream.
    PassThrough,
}

/// Nodes whose static input ports the controller links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// The display sink.
    DisplaySink,

    /// The clock-sync stage in front of the discard sink.
    DiscardSync,
}

/// Containers whose boundary can carry proxy ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// Container around the live producer and its decoder.
    LiveBranch,

    /// Container around the file producer and its decoder.
    FileBranch,

    /// Container around the clock-sync and discard sink pair.
    Discard,
}

impl Container {
    /// The container wrapping the given branch.
    pub fn for_branch(branch: Branch) -> Self {
        match branch {
            Branch::Live => Self::LiveBranch,
            Branch::File => Self::FileBranch,
        }
    }

    /// Returns the name used for this container in the graph.
    pub fn name(self) -> &'static str {
        match self {
            Self::LiveBranch => "liveBin",
            Self::FileBranch => "fileBin",
            Self::Discard => "discardBin",
        }
    }
}

/// Port-level operations the switch controller needs from a media runtime.
///
/// Implementations must be safe to call from the dispatch thread, the switch
/// worker, and any thread that owns the controller.
pub trait MediaGraph: Send + Sync + 'static {
    /// Handle to a port. Equality means "same port".
    type Port: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Static input port of a node.
    fn static_port(&self, node: NodeRole) -> GraphResult<Self::Port>;

    /// Expose `inner` on the boundary of `container` under `name`.
    fn create_boundary_port(
        &self,
        container: Container,
        inner: &Self::Port,
        name: &str,
    ) -> GraphResult<Self::Port>;

    /// Link an output port to an input port.
    fn link(&self, src: &Self::Port, sink: &Self::Port) -> GraphResult<()>;

    /// Remove the link between an output port and an input port.
    fn unlink(&self, src: &Self::Port, sink: &Self::Port) -> GraphResult<()>;

    /// The port currently linked to `port`, if any.
    fn peer(&self, port: &Self::Port) -> Option<Self::Port>;

    /// Observe in-band events arriving at `port`.
    fn install_event_interceptor(
        &self,
        port: &Self::Port,
        interceptor: EventInterceptor,
    ) -> GraphResult<()>;

    /// Register the handler for asynchronous notifications.
    fn set_event_handler(&self, handler: GraphEventHandler<Self::Port>);

    /// Change the overall run state.
    ///
    /// Must be callable from the runtime's own notification and interceptor
    /// threads. Backends may apply [`RunState::Idle`] asynchronously.
    fn set_run_state(&self, state: RunState) -> GraphResult<()>;

    /// Block the calling thread, delivering notifications, until
    /// [`quit_dispatch_loop`](Self::quit_dispatch_loop) is called.
    fn run_dispatch_loop(&self);

    /// Ask a running (or the next) dispatch loop to return.
    fn quit_dispatch_loop(&self);
}
