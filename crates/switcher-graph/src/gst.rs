//! GStreamer-backed media graph.
//!
//! Topology:
//!
//! ```text
//! liveBin:    rtspsrc ~> decodebin ~> [live ghost]
//! fileBin:    filesrc -> decodebin ~> [file ghost]
//! display:    autovideosink
//! discardBin: [discard ghost] -> clocksync -> fakesink
//! ```
//!
//! `~>` marks dynamic pads. The decoders' video pads are reported as
//! [`GraphEvent::PortAppeared`]; everything past the bin boundaries is wired
//! by the switch controller.

use std::sync::Arc;

use gstreamer as gst;
use gst::glib;
use gst::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use switcher_ipc::{Branch, SwitcherConfig};

use crate::{
    Container, EventInterceptor, GraphError, GraphEvent, GraphEventHandler, GraphResult,
    InterceptVerdict, MediaGraph, NodeRole, RunState, StreamEvent,
};

type HandlerSlot = Arc<Mutex<Option<GraphEventHandler<gst::Pad>>>>;

fn deliver(slot: &HandlerSlot, event: GraphEvent<gst::Pad>) {
    let handler = slot.lock().clone();
    match handler {
        Some(handler) => handler(event),
        None => warn!(?event, "No handler registered, notification dropped"),
    }
}

fn make_node(kind: &str, name: &str) -> GraphResult<gst::Element> {
    gst::ElementFactory::make(kind)
        .name(name)
        .build()
        .map_err(|_| GraphError::NodeCreation {
            kind: kind.to_string(),
            name: name.to_string(),
        })
}

fn is_video(pad: &gst::Pad) -> bool {
    pad.current_caps()
        .or_else(|| Some(pad.query_caps(None)))
        .and_then(|caps| {
            caps.structure(0)
                .map(|s| s.name().as_str().starts_with("video/"))
        })
        .unwrap_or(false)
}

/// [`MediaGraph`] backed by a GStreamer pipeline.
pub struct GstGraph {
    main_loop: glib::MainLoop,
    pipeline: gst::Pipeline,
    live_bin: gst::Bin,
    file_bin: gst::Bin,
    discard_bin: gst::Bin,
    display_sink: gst::Element,
    clocksync: gst::Element,
    handler: HandlerSlot,
    bus: gst::Bus,
}

impl GstGraph {
    /// Initialize GStreamer and assemble the pipeline.
    ///
    /// Fails if any element factory is unavailable.
    pub fn build(config: &SwitcherConfig) -> GraphResult<Self> {
        gst::init().map_err(|e| GraphError::Init(e.to_string()))?;

        let rtspsrc = make_node("rtspsrc", "rtspsrc")?;
        rtspsrc.set_property("location", config.live_uri.as_str());
        rtspsrc.set_property("timeout", config.live_timeout.as_micros() as u64);

        let filesrc = make_node("filesrc", "filesrc")?;
        filesrc.set_property("location", config.file_path.to_string_lossy().as_ref());

        let live_decoder = make_node("decodebin", "liveDecodebin")?;
        let file_decoder = make_node("decodebin", "fileDecodebin")?;
        let display_sink = make_node("autovideosink", "autovideosink")?;
        let clocksync = make_node("clocksync", "clocksync")?;
        let fakesink = make_node("fakesink", "fakesink")?;

        let assembly = |e: glib::BoolError| GraphError::Assembly(e.to_string());

        let pipeline = gst::Pipeline::with_name("pipeline");

        let live_bin = gst::Bin::with_name(Container::LiveBranch.name());
        live_bin
            .add_many([&rtspsrc, &live_decoder])
            .map_err(assembly)?;

        let file_bin = gst::Bin::with_name(Container::FileBranch.name());
        file_bin
            .add_many([&filesrc, &file_decoder])
            .map_err(assembly)?;
        gst::Element::link_many([&filesrc, &file_decoder]).map_err(assembly)?;

        let discard_bin = gst::Bin::with_name(Container::Discard.name());
        discard_bin
            .add_many([&clocksync, &fakesink])
            .map_err(assembly)?;
        gst::Element::link_many([&clocksync, &fakesink]).map_err(assembly)?;

        pipeline
            .add_many([
                live_bin.upcast_ref::<gst::Element>(),
                file_bin.upcast_ref(),
                &display_sink,
                discard_bin.upcast_ref(),
            ])
            .map_err(assembly)?;

        let handler: HandlerSlot = Arc::new(Mutex::new(None));

        // rtspsrc exposes one pad per stream; the first one feeds the decoder.
        let decoder_weak = live_decoder.downgrade();
        let slot = Arc::clone(&handler);
        rtspsrc.connect_pad_added(move |_, pad| {
            let Some(decoder) = decoder_weak.upgrade() else {
                return;
            };
            let Some(sink) = decoder.static_pad("sink") else {
                return;
            };
            if sink.is_linked() {
                return;
            }
            if let Err(err) = pad.link(&sink) {
                deliver(
                    &slot,
                    GraphEvent::Error {
                        source: pad.name().to_string(),
                        message: format!("could not link live source to decoder: {err:?}"),
                    },
                );
            }
        });

        for (branch, decoder) in [(Branch::Live, &live_decoder), (Branch::File, &file_decoder)] {
            let slot = Arc::clone(&handler);
            decoder.connect_pad_added(move |_, pad| {
                if !is_video(pad) {
                    debug!(%branch, pad = %pad.name(), "Ignoring non-video decoder pad");
                    return;
                }
                deliver(
                    &slot,
                    GraphEvent::PortAppeared {
                        branch,
                        port: pad.clone(),
                    },
                );
            });
        }

        let bus = pipeline
            .bus()
            .ok_or_else(|| GraphError::Assembly("pipeline has no bus".to_string()))?;
        bus.add_signal_watch();
        let slot = Arc::clone(&handler);
        bus.connect_message(None, move |_, msg| match msg.view() {
            gst::MessageView::Error(err) => {
                let source = err
                    .src()
                    .map(|s| s.path_string().to_string())
                    .unwrap_or_default();
                if let Some(debug) = err.debug() {
                    debug!("Debugging information: {}", debug);
                }
                deliver(
                    &slot,
                    GraphEvent::Error {
                        source,
                        message: err.error().to_string(),
                    },
                );
            }
            gst::MessageView::Eos(_) => deliver(&slot, GraphEvent::EndOfStream),
            _ => {}
        });

        info!(live = %config.live_uri, file = %config.file_path.display(), "Pipeline assembled");

        Ok(Self {
            main_loop: glib::MainLoop::new(None, false),
            pipeline,
            live_bin,
            file_bin,
            discard_bin,
            display_sink,
            clocksync,
            handler,
            bus,
        })
    }

    fn bin(&self, container: Container) -> &gst::Bin {
        match container {
            Container::LiveBranch => &self.live_bin,
            Container::FileBranch => &self.file_bin,
            Container::Discard => &self.discard_bin,
        }
    }
}

impl MediaGraph for GstGraph {
    type Port = gst::Pad;

    fn static_port(&self, node: NodeRole) -> GraphResult<gst::Pad> {
        let element = match node {
            NodeRole::DisplaySink => &self.display_sink,
            NodeRole::DiscardSync => &self.clocksync,
        };
        element
            .static_pad("sink")
            .ok_or_else(|| GraphError::MissingPort(format!("{}:sink", element.name())))
    }

    fn create_boundary_port(
        &self,
        container: Container,
        inner: &gst::Pad,
        name: &str,
    ) -> GraphResult<gst::Pad> {
        let failed = |e: glib::BoolError| GraphError::BoundaryPort {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let ghost = gst::GhostPad::builder_with_target(inner)
            .map_err(failed)?
            .name(name)
            .build();
        self.bin(container).add_pad(&ghost).map_err(failed)?;

        Ok(ghost.upcast())
    }

    fn link(&self, src: &gst::Pad, sink: &gst::Pad) -> GraphResult<()> {
        src.link(sink).map(|_| ()).map_err(|e| GraphError::Link {
            src: src.name().to_string(),
            sink: sink.name().to_string(),
            reason: format!("{e:?}"),
        })
    }

    fn unlink(&self, src: &gst::Pad, sink: &gst::Pad) -> GraphResult<()> {
        src.unlink(sink).map_err(|e| GraphError::Unlink {
            src: src.name().to_string(),
            sink: sink.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn peer(&self, port: &gst::Pad) -> Option<gst::Pad> {
        port.peer()
    }

    fn install_event_interceptor(
        &self,
        port: &gst::Pad,
        interceptor: EventInterceptor,
    ) -> GraphResult<()> {
        port.add_probe(gst::PadProbeType::EVENT_BOTH, move |_, info| {
            let event = match &info.data {
                Some(gst::PadProbeData::Event(ev)) if ev.type_() == gst::EventType::Eos => {
                    StreamEvent::EndOfStream
                }
                Some(gst::PadProbeData::Event(_)) => StreamEvent::Other,
                _ => return gst::PadProbeReturn::Ok,
            };

            match interceptor(event) {
                InterceptVerdict::Handled => gst::PadProbeReturn::Handled,
                InterceptVerdict::PassThrough => gst::PadProbeReturn::Ok,
            }
        })
        .map(|_| ())
        .ok_or_else(|| GraphError::Interceptor(port.name().to_string()))
    }

    fn set_event_handler(&self, handler: GraphEventHandler<gst::Pad>) {
        *self.handler.lock() = Some(handler);
    }

    fn set_run_state(&self, state: RunState) -> GraphResult<()> {
        match state {
            RunState::Playing => self
                .pipeline
                .set_state(gst::State::Playing)
                .map(|_| ())
                .map_err(|e| GraphError::StateChange {
                    state,
                    reason: format!("{e:?}"),
                }),
            RunState::Idle => {
                // Shutdown can be triggered from a pad probe or pad-added
                // handler; a streaming thread must not tear down its own
                // pipeline, so the state change runs on the element's async
                // call thread.
                self.pipeline.call_async(|pipeline| {
                    if let Err(e) = pipeline.set_state(gst::State::Null) {
                        error!("Failed to idle pipeline: {:?}", e);
                    }
                });
                Ok(())
            }
        }
    }

    fn run_dispatch_loop(&self) {
        self.main_loop.run();
    }

    fn quit_dispatch_loop(&self) {
        // Queued on the loop's context so a quit issued before `run` is not lost.
        let main_loop = self.main_loop.clone();
        self.main_loop.context().invoke(move || main_loop.quit());
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        self.bus.remove_signal_watch();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!("Failed to release pipeline: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    fn graph() -> Option<GstGraph> {
        let config = SwitcherConfig::new(
            Duration::from_secs(2),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
        );
        match GstGraph::build(&config) {
            Ok(graph) => Some(graph),
            Err(e) => {
                eprintln!("skipping, pipeline unavailable: {e}");
                None
            }
        }
    }

    #[test]
    fn test_idle_is_applied_off_the_calling_thread() {
        let Some(graph) = graph() else {
            return;
        };
        if graph.pipeline.set_state(gst::State::Ready).is_err() {
            eprintln!("skipping, pipeline cannot reach ready");
            return;
        }

        // Returns without waiting for the pipeline, as a streaming thread
        // requires.
        graph.set_run_state(RunState::Idle).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while graph.pipeline.current_state() != gst::State::Null {
            assert!(Instant::now() < deadline, "pipeline never went idle");
            thread::sleep(Duration::from_millis(10));
        }
    }
}
