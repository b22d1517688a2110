//! source-switcher: alternate a live stream and a local file on one display.
//!
//! Every INTERVAL seconds the display is handed to the other source while the
//! hidden one keeps decoding into a discard sink. Once the file ends the live
//! stream stays on screen.

mod events;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Sender;
use tracing::{error, info};

use switcher_engine::Switcher;
use switcher_graph::MediaGraph;
use switcher_ipc::{StopReason, SwitcherConfig, SwitcherEvent, DEFAULT_LIVE_URI};

#[derive(Parser, Debug)]
#[command(name = "source-switcher")]
#[command(author, version, about = "Alternate a live stream and a local file on one display", long_about = None)]
struct Cli {
    /// Seconds between swaps
    interval: u64,

    /// Local media file to alternate with the live stream
    file: PathBuf,

    /// Live stream location
    #[arg(long, default_value = DEFAULT_LIVE_URI)]
    live_uri: String,

    /// Live source network timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    live_timeout_ms: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print every controller event to stdout as a JSON line
    #[arg(long)]
    json_events: bool,

    /// End the simulated file producer after this many seconds
    #[cfg(not(feature = "gstreamer"))]
    #[arg(long)]
    simulate_file_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> SwitcherConfig {
        SwitcherConfig {
            live_uri: self.live_uri.clone(),
            live_timeout: Duration::from_millis(self.live_timeout_ms),
            ..SwitcherConfig::new(Duration::from_secs(self.interval), self.file.clone())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(reason) if reason.is_fatal() => {
            error!(reason = %reason.message(), "Switcher stopped on failure");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<StopReason> {
    let (event_tx, event_rx) = switcher_ipc::event_channel();
    let printer =
        events::spawn_printer(event_rx, cli.json_events).context("failed to start event printer")?;

    let reason = launch(cli, event_tx);

    // The controller's sender is gone once the switcher is dropped.
    if printer.join().is_err() {
        error!("Event printer panicked");
    }
    reason
}

#[cfg(feature = "gstreamer")]
fn launch(cli: &Cli, event_tx: Sender<SwitcherEvent>) -> anyhow::Result<StopReason> {
    use switcher_graph::GstGraph;

    let switcher = Switcher::new(cli.config(), event_tx, GstGraph::build)
        .context("failed to set up the pipeline")?;
    host(switcher, cli.duration_secs)
}

#[cfg(not(feature = "gstreamer"))]
fn launch(cli: &Cli, event_tx: Sender<SwitcherEvent>) -> anyhow::Result<StopReason> {
    use std::time::Instant;

    use switcher_graph::MemoryGraph;
    use switcher_ipc::Branch;
    use tracing::warn;

    const ANNOUNCE_DELAY: Duration = Duration::from_millis(200);
    const LINK_TIMEOUT: Duration = Duration::from_secs(5);
    const LINK_POLL: Duration = Duration::from_millis(10);

    let switcher = Switcher::new(cli.config(), event_tx, |_| Ok(MemoryGraph::new()))
        .context("failed to set up the simulated graph")?;
    info!("Built without GStreamer, simulating both producers");

    let graph = switcher.graph().clone();
    let file_secs = cli.simulate_file_secs;
    thread::Builder::new()
        .name("simulated-producers".to_string())
        .spawn(move || {
            thread::sleep(ANNOUNCE_DELAY);
            graph.announce(Branch::Live);
            let file = graph.announce(Branch::File);

            let Some(secs) = file_secs else {
                return;
            };

            // End-of-stream only reaches a consumer once the file is linked.
            let deadline = Instant::now() + LINK_TIMEOUT;
            while graph.downstream_peer(file).is_none() {
                if Instant::now() >= deadline {
                    warn!("Simulated file producer never linked, not ending it");
                    return;
                }
                thread::sleep(LINK_POLL);
            }

            thread::sleep(Duration::from_secs(secs));
            info!("Simulated file producer ending");
            graph.end_of_stream(file);
        })
        .context("failed to start simulated producers")?;

    host(switcher, cli.duration_secs)
}

/// Run `switcher` on this thread until it stops, optionally stopping it after
/// `duration_secs`.
fn host<G: MediaGraph>(
    switcher: Switcher<G>,
    duration_secs: Option<u64>,
) -> anyhow::Result<StopReason> {
    let switcher = Arc::new(switcher);

    if let Some(secs) = duration_secs {
        let weak = Arc::downgrade(&switcher);
        thread::Builder::new()
            .name("stop-timer".to_string())
            .spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                if let Some(switcher) = weak.upgrade() {
                    info!(secs, "Run duration elapsed");
                    switcher.stop();
                }
            })
            .context("failed to start stop timer")?;
    }

    switcher.run().context("switcher failed")?;
    switcher.stop();

    Ok(switcher.stop_reason().unwrap_or(StopReason::Requested))
}
