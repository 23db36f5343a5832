//! CLI Entry Point for kitctl
//!
//! Provides command-line interface for:
//! - Running the motor polling daemon on the stepper board
//! - Running the camera polling daemon on the imaging board
//! - Running the protocol proxy against a remote parameter daemon
//!
//! # Architecture
//!
//! One subcommand per device personality. Each starts the same daemon
//! skeleton: bind the remote-access endpoint, probe the hardware, build the
//! parameter store from the device catalog, then hand control to the poll
//! loop until Ctrl+C.
//!
//! # Usage
//!
//! Drive the stepper motor board:
//! ```bash
//! kitctl motor
//! ```
//!
//! Drive the camera board on a non-default port, polling twice a second:
//! ```bash
//! kitctl camera 4850 --interval-ms 500
//! ```
//!
//! Exercise the relay logic without hardware or an upstream daemon:
//! ```bash
//! kitctl proxy --mock
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
// Use mimalloc for improved allocation performance in multi-threaded scenarios
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use kitctl::device::{CameraController, Controller, MotorController, ProxyController};
use kitctl::endpoint::NullEndpoint;
use kitctl::error::KitError;
use kitctl::hardware::{BoardIo, MockIo, ShellIo};
use kitctl::logging::{self, OutputFormat, TracingConfig};
use kitctl::parameter::{NullSink, ParamSink, ParamStore};
use kitctl::poll::{PollLoop, DEFAULT_POLL_INTERVAL};
use kitctl::sequence::Sequencer;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::Level;

#[derive(Parser)]
#[command(name = "kitctl")]
#[command(about = "Device command polling daemon for kit hardware", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the stepper motor board
    Motor {
        #[command(flatten)]
        opts: DaemonOpts,
    },

    /// Drive the camera board and its RTP streamer
    Camera {
        #[command(flatten)]
        opts: DaemonOpts,
    },

    /// Relay camera commands to a remote parameter daemon
    Proxy {
        #[command(flatten)]
        opts: DaemonOpts,
    },
}

#[derive(Args)]
struct DaemonOpts {
    /// Remote-access endpoint port
    #[arg(default_value_t = 4840)]
    port: u16,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    interval_ms: u64,

    /// Use the recording hardware mock instead of the board
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("🚀 kitctl - Device Command Polling Daemon");
    println!();

    logging::init(TracingConfig::new(Level::INFO).with_format(OutputFormat::Compact))
        .map_err(anyhow::Error::msg)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Motor { opts } => {
            run_daemon(Arc::new(MotorController::new()), None, opts).await
        }
        Commands::Camera { opts } => {
            run_daemon(Arc::new(CameraController::new()), None, opts).await
        }
        Commands::Proxy { opts } => {
            // The relay needs somewhere to push parameters. Until a protocol
            // adapter is attached the only upstream we can offer is the null
            // sink, so a real run is refused rather than silently dropped.
            let upstream: Arc<dyn ParamSink> = if opts.mock {
                Arc::new(NullSink)
            } else {
                return Err(KitError::HardwareUnavailable(
                    "upstream parameter sink (run with --mock until a protocol adapter is attached)"
                        .to_string(),
                )
                .into());
            };
            run_daemon(Arc::new(ProxyController::new()), Some(upstream), opts).await
        }
    }
}

async fn run_daemon(
    controller: Arc<dyn Controller>,
    upstream: Option<Arc<dyn ParamSink>>,
    opts: DaemonOpts,
) -> Result<()> {
    println!("🌐 Starting {} daemon", controller.name());
    println!("   Endpoint port: {}", opts.port);
    println!("   Poll interval: {} ms", opts.interval_ms);
    if opts.mock {
        println!("   Hardware: recording mock");
    }
    println!();

    // Claim the port first so a second instance fails before touching hardware.
    let endpoint = NullEndpoint::bind(opts.port).await?;

    let io: Arc<dyn BoardIo> = if opts.mock {
        Arc::new(MockIo::new())
    } else {
        Arc::new(ShellIo::new())
    };

    println!("🔧 Probing hardware...");
    controller.probe(io.as_ref()).await?;
    println!("✅ Hardware ready");

    let store = Arc::new(ParamStore::new(controller.specs())?);
    println!("   Declared {} parameter(s)", store.specs().count());
    tracing::debug!(declarations = %store.declarations_json(), "parameter contract");
    println!();

    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(endpoint.serve(cancel_rx.clone()));

    // The sender lives inside the task so the channel stays open for the
    // whole daemon lifetime; repeated Ctrl+C presses are absorbed here.
    tokio::spawn(async move {
        loop {
            if signal::ctrl_c().await.is_err() {
                break;
            }
            println!("\n🛑 Shutdown signal received, returning hardware to a safe state...");
            if cancel_tx.send(true).is_err() {
                break;
            }
        }
    });

    println!("📡 Daemon running - Press Ctrl+C to stop");
    println!();

    let mut sequencer = Sequencer::new(io, cancel_rx.clone());
    if let Some(sink) = upstream {
        sequencer = sequencer.with_upstream(sink);
    }

    PollLoop::new(
        store,
        controller,
        sequencer,
        Duration::from_millis(opts.interval_ms),
        cancel_rx,
    )
    .run()
    .await;

    println!("👋 Daemon shutdown complete");
    Ok(())
}
