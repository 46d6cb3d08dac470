//! pcn-watch entry point.
//!
//! Loads configuration, installs logging, then runs the reader thread and the
//! async print loop until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + Cli overrides
//!  └─ spawn_reader()                -- OS thread, owns ProcConnection
//!       └─ open / read / reconnect  -- blocking_send(ReaderEvent)
//!  └─ select! loop
//!       ├─ ReaderEvent::Records     -> format_record() -> stdout
//!       ├─ ReaderEvent::Disconnected -> warn, reader reconnects
//!       └─ Ctrl-C                   -> stop reader, exit
//! ```
//!
//! Events go to stdout; logs go to stderr so the two can be piped apart.
//! Subscribing requires `CAP_NET_ADMIN` (usually root).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pcn_client::ConnectionOptions;
use pcn_core::EventType;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pcn_watch::config::{load_config, WatchConfig};
use pcn_watch::output::OutputFormat;

/// Stream Linux process events (fork, exec, exit, ...) as text or JSON.
#[derive(Parser, Debug)]
#[command(name = "pcn-watch", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "PCN_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated event types to subscribe to (e.g. `fork,exec,exit`).
    #[arg(long, env = "PCN_EVENTS", value_delimiter = ',')]
    events: Option<Vec<EventType>>,

    /// Output format.
    #[arg(long, value_enum, env = "PCN_FORMAT")]
    format: Option<OutputFormat>,

    /// How long to wait for the kernel to acknowledge the subscription.
    #[arg(long, env = "PCN_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: Option<u64>,
}

impl Cli {
    /// Applies command-line and environment overrides on top of `config`.
    fn apply(&self, config: &mut WatchConfig) {
        if let Some(events) = &self.events {
            config.connection.events = events.clone();
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.connection.handshake_timeout_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading default configuration".to_string(),
    })?;
    cli.apply(&mut config);

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.output.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(events = ?config.connection.events, format = ?config.output.format, "pcn-watch starting");

    let options = config.connection.connection_options();
    options.compile_filter().context("invalid event filter")?;

    run(&config, options).await?;
    info!("pcn-watch stopped");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run(config: &WatchConfig, options: ConnectionOptions) -> anyhow::Result<()> {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use pcn_client::{clock, ProcConnection};
    use pcn_watch::output::format_record;
    use pcn_watch::reader::{spawn_reader, ReaderEvent, ReaderSettings};
    use tokio::sync::mpsc;
    use tracing::warn;

    /// Batches buffered between the reader thread and the print loop.
    const CHANNEL_CAPACITY: usize = 256;

    let running = Arc::new(AtomicBool::new(true));
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let settings = ReaderSettings {
        options,
        reconnect_delay: config.connection.reconnect_delay(),
    };
    let handle = spawn_reader(
        |options: &ConnectionOptions| ProcConnection::open(options),
        settings,
        Arc::clone(&running),
        tx,
    )
    .context("spawning reader thread")?;

    let format = config.output.format;
    let mut epoch = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break Ok(());
            }
            event = rx.recv() => match event {
                Some(ReaderEvent::Connected) => {
                    // Recomputed per connection so a stepped wall clock is picked up.
                    epoch = match clock::monotonic_epoch() {
                        Ok(epoch) => Some(epoch),
                        Err(e) => {
                            warn!(error = %e, "cannot compute wall-clock epoch");
                            None
                        }
                    };
                }
                Some(ReaderEvent::Records(records)) => {
                    let mut out = std::io::stdout().lock();
                    let written = records.iter().try_for_each(|record| -> anyhow::Result<()> {
                        writeln!(out, "{}", format_record(record, format, epoch)?)?;
                        Ok(())
                    });
                    if let Err(e) = written.and_then(|()| Ok(out.flush()?)) {
                        break Err(e.context("writing events to stdout"));
                    }
                }
                Some(ReaderEvent::Disconnected(reason)) => {
                    warn!(
                        %reason,
                        retry_in_ms = config.connection.reconnect_delay_ms,
                        "process events connection lost"
                    );
                }
                Some(ReaderEvent::Fatal(reason)) => break Err(anyhow::anyhow!(reason)),
                None => break Ok(()),
            }
        }
    };

    running.store(false, Ordering::Relaxed);
    drop(rx);
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => {}
        _ => warn!("reader thread did not shut down cleanly"),
    }
    result
}

#[cfg(not(target_os = "linux"))]
async fn run(_config: &WatchConfig, _options: ConnectionOptions) -> anyhow::Result<()> {
    anyhow::bail!("pcn-watch requires the Linux process events connector")
}
