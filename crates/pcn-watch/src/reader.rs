//! Dedicated blocking reader thread with reconnect.
//!
//! # Why a thread and not a task? (for beginners)
//!
//! [`ProcConnection::read`] is a blocking system call.  Running it on a Tokio
//! worker would stall every other task scheduled on that worker, so the
//! connection lives on its own OS thread and hands batches to the async side
//! over a bounded `mpsc` channel (`blocking_send` on the thread,
//! `recv().await` in `main`).
//!
//! The thread owns the connection for its whole life, which satisfies the
//! connection's single-reader rule without any locking.
//!
//! # Shutdown
//!
//! The thread checks the shared `running` flag between reads.  A configured
//! read timeout therefore bounds how long shutdown waits.  Dropping the
//! receiver also stops the thread at its next send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pcn_client::{ConnectionError, ConnectionOptions, ProcConnection, Transport};
use pcn_core::EventRecord;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages from the reader thread to the async consumer.
#[derive(Debug)]
pub enum ReaderEvent {
    /// The subscribe handshake succeeded.
    Connected,
    /// One batch of decoded events, in kernel delivery order.
    Records(Vec<EventRecord>),
    /// The connection failed or was lost; a reconnect follows after the delay.
    Disconnected(String),
    /// An unrecoverable configuration error; the thread has exited.
    Fatal(String),
}

/// Reader thread settings.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub options: ConnectionOptions,
    pub reconnect_delay: Duration,
}

/// Spawns the reader thread.
///
/// `connect` is called for every (re)connection attempt; in production it is
/// [`ProcConnection::open`], in tests it wraps a scripted transport.
pub fn spawn_reader<T, F>(
    connect: F,
    settings: ReaderSettings,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<ReaderEvent>,
) -> std::io::Result<JoinHandle<()>>
where
    T: Transport + 'static,
    F: FnMut(&ConnectionOptions) -> Result<ProcConnection<T>, ConnectionError> + Send + 'static,
{
    thread::Builder::new()
        .name("pcn-reader".into())
        .spawn(move || run_reader(connect, &settings, &running, &tx))
}

/// Connect / read / reconnect loop.  Returns when `running` is cleared, the
/// receiver is dropped, or the options are invalid.
pub fn run_reader<T, F>(
    mut connect: F,
    settings: &ReaderSettings,
    running: &AtomicBool,
    tx: &mpsc::Sender<ReaderEvent>,
) where
    T: Transport,
    F: FnMut(&ConnectionOptions) -> Result<ProcConnection<T>, ConnectionError>,
{
    while running.load(Ordering::Relaxed) {
        match connect(&settings.options) {
            Ok(mut conn) => {
                info!("subscribed to process events");
                if tx.blocking_send(ReaderEvent::Connected).is_err() {
                    return;
                }
                let reason = pump(&mut conn, running, tx);
                if let Err(e) = conn.close() {
                    warn!(error = %e, "error closing connection");
                }
                match reason {
                    Some(reason) => {
                        if tx.blocking_send(ReaderEvent::Disconnected(reason)).is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            Err(ConnectionError::Filter(e)) => {
                let _ = tx.blocking_send(ReaderEvent::Fatal(e.to_string()));
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to subscribe to process events");
                if tx.blocking_send(ReaderEvent::Disconnected(e.to_string())).is_err() {
                    return;
                }
            }
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }
        debug!(delay = ?settings.reconnect_delay, "waiting before reconnect");
        thread::sleep(settings.reconnect_delay);
    }
}

/// Reads until the connection fails (returns the reason) or the reader
/// should stop (returns `None`).
fn pump<T: Transport>(
    conn: &mut ProcConnection<T>,
    running: &AtomicBool,
    tx: &mpsc::Sender<ReaderEvent>,
) -> Option<String> {
    while running.load(Ordering::Relaxed) {
        match conn.read() {
            Ok(records) if records.is_empty() => {}
            Ok(records) => {
                if tx.blocking_send(ReaderEvent::Records(records)).is_err() {
                    return None;
                }
            }
            Err(ConnectionError::Timeout) => {}
            Err(e) => {
                warn!(error = %e, "process events connection lost");
                return Some(e.to_string());
            }
        }
    }
    None
}
