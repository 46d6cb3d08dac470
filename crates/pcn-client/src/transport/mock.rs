//! Scripted in-memory transport for tests.
//!
//! # Why a scripted transport?
//!
//! The real [`NetlinkSocket`](super::socket::NetlinkSocket):
//!
//! - Requires Linux and `CAP_NET_ADMIN` to subscribe.
//! - Delivers whatever the host happens to be doing, not a fixed sequence.
//! - Cannot be made to time out or overrun on demand.
//!
//! `ScriptedTransport` replaces the socket with a queue of canned receive
//! results and records every call, so tests can assert exactly what the
//! connection sent and in what order.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = ScriptedTransport::new()
//!     .with_datagram(ack_bytes)
//!     .with_datagram(exit_event_bytes);
//! let mut conn = ProcConnection::with_transport(transport, &ConnectionOptions::default())?;
//! let records = conn.read()?;
//! assert_eq!(conn.transport().sent.len(), 1);
//! ```
//!
//! When the script runs out, `receive` returns [`TransportError::TimedOut`].

use std::collections::VecDeque;
use std::time::Duration;

use pcn_core::FilterProgram;

use super::netlink::NetlinkMessage;
use super::{Transport, TransportError};

/// A transport that replays scripted receive results and records all calls.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    /// Results returned by successive `receive` calls.
    pub script: VecDeque<Result<Vec<NetlinkMessage>, TransportError>>,
    /// Every payload passed to `send`, in order.
    pub sent: Vec<Vec<u8>>,
    /// The most recently attached filter program.
    pub filter: Option<FilterProgram>,
    /// Every value passed to `set_read_timeout`, in order.
    pub read_timeouts: Vec<Option<Duration>>,
    /// Number of `close` calls.
    pub close_calls: usize,
    /// When `true`, `send` fails with an I/O error.
    pub fail_send: bool,
    closed: bool,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one datagram carrying a single connector message.
    pub fn with_datagram(self, connector_payload: Vec<u8>) -> Self {
        self.with_messages(vec![connector_payload])
    }

    /// Queues one datagram carrying several connector messages.
    pub fn with_messages(mut self, payloads: Vec<Vec<u8>>) -> Self {
        let messages = payloads
            .iter()
            .map(|p| NetlinkMessage::control(p, 0, 0))
            .collect();
        self.script.push_back(Ok(messages));
        self
    }

    /// Queues a receive error.
    pub fn with_error(mut self, err: TransportError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Returns `true` once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.fail_send {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "scripted send failure",
            )));
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<NetlinkMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.script.pop_front().unwrap_or(Err(TransportError::TimedOut))
    }

    fn set_filter(&mut self, program: &FilterProgram) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.filter = Some(program.clone());
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.read_timeouts.push(timeout);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.close_calls += 1;
        self.closed = true;
        Ok(())
    }
}
