//! Connection lifecycle: subscribe handshake, filter install, blocking reads.
//!
//! ```text
//! Closed ──open──▶ Handshaking ──ACK──▶ Open ──close──▶ Closed
//!                       │
//!                       └──no ACK / timeout──▶ Closed (error returned)
//! ```
//!
//! A connection owns its transport exclusively, and every operation takes
//! `&mut self`, so only one reader can ever be blocked in [`ProcConnection::read`].
//! Callers that need fan-out run one dedicated reader thread and forward
//! records over a channel.

use std::time::Duration;

use pcn_core::{
    compile, decode_event, encode_subscribe_request, encode_unsubscribe_request,
    is_acknowledgement, EventRecord, EventType, FilterError, FilterProgram, ProtocolError,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::transport::{Transport, TransportError};

#[cfg(target_os = "linux")]
use crate::transport::socket::NetlinkSocket;

/// Default bound on the wait for the kernel's acknowledgement.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by [`ProcConnection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A received message could not be decoded.  The whole batch is dropped.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The requested event filter is invalid.  Reported before any I/O.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
    /// The kernel's reply to the subscribe request was not an acknowledgement.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// No reply to the subscribe request arrived within the handshake timeout.
    #[error("handshake timed out waiting for acknowledgement")]
    HandshakeTimeout,
    /// The connection or its transport is closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// No datagram arrived within the read timeout.  The connection stays open.
    #[error("read timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Lifecycle state of a [`ProcConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Handshaking,
    Open,
}

/// Caller-supplied connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on the wait for the subscribe acknowledgement.  `None` waits
    /// forever.
    pub handshake_timeout: Option<Duration>,
    /// Bound on each [`ProcConnection::read`].  `None` blocks until an event
    /// arrives.
    pub read_timeout: Option<Duration>,
    /// Event types to deliver.  `None` delivers every event; an empty list is
    /// rejected with [`FilterError::EmptyFilterSet`].
    pub event_filter: Option<Vec<EventType>>,
    /// Send an "ignore" control message before releasing the transport.
    pub unsubscribe_on_close: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            read_timeout: None,
            event_filter: None,
            unsubscribe_on_close: true,
        }
    }
}

impl ConnectionOptions {
    /// Compiles [`ConnectionOptions::event_filter`], if set.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::EmptyFilterSet`] for an empty filter list.
    pub fn compile_filter(&self) -> Result<Option<FilterProgram>, FilterError> {
        self.event_filter
            .as_ref()
            .map(|types| compile(types.iter().copied()))
            .transpose()
    }
}

/// A subscription to the kernel's process events.
pub struct ProcConnection<T: Transport> {
    transport: T,
    state: ConnectionState,
    filter: Option<FilterProgram>,
    unsubscribe_on_close: bool,
}

#[cfg(target_os = "linux")]
impl ProcConnection<NetlinkSocket> {
    /// Opens a netlink socket, subscribes to process events and installs the
    /// requested filter.  Requires `CAP_NET_ADMIN`.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Filter`] if the filter list is empty (no socket
    ///   is opened).
    /// - [`ConnectionError::Transport`] if the socket cannot be created.
    /// - Any handshake error from [`ProcConnection::with_transport`].
    pub fn open(options: &ConnectionOptions) -> Result<Self, ConnectionError> {
        let filter = options.compile_filter()?;
        let socket = NetlinkSocket::connect()?;
        Self::establish(socket, filter, options)
    }
}

impl<T: Transport> ProcConnection<T> {
    /// Runs the subscribe handshake over an already-open `transport`.
    ///
    /// On failure the transport is closed before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Filter`] if the filter list is empty.  Nothing is
    ///   sent.
    /// - [`ConnectionError::HandshakeTimeout`] if no reply arrives in time.
    /// - [`ConnectionError::HandshakeRejected`] if the reply is not an ACK.
    /// - [`ConnectionError::Transport`] on any other transport failure.
    pub fn with_transport(
        mut transport: T,
        options: &ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let filter = match options.compile_filter() {
            Ok(filter) => filter,
            Err(e) => {
                let _ = transport.close();
                return Err(e.into());
            }
        };
        Self::establish(transport, filter, options)
    }

    fn establish(
        transport: T,
        filter: Option<FilterProgram>,
        options: &ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let mut conn = Self {
            transport,
            state: ConnectionState::Handshaking,
            filter,
            unsubscribe_on_close: false,
        };
        match conn.handshake(options) {
            Ok(()) => {
                conn.state = ConnectionState::Open;
                conn.unsubscribe_on_close = options.unsubscribe_on_close;
                debug!(filtered = conn.filter.is_some(), "process events connection open");
                Ok(conn)
            }
            Err(e) => {
                let _ = conn.close();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, options: &ConnectionOptions) -> Result<(), ConnectionError> {
        self.transport.set_read_timeout(options.handshake_timeout)?;
        self.transport.send(&encode_subscribe_request())?;
        debug!(timeout = ?options.handshake_timeout, "sent subscribe request, awaiting ACK");

        let reply = match self.transport.receive() {
            Ok(reply) => reply,
            Err(TransportError::TimedOut) => {
                warn!("no acknowledgement within handshake timeout");
                return Err(ConnectionError::HandshakeTimeout);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(first) = reply.first() else {
            warn!("kernel reply to subscribe request was empty");
            return Err(ConnectionError::HandshakeRejected("empty reply".into()));
        };
        if !is_acknowledgement(&first.payload) {
            warn!(len = first.payload.len(), "kernel reply is not an acknowledgement");
            return Err(ConnectionError::HandshakeRejected(format!(
                "reply of {} bytes is not an acknowledgement",
                first.payload.len()
            )));
        }
        debug!("subscribe request acknowledged");

        if let Some(program) = &self.filter {
            self.transport.set_filter(program)?;
            debug!(event_types = ?program.event_types(), "installed event filter");
        }
        self.transport.set_read_timeout(options.read_timeout)?;
        Ok(())
    }

    /// Blocks for one datagram and returns its decoded events in kernel
    /// delivery order.
    ///
    /// With a filter installed, messages it rejects are discarded before
    /// decoding.  The kernel only filters packets queued after the filter was
    /// attached; anything multicast between bind and attach is caught here.
    /// The returned batch may therefore be empty.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::ConnectionClosed`] if the connection is not open.
    /// - [`ConnectionError::Timeout`] if the read timeout expired.  The
    ///   connection remains usable.
    /// - [`ConnectionError::Protocol`] if any message fails to decode.  No
    ///   partial batch is returned; reconnecting is the expected recovery.
    pub fn read(&mut self) -> Result<Vec<EventRecord>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::ConnectionClosed);
        }
        let messages = self.transport.receive().map_err(|e| match e {
            TransportError::TimedOut => ConnectionError::Timeout,
            TransportError::Closed => ConnectionError::ConnectionClosed,
            other => ConnectionError::Transport(other),
        })?;
        trace!(messages = messages.len(), "received batch");

        let wanted = |payload: &[u8]| {
            self.filter
                .as_ref()
                .map_or(true, |program| program.accepts_message(payload))
        };
        let mut records = Vec::with_capacity(messages.len());
        for message in &messages {
            if !wanted(&message.payload) {
                trace!(len = message.payload.len(), "discarded message rejected by filter");
                continue;
            }
            records.push(decode_event(&message.payload)?);
        }
        Ok(records)
    }

    /// Unsubscribes (best effort) and releases the transport.  Closing an
    /// already closed connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] if releasing the transport
    /// fails.  The connection is `Closed` either way.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if self.state == ConnectionState::Open && self.unsubscribe_on_close {
            if let Err(e) = self.transport.send(&encode_unsubscribe_request()) {
                warn!(error = %e, "unsubscribe request failed");
            }
        }
        self.state = ConnectionState::Closed;
        self.transport.close()?;
        debug!("process events connection closed");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The installed filter, if any.
    pub fn filter(&self) -> Option<&FilterProgram> {
        self.filter.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Drop for ProcConnection<T> {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            let _ = self.close();
        }
    }
}
