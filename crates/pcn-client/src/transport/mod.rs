//! Transport seam between the connection state machine and the kernel.
//!
//! The connection only needs four capabilities from a socket: send one
//! control message, receive one batch of messages, attach a socket filter,
//! and close.  [`Transport`] captures exactly that, so the handshake and read
//! path can be driven by the real netlink socket on Linux or by the scripted
//! transport in [`mock`] everywhere else.
//!
//! The correct implementation is selected at compile time via
//! `#[cfg(target_os = ...)]`.

use std::time::Duration;

use pcn_core::FilterProgram;
use thiserror::Error;

pub mod mock;
pub mod netlink;

#[cfg(target_os = "linux")]
pub mod socket;

pub use netlink::NetlinkMessage;
pub use netlink_packet_core::NetlinkHeader;

/// Errors reported by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// A system call failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No datagram arrived within the configured read timeout.
    #[error("receive timed out")]
    TimedOut,
    /// The transport was closed locally.
    #[error("transport is closed")]
    Closed,
    /// The kernel dropped notifications because the receive buffer was full.
    #[error("receive buffer overrun: the kernel dropped notifications")]
    Overrun,
    /// The kernel answered with an `NLMSG_ERROR` carrying this errno.
    #[error("netlink error reply: errno {errno}")]
    Netlink { errno: i32 },
    /// The datagram could not be split into netlink messages.
    #[error("malformed netlink datagram: {0}")]
    Malformed(String),
}

/// A connected netlink endpoint for the process connector protocol.
///
/// Implementations own their socket exclusively.  All calls block.
pub trait Transport: Send {
    /// Sends one connector message.  The transport adds the netlink header.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Receives one datagram and returns the netlink messages it contained,
    /// in order.  Blocks until a datagram arrives or the read timeout expires.
    fn receive(&mut self) -> Result<Vec<NetlinkMessage>, TransportError>;

    /// Attaches a socket filter.  Packets queued after this call that the
    /// filter drops are never returned by [`Transport::receive`]; packets
    /// already queued are not re-checked.
    fn set_filter(&mut self, program: &FilterProgram) -> Result<(), TransportError>;

    /// Bounds how long [`Transport::receive`] may block.  `None` waits forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Releases the socket.  Closing twice is not an error.
    fn close(&mut self) -> Result<(), TransportError>;
}
