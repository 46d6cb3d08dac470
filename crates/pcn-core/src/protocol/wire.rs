//! Process connector wire types and constants.
//!
//! Layouts mirror `struct cn_msg` from `<linux/connector.h>` and
//! `struct proc_event` from `<linux/cn_proc.h>`.  All fields are little-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the connector envelope (`struct cn_msg` without its data).
pub const ENVELOPE_SIZE: usize = 20;

/// Size of the event header that follows the envelope.
pub const EVENT_HEADER_SIZE: usize = 16;

/// Smallest datagram that can carry an envelope and an event header.
pub const MIN_DATAGRAM_SIZE: usize = ENVELOPE_SIZE + EVENT_HEADER_SIZE;

/// Size of the netlink header (`struct nlmsghdr`) that precedes the envelope
/// in the packet a socket filter sees.
pub const NETLINK_HEADER_SIZE: usize = 16;

/// Byte offset of the event-type tag within a full netlink packet.
pub const EVENT_TYPE_PACKET_OFFSET: usize = NETLINK_HEADER_SIZE + ENVELOPE_SIZE;

/// Multicast group the socket must join to receive process events
/// (`CN_IDX_PROC`).
pub const PROC_EVENTS_MULTICAST_GROUP: u32 = 0x1;

/// Length of the fixed command-name buffer carried by comm events.
pub const COMM_LEN: usize = 16;

// ── Connector identity ────────────────────────────────────────────────────────

/// Identifies a connector subsystem to the kernel (`struct cb_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorId {
    pub index: u32,
    pub value: u32,
}

impl ConnectorId {
    /// The process events subsystem (`CN_IDX_PROC`, `CN_VAL_PROC`).
    pub const PROC_EVENTS: ConnectorId = ConnectorId { index: 0x1, value: 0x1 };
}

// ── Envelope and event header ─────────────────────────────────────────────────

/// 20-byte connector header present on every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Subsystem the message belongs to.
    pub id: ConnectorId,
    /// Kernel-assigned sequence number.
    pub sequence: u32,
    /// Acknowledgement number; `1` on the kernel's reply to a control message.
    pub ack: u32,
    /// Length of the data following the envelope, as declared by the sender.
    pub payload_len: u16,
    pub flags: u16,
}

/// 16-byte header that starts every `proc_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Raw event-type tag.  Kept raw so that unknown tags can be reported.
    pub event_type: u32,
    /// CPU the event was observed on.
    pub cpu: u32,
    /// Kernel monotonic clock at the time of the event.
    pub timestamp_ns: u64,
}

// ── Event types ───────────────────────────────────────────────────────────────

/// Event-type tags from `enum proc_cn_event`.
///
/// Every tag except [`EventType::None`] has exactly one bit set.  `None` only
/// appears on the kernel's acknowledgement of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum EventType {
    None = 0x0000_0000,
    Fork = 0x0000_0001,
    Exec = 0x0000_0002,
    Uid = 0x0000_0004,
    Gid = 0x0000_0040,
    Sid = 0x0000_0080,
    Ptrace = 0x0000_0100,
    Comm = 0x0000_0200,
    Coredump = 0x4000_0000,
    Exit = 0x8000_0000,
}

impl EventType {
    /// Every tag a caller can subscribe to, in ascending bit order.
    pub const SUBSCRIBABLE: [EventType; 9] = [
        EventType::Fork,
        EventType::Exec,
        EventType::Uid,
        EventType::Gid,
        EventType::Sid,
        EventType::Ptrace,
        EventType::Comm,
        EventType::Coredump,
        EventType::Exit,
    ];

    /// Returns the bitmask value carried on the wire.
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Returns the lowercase name used in logs, configuration and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::None => "none",
            EventType::Fork => "fork",
            EventType::Exec => "exec",
            EventType::Uid => "uid",
            EventType::Gid => "gid",
            EventType::Sid => "sid",
            EventType::Ptrace => "ptrace",
            EventType::Comm => "comm",
            EventType::Coredump => "coredump",
            EventType::Exit => "exit",
        }
    }
}

impl TryFrom<u32> for EventType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0x0000_0000 => Ok(EventType::None),
            0x0000_0001 => Ok(EventType::Fork),
            0x0000_0002 => Ok(EventType::Exec),
            0x0000_0004 => Ok(EventType::Uid),
            0x0000_0040 => Ok(EventType::Gid),
            0x0000_0080 => Ok(EventType::Sid),
            0x0000_0100 => Ok(EventType::Ptrace),
            0x0000_0200 => Ok(EventType::Comm),
            0x4000_0000 => Ok(EventType::Coredump),
            0x8000_0000 => Ok(EventType::Exit),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name an event type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type name: {0:?}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        std::iter::once(EventType::None)
            .chain(EventType::SUBSCRIBABLE)
            .find(|ty| ty.as_str() == name)
            .ok_or_else(|| ParseEventTypeError(s.to_string()))
    }
}

// ── Control messages ──────────────────────────────────────────────────────────

/// Subscription action carried in the body of a control message
/// (`enum proc_cn_mcast_op`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ListenAction {
    /// Start delivering events to the multicast group.
    Listen = 1,
    /// Stop delivering events.
    Ignore = 2,
}

impl TryFrom<u32> for ListenAction {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            1 => Ok(ListenAction::Listen),
            2 => Ok(ListenAction::Ignore),
            _ => Err(()),
        }
    }
}

/// A decoded outbound control message: envelope plus subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub envelope: Envelope,
    pub action: ListenAction,
}
