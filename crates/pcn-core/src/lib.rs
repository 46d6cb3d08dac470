//! # pcn-core
//!
//! Protocol core for the Linux kernel's Process Events Connector: the binary
//! codec for connector messages, the classifier that turns a decoded message
//! into a typed [`EventRecord`], and the compiler for the classic-BPF socket
//! filter that restricts which event kinds the kernel delivers.
//!
//! This crate performs no system calls.  Opening the netlink socket, sending
//! the subscribe request and reading datagrams live in `pcn-client`.
//!
//! # Architecture overview (for beginners)
//!
//! The kernel reports process lifecycle changes (fork, exec, exit, ...) as
//! netlink datagrams.  After the 16-byte netlink header, every datagram looks
//! like this:
//!
//! ```text
//! [envelope: 20 bytes][event header: 16 bytes][payload: 8..24 bytes]
//! ```
//!
//! - **`protocol`** – Fixed-layout encode/decode of the envelope, the event
//!   header and the eight payload shapes.
//!
//! - **`event`** – The caller-facing [`EventRecord`], the dispatch from event
//!   tag to payload shape, and the acknowledgement check used during the
//!   subscribe handshake.
//!
//! - **`filter`** – Compiles a set of [`EventType`]s into a [`FilterProgram`]
//!   that the socket attaches so unwanted events never reach userspace.

pub mod event;
pub mod filter;
pub mod protocol;

pub use event::classify::{classify, decode_event, is_acknowledgement};
pub use event::record::{
    CommChangeEvent, CoredumpEvent, EventPayload, EventRecord, ExecEvent, ExitEvent, ForkEvent,
    IdChangeEvent, ProcessIds, PtraceEvent, SessionChangeEvent,
};
pub use filter::{compile, FilterError, FilterProgram, SockFilter};
pub use protocol::codec::{
    decode_control_message, decode_envelope, decode_event_header, decode_payload,
    encode_control_message, encode_subscribe_request, encode_unsubscribe_request, ProtocolError,
};
pub use protocol::wire::{
    ConnectorId, ControlMessage, Envelope, EventHeader, EventType, ListenAction, ParseEventTypeError,
};
