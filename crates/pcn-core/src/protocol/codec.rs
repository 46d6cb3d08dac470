//! Binary codec for process connector messages.
//!
//! Wire format (after the netlink header, which the transport strips):
//! ```text
//! envelope:     [idx:4][val:4][seq:4][ack:4][len:2][flags:2]     20 bytes
//! event header: [what:4][cpu:4][timestamp_ns:8]                  16 bytes
//! payload:      8..24 bytes, shape selected by `what`
//! ```
//! All multi-byte integers are little-endian.  Decoders only read the fixed
//! number of bytes their structure needs; trailing bytes are ignored because
//! the kernel sizes every message for the largest member of the event union.

use thiserror::Error;

use crate::event::record::{
    CommChangeEvent, CoredumpEvent, EventPayload, ExecEvent, ExitEvent, ForkEvent, IdChangeEvent,
    PtraceEvent, SessionChangeEvent,
};
use crate::protocol::wire::{
    ConnectorId, ControlMessage, Envelope, EventHeader, EventType, ListenAction, COMM_LEN,
    ENVELOPE_SIZE, EVENT_HEADER_SIZE,
};

/// Errors that can occur while encoding or decoding connector messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes remain than the fixed size of the requested structure.
    #[error("truncated message: {context} needs {needed} bytes, got {available}")]
    TruncatedMessage {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// The event-type tag is not in the dispatch table.
    #[error("unknown event type: 0x{0:08X}")]
    UnknownEventType(u32),

    /// A payload decode was attempted on a `none`-tag message, which only
    /// ever appears as an acknowledgement.
    #[error("acknowledgement message carries no event payload")]
    UnexpectedAckEvent,

    /// A control message carried an action other than listen or ignore.
    #[error("unknown listen action: {0}")]
    UnknownListenAction(u32),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes the 20-byte connector envelope at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::TruncatedMessage`] if `bytes` is shorter than the
/// envelope.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    require_len(bytes, ENVELOPE_SIZE, "envelope")?;
    Ok(Envelope {
        id: ConnectorId {
            index: read_u32(bytes, 0),
            value: read_u32(bytes, 4),
        },
        sequence: read_u32(bytes, 8),
        ack: read_u32(bytes, 12),
        payload_len: read_u16(bytes, 16),
        flags: read_u16(bytes, 18),
    })
}

/// Decodes the 16-byte event header at the start of `bytes`.
///
/// `bytes` must begin immediately after the envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::TruncatedMessage`] if `bytes` is shorter than the
/// header.
pub fn decode_event_header(bytes: &[u8]) -> Result<EventHeader, ProtocolError> {
    require_len(bytes, EVENT_HEADER_SIZE, "event header")?;
    Ok(EventHeader {
        event_type: read_u32(bytes, 0),
        cpu: read_u32(bytes, 4),
        timestamp_ns: read_u64(bytes, 8),
    })
}

/// Decodes the payload shape selected by `event_type`.
///
/// The comm buffer is copied verbatim, embedded NUL bytes included.
///
/// # Errors
///
/// - [`ProtocolError::UnexpectedAckEvent`] for [`EventType::None`].
/// - [`ProtocolError::TruncatedMessage`] if `bytes` is shorter than the shape.
pub fn decode_payload(event_type: EventType, bytes: &[u8]) -> Result<EventPayload, ProtocolError> {
    let p = bytes;
    match event_type {
        EventType::None => Err(ProtocolError::UnexpectedAckEvent),
        EventType::Fork => {
            require_len(p, 16, "fork payload")?;
            Ok(EventPayload::Fork(ForkEvent {
                parent_pid: read_u32(p, 0),
                parent_tgid: read_u32(p, 4),
                child_pid: read_u32(p, 8),
                child_tgid: read_u32(p, 12),
            }))
        }
        EventType::Exec => {
            require_len(p, 8, "exec payload")?;
            Ok(EventPayload::Exec(ExecEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
            }))
        }
        // uid and gid share one layout; the record's event type tells them apart.
        EventType::Uid | EventType::Gid => {
            require_len(p, 16, "id payload")?;
            Ok(EventPayload::IdChange(IdChangeEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
                real_id: read_u32(p, 8),
                effective_id: read_u32(p, 12),
            }))
        }
        EventType::Sid => {
            require_len(p, 8, "sid payload")?;
            Ok(EventPayload::SessionChange(SessionChangeEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
            }))
        }
        EventType::Ptrace => {
            require_len(p, 16, "ptrace payload")?;
            Ok(EventPayload::Ptrace(PtraceEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
                tracer_pid: read_u32(p, 8),
                tracer_tgid: read_u32(p, 12),
            }))
        }
        EventType::Comm => {
            require_len(p, 8 + COMM_LEN, "comm payload")?;
            let mut comm = [0u8; COMM_LEN];
            comm.copy_from_slice(&p[8..8 + COMM_LEN]);
            Ok(EventPayload::CommChange(CommChangeEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
                comm,
            }))
        }
        EventType::Coredump => {
            require_len(p, 8, "coredump payload")?;
            Ok(EventPayload::Coredump(CoredumpEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
            }))
        }
        EventType::Exit => {
            require_len(p, 16, "exit payload")?;
            Ok(EventPayload::Exit(ExitEvent {
                pid: read_u32(p, 0),
                tgid: read_u32(p, 4),
                exit_code: read_u32(p, 8),
                exit_signal: read_u32(p, 12),
            }))
        }
    }
}

/// Encodes the "start listening" request sent during the handshake.
///
/// # Examples
///
/// ```rust
/// use pcn_core::{decode_control_message, encode_subscribe_request, ConnectorId, ListenAction};
///
/// let bytes = encode_subscribe_request();
/// let msg = decode_control_message(&bytes).unwrap();
/// assert_eq!(msg.envelope.id, ConnectorId::PROC_EVENTS);
/// assert_eq!(msg.action, ListenAction::Listen);
/// ```
pub fn encode_subscribe_request() -> Vec<u8> {
    encode_control_message(ListenAction::Listen)
}

/// Encodes the "stop listening" request sent when a connection is closed.
pub fn encode_unsubscribe_request() -> Vec<u8> {
    encode_control_message(ListenAction::Ignore)
}

/// Encodes an envelope addressed to the process events subsystem followed by
/// the 4-byte `action`.
pub fn encode_control_message(action: ListenAction) -> Vec<u8> {
    let envelope = Envelope {
        id: ConnectorId::PROC_EVENTS,
        sequence: 0,
        ack: 0,
        payload_len: 4,
        flags: 0,
    };
    let mut buf = Vec::with_capacity(ENVELOPE_SIZE + 4);
    encode_envelope(&mut buf, &envelope);
    buf.extend_from_slice(&(action as u32).to_le_bytes());
    buf
}

/// Decodes a control message produced by [`encode_control_message`].
///
/// # Errors
///
/// - [`ProtocolError::TruncatedMessage`] if the envelope or action is short.
/// - [`ProtocolError::UnknownListenAction`] for an unrecognised action value.
pub fn decode_control_message(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let envelope = decode_envelope(bytes)?;
    require_len(bytes, ENVELOPE_SIZE + 4, "control message action")?;
    let raw = read_u32(bytes, ENVELOPE_SIZE);
    let action = ListenAction::try_from(raw).map_err(|_| ProtocolError::UnknownListenAction(raw))?;
    Ok(ControlMessage { envelope, action })
}

// ── Encode helpers ────────────────────────────────────────────────────────────

fn encode_envelope(buf: &mut Vec<u8>, e: &Envelope) {
    buf.extend_from_slice(&e.id.index.to_le_bytes());
    buf.extend_from_slice(&e.id.value.to_le_bytes());
    buf.extend_from_slice(&e.sequence.to_le_bytes());
    buf.extend_from_slice(&e.ack.to_le_bytes());
    buf.extend_from_slice(&e.payload_len.to_le_bytes());
    buf.extend_from_slice(&e.flags.to_le_bytes());
}

// ── Utility helpers ───────────────────────────────────────────────────────────

pub(crate) fn require_len(
    buf: &[u8],
    needed: usize,
    context: &'static str,
) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::TruncatedMessage {
            context,
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// Callers check the length with `require_len` first.
fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn le_words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    // ── Envelope ─────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_envelope_reads_every_field() {
        // Arrange
        let mut bytes = le_words(&[0x1, 0x1, 0x34d5, 0x0]);
        bytes.extend_from_slice(&0x28u16.to_le_bytes());
        bytes.extend_from_slice(&0x0002u16.to_le_bytes());

        // Act
        let env = decode_envelope(&bytes).expect("decode failed");

        // Assert
        assert_eq!(env.id, ConnectorId::PROC_EVENTS);
        assert_eq!(env.sequence, 0x34d5);
        assert_eq!(env.ack, 0);
        assert_eq!(env.payload_len, 0x28);
        assert_eq!(env.flags, 2);
    }

    #[test]
    fn test_decode_envelope_short_input_is_truncated() {
        let result = decode_envelope(&[0u8; 19]);
        assert_eq!(
            result,
            Err(ProtocolError::TruncatedMessage {
                context: "envelope",
                needed: 20,
                available: 19,
            })
        );
    }

    #[test]
    fn test_decode_envelope_empty_input_is_truncated() {
        assert!(matches!(
            decode_envelope(&[]),
            Err(ProtocolError::TruncatedMessage { available: 0, .. })
        ));
    }

    // ── Event header ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_event_header_reads_64_bit_timestamp() {
        // Arrange
        let mut bytes = le_words(&[0x8000_0000, 0xb]);
        bytes.extend_from_slice(&0x0002_72aa_ff60_1311u64.to_le_bytes());

        // Act
        let hdr = decode_event_header(&bytes).expect("decode failed");

        // Assert
        assert_eq!(hdr.event_type, 0x8000_0000);
        assert_eq!(hdr.cpu, 0xb);
        assert_eq!(hdr.timestamp_ns, 0x0002_72aa_ff60_1311);
    }

    #[test]
    fn test_decode_event_header_short_input_is_truncated() {
        assert!(matches!(
            decode_event_header(&[0u8; 15]),
            Err(ProtocolError::TruncatedMessage { needed: 16, available: 15, .. })
        ));
    }

    // ── Payloads ─────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_payload_none_is_unexpected_ack() {
        let result = decode_payload(EventType::None, &[0u8; 24]);
        assert_eq!(result, Err(ProtocolError::UnexpectedAckEvent));
    }

    #[test]
    fn test_decode_payload_fork_keeps_parent_and_child() {
        let p = le_words(&[10, 11, 20, 21]);
        let payload = decode_payload(EventType::Fork, &p).unwrap();
        assert_eq!(
            payload,
            EventPayload::Fork(ForkEvent {
                parent_pid: 10,
                parent_tgid: 11,
                child_pid: 20,
                child_tgid: 21,
            })
        );
    }

    #[test]
    fn test_decode_payload_gid_uses_id_change_layout() {
        let p = le_words(&[5, 5, 1000, 0]);
        let payload = decode_payload(EventType::Gid, &p).unwrap();
        assert_eq!(
            payload,
            EventPayload::IdChange(IdChangeEvent {
                pid: 5,
                tgid: 5,
                real_id: 1000,
                effective_id: 0,
            })
        );
    }

    #[test]
    fn test_decode_payload_comm_keeps_bytes_after_nul() {
        // Arrange – "sh\0" followed by stale bytes the kernel left in the buffer
        let mut p = le_words(&[77, 77]);
        let mut comm = [0u8; COMM_LEN];
        comm[..2].copy_from_slice(b"sh");
        comm[3..6].copy_from_slice(b"old");
        p.extend_from_slice(&comm);

        // Act
        let payload = decode_payload(EventType::Comm, &p).unwrap();

        // Assert – buffer copied verbatim
        match payload {
            EventPayload::CommChange(ev) => assert_eq!(ev.comm, comm),
            other => panic!("expected CommChange, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_payload_ignores_trailing_bytes() {
        let p = le_words(&[1, 2, 3, 4, 0xdead, 0xbeef]);
        let payload = decode_payload(EventType::Exec, &p).unwrap();
        assert_eq!(payload, EventPayload::Exec(ExecEvent { pid: 1, tgid: 2 }));
    }

    #[test]
    fn test_decode_payload_short_exit_is_truncated() {
        let result = decode_payload(EventType::Exit, &le_words(&[1, 2, 3]));
        assert_eq!(
            result,
            Err(ProtocolError::TruncatedMessage {
                context: "exit payload",
                needed: 16,
                available: 12,
            })
        );
    }

    #[test]
    fn test_decode_payload_short_comm_is_truncated() {
        let result = decode_payload(EventType::Comm, &[0u8; 23]);
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedMessage { needed: 24, .. })
        ));
    }

    // ── Control messages ─────────────────────────────────────────────────────

    #[test]
    fn test_subscribe_request_layout() {
        let bytes = encode_subscribe_request();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes(), "subsystem index");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes(), "subsystem value");
        assert_eq!(&bytes[16..18], &4u16.to_le_bytes(), "payload length");
        assert_eq!(&bytes[20..24], &1u32.to_le_bytes(), "listen action");
    }

    #[test]
    fn test_subscribe_request_decodes_back_to_its_constants() {
        // Act
        let msg = decode_control_message(&encode_subscribe_request()).unwrap();

        // Assert
        assert_eq!(msg.envelope.id.index, 1);
        assert_eq!(msg.envelope.id.value, 1);
        assert_eq!(msg.envelope.ack, 0);
        assert_eq!(msg.envelope.payload_len, 4);
        assert_eq!(msg.action, ListenAction::Listen);
    }

    #[test]
    fn test_unsubscribe_request_carries_ignore_action() {
        let msg = decode_control_message(&encode_unsubscribe_request()).unwrap();
        assert_eq!(msg.action, ListenAction::Ignore);
    }

    #[test]
    fn test_decode_control_message_rejects_unknown_action() {
        let mut bytes = encode_subscribe_request();
        bytes[20..24].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            decode_control_message(&bytes),
            Err(ProtocolError::UnknownListenAction(9))
        );
    }

    #[test]
    fn test_decode_control_message_without_action_is_truncated() {
        let bytes = encode_subscribe_request();
        assert!(matches!(
            decode_control_message(&bytes[..22]),
            Err(ProtocolError::TruncatedMessage { needed: 24, available: 22, .. })
        ));
    }
}
