//! Dispatch from event-type tag to payload shape.
//!
//! The mapping is closed: a tag the kernel adds in the future produces
//! [`ProtocolError::UnknownEventType`] until a table entry is added here.

use tracing::trace;

use crate::event::record::EventRecord;
use crate::protocol::codec::{decode_envelope, decode_event_header, decode_payload, ProtocolError};
use crate::protocol::wire::{EventHeader, EventType, ENVELOPE_SIZE, MIN_DATAGRAM_SIZE};

/// Builds an [`EventRecord`] from a decoded header and the bytes after it.
///
/// # Errors
///
/// - [`ProtocolError::UnknownEventType`] if the tag is not one of the eight
///   event kinds (or `none`).  No record is produced in that case.
/// - [`ProtocolError::UnexpectedAckEvent`] for the `none` tag.
/// - [`ProtocolError::TruncatedMessage`] if the payload is short.
pub fn classify(header: &EventHeader, payload: &[u8]) -> Result<EventRecord, ProtocolError> {
    let event_type = EventType::try_from(header.event_type)
        .map_err(|_| ProtocolError::UnknownEventType(header.event_type))?;
    let payload = decode_payload(event_type, payload)?;
    Ok(EventRecord {
        event_type,
        cpu: header.cpu,
        timestamp_ns: header.timestamp_ns,
        payload,
    })
}

/// Decodes one connector datagram (netlink header already stripped) into an
/// [`EventRecord`].
///
/// # Errors
///
/// Returns [`ProtocolError::TruncatedMessage`] for datagrams shorter than the
/// 36-byte envelope + header prefix, and any error from [`classify`].
pub fn decode_event(datagram: &[u8]) -> Result<EventRecord, ProtocolError> {
    let envelope = decode_envelope(datagram)?;
    let header = decode_event_header(&datagram[ENVELOPE_SIZE..])?;
    trace!(
        seq = envelope.sequence,
        len = envelope.payload_len,
        what = header.event_type,
        "decoding connector datagram"
    );
    classify(&header, &datagram[MIN_DATAGRAM_SIZE..])
}

/// Returns `true` if `datagram` is the kernel's acknowledgement of a control
/// message: `ack == 1` and event type `none`.
///
/// Only the fixed 36-byte prefix is inspected, so garbage after it never
/// causes a failure.  A datagram too short to hold the prefix is not an ACK.
pub fn is_acknowledgement(datagram: &[u8]) -> bool {
    let Ok(envelope) = decode_envelope(datagram) else {
        return false;
    };
    let Ok(header) = decode_event_header(&datagram[ENVELOPE_SIZE..]) else {
        return false;
    };
    envelope.ack == 1 && header.event_type == EventType::None.bits()
}
