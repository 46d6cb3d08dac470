//! Netlink message framing on top of `netlink-packet-core`.
//!
//! A netlink datagram is a sequence of `nlmsghdr`-prefixed messages, each
//! padded to a 4-byte boundary.  [`NetlinkBuffer`] validates and reads each
//! header; this module only decides what the proc connector cares about.
//!
//! Control messages (`NLMSG_NOOP`, `NLMSG_ERROR`, `NLMSG_OVERRUN`) are handled
//! here so callers only ever see connector payloads.  The proc connector sends
//! its notifications with type `NLMSG_DONE`, so that type is a regular message
//! and not an end-of-dump marker.

use netlink_packet_core::{
    NetlinkBuffer, NetlinkHeader, NETLINK_HEADER_LEN, NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP,
    NLMSG_OVERRUN,
};

use super::TransportError;

/// One netlink message: header plus connector payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NetlinkMessage {
    pub header: NetlinkHeader,
    pub payload: Vec<u8>,
}

impl NetlinkMessage {
    /// Wraps `payload` in a header of type `NLMSG_DONE`, the type the proc
    /// connector expects on control messages.
    pub fn control(payload: &[u8], seq: u32, port_id: u32) -> Self {
        let mut header = NetlinkHeader::default();
        header.length = (NETLINK_HEADER_LEN + payload.len()) as u32;
        header.message_type = NLMSG_DONE;
        header.sequence_number = seq;
        header.port_number = port_id;
        Self {
            header,
            payload: payload.to_vec(),
        }
    }

    /// Serialises the message into a zero-padded, 4-byte aligned buffer.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.header.length as usize;
        let mut bytes = vec![0u8; aligned(len)];
        let mut buf = NetlinkBuffer::new(&mut bytes[..]);
        buf.set_length(self.header.length);
        buf.set_message_type(self.header.message_type);
        buf.set_flags(self.header.flags);
        buf.set_sequence_number(self.header.sequence_number);
        buf.set_port_number(self.header.port_number);
        buf.payload_mut().copy_from_slice(&self.payload);
        bytes
    }
}

/// Splits one received datagram into its netlink messages.
///
/// `NLMSG_NOOP` messages and `NLMSG_ERROR` acknowledgements (errno `0`) are
/// skipped.  Fewer than 16 trailing bytes are treated as padding.
///
/// # Errors
///
/// - [`TransportError::Netlink`] for an `NLMSG_ERROR` with a non-zero errno.
/// - [`TransportError::Overrun`] for `NLMSG_OVERRUN`.
/// - [`TransportError::Malformed`] if a header is rejected by
///   [`NetlinkBuffer::new_checked`].
pub fn split_datagram(datagram: &[u8]) -> Result<Vec<NetlinkMessage>, TransportError> {
    let mut messages = Vec::new();
    let mut rest = datagram;

    while rest.len() >= NETLINK_HEADER_LEN {
        let buf = NetlinkBuffer::new_checked(rest).map_err(|e| {
            TransportError::Malformed(format!(
                "message at offset {}: {e}",
                datagram.len() - rest.len()
            ))
        })?;
        let payload = buf.payload();

        match buf.message_type() {
            NLMSG_NOOP => {}
            NLMSG_ERROR => {
                let errno = payload
                    .get(..4)
                    .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or_else(|| TransportError::Malformed("short NLMSG_ERROR".into()))?;
                if errno != 0 {
                    return Err(TransportError::Netlink { errno: -errno });
                }
            }
            NLMSG_OVERRUN => return Err(TransportError::Overrun),
            _ => messages.push(NetlinkMessage {
                header: header_of(&buf),
                payload: payload.to_vec(),
            }),
        }

        let advance = aligned(buf.length() as usize).min(rest.len());
        rest = &rest[advance..];
    }

    Ok(messages)
}

fn header_of(buf: &NetlinkBuffer<&[u8]>) -> NetlinkHeader {
    let mut header = NetlinkHeader::default();
    header.length = buf.length();
    header.message_type = buf.message_type();
    header.flags = buf.flags();
    header.sequence_number = buf.sequence_number();
    header.port_number = buf.port_number();
    header
}

/// `NLMSG_ALIGN`.
fn aligned(len: usize) -> usize {
    (len + 3) & !3
}
