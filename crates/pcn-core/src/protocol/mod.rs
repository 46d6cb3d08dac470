//! Protocol module containing the wire types and the binary codec.

pub mod codec;
pub mod wire;

pub use codec::{
    decode_control_message, decode_envelope, decode_event_header, decode_payload,
    encode_control_message, encode_subscribe_request, encode_unsubscribe_request, ProtocolError,
};
pub use wire::*;
