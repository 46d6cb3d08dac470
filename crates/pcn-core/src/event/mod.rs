//! Caller-facing event records and the tag-to-payload classifier.
//!
//! [`record`] defines what a decoded process event looks like;
//! [`classify`] turns the raw envelope, header and payload bytes into one.

pub mod classify;
pub mod record;

pub use classify::{classify, decode_event, is_acknowledgement};
pub use record::*;
