//! # pcn-client
//!
//! Connection lifecycle for the Linux Process Events Connector.
//!
//! [`ProcConnection`] performs the subscribe handshake, installs an optional
//! event filter and then returns decoded [`pcn_core::EventRecord`]s from a
//! blocking [`ProcConnection::read`].  It is generic over [`Transport`], so
//! the same state machine runs over the real netlink socket or over the
//! scripted transport used in tests.
//!
//! # Usage (for beginners)
//!
//! ```ignore
//! use pcn_client::{ConnectionOptions, ProcConnection};
//! use pcn_core::EventType;
//!
//! let options = ConnectionOptions {
//!     event_filter: Some(vec![EventType::Exec, EventType::Exit]),
//!     ..ConnectionOptions::default()
//! };
//! let mut conn = ProcConnection::open(&options)?; // needs CAP_NET_ADMIN
//! loop {
//!     for record in conn.read()? {
//!         println!("{} pid={}", record.event_type, record.process_ids().pid);
//!     }
//! }
//! ```

pub mod clock;
pub mod connection;
pub mod transport;

pub use connection::{
    ConnectionError, ConnectionOptions, ConnectionState, ProcConnection,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use transport::{NetlinkHeader, NetlinkMessage, Transport, TransportError};

#[cfg(target_os = "linux")]
pub use transport::socket::NetlinkSocket;
