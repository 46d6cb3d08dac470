//! Linux netlink socket bound to the process connector.
//!
//! # What is the process connector? (for beginners)
//!
//! The kernel's *connector* is a netlink family (`NETLINK_CONNECTOR`) that
//! carries messages between kernel subsystems and userspace.  The process
//! events subsystem multicasts one message per fork, exec, exit, ... to every
//! socket that has joined multicast group `CN_IDX_PROC` *and* has sent a
//! "listen" control message.
//!
//! Socket creation, binding and datagram I/O go through [`netlink_sys::Socket`].
//! Two socket options have no wrapper there and are set with `setsockopt`:
//! - `SO_ATTACH_FILTER`: install the classic-BPF event filter.
//! - `SO_RCVTIMEO`: bound how long `recv` blocks.
//!
//! # Permissions
//!
//! Joining the process events group requires `CAP_NET_ADMIN`.  Without it the
//! "listen" request is silently ignored by older kernels or fails with `EPERM`.

use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::time::Duration;

use netlink_sys::{protocols::NETLINK_CONNECTOR, Socket, SocketAddr};
use pcn_core::protocol::wire::PROC_EVENTS_MULTICAST_GROUP;
use pcn_core::FilterProgram;
use tracing::{debug, trace};

use super::netlink::{split_datagram, NetlinkMessage};
use super::{Transport, TransportError};

/// Large enough for a page of batched notifications.
const RECV_BUFFER_SIZE: usize = 8192;

/// Netlink socket subscribed to the process events multicast group.
pub struct NetlinkSocket {
    /// `None` once closed.
    socket: Option<Socket>,
    /// Port id assigned by the kernel at bind time.
    port_id: u32,
    next_seq: u32,
    buf: Vec<u8>,
}

impl NetlinkSocket {
    /// Opens a `NETLINK_CONNECTOR` socket and joins the process events group.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot be created, bound,
    /// or queried for its address.
    pub fn connect() -> Result<Self, TransportError> {
        let mut socket = Socket::new(NETLINK_CONNECTOR)?;
        socket.bind(&SocketAddr::new(0, PROC_EVENTS_MULTICAST_GROUP))?;

        let mut local = SocketAddr::new(0, 0);
        socket.get_address(&mut local)?;
        let port_id = local.port_number();

        debug!(port_id, "netlink connector socket bound");
        Ok(Self {
            socket: Some(socket),
            port_id,
            next_seq: 0,
            buf: Vec::with_capacity(RECV_BUFFER_SIZE),
        })
    }

    fn socket(&self) -> Result<&Socket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }

    fn set_option<T>(&self, name: libc::c_int, value: &T) -> Result<(), TransportError> {
        let fd = self.socket()?.as_raw_fd();
        // SAFETY: `value` points to a live `T` and the length is its size.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                name,
                value as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io_error(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Transport for NetlinkSocket {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.next_seq = self.next_seq.wrapping_add(1);
        let bytes = NetlinkMessage::control(payload, self.next_seq, self.port_id).encode();
        let kernel = SocketAddr::new(0, 0);
        self.socket()?
            .send_to(&bytes, &kernel, 0)
            .map_err(io_error)?;
        trace!(seq = self.next_seq, len = bytes.len(), "sent control message");
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<NetlinkMessage>, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let n = loop {
            self.buf.clear();
            match socket.recv(&mut self.buf, 0) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(e)),
            }
        };
        trace!(len = n, "received netlink datagram");
        split_datagram(&self.buf[..n])
    }

    fn set_filter(&mut self, program: &FilterProgram) -> Result<(), TransportError> {
        let instructions = program.instructions();
        let fprog = libc::sock_fprog {
            len: instructions.len() as libc::c_ushort,
            // The kernel copies the program during setsockopt, so the borrow
            // only needs to outlive the call.
            filter: instructions.as_ptr() as *mut libc::sock_filter,
        };
        self.set_option(libc::SO_ATTACH_FILTER, &fprog)?;
        debug!(instructions = instructions.len(), "attached socket filter");
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.set_option(libc::SO_RCVTIMEO, &timeval(timeout))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(socket) = self.socket.take() {
            debug!(port_id = self.port_id, "closing netlink connector socket");
            drop(socket);
        }
        Ok(())
    }
}

/// `SO_RCVTIMEO` value for `timeout`.
///
/// A zero timeval means "block forever" to the kernel, so `Some(ZERO)` is
/// raised to one microsecond.  Durations beyond `time_t` saturate.
fn timeval(timeout: Option<Duration>) -> libc::timeval {
    match timeout {
        Some(d) if !d.is_zero() => libc::timeval {
            tv_sec: libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX),
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        },
        Some(_) => libc::timeval { tv_sec: 0, tv_usec: 1 },
        None => libc::timeval { tv_sec: 0, tv_usec: 0 },
    }
}

/// Maps errno values with protocol meaning onto dedicated variants.
fn io_error(err: io::Error) -> TransportError {
    match err.raw_os_error() {
        Some(libc::EAGAIN) => TransportError::TimedOut,
        Some(libc::EBADF) => TransportError::Closed,
        Some(libc::ENOBUFS) => TransportError::Overrun,
        _ => TransportError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sock_filter_layout_matches_kernel() {
        assert_eq!(
            mem::size_of::<pcn_core::SockFilter>(),
            mem::size_of::<libc::sock_filter>()
        );
        assert_eq!(mem::size_of::<pcn_core::SockFilter>(), 8);
    }

    #[test]
    fn test_errno_mapping() {
        let map = |errno| io_error(io::Error::from_raw_os_error(errno));
        assert!(matches!(map(libc::EAGAIN), TransportError::TimedOut));
        assert!(matches!(map(libc::EBADF), TransportError::Closed));
        assert!(matches!(map(libc::ENOBUFS), TransportError::Overrun));
        assert!(matches!(map(libc::EPERM), TransportError::Io(_)));
    }

    #[test]
    fn test_timeval_splits_seconds_and_micros() {
        let tv = timeval(Some(Duration::from_millis(2_500)));
        assert_eq!(tv.tv_sec, 2);
        assert_eq!(tv.tv_usec, 500_000);
    }

    #[test]
    fn test_timeval_zero_and_none() {
        let zero = timeval(Some(Duration::ZERO));
        assert_eq!((zero.tv_sec, zero.tv_usec), (0, 1));
        let forever = timeval(None);
        assert_eq!((forever.tv_sec, forever.tv_usec), (0, 0));
    }

    #[test]
    fn test_timeval_saturates_huge_timeouts() {
        // Arrange
        let huge = Duration::from_secs(u64::MAX);

        // Act
        let tv = timeval(Some(huge));

        // Assert
        assert_eq!(tv.tv_sec, libc::time_t::MAX);
        assert!(tv.tv_sec > 0);
    }
}
