//! Kernel monotonic clock helpers.
//!
//! Process event timestamps come from the kernel's `CLOCK_MONOTONIC`, which
//! counts from an unspecified point near boot.  To display them as wall-clock
//! time, compute the monotonic epoch once and pass it to
//! [`EventRecord::wall_clock`](pcn_core::EventRecord::wall_clock).
//!
//! The epoch drifts if the wall clock is stepped (NTP, manual change), so long
//! running hosts should recompute it on reconnect.

use std::io;
use std::time::{Duration, SystemTime};

/// Returns the wall-clock instant at which `CLOCK_MONOTONIC` read zero.
///
/// # Errors
///
/// Returns an I/O error if `clock_gettime` fails or the monotonic clock is
/// further from zero than the wall clock is from the Unix epoch.
#[cfg(target_os = "linux")]
pub fn monotonic_epoch() -> io::Result<SystemTime> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let now = SystemTime::now();
    epoch_from(now, Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

fn epoch_from(now: SystemTime, since_zero: Duration) -> io::Result<SystemTime> {
    now.checked_sub(since_zero).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "monotonic clock is ahead of the wall clock",
        )
    })
}
