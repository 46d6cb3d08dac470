//! Decoded process event records.
//!
//! # Canonical process identity (for beginners)
//!
//! Downstream consumers usually key on "the process this event is about".
//! For most events that is simply the `pid`/`tgid` carried in the payload.
//! A fork, however, names two processes: the parent that called `fork()` and
//! the child that was created.  The canonical identity of a fork event is the
//! **child**, because the event announces the child's existence.
//!
//! [`EventPayload::process_ids`] is the single place that encodes this rule.

use std::borrow::Cow;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::protocol::wire::{EventType, COMM_LEN};

/// The process a record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIds {
    /// Kernel task id (thread id for non-leader threads).
    pub pid: u32,
    /// Thread group id; equals the user-visible process id.
    pub tgid: u32,
}

// ── Per-event payload structs ─────────────────────────────────────────────────

/// FORK: a task created a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkEvent {
    pub parent_pid: u32,
    pub parent_tgid: u32,
    pub child_pid: u32,
    pub child_tgid: u32,
}

/// EXEC: a task replaced its program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEvent {
    pub pid: u32,
    pub tgid: u32,
}

/// UID or GID change.  The record's [`EventType`] says which id changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdChangeEvent {
    pub pid: u32,
    pub tgid: u32,
    /// New real uid or gid.
    pub real_id: u32,
    /// New effective uid or gid.
    pub effective_id: u32,
}

/// SID: a task started a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChangeEvent {
    pub pid: u32,
    pub tgid: u32,
}

/// PTRACE: a tracer attached to or detached from a task.
///
/// A zero tracer pid means detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtraceEvent {
    pub pid: u32,
    pub tgid: u32,
    pub tracer_pid: u32,
    pub tracer_tgid: u32,
}

/// COMM: the task's command name (`/proc/<pid>/comm`) changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommChangeEvent {
    pub pid: u32,
    pub tgid: u32,
    /// Raw kernel buffer, including the NUL terminator and anything after it.
    pub comm: [u8; COMM_LEN],
}

impl CommChangeEvent {
    /// Returns the command name up to the first NUL byte.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the raw bytes remain in
    /// [`CommChangeEvent::comm`].
    pub fn comm_str(&self) -> Cow<'_, str> {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(COMM_LEN);
        String::from_utf8_lossy(&self.comm[..end])
    }
}

/// COREDUMP: a task dumped core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoredumpEvent {
    pub pid: u32,
    pub tgid: u32,
}

/// EXIT: a task exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub pid: u32,
    pub tgid: u32,
    /// Raw wait status as reported by the kernel.
    pub exit_code: u32,
    /// Signal sent to the parent on exit; `0xFFFFFFFF` for non-leader threads.
    pub exit_signal: u32,
}

// ── Payload union ─────────────────────────────────────────────────────────────

/// One of the eight payload shapes a process event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Fork(ForkEvent),
    Exec(ExecEvent),
    IdChange(IdChangeEvent),
    SessionChange(SessionChangeEvent),
    Ptrace(PtraceEvent),
    CommChange(CommChangeEvent),
    Coredump(CoredumpEvent),
    Exit(ExitEvent),
}

impl EventPayload {
    /// Returns the canonical (pid, tgid) of the process this payload is about.
    ///
    /// For [`EventPayload::Fork`] this is the child.
    pub fn process_ids(&self) -> ProcessIds {
        let (pid, tgid) = match self {
            EventPayload::Fork(e) => (e.child_pid, e.child_tgid),
            EventPayload::Exec(e) => (e.pid, e.tgid),
            EventPayload::IdChange(e) => (e.pid, e.tgid),
            EventPayload::SessionChange(e) => (e.pid, e.tgid),
            EventPayload::Ptrace(e) => (e.pid, e.tgid),
            EventPayload::CommChange(e) => (e.pid, e.tgid),
            EventPayload::Coredump(e) => (e.pid, e.tgid),
            EventPayload::Exit(e) => (e.pid, e.tgid),
        };
        ProcessIds { pid, tgid }
    }

    pub fn pid(&self) -> u32 {
        self.process_ids().pid
    }

    pub fn tgid(&self) -> u32 {
        self.process_ids().tgid
    }
}

// ── Event record ──────────────────────────────────────────────────────────────

/// A fully decoded process event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: EventType,
    /// CPU the kernel observed the event on.
    pub cpu: u32,
    /// Kernel monotonic clock in nanoseconds.
    pub timestamp_ns: u64,
    pub payload: EventPayload,
}

impl EventRecord {
    /// Canonical identity of the process this event is about.
    pub fn process_ids(&self) -> ProcessIds {
        self.payload.process_ids()
    }

    /// Time since the monotonic clock's origin (roughly, since boot).
    pub fn monotonic_time(&self) -> Duration {
        Duration::from_nanos(self.timestamp_ns)
    }

    /// Converts the kernel timestamp to wall-clock time.
    ///
    /// `monotonic_epoch` is the wall-clock instant at which the monotonic
    /// clock read zero; `pcn-client` computes it once per connection.
    pub fn wall_clock(&self, monotonic_epoch: SystemTime) -> SystemTime {
        monotonic_epoch + self.monotonic_time()
    }
}
