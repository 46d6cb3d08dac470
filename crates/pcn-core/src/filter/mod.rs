//! Classic-BPF socket filter compiler for event-type subscriptions.
//!
//! # What is a socket filter? (for beginners)
//!
//! A socket filter is a tiny program the kernel runs against every packet
//! before queueing it on a socket.  It returns how many bytes of the packet to
//! keep; returning `0` drops the packet.  Filtering in the kernel means events
//! the caller did not ask for never cost a wakeup or a copy to userspace.
//!
//! The program compiled here is straight-line:
//!
//! ```text
//! 0:   ld  [36]                  ; event-type tag (after nlmsghdr + envelope)
//! 1:   jeq #<type 1>, keep, next
//! ...
//! n:   jeq #<type n>, keep, next
//! n+1: ret #0                    ; drop
//! n+2: ret #0xffffffff           ; keep
//! ```
//!
//! `ld` loads a 32-bit word in network (big-endian) byte order, while the tag
//! is written little-endian, so every comparison constant is byte-swapped.
//!
//! The program does not keep `none`-tag packets.  It is installed after the
//! subscribe handshake has consumed its acknowledgement.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use crate::protocol::wire::{EventType, EVENT_TYPE_PACKET_OFFSET, NETLINK_HEADER_SIZE};

// ── Opcode constants (from <linux/filter.h>) ──────────────────────────────────

const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

/// `ld [k]`: load the 32-bit word at absolute offset `k`.
pub const OP_LD_W_ABS: u16 = BPF_LD | BPF_W | BPF_ABS;
/// `jeq #k, jt, jf`
pub const OP_JEQ_K: u16 = BPF_JMP | BPF_JEQ | BPF_K;
/// `ret #k`
pub const OP_RET_K: u16 = BPF_RET | BPF_K;

/// Return value that keeps the whole packet.
pub const VERDICT_KEEP: u32 = 0xFFFF_FFFF;
/// Return value that drops the packet.
pub const VERDICT_DROP: u32 = 0;

/// Errors from [`compile`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FilterError {
    /// No event types were requested.  To receive everything, install no
    /// filter at all.
    #[error("filter requires at least one event type")]
    EmptyFilterSet,
}

/// One classic-BPF instruction, laid out like `struct sock_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    const fn stmt(code: u16, k: u32) -> Self {
        Self { code, jt: 0, jf: 0, k }
    }

    const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

/// A compiled subscription filter.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterProgram {
    event_types: Vec<EventType>,
    instructions: Vec<SockFilter>,
}

/// Compiles a filter that keeps only packets whose event type is in
/// `event_types`.
///
/// Duplicates are collapsed and the comparisons are emitted in ascending tag
/// order, so the same set always produces the same program.
///
/// # Errors
///
/// Returns [`FilterError::EmptyFilterSet`] if `event_types` is empty.
///
/// # Examples
///
/// ```rust
/// use pcn_core::{compile, EventType};
///
/// let program = compile([EventType::Uid, EventType::Exit]).unwrap();
/// assert_eq!(program.instructions().len(), 5);
/// ```
pub fn compile<I>(event_types: I) -> Result<FilterProgram, FilterError>
where
    I: IntoIterator<Item = EventType>,
{
    let set: BTreeSet<EventType> = event_types.into_iter().collect();
    if set.is_empty() {
        return Err(FilterError::EmptyFilterSet);
    }

    let count = set.len();
    let mut instructions = Vec::with_capacity(count + 3);
    instructions.push(SockFilter::stmt(OP_LD_W_ABS, EVENT_TYPE_PACKET_OFFSET as u32));
    for (i, ty) in set.iter().enumerate() {
        // Jump over the remaining comparisons and the drop to land on keep.
        let to_keep = (count - i) as u8;
        instructions.push(SockFilter::jump(OP_JEQ_K, load_order(ty.bits()), to_keep, 0));
    }
    instructions.push(SockFilter::stmt(OP_RET_K, VERDICT_DROP));
    instructions.push(SockFilter::stmt(OP_RET_K, VERDICT_KEEP));

    let event_types: Vec<EventType> = set.into_iter().collect();
    debug!(?event_types, len = instructions.len(), "compiled event filter");
    Ok(FilterProgram {
        event_types,
        instructions,
    })
}

/// The value `ld [k]` produces for a little-endian `tag` in the packet.
fn load_order(tag: u32) -> u32 {
    u32::from_be_bytes(tag.to_le_bytes())
}

impl FilterProgram {
    /// Event types this program keeps, in ascending tag order.
    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    pub fn instructions(&self) -> &[SockFilter] {
        &self.instructions
    }

    /// Runs the program against a full netlink `packet` (netlink header
    /// included) and returns the kernel verdict: bytes to keep, `0` to drop.
    ///
    /// Only the instructions [`compile`] emits are interpreted.  An unknown
    /// opcode, a load past the end of the packet, or running off the end of
    /// the program drops the packet, as the kernel does.
    pub fn run(&self, packet: &[u8]) -> u32 {
        self.evaluate(packet, 0)
    }

    /// Returns `true` if the kernel would deliver `packet`.
    pub fn accepts(&self, packet: &[u8]) -> bool {
        self.run(packet) != VERDICT_DROP
    }

    /// Same verdict as [`FilterProgram::accepts`], for a connector message
    /// whose netlink header has already been stripped by the transport.
    ///
    /// Messages queued on the socket before the filter was attached never
    /// went through the kernel program; this applies it to them after the
    /// fact.
    pub fn accepts_message(&self, message: &[u8]) -> bool {
        self.evaluate(message, NETLINK_HEADER_SIZE) != VERDICT_DROP
    }

    /// Interprets the program over `bytes`, which lack the first `stripped`
    /// bytes of the packet the kernel would see.
    fn evaluate(&self, bytes: &[u8], stripped: usize) -> u32 {
        let mut acc: u32 = 0;
        let mut pc = 0usize;
        while let Some(ins) = self.instructions.get(pc) {
            match ins.code {
                OP_LD_W_ABS => {
                    let Some(off) = (ins.k as usize).checked_sub(stripped) else {
                        return VERDICT_DROP;
                    };
                    let Some(word) = bytes.get(off..off + 4) else {
                        return VERDICT_DROP;
                    };
                    acc = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                    pc += 1;
                }
                OP_JEQ_K => {
                    let skip = if acc == ins.k { ins.jt } else { ins.jf };
                    pc += 1 + skip as usize;
                }
                OP_RET_K => return ins.k,
                _ => return VERDICT_DROP,
            }
        }
        VERDICT_DROP
    }
}
