//! Rendering of event records for the terminal or for log pipelines.
//!
//! `text` prints one human-readable line per event:
//!
//! ```text
//! FORK:     1234 -> 1240
//! EXEC:     1240
//! EXIT:     1240 (code 0, signal 17)
//! ```
//!
//! `json` prints one JSON object per line (NDJSON), suitable for `jq` or a
//! log shipper.  The payload keeps the `kind` tag used by `pcn-core`.

use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use pcn_core::{EventPayload, EventRecord, EventType};
use serde::{Deserialize, Serialize};

/// Output format selected by `--format` or `[output] format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Flat JSON view of one record.
#[derive(Serialize)]
struct JsonRecord<'a> {
    event: EventType,
    cpu: u32,
    timestamp_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_unix_ns: Option<u128>,
    pid: u32,
    tgid: u32,
    payload: &'a EventPayload,
}

/// Renders `record` in `format`.
///
/// `monotonic_epoch` converts the kernel timestamp to wall-clock time; when it
/// is `None` only the raw monotonic timestamp is shown.
///
/// # Errors
///
/// Returns a `serde_json` error if JSON serialization fails.
pub fn format_record(
    record: &EventRecord,
    format: OutputFormat,
    monotonic_epoch: Option<SystemTime>,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(format_text(record)),
        OutputFormat::Json => {
            let ids = record.process_ids();
            let view = JsonRecord {
                event: record.event_type,
                cpu: record.cpu,
                timestamp_ns: record.timestamp_ns,
                time_unix_ns: monotonic_epoch
                    .and_then(|epoch| record.wall_clock(epoch).duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos()),
                pid: ids.pid,
                tgid: ids.tgid,
                payload: &record.payload,
            };
            serde_json::to_string(&view)
        }
    }
}

fn format_text(record: &EventRecord) -> String {
    let label = format!("{}:", record.event_type.as_str().to_ascii_uppercase());
    let detail = match &record.payload {
        EventPayload::Fork(e) => {
            if e.parent_pid == e.parent_tgid && e.child_pid == e.child_tgid {
                format!("{} -> {}", e.parent_pid, e.child_pid)
            } else {
                format!(
                    "{} (tgid {}) -> {} (tgid {})",
                    e.parent_pid, e.parent_tgid, e.child_pid, e.child_tgid
                )
            }
        }
        EventPayload::Exec(e) => with_tgid(e.pid, e.tgid),
        EventPayload::IdChange(e) => {
            let (real, effective) = match record.event_type {
                EventType::Gid => ("rgid", "egid"),
                _ => ("ruid", "euid"),
            };
            format!(
                "{} {real}={} {effective}={}",
                with_tgid(e.pid, e.tgid),
                e.real_id,
                e.effective_id
            )
        }
        EventPayload::SessionChange(e) => format!("{} (new session)", with_tgid(e.pid, e.tgid)),
        EventPayload::Ptrace(e) => {
            if e.tracer_pid == 0 {
                format!("{} detached", with_tgid(e.pid, e.tgid))
            } else {
                format!("{} traced by {}", with_tgid(e.pid, e.tgid), e.tracer_pid)
            }
        }
        EventPayload::CommChange(e) => {
            format!("{} -> {:?}", with_tgid(e.pid, e.tgid), e.comm_str())
        }
        EventPayload::Coredump(e) => with_tgid(e.pid, e.tgid),
        EventPayload::Exit(e) => format!(
            "{} (code {}, signal {})",
            with_tgid(e.pid, e.tgid),
            e.exit_code,
            e.exit_signal as i32
        ),
    };
    format!("{label:<9} {detail}")
}

/// `pid`, plus the thread group when the task is not its leader.
fn with_tgid(pid: u32, tgid: u32) -> String {
    if pid == tgid {
        pid.to_string()
    } else {
        format!("{pid} (tgid {tgid})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcn_core::{CommChangeEvent, ExitEvent, ForkEvent, IdChangeEvent, PtraceEvent};
    use std::time::Duration;

    fn record(event_type: EventType, payload: EventPayload) -> EventRecord {
        EventRecord {
            event_type,
            cpu: 1,
            timestamp_ns: 2_000_000_000,
            payload,
        }
    }

    #[test]
    fn test_text_fork_of_process() {
        let r = record(
            EventType::Fork,
            EventPayload::Fork(ForkEvent {
                parent_pid: 10,
                parent_tgid: 10,
                child_pid: 11,
                child_tgid: 11,
            }),
        );
        assert_eq!(format_record(&r, OutputFormat::Text, None).unwrap(), "FORK:     10 -> 11");
    }

    #[test]
    fn test_text_fork_of_thread_shows_tgids() {
        let r = record(
            EventType::Fork,
            EventPayload::Fork(ForkEvent {
                parent_pid: 10,
                parent_tgid: 10,
                child_pid: 12,
                child_tgid: 10,
            }),
        );
        assert_eq!(format_text(&r), "FORK:     10 (tgid 10) -> 12 (tgid 10)");
    }

    #[test]
    fn test_text_gid_uses_group_labels() {
        let r = record(
            EventType::Gid,
            EventPayload::IdChange(IdChangeEvent {
                pid: 5,
                tgid: 5,
                real_id: 100,
                effective_id: 0,
            }),
        );
        assert_eq!(format_text(&r), "GID:      5 rgid=100 egid=0");
    }

    #[test]
    fn test_text_ptrace_detach() {
        let r = record(
            EventType::Ptrace,
            EventPayload::Ptrace(PtraceEvent {
                pid: 5,
                tgid: 5,
                tracer_pid: 0,
                tracer_tgid: 0,
            }),
        );
        assert_eq!(format_text(&r), "PTRACE:   5 detached");
    }

    #[test]
    fn test_text_comm_stops_at_nul() {
        let mut comm = [0u8; 16];
        comm[..4].copy_from_slice(b"sshd");
        let r = record(
            EventType::Comm,
            EventPayload::CommChange(CommChangeEvent { pid: 3, tgid: 3, comm }),
        );
        assert_eq!(format_text(&r), "COMM:     3 -> \"sshd\"");
    }

    #[test]
    fn test_text_exit_of_thread_shows_signed_signal() {
        let r = record(
            EventType::Exit,
            EventPayload::Exit(ExitEvent {
                pid: 0x6999,
                tgid: 0x2ddd,
                exit_code: 0,
                exit_signal: 0xffff_ffff,
            }),
        );
        assert_eq!(format_text(&r), "EXIT:     27033 (tgid 11741) (code 0, signal -1)");
    }

    #[test]
    fn test_json_includes_wall_clock_when_epoch_known() {
        // Arrange
        let r = record(
            EventType::Exit,
            EventPayload::Exit(ExitEvent {
                pid: 7,
                tgid: 7,
                exit_code: 256,
                exit_signal: 17,
            }),
        );
        let epoch = UNIX_EPOCH + Duration::from_secs(100);

        // Act
        let line = format_record(&r, OutputFormat::Json, Some(epoch)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();

        // Assert
        assert_eq!(json["event"], "exit");
        assert_eq!(json["pid"], 7);
        assert_eq!(json["time_unix_ns"], 102_000_000_000u64);
        assert_eq!(json["payload"]["kind"], "exit");
        assert_eq!(json["payload"]["exit_code"], 256);
    }

    #[test]
    fn test_json_omits_wall_clock_without_epoch() {
        let r = record(
            EventType::Exit,
            EventPayload::Exit(ExitEvent {
                pid: 7,
                tgid: 7,
                exit_code: 0,
                exit_signal: 17,
            }),
        );
        let line = format_record(&r, OutputFormat::Json, None).unwrap();
        assert!(!line.contains("time_unix_ns"));
        assert!(!line.contains('\n'));
    }
}
