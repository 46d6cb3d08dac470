//! Integration tests for pcn-core datagram decoding.
//!
//! Each test hand-builds a connector datagram the way the kernel lays it out
//! and drives it through the public API, exercising the envelope codec, the
//! classifier and the socket filter together.

use pcn_core::{
    compile, decode_control_message, decode_envelope, decode_event, encode_subscribe_request,
    encode_unsubscribe_request, is_acknowledgement, ConnectorId, EventPayload, EventType,
    ListenAction, ProtocolError,
};

/// Builds a 64-byte datagram: envelope, event header, then `payload` padded
/// with zeros to the size of the kernel's event union.
fn datagram(event_type: EventType, ack: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&1u32.to_le_bytes()); // idx
    buf.extend_from_slice(&1u32.to_le_bytes()); // val
    buf.extend_from_slice(&7u32.to_le_bytes()); // seq
    buf.extend_from_slice(&ack.to_le_bytes());
    buf.extend_from_slice(&40u16.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&event_type.bits().to_le_bytes());
    buf.extend_from_slice(&3u32.to_le_bytes()); // cpu
    buf.extend_from_slice(&123_456_789u64.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.resize(64, 0);
    buf
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn test_fork_datagram_decodes_parent_and_child() {
    let record = decode_event(&datagram(EventType::Fork, 0, &words(&[100, 100, 200, 200])))
        .expect("fork must decode");

    assert_eq!(record.event_type, EventType::Fork);
    assert_eq!(record.cpu, 3);
    assert_eq!(record.timestamp_ns, 123_456_789);
    let EventPayload::Fork(fork) = record.payload else {
        panic!("expected fork payload, got {:?}", record.payload);
    };
    assert_eq!((fork.parent_pid, fork.parent_tgid), (100, 100));
    assert_eq!((fork.child_pid, fork.child_tgid), (200, 200));
    assert_eq!(record.process_ids().pid, 200);
}

#[test]
fn test_exec_datagram() {
    let record = decode_event(&datagram(EventType::Exec, 0, &words(&[501, 500]))).unwrap();
    assert_eq!(record.event_type, EventType::Exec);
    assert_eq!((record.payload.pid(), record.payload.tgid()), (501, 500));
}

#[test]
fn test_uid_and_gid_datagrams_share_shape() {
    for ty in [EventType::Uid, EventType::Gid] {
        let record = decode_event(&datagram(ty, 0, &words(&[9, 9, 1000, 0]))).unwrap();
        assert_eq!(record.event_type, ty);
        let EventPayload::IdChange(change) = record.payload else {
            panic!("expected id change for {ty}");
        };
        assert_eq!(change.real_id, 1000);
        assert_eq!(change.effective_id, 0);
    }
}

#[test]
fn test_sid_datagram() {
    let record = decode_event(&datagram(EventType::Sid, 0, &words(&[33, 33]))).unwrap();
    assert!(matches!(record.payload, EventPayload::SessionChange(_)));
    assert_eq!(record.payload.pid(), 33);
}

#[test]
fn test_ptrace_datagram_carries_tracer() {
    let record = decode_event(&datagram(EventType::Ptrace, 0, &words(&[40, 40, 41, 41]))).unwrap();
    let EventPayload::Ptrace(ptrace) = record.payload else {
        panic!("expected ptrace payload");
    };
    assert_eq!(ptrace.pid, 40);
    assert_eq!(ptrace.tracer_pid, 41);
}

#[test]
fn test_comm_datagram_keeps_raw_buffer() {
    let mut payload = words(&[77, 77]);
    payload.extend_from_slice(b"kworker/0:1\0\xff\xff\xff\xff");

    let record = decode_event(&datagram(EventType::Comm, 0, &payload)).unwrap();

    let EventPayload::CommChange(comm) = record.payload else {
        panic!("expected comm payload");
    };
    assert_eq!(comm.comm_str(), "kworker/0:1");
    assert_eq!(&comm.comm[12..], &[0xff; 4]);
}

#[test]
fn test_coredump_datagram() {
    let record = decode_event(&datagram(EventType::Coredump, 0, &words(&[12, 10]))).unwrap();
    assert!(matches!(record.payload, EventPayload::Coredump(_)));
    assert_eq!(record.process_ids().tgid, 10);
}

#[test]
fn test_exit_datagram() {
    let record = decode_event(&datagram(EventType::Exit, 0, &words(&[5, 5, 256, 17]))).unwrap();
    let EventPayload::Exit(exit) = record.payload else {
        panic!("expected exit payload");
    };
    assert_eq!(exit.exit_code, 256);
    assert_eq!(exit.exit_signal, 17);
}

#[test]
fn test_truncated_payload_reports_shape() {
    // Header says comm but only 8 payload bytes follow.
    let mut bytes = datagram(EventType::Comm, 0, &words(&[1, 1]));
    bytes.truncate(36 + 8);

    let err = decode_event(&bytes).unwrap_err();

    assert_eq!(
        err,
        ProtocolError::TruncatedMessage {
            context: "comm payload",
            needed: 24,
            available: 8,
        }
    );
}

#[test]
fn test_acknowledgement_round_trip_through_public_api() {
    let ack = datagram(EventType::None, 1, &[]);
    assert!(is_acknowledgement(&ack));
    assert_eq!(decode_event(&ack), Err(ProtocolError::UnexpectedAckEvent));

    let event = datagram(EventType::Exit, 1, &words(&[1, 1, 0, 0]));
    assert!(!is_acknowledgement(&event));
}

#[test]
fn test_subscribe_and_unsubscribe_requests() {
    let subscribe = decode_control_message(&encode_subscribe_request()).unwrap();
    let unsubscribe = decode_control_message(&encode_unsubscribe_request()).unwrap();

    assert_eq!(subscribe.envelope.id, ConnectorId::PROC_EVENTS);
    assert_eq!(subscribe.envelope.payload_len, 4);
    assert_eq!(subscribe.action, ListenAction::Listen);
    assert_eq!(unsubscribe.action, ListenAction::Ignore);
    assert_eq!(encode_subscribe_request().len(), 24);
}

#[test]
fn test_filter_agrees_with_decoder_on_event_type() {
    // The filter sees the netlink header; the decoder does not.
    let program = compile([EventType::Fork, EventType::Exit]).unwrap();
    for ty in EventType::SUBSCRIBABLE {
        let body = datagram(ty, 0, &[0u8; 24]);
        let mut packet = vec![0u8; 16];
        packet.extend_from_slice(&body);

        let decoded = decode_event(&body).unwrap();
        let wanted = matches!(decoded.event_type, EventType::Fork | EventType::Exit);
        assert_eq!(program.accepts(&packet), wanted, "{ty}");
        assert_eq!(program.accepts_message(&body), wanted, "{ty} without netlink header");
        assert_eq!(decode_envelope(&body).unwrap().id, ConnectorId::PROC_EVENTS);
    }
}
