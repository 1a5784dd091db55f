//! Packet Tests
//!
//! Tests for sync request encoding and layout-driven packet decoding.

use std::io::Cursor;

use adbwire::AdbError;
use adbwire::sync::packet::{
    encode_data, encode_recv_v2, encode_request, encode_send_v2, encode_word,
    read_packet, read_packet_async, Layout,
};
use adbwire::sync::{CompressionType, SyncFlag, SyncId, SyncPacket, SYNC_DATA_MAX};

// =============================================================================
// Helpers
// =============================================================================

fn packet(id: &[u8; 4], words: &[u32], tail: &[u8]) -> Vec<u8> {
    let mut bytes = id.to_vec();
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes.extend_from_slice(tail);
    bytes
}

fn stat2_body(error: u32, mode: u32, size: u64) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&error.to_le_bytes());
    body.extend_from_slice(&7u64.to_le_bytes()); // dev
    body.extend_from_slice(&99u64.to_le_bytes()); // ino
    body.extend_from_slice(&mode.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes()); // nlink
    body.extend_from_slice(&1000u32.to_le_bytes()); // uid
    body.extend_from_slice(&1001u32.to_le_bytes()); // gid
    body.extend_from_slice(&size.to_le_bytes());
    body.extend_from_slice(&10i64.to_le_bytes()); // atime
    body.extend_from_slice(&20i64.to_le_bytes()); // mtime
    body.extend_from_slice(&30i64.to_le_bytes()); // ctime
    body
}

// =============================================================================
// Request Encoding Tests
// =============================================================================

#[test]
fn test_encode_list() {
    let bytes = encode_request(SyncId::List, "/data/local/tmp").unwrap();
    assert_eq!(bytes.as_ref(), packet(b"LIST", &[15], b"/data/local/tmp").as_slice());
}

#[test]
fn test_encode_recv_v2_appends_flags() {
    let bytes = encode_recv_v2("/f", SyncFlag::ZSTD).unwrap();
    let mut expected = packet(b"RCV2", &[2], b"/f");
    expected.extend_from_slice(&packet(b"RCV2", &[4], &[]));
    assert_eq!(bytes.as_ref(), expected.as_slice());
}

#[test]
fn test_encode_send_v2_appends_mode_and_flags() {
    let flags = SyncFlag::LZ4 | SyncFlag::DRY_RUN;
    let bytes = encode_send_v2("/f", 0o100644, flags).unwrap();
    let mut expected = packet(b"SND2", &[2], b"/f");
    expected.extend_from_slice(&packet(b"SND2", &[0o100644, 0x8000_0002], &[]));
    assert_eq!(bytes.as_ref(), expected.as_slice());
}

#[test]
fn test_encode_any_offers_every_codec() {
    let bytes = encode_recv_v2("/f", CompressionType::Any.flag()).unwrap();
    assert_eq!(&bytes[bytes.len() - 4..], &7u32.to_le_bytes());
}

#[test]
fn test_encode_done_and_quit() {
    assert_eq!(encode_word(SyncId::Done, 1234).as_ref(), packet(b"DONE", &[1234], &[]).as_slice());
    assert_eq!(encode_word(SyncId::Quit, 0).as_ref(), packet(b"QUIT", &[0], &[]).as_slice());
}

#[test]
fn test_encode_data_bounds() {
    assert!(encode_data(&vec![0u8; SYNC_DATA_MAX]).is_ok());
    assert!(matches!(
        encode_data(&vec![0u8; SYNC_DATA_MAX + 1]),
        Err(AdbError::InvalidRequest(_))
    ));
}

// =============================================================================
// V1 Decoding Tests
// =============================================================================

#[test]
fn test_read_stat() {
    let bytes = packet(b"STAT", &[0o100644, 10, 1_700_000_000], &[]);
    match read_packet(&mut bytes.as_slice(), Layout::StatV1).unwrap() {
        SyncPacket::Stat(entry) => {
            assert_eq!(entry.mode, 0o100644);
            assert_eq!(entry.size, 10);
            assert_eq!(entry.mtime, 1_700_000_000);
            assert!(entry.extended.is_none());
        }
        other => panic!("Expected STAT, got {:?}", other),
    }
}

#[test]
fn test_read_dent_then_done() {
    let mut bytes = packet(b"DENT", &[0o100644, 10, 5, 5], b"a.txt");
    bytes.extend_from_slice(&packet(b"DONE", &[0, 0, 0, 0], &[]));
    let mut reader = bytes.as_slice();

    match read_packet(&mut reader, Layout::DentV1).unwrap() {
        SyncPacket::Dent(entry) => {
            assert_eq!(entry.name, "a.txt");
            assert_eq!(entry.permissions(), 0o644);
        }
        other => panic!("Expected DENT, got {:?}", other),
    }
    assert_eq!(read_packet(&mut reader, Layout::DentV1).unwrap(), SyncPacket::Done(0));
    assert!(reader.is_empty());
}

#[test]
fn test_list_done_with_length_is_rejected() {
    let bytes = packet(b"DONE", &[0, 0, 0, 3], b"abc");
    assert!(matches!(
        read_packet(&mut bytes.as_slice(), Layout::DentV1),
        Err(AdbError::Protocol(_))
    ));
}

#[test]
fn test_transfer_done_with_length_is_rejected() {
    let bytes = packet(b"DONE", &[4], b"junk");
    assert!(matches!(
        read_packet(&mut bytes.as_slice(), Layout::Transfer),
        Err(AdbError::Protocol(_))
    ));
}

#[test]
fn test_oversized_data_is_rejected() {
    let bytes = packet(b"DATA", &[SYNC_DATA_MAX as u32 + 1], &[]);
    assert!(matches!(
        read_packet(&mut bytes.as_slice(), Layout::Transfer),
        Err(AdbError::Protocol(_))
    ));
}

#[test]
fn test_truncated_data_is_io_error() {
    let bytes = packet(b"DATA", &[10], b"short");
    match read_packet(&mut bytes.as_slice(), Layout::Transfer) {
        Err(AdbError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("Expected IO error, got {:?}", other),
    }
}

#[test]
fn test_fail_consumes_exactly_its_length() {
    let mut bytes = packet(b"FAIL", &[5], b"nope!");
    bytes.extend_from_slice(b"OKAY");
    let mut cursor = Cursor::new(bytes);

    let packet = read_packet(&mut cursor, Layout::Transfer).unwrap();
    assert_eq!(packet, SyncPacket::Fail("nope!".to_string()));
    assert_eq!(cursor.position(), 13);
}

#[test]
fn test_fail_accepted_in_every_layout() {
    for layout in [Layout::StatV1, Layout::StatV2, Layout::DentV2, Layout::Status] {
        let bytes = packet(b"FAIL", &[1], b"x");
        assert_eq!(
            read_packet(&mut bytes.as_slice(), layout).unwrap(),
            SyncPacket::Fail("x".to_string())
        );
    }
}

#[test]
fn test_oversized_fail_is_rejected() {
    let bytes = packet(b"FAIL", &[SYNC_DATA_MAX as u32 + 1], &[]);
    assert!(matches!(
        read_packet(&mut bytes.as_slice(), Layout::Status),
        Err(AdbError::Protocol(_))
    ));
}

#[test]
fn test_unknown_and_misplaced_ids() {
    let bytes = packet(b"WHAT", &[0], &[]);
    assert!(matches!(read_packet(&mut bytes.as_slice(), Layout::Transfer), Err(AdbError::Protocol(_))));

    let bytes = packet(b"DENT", &[0, 0, 0, 0], &[]);
    assert!(matches!(read_packet(&mut bytes.as_slice(), Layout::Transfer), Err(AdbError::Protocol(_))));
}

#[test]
fn test_okay_with_length_is_rejected() {
    let bytes = packet(b"OKAY", &[2], b"hi");
    assert!(matches!(read_packet(&mut bytes.as_slice(), Layout::Status), Err(AdbError::Protocol(_))));
}

// =============================================================================
// V2 Decoding Tests
// =============================================================================

#[test]
fn test_read_stat_v2() {
    let mut bytes = b"STA2".to_vec();
    bytes.extend_from_slice(&stat2_body(0, 0o100600, 5_000_000_000));

    match read_packet(&mut bytes.as_slice(), Layout::StatV2).unwrap() {
        SyncPacket::Stat(entry) => {
            assert_eq!(entry.size, 5_000_000_000);
            assert_eq!(entry.mtime, 20);
            let ext = entry.extended.unwrap();
            assert_eq!((ext.dev, ext.ino, ext.uid, ext.gid), (7, 99, 1000, 1001));
            assert_eq!((ext.atime, ext.ctime), (10, 30));
        }
        other => panic!("Expected STA2, got {:?}", other),
    }
}

#[test]
fn test_stat_v2_errno_is_remote_failure() {
    let mut bytes = b"LST2".to_vec();
    bytes.extend_from_slice(&stat2_body(2, 0, 0));
    assert!(matches!(
        read_packet(&mut bytes.as_slice(), Layout::StatV2),
        Err(AdbError::Remote(_))
    ));
}

#[test]
fn test_dent_v2_keeps_entry_errno() {
    let mut bytes = b"DNT2".to_vec();
    bytes.extend_from_slice(&stat2_body(13, 0, 0));
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(b"sec");
    bytes.extend_from_slice(b"DONE");
    bytes.extend_from_slice(&[0u8; 72]);
    let mut reader = bytes.as_slice();

    match read_packet(&mut reader, Layout::DentV2).unwrap() {
        SyncPacket::Dent(entry) => {
            assert_eq!(entry.name, "sec");
            assert_eq!(entry.extended.unwrap().errno, 13);
        }
        other => panic!("Expected DNT2, got {:?}", other),
    }
    assert_eq!(read_packet(&mut reader, Layout::DentV2).unwrap(), SyncPacket::Done(0));
}

#[test]
fn test_negotiation_answers() {
    let layout = Layout::Negotiation(SyncId::RecvV2);

    let bytes = packet(b"RCV2", &[4], &[]);
    assert_eq!(
        read_packet(&mut bytes.as_slice(), layout).unwrap(),
        SyncPacket::Negotiated(CompressionType::Zstd)
    );

    let bytes = packet(b"RCV2", &[1], &[]);
    assert!(matches!(read_packet(&mut bytes.as_slice(), layout), Err(AdbError::Protocol(_))));

    let bytes = packet(b"RCV2", &[9], &[]);
    assert!(matches!(read_packet(&mut bytes.as_slice(), layout), Err(AdbError::Protocol(_))));

    let bytes = packet(b"SND2", &[4], &[]);
    assert!(matches!(read_packet(&mut bytes.as_slice(), layout), Err(AdbError::Protocol(_))));
}

// =============================================================================
// Async Path Tests
// =============================================================================

#[tokio::test]
async fn test_async_reads_same_packets() {
    let mut bytes = packet(b"DATA", &[3], b"abc");
    bytes.extend_from_slice(&packet(b"FAIL", &[2], b"no"));
    let mut reader = bytes.as_slice();

    assert_eq!(
        read_packet_async(&mut reader, Layout::Transfer).await.unwrap(),
        SyncPacket::Data(bytes::Bytes::from_static(b"abc"))
    );
    assert_eq!(
        read_packet_async(&mut reader, Layout::Transfer).await.unwrap(),
        SyncPacket::Fail("no".to_string())
    );
}
