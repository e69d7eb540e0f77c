// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Version negotiation tests: reading hand-crafted version 1.02 files,
//! rejecting unsupported versions, and surviving corrupted trailers.

use robobag::{Bag, BagError, BagMode, BagTime, Compression, MessageSchema};
use tempfile::TempDir;

const X_MD5: &str = "00000000000000000000000000000000";

// ============================================================================
// Hand-crafted v1.02 file construction
// ============================================================================

fn push_field(header: &mut Vec<u8>, name: &str, value: &[u8]) {
    let field_len = (name.len() + 1 + value.len()) as u32;
    header.extend_from_slice(&field_len.to_le_bytes());
    header.extend_from_slice(name.as_bytes());
    header.push(b'=');
    header.extend_from_slice(value);
}

/// Encode a record from `(name, value)` fields and a data section.
fn record(fields: &[(&str, Vec<u8>)], data: &[u8]) -> Vec<u8> {
    record_with_declared_len(fields, data, data.len() as u32)
}

/// Encode a record whose declared data length differs from the bytes that
/// actually follow (the historical v0 index records do this).
fn record_with_declared_len(fields: &[(&str, Vec<u8>)], data: &[u8], declared: u32) -> Vec<u8> {
    let mut header = Vec::new();
    for (name, value) in fields {
        push_field(&mut header, name, value);
    }
    let mut out = Vec::new();
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&declared.to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn packed_time(sec: u32, nsec: u32) -> Vec<u8> {
    BagTime::new(sec, nsec).to_packed().to_le_bytes().to_vec()
}

/// Build a v1.02 bag with two messages on `/x`.
///
/// Layout: version line, file header, MSG_DEF + MSG_DATA, MSG_DATA, then
/// a flat version-0 INDEX_DATA record pointing at absolute message
/// positions.
fn build_v102_file(payload1: &[u8], payload2: &[u8]) -> Vec<u8> {
    let version_line = b"#ROSRECORD V1.2\n";

    let msg_def = record(
        &[
            ("op", vec![0x01]),
            ("topic", b"/x".to_vec()),
            ("md5", X_MD5.as_bytes().to_vec()),
            ("type", b"test_msgs/Raw".to_vec()),
            ("def", b"uint8[] data".to_vec()),
        ],
        &[],
    );
    let msg1 = record(
        &[
            ("op", vec![0x02]),
            ("topic", b"/x".to_vec()),
            ("time", packed_time(10, 0)),
        ],
        payload1,
    );
    let msg2 = record(
        &[
            ("op", vec![0x02]),
            ("topic", b"/x".to_vec()),
            ("time", packed_time(20, 0)),
        ],
        payload2,
    );

    // The file header record length is independent of index_pos, so the
    // message positions can be computed up front
    let header_len_of = |index_pos: u64| {
        record(
            &[("op", vec![0x03]), ("index_pos", index_pos.to_le_bytes().to_vec())],
            &[],
        )
        .len() as u64
    };
    let base = version_line.len() as u64 + header_len_of(0);

    let pos1 = base;
    let pos2 = base + msg_def.len() as u64 + msg1.len() as u64;
    let index_pos = pos2 + msg2.len() as u64;

    let mut index_data = Vec::new();
    for (time, pos) in [(BagTime::new(10, 0), pos1), (BagTime::new(20, 0), pos2)] {
        index_data.extend_from_slice(&time.sec.to_le_bytes());
        index_data.extend_from_slice(&time.nsec.to_le_bytes());
        index_data.extend_from_slice(&pos.to_le_bytes());
    }
    // Version 0 records declare 20 bytes per entry while carrying 16
    let index_record = record_with_declared_len(
        &[
            ("op", vec![0x04]),
            ("topic", b"/x".to_vec()),
            ("ver", 0u32.to_le_bytes().to_vec()),
            ("count", 2u32.to_le_bytes().to_vec()),
        ],
        &index_data,
        2 * 20,
    );

    let mut file = Vec::new();
    file.extend_from_slice(version_line);
    file.extend_from_slice(&record(
        &[("op", vec![0x03]), ("index_pos", index_pos.to_le_bytes().to_vec())],
        &[],
    ));
    file.extend_from_slice(&msg_def);
    file.extend_from_slice(&msg1);
    file.extend_from_slice(&msg2);
    file.extend_from_slice(&index_record);
    file
}

// ============================================================================
// v1.02 reading
// ============================================================================

#[test]
fn test_v102_read_two_messages() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.bag");
    std::fs::write(&path, build_v102_file(&[0xAA, 0xBB], &[0xCC])).unwrap();

    let bag = Bag::open(&path, BagMode::Read).unwrap();
    assert_eq!(bag.version(), 102);

    let info = bag.topic_info("/x").unwrap();
    assert_eq!(info.datatype, "test_msgs/Raw");
    assert_eq!(info.md5sum, X_MD5);

    // Entries carry the absolute message position with a zero offset
    let index = bag.topic_index("/x").unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index[0].offset, 0);
    assert_eq!(index[1].offset, 0);

    let handles = bag.get_messages(BagTime::ZERO, BagTime::MAX);
    assert_eq!(handles.len(), 2);

    let ordered = bag.get_messages_by_topic(&["/x"], BagTime::ZERO, BagTime::MAX);
    let payloads: Vec<Vec<u8>> = ordered.iter().map(|h| h.instantiate().unwrap()).collect();
    assert_eq!(payloads, vec![vec![0xAA, 0xBB], vec![0xCC]]);
    assert_eq!(ordered[0].time(), BagTime::new(10, 0));
    assert_eq!(ordered[1].time(), BagTime::new(20, 0));
}

#[test]
fn test_v102_rejects_bad_index_entry_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("badindex.bag");

    let mut file = build_v102_file(&[0x01], &[0x02]);
    // Corrupt the declared index data length (last record in the file):
    // the strict version-0 size check must reject it
    let n = file.len();
    let data_len_pos = n - 32 - 4;
    file[data_len_pos..data_len_pos + 4].copy_from_slice(&7u32.to_le_bytes());
    std::fs::write(&path, &file).unwrap();

    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(matches!(err, BagError::BadFormat { .. }), "got {err}");
}

// ============================================================================
// Version rejection
// ============================================================================

#[test]
fn test_unsupported_version_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v11.bag");
    std::fs::write(&path, b"#ROSBAG V1.1\n").unwrap();

    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(matches!(err, BagError::BadVersion { .. }), "got {err}");
}

#[test]
fn test_missing_magic_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.bag");
    std::fs::write(&path, b"not a bag file\nmore garbage\n").unwrap();

    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(matches!(err, BagError::BadVersion { .. }), "got {err}");
}

#[test]
fn test_append_rejects_v102() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy_append.bag");
    std::fs::write(&path, build_v102_file(&[0x01], &[0x02])).unwrap();

    let err = Bag::open(&path, BagMode::Append).unwrap_err();
    assert!(matches!(err, BagError::BadVersion { .. }), "got {err}");
}

#[test]
fn test_open_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = Bag::open(dir.path().join("missing.bag"), BagMode::Read).unwrap_err();
    assert!(matches!(err, BagError::Io { .. }));
}

// ============================================================================
// Corrupted trailers
// ============================================================================

fn write_single_message_bag(path: &std::path::Path) {
    let mut bag = Bag::open(path, BagMode::Write).unwrap();
    bag.set_compression(Compression::Bz2);
    bag.write(
        "/a",
        BagTime::new(10, 0),
        &[0xDE, 0xAD],
        MessageSchema {
            datatype: "test_msgs/Raw",
            md5sum: X_MD5,
            definition: "uint8[] data",
        },
    )
    .unwrap();
    bag.close().unwrap();
}

#[test]
fn test_zeroed_trailer_tail_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.bag");

    write_single_message_bag(&path);

    let mut contents = std::fs::read(&path).unwrap();
    let n = contents.len();
    for byte in &mut contents[n - 16..] {
        *byte = 0;
    }
    std::fs::write(&path, &contents).unwrap();

    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(
        matches!(
            err,
            BagError::BadFormat { .. } | BagError::TruncatedTrailer { .. }
        ),
        "got {err}"
    );
}

#[test]
fn test_truncated_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.bag");

    write_single_message_bag(&path);

    let contents = std::fs::read(&path).unwrap();
    // Drop the trailer and half a record
    std::fs::write(&path, &contents[..contents.len() - 40]).unwrap();

    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(
        matches!(
            err,
            BagError::BadFormat { .. } | BagError::TruncatedTrailer { .. }
        ),
        "got {err}"
    );
}

#[test]
fn test_unknown_compression_string_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("badcomp.bag");

    write_single_message_bag(&path);

    let mut contents = std::fs::read(&path).unwrap();
    // The chunk header stores the compression as "compression=bz2";
    // patch it to an unknown scheme of the same length
    let marker = b"compression=bz2";
    let pos = contents
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap();
    contents[pos..pos + marker.len()].copy_from_slice(b"compression=xz9");
    std::fs::write(&path, &contents).unwrap();

    // Loading the per-chunk indexes reads every chunk header, so the
    // unknown scheme is rejected at open
    let err = Bag::open(&path, BagMode::Read).unwrap_err();
    assert!(matches!(err, BagError::UnknownCompression { .. }), "got {err}");
}
