//! # Segment Reader Tests

use super::*;
use crate::domain::framing::encode_record;
use std::io::Write;
use tempfile::TempDir;

fn write_segment(dir: &Path, segment: u64, payloads: &[Vec<u8>]) -> PathBuf {
    let path = segment_path(dir, segment);
    let mut bytes = Vec::new();
    for p in payloads {
        encode_record(&mut bytes, p);
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

fn sample_payloads() -> Vec<Vec<u8>> {
    (0..40u8)
        .map(|i| vec![i; (i as usize * 7) % 300 + 1])
        .collect()
}

fn read_all(reader: &mut SegmentReader) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Some((payload, _)) = reader.next_record().unwrap() {
        out.push(payload);
    }
    out
}

#[test]
fn test_segment_file_names() {
    assert_eq!(segment_file_name(7), "segment_000007");
    assert_eq!(parse_segment_file_name("segment_000007"), Some(7));
    assert_eq!(parse_segment_file_name("segment_1234567"), Some(1_234_567));
    assert_eq!(parse_segment_file_name("segment_7"), None);
    assert_eq!(parse_segment_file_name("archive_manifest.json"), None);
}

#[test]
fn test_list_segments_sorted_and_filtered() {
    let dir = TempDir::new().unwrap();
    write_segment(dir.path(), 2, &[]);
    write_segment(dir.path(), 0, &[]);
    std::fs::write(dir.path().join("index.json"), b"{}").unwrap();

    assert_eq!(list_segments(dir.path()).unwrap(), vec![0, 2]);
    assert!(list_segments(&dir.path().join("missing")).unwrap().is_empty());
}

#[test]
fn test_reads_records_then_clean_end() {
    let dir = TempDir::new().unwrap();
    let payloads = sample_payloads();
    let path = write_segment(dir.path(), 0, &payloads);

    let mut reader = SegmentReader::open(&path, 0, 0).unwrap();
    assert_eq!(read_all(&mut reader), payloads);
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_placements_point_at_records() {
    let dir = TempDir::new().unwrap();
    let payloads = vec![b"first".to_vec(), vec![9u8; 130], b"third".to_vec()];
    let path = write_segment(dir.path(), 3, &payloads);

    let mut reader = SegmentReader::open(&path, 3, 0).unwrap();
    let (_, first) = reader.next_record().unwrap().unwrap();
    let (_, second) = reader.next_record().unwrap().unwrap();
    assert_eq!(first.record_start_offset, 0);
    assert_eq!(first.payload_offset, 1);
    assert_eq!(second.record_start_offset, 6);
    assert_eq!(second.payload_offset, 8);
    assert_eq!(second.segment, 3);

    // Re-open exactly at a placement and continue from there
    let mut reader = SegmentReader::open(&path, 3, second.record_start_offset).unwrap();
    let (payload, _) = reader.next_record().unwrap().unwrap();
    assert_eq!(payload, vec![9u8; 130]);
}

#[test]
fn test_buffer_edge_invariance() {
    let dir = TempDir::new().unwrap();
    let payloads = sample_payloads();
    let path = write_segment(dir.path(), 0, &payloads);

    for capacity in [1, 2, 3, 10, 11, 13, 64, 257, DEFAULT_READ_BUFFER] {
        let mut reader = SegmentReader::with_buffer_capacity(&path, 0, 0, capacity).unwrap();
        assert_eq!(read_all(&mut reader), payloads, "capacity {capacity}");
    }
}

#[test]
fn test_truncated_payload_is_torn_write() {
    let dir = TempDir::new().unwrap();
    let payloads = vec![b"intact".to_vec(), b"will be cut".to_vec()];
    let path = write_segment(dir.path(), 0, &payloads);
    let len = std::fs::metadata(&path).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    let mut reader = SegmentReader::open(&path, 0, 0).unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().0, b"intact");
    let err = reader.next_record().unwrap_err();
    assert!(
        matches!(err, ArchiveError::UnexpectedEndOfSegment { segment: 0, offset: 7 }),
        "got {err:?}"
    );
}

#[test]
fn test_truncated_prefix_is_torn_write() {
    let dir = TempDir::new().unwrap();
    let path = segment_path(dir.path(), 0);
    let mut bytes = Vec::new();
    encode_record(&mut bytes, b"ok");
    // First byte of a two-byte length prefix only
    bytes.push(0x80 | 0x2C);
    std::fs::write(&path, bytes).unwrap();

    let mut reader = SegmentReader::open(&path, 0, 0).unwrap();
    assert!(reader.next_record().unwrap().is_some());
    assert!(reader.next_record().unwrap_err().is_torn_write());
}

#[test]
fn test_follows_concurrent_growth() {
    let dir = TempDir::new().unwrap();
    let path = write_segment(dir.path(), 0, &[b"one".to_vec()]);

    let mut reader = SegmentReader::open(&path, 0, 0).unwrap();
    assert!(reader.next_record().unwrap().is_some());
    assert!(reader.next_record().unwrap().is_none());

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    let mut more = Vec::new();
    encode_record(&mut more, b"two");
    file.write_all(&more).unwrap();

    assert_eq!(reader.next_record().unwrap().unwrap().0, b"two");
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn test_start_offset_past_end_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_segment(dir.path(), 5, &[b"abc".to_vec()]);

    let err = SegmentReader::open(&path, 5, 100).err().unwrap();
    assert!(matches!(
        err,
        ArchiveError::InvalidStartOffset {
            segment: 5,
            requested: 100,
            file_size: 4
        }
    ));
    assert!(err.is_fatal());
}

#[test]
fn test_missing_segment() {
    let dir = TempDir::new().unwrap();
    let err = SegmentReader::open(segment_path(dir.path(), 9), 9, 0).err().unwrap();
    assert!(matches!(err, ArchiveError::SegmentNotFound { segment: 9, .. }));
}

#[test]
fn test_double_close() {
    let dir = TempDir::new().unwrap();
    let path = write_segment(dir.path(), 0, &[b"x".to_vec()]);

    let mut reader = SegmentReader::open(&path, 0, 0).unwrap();
    assert!(reader.close().is_ok());
    assert!(matches!(reader.close(), Err(ArchiveError::AlreadyClosed)));
    assert!(matches!(reader.next_record(), Err(ArchiveError::AlreadyClosed)));
}
