use super::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn decode_listing_response_accepts_json_array() {
    let lines = decode_listing_response(r#"["100644 blob aaaa\tindex.php", "100644 blob bbbb\tx.php"]"#)
        .expect("must decode array");
    assert_eq!(lines, vec!["100644 blob aaaa\tindex.php", "100644 blob bbbb\tx.php"]);
}

#[test]
fn decode_listing_response_accepts_plain_lines() {
    let lines = decode_listing_response("100644 blob aaaa\tindex.php\n\n100644 blob bbbb\tx.php\n")
        .expect("must decode lines");
    assert_eq!(lines.len(), 2);
}

#[test]
fn decode_listing_response_surfaces_error_payloads() {
    let err = decode_listing_response(r#""Error: unknown revision 9.9.9""#)
        .expect_err("must fail on json error string");
    assert_eq!(err.to_string(), "unknown revision 9.9.9");

    let err = decode_listing_response("Error: maintenance").expect_err("must fail on error text");
    assert_eq!(err.to_string(), "maintenance");
}

#[test]
fn decode_version_list_trims_entries() {
    let versions = decode_version_list(r#"["1.4.0", " 1.x ", ""]"#).expect("must decode versions");
    assert_eq!(versions, vec!["1.4.0", "1.x"]);
}

#[test]
fn classify_treats_short_body_as_message() {
    let response = ArchiveResponse::classify(b"Error: revision not found".to_vec());
    assert_eq!(
        response,
        ArchiveResponse::Message("revision not found".to_string())
    );
}

#[test]
fn classify_treats_long_non_gzip_body_as_message() {
    let body = vec![b'x'; MIN_ARCHIVE_BYTES * 2];
    assert!(matches!(
        ArchiveResponse::classify(body),
        ArchiveResponse::Message(_)
    ));
}

#[test]
fn classify_accepts_gzip_tarball() {
    let content: Vec<u8> = (0..400_u32).map(|i| (i * 7919 % 251) as u8).collect();
    let archive = build_archive(&[("img/sample.bin", content.as_slice())]);
    assert!(archive.len() >= MIN_ARCHIVE_BYTES);
    assert!(matches!(
        ArchiveResponse::classify(archive),
        ArchiveResponse::Archive(_)
    ));
}

#[test]
fn unpack_archive_returns_regular_files_only() {
    let root = test_root();
    let archive = build_archive(&[
        ("index.php", b"<?php echo 1;".as_slice()),
        ("admin/ajax.php", b"<?php echo 2;".as_slice()),
    ]);

    let mut unpacked = unpack_archive(&archive, &root).expect("must unpack archive");
    unpacked.sort();

    assert_eq!(unpacked, vec!["admin/ajax.php", "index.php"]);
    assert_eq!(
        fs::read_to_string(root.join("admin/ajax.php")).expect("must read unpacked file"),
        "<?php echo 2;"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unpack_archive_rejects_corrupt_stream() {
    let root = test_root();
    let mut corrupt = vec![0x1f, 0x8b];
    corrupt.extend(std::iter::repeat(0_u8).take(200));

    assert!(unpack_archive(&corrupt, &root).is_err());

    let _ = fs::remove_dir_all(&root);
}

fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *content)
            .expect("must append archive entry");
    }
    let tarball = builder.into_inner().expect("must finish tarball");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tarball).expect("must compress tarball");
    encoder.finish().expect("must finish gzip stream")
}

fn test_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "upshift-registry-test-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
