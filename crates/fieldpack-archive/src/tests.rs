use std::fs;
use std::io::Read;
use std::path::PathBuf;

use fieldpack_core::{CancelToken, EngineError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use crate::{decode_compressed, decode_file, encode_dir_to_file};

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("fieldpack-archive-{label}-{nanos}"));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

fn write_file(path: &PathBuf, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

#[test]
fn encode_then_decode_reproduces_tree() {
    let root = test_dir("roundtrip");
    let input = root.join("input");
    write_file(&input.join("app.bin"), b"binary payload");
    write_file(&input.join("conf/settings.json"), b"{\"a\":1}");
    write_file(&input.join("conf/nested/empty.txt"), b"");

    let archive = root.join("out.tar.gz");
    let cancel = CancelToken::new();
    encode_dir_to_file(&input, &archive, &cancel).expect("encode must succeed");

    let extracted = root.join("extracted");
    decode_file(&archive, &extracted, &cancel).expect("decode must succeed");

    assert_eq!(
        fs::read(extracted.join("app.bin")).expect("must read"),
        b"binary payload"
    );
    assert_eq!(
        fs::read(extracted.join("conf/settings.json")).expect("must read"),
        b"{\"a\":1}"
    );
    assert_eq!(
        fs::read(extracted.join("conf/nested/empty.txt")).expect("must read"),
        b""
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn header_layout_matches_ustar_contract() {
    let root = test_dir("header");
    let input = root.join("input");
    write_file(&input.join("payload.bin"), b"hello tar");

    let archive = root.join("out.tar.gz");
    encode_dir_to_file(&input, &archive, &CancelToken::new()).expect("encode must succeed");

    let mut raw = Vec::new();
    GzDecoder::new(fs::File::open(&archive).expect("must open"))
        .read_to_end(&mut raw)
        .expect("must gunzip");

    let header = &raw[..512];
    assert!(header.starts_with(b"payload.bin\0"));
    assert_eq!(header[156], b'0');
    assert_eq!(&header[257..263], b"ustar\0");
    assert_eq!(&header[263..265], b"00");

    // Size: octal ASCII, space terminated. "hello tar" is 9 bytes.
    assert_eq!(&header[124..136], b"00000000011 ");

    // Checksum over the header with the checksum field as spaces.
    let mut summed = header.to_vec();
    summed[148..156].fill(b' ');
    let sum: u64 = summed.iter().map(|byte| u64::from(*byte)).sum();
    assert_eq!(&header[148..154], format!("{sum:06o}").as_bytes());
    assert_eq!(header[154], b' ');
    assert_eq!(header[155], 0);

    // Content padded to the block boundary, then two zero blocks.
    assert_eq!(&raw[512..521], b"hello tar");
    assert!(raw[521..1024].iter().all(|byte| *byte == 0));
    assert_eq!(raw.len(), 1024 + 1024);
    assert!(raw[1024..].iter().all(|byte| *byte == 0));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn oversized_field_values_are_rejected_not_truncated() {
    // Largest value an 11-digit octal size field can hold (8 GiB - 1).
    let max = 0o77777777777;
    let header = crate::tar::build_header("big.bin", max, 0).expect("max size must fit");
    assert_eq!(&header[124..136], b"77777777777 ");

    let err = crate::tar::build_header("big.bin", max + 1, 0)
        .expect_err("a size beyond the field must fail, not corrupt the header");
    assert!(err.to_string().contains("octal field"), "{err}");
}

fn craft_entry(name: &str, content: &[u8]) -> Vec<u8> {
    let mut header = [0u8; 512];
    let name_bytes = name.as_bytes();
    header[..name_bytes.len()].copy_from_slice(name_bytes);
    let size = format!("{:011o} ", content.len());
    header[124..136].copy_from_slice(size.as_bytes());
    header[156] = b'0';

    let mut record = header.to_vec();
    record.extend_from_slice(content);
    let padding = (512 - (content.len() % 512)) % 512;
    record.extend(std::iter::repeat(0u8).take(padding));
    record
}

#[test]
fn traversal_entries_are_skipped_without_aborting() {
    let mut stream = Vec::new();
    stream.extend(craft_entry("../../etc/passwd", b"root::0:0::/:/bin/sh"));
    stream.extend(craft_entry("/abs/olute.txt", b"abs"));
    stream.extend(craft_entry("ok.txt", b"fine"));
    stream.extend([0u8; 1024]);

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&stream).expect("must compress");
    let compressed = gz.finish().expect("must finish");

    let root = test_dir("traversal");
    let dest = root.join("dest");
    decode_compressed(compressed.as_slice(), &dest, &CancelToken::new())
        .expect("decode must tolerate unsafe entries");

    assert_eq!(fs::read(dest.join("ok.txt")).expect("must read"), b"fine");
    assert!(!root.join("etc/passwd").exists());
    assert!(!dest.join("etc/passwd").exists());
    // Leading separators are stripped rather than honored.
    assert_eq!(fs::read(dest.join("abs/olute.txt")).expect("must read"), b"abs");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn decode_stops_at_zero_block() {
    let mut stream = Vec::new();
    stream.extend(craft_entry("first.txt", b"one"));
    stream.extend([0u8; 512]);
    stream.extend(craft_entry("after-terminator.txt", b"two"));

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&stream).expect("must compress");
    let compressed = gz.finish().expect("must finish");

    let root = test_dir("terminator");
    let dest = root.join("dest");
    decode_compressed(compressed.as_slice(), &dest, &CancelToken::new())
        .expect("decode must succeed");

    assert!(dest.join("first.txt").exists());
    assert!(!dest.join("after-terminator.txt").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn cancelled_token_aborts_encode() {
    let root = test_dir("cancel");
    let input = root.join("input");
    write_file(&input.join("a.txt"), b"a");

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = encode_dir_to_file(&input, &root.join("out.tar.gz"), &cancel)
        .expect_err("must abort when cancelled");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Cancelled)
    ));

    let _ = fs::remove_dir_all(&root);
}
