use std::io::Write;
use std::path::{Path, PathBuf};

use mcdf_core::codec;
use mcdf_core::container::{ArchivePayload, BlobDescriptor, Header};
use mcdf_core::hash::ContentHasher;
use mcdf_core::{ArchiveReader, McdfError, PackOptions, collect_blobs, write_archive};

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, bytes).unwrap();
    p
}

fn payload_for(blobs: &[mcdf_core::domain::FileBlob]) -> (ArchivePayload, Vec<PathBuf>) {
    let files = blobs
        .iter()
        .map(|b| BlobDescriptor {
            reference_paths: b.reference_paths.clone(),
            fingerprint: b.fingerprint.clone(),
            length: b.length,
        })
        .collect();
    let payload = ArchivePayload {
        description: "round trip".into(),
        appearance_state: "state".into(),
        shape_profile_state: "shape".into(),
        override_data: "meta".into(),
        files,
        path_swaps: Vec::new(),
    };
    (payload, blobs.iter().map(|b| b.source.clone()).collect())
}

#[test]
fn every_logical_path_extracts_byte_identical() {
    let src = tempfile::tempdir().unwrap();
    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let resolved = vec![
        ("chara/body.tex".to_string(), write(src.path(), "body", &big)),
        ("chara/face.mdl".to_string(), write(src.path(), "face", b"face model")),
        ("chara/empty".to_string(), write(src.path(), "empty", b"")),
    ];
    let blobs = collect_blobs(&resolved, &ContentHasher::new(), || {}).unwrap();
    let (payload, sources) = payload_for(&blobs);

    let out = src.path().join("a.mcdf");
    write_archive(&out, &payload, &sources, &PackOptions::default(), |_| {}).unwrap();

    let mut reader = ArchiveReader::open(&out).unwrap().unwrap();
    assert_eq!(reader.version(), 1);
    assert_eq!(reader.payload(), &payload);

    let dest = tempfile::tempdir().unwrap();
    let mapping = reader.extract_blobs(dest.path()).unwrap();
    reader.close();
    assert_eq!(mapping.len(), resolved.len());
    for (logical, original) in &resolved {
        let got = std::fs::read(&mapping[logical]).unwrap();
        assert_eq!(got, std::fs::read(original).unwrap(), "{logical}");
    }
}

#[test]
fn shared_content_is_stored_once() {
    let src = tempfile::tempdir().unwrap();
    let resolved = vec![
        ("a/one.tex".to_string(), write(src.path(), "1", b"same bytes")),
        ("a/two.tex".to_string(), write(src.path(), "2", b"same bytes")),
    ];
    let blobs = collect_blobs(&resolved, &ContentHasher::new(), || {}).unwrap();
    let (payload, sources) = payload_for(&blobs);
    let out = src.path().join("d.mcdf");
    write_archive(&out, &payload, &sources, &PackOptions::default(), |_| {}).unwrap();

    let reader = ArchiveReader::open(&out).unwrap().unwrap();
    let files = &reader.payload().files;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].reference_paths, vec!["a/one.tex", "a/two.tex"]);
}

#[test]
fn metadata_only_archive_extracts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (payload, sources) = payload_for(&[]);
    let out = dir.path().join("empty.mcdf");
    write_archive(&out, &payload, &sources, &PackOptions::default(), |_| {}).unwrap();

    let mut reader = ArchiveReader::open(&out).unwrap().unwrap();
    assert_eq!(reader.payload().appearance_state, "state");
    assert!(reader.payload().files.is_empty());
    let extracted = dir.path().join("x");
    assert!(reader.extract_blobs(&extracted).unwrap().is_empty());
    assert_eq!(std::fs::read_dir(&extracted).unwrap().count(), 0);
}

#[test]
fn blob_longer_than_stream_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let payload = ArchivePayload {
        files: vec![
            BlobDescriptor {
                reference_paths: vec!["x".into()],
                fingerprint: "aa".into(),
                length: 4,
            },
            BlobDescriptor {
                reference_paths: vec!["y".into()],
                fingerprint: "bb".into(),
                length: 64,
            },
        ],
        ..Default::default()
    };
    let bytes = payload.to_bytes().unwrap();
    let out = dir.path().join("short.mcdf");
    let mut enc = codec::encoder(std::fs::File::create(&out).unwrap(), 3).unwrap();
    Header::new(bytes.len() as u32).write_to(&mut enc).unwrap();
    enc.write_all(&bytes).unwrap();
    enc.write_all(b"abcd0123").unwrap();
    codec::finish(enc).unwrap();

    let mut reader = ArchiveReader::open(&out).unwrap().unwrap();
    let err = reader.extract_blobs(&dir.path().join("x")).unwrap_err();
    match err {
        McdfError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn foreign_files_are_not_archives() {
    let dir = tempfile::tempdir().unwrap();
    let text = write(dir.path(), "notes.txt", b"NOPE this is plain text");
    assert!(ArchiveReader::open(&text).unwrap().is_none());

    let empty = write(dir.path(), "empty", b"");
    assert!(ArchiveReader::open(&empty).unwrap().is_none());

    assert!(ArchiveReader::open(&dir.path().join("missing")).unwrap().is_none());
}

#[test]
fn compressed_stream_with_wrong_tag_is_not_an_archive() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("other.zst");
    let mut enc = codec::encoder(std::fs::File::create(&out).unwrap(), 3).unwrap();
    enc.write_all(b"ABCD\x01\x00\x00\x00\x00").unwrap();
    codec::finish(enc).unwrap();

    assert!(ArchiveReader::open(&out).unwrap().is_none());
}

#[test]
fn payload_length_past_end_of_stream_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("huge.mcdf");
    let mut enc = codec::encoder(std::fs::File::create(&out).unwrap(), 3).unwrap();
    Header::new(u32::MAX).write_to(&mut enc).unwrap();
    enc.write_all(b"{\"Description\":\"cut\"").unwrap();
    codec::finish(enc).unwrap();

    match ArchiveReader::open(&out) {
        Err(McdfError::Format(msg)) => assert!(msg.contains("payload"), "{msg}"),
        other => panic!("unexpected result: {other:?}"),
    }
}
