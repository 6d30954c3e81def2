mod common;

use common::{fixtures, local, p, write};
use keel_core::{stream, StorageError, ZipSession, ZipState};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Drain the archive output on its own task, as a real consumer would.
fn drain(session: &ZipSession) -> JoinHandle<Result<bytes::Bytes, StorageError>> {
    let output = session.stream().unwrap();
    tokio::spawn(stream::collect(output))
}

fn unpack(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

#[tokio::test]
async fn five_files_round_trip_in_registration_order() {
    let large = "x".repeat(200_000);
    for fx in fixtures() {
        let files = [
            ("album/1.jpg", "first photo"),
            ("album/2.jpg", "second photo, a bit longer"),
            ("album/raw/2.cr2", ""),
            ("notes.txt", "remember the milk"),
            ("album/3.jpg", large.as_str()),
        ];
        for (path, data) in &files {
            write(&fx.backend, path, data).await;
        }

        let session = fx.backend.clone().create_zip_stream().unwrap();
        let output = drain(&session);
        for (i, (path, _)) in files.iter().enumerate() {
            session.add_file(p(path), format!("export/{i}-{}", p(path).name())).unwrap();
        }
        session.finalize().await.unwrap();
        assert_eq!(session.state(), ZipState::Closed);

        let archive = output.await.unwrap().unwrap();
        let entries = unpack(&archive);
        assert_eq!(entries.len(), 5, "{}", fx.name);
        for (i, ((path, data), (name, content))) in files.iter().zip(&entries).enumerate() {
            assert_eq!(name, &format!("export/{i}-{}", p(path).name()), "{}", fx.name);
            assert_eq!(content.as_slice(), data.as_bytes(), "{}", fx.name);
        }
    }
}

#[tokio::test]
async fn empty_archive_is_valid() {
    let fx = local();
    let session = fx.backend.clone().create_zip_stream().unwrap();
    let output = drain(&session);
    session.finalize().await.unwrap();

    let archive = output.await.unwrap().unwrap();
    assert!(unpack(&archive).is_empty());
}

#[tokio::test]
async fn add_file_from_concurrent_tasks() {
    for fx in fixtures() {
        for i in 0..8 {
            write(&fx.backend, &format!("src/{i}.txt"), &format!("file {i}")).await;
        }

        let session = Arc::new(fx.backend.clone().create_zip_stream().unwrap());
        let output = drain(&session);
        let adders: Vec<_> = (0..8)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move {
                    session.add_file(p(&format!("src/{i}.txt")), format!("{i}.txt"))
                })
            })
            .collect();
        for adder in adders {
            adder.await.unwrap().unwrap();
        }
        session.finalize().await.unwrap();

        let entries = unpack(&output.await.unwrap().unwrap());
        let names: BTreeSet<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        let expected: BTreeSet<String> = (0..8).map(|i| format!("{i}.txt")).collect();
        assert_eq!(names, expected, "{}", fx.name);
        for (name, content) in entries {
            let i = name.trim_end_matches(".txt");
            assert_eq!(content, format!("file {i}").into_bytes(), "{}", fx.name);
        }
    }
}

#[tokio::test]
async fn session_rejects_misuse() {
    let fx = local();
    write(&fx.backend, "a.txt", "a").await;

    let session = fx.backend.clone().create_zip_stream().unwrap();
    assert_eq!(session.state(), ZipState::Open);
    let output = drain(&session);
    assert!(matches!(session.stream(), Err(StorageError::InvalidState(_))));

    session.add_file(p("a.txt"), "a.txt").unwrap();
    session.finalize().await.unwrap();

    let err = session.add_file(p("a.txt"), "again.txt").unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)));
    session.finalize().await.unwrap();

    assert_eq!(unpack(&output.await.unwrap().unwrap()).len(), 1);
}

#[tokio::test]
async fn missing_entry_aborts_the_archive() {
    for fx in fixtures() {
        write(&fx.backend, "present.txt", "here").await;

        let session = fx.backend.clone().create_zip_stream().unwrap();
        let output = drain(&session);
        session.add_file(p("present.txt"), "present.txt").unwrap();
        session.add_file(p("missing.txt"), "missing.txt").unwrap();

        assert!(session.finalize().await.is_err(), "{}", fx.name);
        let err = output.await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::Archive(_)), "{}: {:?}", fx.name, err);
    }
}

#[tokio::test]
async fn finalize_keeps_reporting_a_failure() {
    let fx = local();
    let session = fx.backend.clone().create_zip_stream().unwrap();
    let output = drain(&session);
    session.add_file(p("missing.txt"), "missing.txt").unwrap();

    let first = session.finalize().await.unwrap_err();
    assert!(first.is_not_found(), "{:?}", first);
    let again = session.finalize().await.unwrap_err();
    assert!(matches!(again, StorageError::Archive(_)), "{:?}", again);
    assert!(again.to_string().contains("missing.txt"));
    assert_eq!(session.state(), ZipState::Closed);
    assert!(output.await.unwrap().is_err());
}

#[tokio::test]
async fn dropping_an_open_session_fails_the_output() {
    let fx = local();
    write(&fx.backend, "a.txt", "a").await;

    let session = fx.backend.clone().create_zip_stream().unwrap();
    let output = drain(&session);
    session.add_file(p("a.txt"), "a.txt").unwrap();
    drop(session);

    let err = output.await.unwrap().unwrap_err();
    assert!(matches!(err, StorageError::Archive(_)));
}

#[test]
fn zip_stream_needs_a_runtime() {
    let fx = local();
    let err = fx.backend.clone().create_zip_stream().unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)));
}
