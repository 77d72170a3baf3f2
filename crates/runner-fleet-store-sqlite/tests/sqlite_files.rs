// crates/runner-fleet-store-sqlite/tests/sqlite_files.rs
// ============================================================================
// Module: SQLite File Object Tests
// Description: Streamed blob creation, reading, tagging, and deletion.
// Purpose: Validate digests, size checks, AND tag search, and reader release.
// Dependencies: runner-fleet-store-sqlite, runner-fleet-core, tempfile
// ============================================================================

//! ## Overview
//! File object tests run payloads larger than one transfer chunk so the
//! streaming paths are exercised on both sides.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::io;
use std::io::Cursor;
use std::io::Read;

use runner_fleet_core::CreateFileObjectParams;
use runner_fleet_core::EntityType;
use runner_fleet_core::ErrorKind;
use runner_fleet_core::FileObject;
use runner_fleet_core::Operation;
use runner_fleet_core::PageRequest;
use runner_fleet_core::Passphrase;
use runner_fleet_core::StreamingDigest;
use runner_fleet_core::UpdateFileObjectParams;
use runner_fleet_store_sqlite::SqliteStore;
use runner_fleet_store_sqlite::SqliteStoreConfig;
use runner_fleet_watcher::Watcher;
use rusqlite::Connection;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_config(dir: &TempDir) -> SqliteStoreConfig {
    let mut config = SqliteStoreConfig::new(
        dir.path().join("fleet.db"),
        Passphrase::new("0123456789abcdef0123456789abcdef"),
    );
    config.blob_temp_dir = Some(dir.path().to_path_buf());
    config
}

fn fresh_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(store_config(&dir)).unwrap();
    (dir, store)
}

fn row_count(connection: &Connection, table: &str) -> i64 {
    connection.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0)).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0 .. len).map(|index| u8::try_from(index % 251).unwrap()).collect()
}

fn upload(store: &SqliteStore, name: &str, tags: &[&str], bytes: &[u8]) -> FileObject {
    store
        .create_file_object(
            CreateFileObjectParams {
                name: name.to_string(),
                description: format!("{name} artifact"),
                size: bytes.len() as u64,
                tags: tags.iter().map(ToString::to_string).collect(),
            },
            Cursor::new(bytes.to_vec()),
        )
        .unwrap()
}

fn read_content(store: &SqliteStore, id: i64) -> Vec<u8> {
    let mut reader = store.open_file_object_content(id).unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    reader.close().unwrap();
    content
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Yields a prefix, then fires a cancellation token before the rest.
struct CancelAfterFirstRead {
    inner: Cursor<Vec<u8>>,
    token: CancellationToken,
}

impl Read for CancelAfterFirstRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.token.cancel();
        Ok(read)
    }
}

// ============================================================================
// SECTION: Round Trips
// ============================================================================

#[test]
fn content_streams_back_with_matching_digest() {
    let (_dir, store) = fresh_store();
    let bytes = payload(200 * 1024 + 17);
    let file = upload(&store, "runner.tar.gz", &["linux", "x64"], &bytes);

    assert!(file.id > 0);
    assert_eq!(file.size, bytes.len() as u64);
    assert_eq!(file.sha256, StreamingDigest::digest_hex(&bytes));
    assert_eq!(file.tags, tags(&["linux", "x64"]));

    let mut reader = store.open_file_object_content(file.id).unwrap();
    assert_eq!(reader.size(), bytes.len() as u64);
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    reader.close().unwrap();
    assert_eq!(content, bytes);
    assert_eq!(store.get_file_object(file.id).unwrap(), file);
}

#[test]
fn empty_payloads_are_supported() {
    let (_dir, store) = fresh_store();
    let file = upload(&store, "empty", &[], &[]);
    assert_eq!(file.size, 0);
    assert_eq!(file.sha256, StreamingDigest::digest_hex(&[]));
    assert!(read_content(&store, file.id).is_empty());
}

#[test]
fn content_type_is_sniffed_from_leading_bytes() {
    let (_dir, store) = fresh_store();
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend(payload(64));
    assert_eq!(upload(&store, "logo.png", &[], &png).file_type, "image/png");
    assert_eq!(
        upload(&store, "notes.txt", &[], b"hello runner\n").file_type,
        "text/plain; charset=utf-8"
    );
}

#[test]
fn metadata_updates_leave_the_payload_alone() {
    let (_dir, store) = fresh_store();
    let bytes = payload(70 * 1024);
    let file = upload(&store, "agent", &["linux"], &bytes);

    let updated = store
        .update_file_object(file.id, UpdateFileObjectParams {
            name: Some("agent-v2".to_string()),
            tags: Some(tags(&["linux", "arm64", "linux"])),
            ..UpdateFileObjectParams::default()
        })
        .unwrap();
    assert_eq!(updated.name, "agent-v2");
    assert_eq!(updated.description, file.description);
    assert_eq!(updated.tags, tags(&["arm64", "linux"]));
    assert_eq!(updated.sha256, file.sha256);
    assert_eq!(updated.size, file.size);
    assert_eq!(read_content(&store, file.id), bytes);

    let err = store
        .update_file_object(file.id + 100, UpdateFileObjectParams::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn reader_keeps_its_snapshot_after_delete() {
    let (_dir, store) = fresh_store();
    let bytes = payload(90 * 1024);
    let file = upload(&store, "agent", &["linux"], &bytes);

    let mut reader = store.open_file_object_content(file.id).unwrap();
    store.delete_file_object(file.id).unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    drop(reader);

    assert_eq!(content, bytes);
    assert_eq!(store.get_file_object(file.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        store.open_file_object_content(file.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn declared_size_must_match_streamed_length() {
    let (dir, store) = fresh_store();
    for (declared, actual) in [(10_u64, 5_usize), (3, 5)] {
        let err = store
            .create_file_object(
                CreateFileObjectParams {
                    name: "mismatch".to_string(),
                    size: declared,
                    ..CreateFileObjectParams::default()
                },
                Cursor::new(payload(actual)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    let raw = Connection::open(dir.path().join("fleet.db")).unwrap();
    let rows: i64 =
        raw.query_row("SELECT COUNT(*) FROM file_objects", [], |row| row.get(0)).unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn non_positive_ids_are_invalid() {
    let (_dir, store) = fresh_store();
    assert_eq!(store.get_file_object(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        store.open_file_object_content(-4).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(store.delete_file_object(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(store.open_file_object_content(12).unwrap_err().kind(), ErrorKind::NotFound);
    store.delete_file_object(12).unwrap();
}

#[test]
fn cancelled_upload_leaves_nothing_behind() {
    let (dir, store) = fresh_store();
    let token = CancellationToken::new();
    let cancellable = store.with_cancellation(token.clone());
    let bytes = payload(256 * 1024);
    let err = cancellable
        .create_file_object(
            CreateFileObjectParams {
                name: "partial".to_string(),
                size: bytes.len() as u64,
                ..CreateFileObjectParams::default()
            },
            CancelAfterFirstRead {
                inner: Cursor::new(bytes),
                token,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);

    let raw = Connection::open(dir.path().join("fleet.db")).unwrap();
    let rows: i64 = raw.query_row("SELECT COUNT(*) FROM file_blobs", [], |row| row.get(0)).unwrap();
    assert_eq!(rows, 0);
    assert_eq!(store.list_file_objects(PageRequest::default()).unwrap().total_count, 0);
}

// ============================================================================
// SECTION: Tags and Pages
// ============================================================================

#[test]
fn tag_search_requires_every_tag_and_pages_newest_first() {
    let (_dir, store) = fresh_store();
    let linux_x64 = upload(&store, "a", &["linux", "x64"], b"a");
    let _linux = upload(&store, "b", &["linux"], b"b");
    let linux_x64_gpu = upload(&store, "c", &["linux", "x64", "gpu"], b"c");

    let page = store
        .search_file_objects_by_tags(&tags(&["x64", "linux"]), PageRequest::new(1, 1))
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.iter().map(|file| file.id).collect::<Vec<_>>(), vec![linux_x64_gpu.id]);

    let second = store
        .search_file_objects_by_tags(&tags(&["x64", "linux"]), PageRequest::new(2, 1))
        .unwrap();
    assert_eq!(second.items.iter().map(|file| file.id).collect::<Vec<_>>(), vec![linux_x64.id]);

    let everything = store.search_file_objects_by_tags(&[], PageRequest::default()).unwrap();
    assert_eq!(everything.total_count, 3);
    let beyond = store.list_file_objects(PageRequest::new(5, 10)).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_count, 3);
}

#[test]
fn out_of_range_pages_come_back_empty() {
    let (_dir, store) = fresh_store();
    upload(&store, "a", &["linux"], b"a");
    upload(&store, "b", &["linux"], b"b");

    let far = store.list_file_objects(PageRequest::new(u64::MAX, u64::MAX)).unwrap();
    assert!(far.items.is_empty());
    assert_eq!((far.total_count, far.total_pages), (2, 1));

    let far_tagged =
        store.search_file_objects_by_tags(&tags(&["linux"]), PageRequest::new(u64::MAX, 1)).unwrap();
    assert!(far_tagged.items.is_empty());
    assert_eq!((far_tagged.page, far_tagged.total_count, far_tagged.total_pages), (u64::MAX, 2, 2));

    let huge = store.list_file_objects(PageRequest::new(1, u64::MAX)).unwrap();
    assert_eq!(huge.items.len(), 2);
    assert_eq!(huge.page_size, u64::MAX);
}

#[test]
fn deleting_by_tags_removes_only_full_matches() {
    let (_dir, store) = fresh_store();
    let watcher = Watcher::new();
    let store = store.with_watcher(&watcher).unwrap();
    upload(&store, "a", &["cache", "linux"], b"a");
    upload(&store, "b", &["cache", "linux"], b"b");
    let kept = upload(&store, "c", &["cache"], b"c");
    let mut consumer = watcher.register_consumer("files", Vec::new()).unwrap();

    assert_eq!(store.delete_file_objects_by_tags(&tags(&["linux", "cache"])).unwrap(), 2);
    assert_eq!(store.delete_file_objects_by_tags(&tags(&["missing"])).unwrap(), 0);
    assert_eq!(
        store.delete_file_objects_by_tags(&tags(&["  "])).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let events = consumer.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| {
        event.operation == Operation::Delete && event.entity_type == EntityType::FileObject
    }));
    let remaining = store.list_file_objects(PageRequest::default()).unwrap();
    assert_eq!(remaining.items.iter().map(|file| file.id).collect::<Vec<_>>(), vec![kept.id]);
}

// ============================================================================
// SECTION: Reopen
// ============================================================================

#[test]
fn reopening_reclaims_unfinished_uploads() {
    let (dir, store) = fresh_store();
    let finished = upload(&store, "kept", &["linux"], b"kept");
    drop(store);

    let connection = Connection::open(dir.path().join("fleet.db")).unwrap();
    connection.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    connection
        .execute(
            "INSERT INTO file_objects (id, name, description, file_type, size, sha256, created_at, updated_at) \
             VALUES (?1, 'partial', '', 'application/octet-stream', 1048576, '', 0, 0)",
            [finished.id + 1],
        )
        .unwrap();
    connection
        .execute(
            "INSERT INTO file_blobs (file_object_id, content) VALUES (?1, zeroblob(1048576))",
            [finished.id + 1],
        )
        .unwrap();
    connection
        .execute("INSERT INTO file_object_tags (file_object_id, tag) VALUES (?1, 'partial')", [
            finished.id + 1,
        ])
        .unwrap();
    drop(connection);

    let store = SqliteStore::open(store_config(&dir)).unwrap();
    let connection = Connection::open(dir.path().join("fleet.db")).unwrap();
    assert_eq!(row_count(&connection, "file_objects"), 1);
    assert_eq!(row_count(&connection, "file_blobs"), 1);
    assert_eq!(row_count(&connection, "file_object_tags"), 1);
    assert_eq!(read_content(&store, finished.id), b"kept".to_vec());
}

#[test]
fn reopening_a_store_with_only_unfinished_uploads_empties_it() {
    let (dir, store) = fresh_store();
    drop(store);

    let connection = Connection::open(dir.path().join("fleet.db")).unwrap();
    connection
        .execute_batch(
            "INSERT INTO file_objects (id, name, description, file_type, size, sha256, created_at, updated_at) \
             VALUES (1, 'partial', '', 'application/octet-stream', 1048576, '', 0, 0); \
             INSERT INTO file_blobs (file_object_id, content) VALUES (1, zeroblob(1048576));",
        )
        .unwrap();
    drop(connection);

    let store = SqliteStore::open(store_config(&dir)).unwrap();
    let connection = Connection::open(dir.path().join("fleet.db")).unwrap();
    assert_eq!(row_count(&connection, "file_blobs"), 0);
    assert_eq!(row_count(&connection, "file_objects"), 0);
    assert_eq!(store.list_file_objects(PageRequest::default()).unwrap().total_count, 0);
}
