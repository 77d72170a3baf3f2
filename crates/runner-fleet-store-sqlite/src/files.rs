// crates/runner-fleet-store-sqlite/src/files.rs
// ============================================================================
// Module: SQLite File Objects
// Description: Tagged file metadata with write-once streamed blob payloads.
// Purpose: Store large payloads without holding them in memory.
// Dependencies: runner-fleet-core, rusqlite, tempfile, tracing
// ============================================================================

//! ## Overview
//! Creating a file object happens in three stages:
//! 1. The upload is copied to a local staging file. No database lock is held,
//!    so a slow client never stalls other writers.
//! 2. One transaction inserts the metadata row, its tags, and a zero-filled
//!    blob of the declared size.
//! 3. A second transaction streams the staged bytes into that blob, hashing
//!    them on the way, and records the digest.
//!
//! Until stage 3 commits the object has an empty digest and is invisible to
//! every query. A failure or cancellation in stage 3 deletes the row.
//!
//! Metadata updates never touch `file_blobs`. Content is read back through
//! [`FileObjectReader`], which owns a dedicated connection and a read snapshot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use runner_fleet_core::ChangePayload;
use runner_fleet_core::CreateFileObjectParams;
use runner_fleet_core::FileObject;
use runner_fleet_core::Operation;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::StoreError;
use runner_fleet_core::StreamingDigest;
use runner_fleet_core::UpdateFileObjectParams;
use runner_fleet_core::core::file::validate_file_object_id;
use runner_fleet_core::normalize_tags;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use rusqlite::blob::ZeroBlob;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;
use tracing::warn;

use crate::store::SqliteStore;
use crate::store::db_error;
use crate::store::from_sql_u64;
use crate::store::read_page;
use crate::store::to_sql_u64;
use crate::store::unix_millis;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bytes moved per staging or blob write step.
const CHUNK_SIZE: usize = 64 * 1024;
/// Bytes inspected when sniffing the content type.
const SNIFF_LEN: usize = 512;
/// Predicate selecting fully written file objects.
const COMPLETE: &str = "sha256 <> ''";
/// Column list matching [`read_file_row`].
const FILE_COLUMNS: &str = "id, name, description, file_type, size, sha256, created_at, updated_at";

/// Leading signatures of recognized binary formats.
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"\x7fELF", "application/x-executable"),
];

// ============================================================================
// SECTION: Content Sniffing
// ============================================================================

/// Guesses a MIME type from the first bytes of a payload.
fn sniff_content_type(head: &[u8]) -> &'static str {
    if let Some(&(_, mime)) = MAGIC.iter().find(|(magic, _)| head.starts_with(magic)) {
        return mime;
    }
    if head.get(257 .. 262) == Some(b"ustar".as_slice()) {
        return "application/x-tar";
    }
    if head.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }
    let trimmed = head.trim_ascii_start();
    let looks_html = ["<!doctype html", "<html", "<head", "<body"].iter().any(|prefix| {
        trimmed
            .get(.. prefix.len())
            .is_some_and(|start| start.eq_ignore_ascii_case(prefix.as_bytes()))
    });
    if looks_html {
        return "text/html; charset=utf-8";
    }
    if is_plain_text(head) {
        return "text/plain; charset=utf-8";
    }
    "application/octet-stream"
}

/// True when `head` is UTF-8 free of control characters.
///
/// A multi-byte character cut off at the end of the window still counts.
fn is_plain_text(head: &[u8]) -> bool {
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(err) if err.error_len().is_none() => {
            let (valid, _) = head.split_at(err.valid_up_to());
            match std::str::from_utf8(valid) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    text.chars().all(|ch| !ch.is_control() || matches!(ch, '\t' | '\n' | '\r' | '\x0c'))
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// File object columns as stored.
struct FileRow {
    /// Row id.
    id: i64,
    /// Display name.
    name: String,
    /// Description.
    description: String,
    /// Sniffed content type.
    file_type: String,
    /// Payload size.
    size: i64,
    /// Payload digest.
    sha256: String,
    /// Creation time.
    created_at: i64,
    /// Update time.
    updated_at: i64,
}

/// Reads one file object row.
fn read_file_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        file_type: row.get(3)?,
        size: row.get(4)?,
        sha256: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Loads the sorted tags of one file object.
fn file_tags(
    connection: &Connection,
    operation: &'static str,
    file_id: i64,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = connection
        .prepare_cached("SELECT tag FROM file_object_tags WHERE file_object_id = ?1 ORDER BY tag")
        .map_err(|err| db_error(operation, &err))?;
    let rows = stmt
        .query_map(params![file_id], |row| row.get(0))
        .map_err(|err| db_error(operation, &err))?;
    rows.collect::<Result<Vec<String>, _>>().map_err(|err| db_error(operation, &err))
}

/// Inserts tags for one file object.
fn write_file_tags(
    connection: &Connection,
    operation: &'static str,
    file_id: i64,
    tags: &[String],
) -> Result<(), StoreError> {
    connection
        .execute("DELETE FROM file_object_tags WHERE file_object_id = ?1", params![file_id])
        .map_err(|err| db_error(operation, &err))?;
    let mut stmt = connection
        .prepare_cached("INSERT INTO file_object_tags (file_object_id, tag) VALUES (?1, ?2)")
        .map_err(|err| db_error(operation, &err))?;
    for tag in tags {
        stmt.execute(params![file_id, tag]).map_err(|err| db_error(operation, &err))?;
    }
    Ok(())
}

/// Runs a file object query and attaches tags.
fn query_files(
    connection: &Connection,
    operation: &'static str,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<FileObject>, StoreError> {
    let mut stmt = connection.prepare(sql).map_err(|err| db_error(operation, &err))?;
    let rows = stmt
        .query_map(params_from_iter(values), read_file_row)
        .map_err(|err| db_error(operation, &err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| db_error(operation, &err))?;
    rows.into_iter()
        .map(|row| {
            let tags = file_tags(connection, operation, row.id)?;
            Ok(FileObject {
                id: row.id,
                name: row.name,
                description: row.description,
                file_type: row.file_type,
                size: from_sql_u64(operation, row.size)?,
                sha256: row.sha256,
                tags,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .collect()
}

/// Loads one complete file object, if present.
fn find_file(
    connection: &Connection,
    operation: &'static str,
    file_id: i64,
) -> Result<Option<FileObject>, StoreError> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM file_objects WHERE id = ? AND {COMPLETE}");
    Ok(query_files(connection, operation, &sql, vec![Value::Integer(file_id)])?.pop())
}

/// Builds the AND-semantics tag predicate and its bound values.
fn tag_predicate(
    operation: &'static str,
    tags: &[String],
) -> Result<(String, Vec<Value>), StoreError> {
    if tags.is_empty() {
        return Ok((COMPLETE.to_string(), Vec::new()));
    }
    let count =
        i64::try_from(tags.len()).map_err(|_| StoreError::invalid(operation, "too many tags"))?;
    let placeholders = vec!["?"; tags.len()].join(", ");
    let predicate = format!(
        "{COMPLETE} AND id IN (SELECT file_object_id FROM file_object_tags \
         WHERE tag IN ({placeholders}) GROUP BY file_object_id HAVING COUNT(DISTINCT tag) = ?)"
    );
    let mut values: Vec<Value> = tags.iter().cloned().map(Value::Text).collect();
    values.push(Value::Integer(count));
    Ok((predicate, values))
}

/// Reads into `buffer`, retrying interrupted reads.
fn read_chunk(source: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buffer) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

impl SqliteStore {
    /// Creates a file object from `content`, which must yield exactly
    /// `params.size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for an empty name, an oversized
    /// payload, or a length mismatch, and [`StoreError::Canceled`] when the
    /// token fires mid-stream. Nothing is left behind on failure.
    pub fn create_file_object(
        &self,
        params: CreateFileObjectParams,
        mut content: impl Read,
    ) -> Result<FileObject, StoreError> {
        let op = "create_file_object";
        params.validate().map_err(|err| err.with_operation(op))?;
        let tags = normalize_tags(&params.tags);
        let blob_len = i32::try_from(params.size)
            .map_err(|_| StoreError::invalid(op, format!("file too large: {} bytes", params.size)))?;
        let size = to_sql_u64(op, params.size)?;

        let (mut staged, head) = self.stage_upload(op, &mut content, params.size)?;
        let file_type = sniff_content_type(&head).to_string();

        let now = unix_millis();
        let file_id = self.write_tx(op, |tx| {
            tx.execute(
                "INSERT INTO file_objects (name, description, file_type, size, sha256, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, '', ?5, ?6)",
                params![params.name, params.description, file_type, size, now, now],
            )
            .map_err(|err| db_error(op, &err))?;
            let file_id = tx.last_insert_rowid();
            write_file_tags(tx, op, file_id, &tags)?;
            tx.execute(
                "INSERT INTO file_blobs (file_object_id, content) VALUES (?1, ?2)",
                params![file_id, ZeroBlob(blob_len)],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(file_id)
        })?;

        let sha256 = self.with_write_connection(op, |connection| {
            let filled = self.fill_blob(op, connection, file_id, &mut staged);
            if filled.is_err()
                && let Err(err) =
                    connection.execute("DELETE FROM file_objects WHERE id = ?1", params![file_id])
            {
                warn!(file_id, error = %err, "failed to remove partially written file object");
            }
            filled
        })?;

        let file = FileObject {
            id: file_id,
            name: params.name,
            description: params.description,
            file_type,
            size: params.size,
            sha256,
            tags,
            created_at: now,
            updated_at: now,
        };
        debug!(file_id, size = file.size, file_type = %file.file_type, "created file object");
        self.publish(Operation::Create, ChangePayload::FileObject(file.clone()));
        Ok(file)
    }

    /// Copies the upload to a staging file and returns it rewound, with the
    /// leading bytes used for sniffing.
    fn stage_upload(
        &self,
        operation: &'static str,
        content: &mut impl Read,
        declared: u64,
    ) -> Result<(File, Vec<u8>), StoreError> {
        let staging_error =
            |err: io::Error| StoreError::backend(operation, format!("staging upload failed: {err}"));
        let mut staged = match &self.config.blob_temp_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(staging_error)?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut buffer = vec![0_u8; CHUNK_SIZE];
        let mut received: u64 = 0;
        loop {
            self.check_cancel(operation)?;
            let read = read_chunk(content, &mut buffer).map_err(|err| {
                StoreError::invalid(operation, format!("reading upload failed: {err}"))
            })?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[.. read];
            received = received.saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
            if received > declared {
                return Err(StoreError::invalid(
                    operation,
                    format!("upload exceeds declared size of {declared} bytes"),
                ));
            }
            if head.len() < SNIFF_LEN {
                let take = chunk.len().min(SNIFF_LEN - head.len());
                head.extend_from_slice(&chunk[.. take]);
            }
            staged.write_all(chunk).map_err(staging_error)?;
        }
        if received != declared {
            return Err(StoreError::invalid(
                operation,
                format!("upload has {received} bytes, declared {declared}"),
            ));
        }
        staged.flush().map_err(staging_error)?;
        staged.seek(SeekFrom::Start(0)).map_err(staging_error)?;
        Ok((staged, head))
    }

    /// Streams the staged payload into the preallocated blob and records its
    /// digest in one transaction.
    fn fill_blob(
        &self,
        operation: &'static str,
        connection: &mut Connection,
        file_id: i64,
        staged: &mut File,
    ) -> Result<String, StoreError> {
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(operation, &err))?;
        let mut blob = tx
            .blob_open("main", "file_blobs", "content", file_id, false)
            .map_err(|err| db_error(operation, &err))?;
        let mut digest = StreamingDigest::new();
        let mut buffer = vec![0_u8; CHUNK_SIZE];
        loop {
            self.check_cancel(operation)?;
            let read = read_chunk(staged, &mut buffer).map_err(|err| {
                StoreError::backend(operation, format!("reading staged upload failed: {err}"))
            })?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[.. read];
            blob.write_all(chunk).map_err(|err| {
                StoreError::backend(operation, format!("writing blob failed: {err}"))
            })?;
            digest.update(chunk);
        }
        blob.close().map_err(|err| db_error(operation, &err))?;
        let sha256 = digest.finalize_hex();
        tx.execute("UPDATE file_objects SET sha256 = ?1 WHERE id = ?2", params![sha256, file_id])
            .map_err(|err| db_error(operation, &err))?;
        self.check_cancel(operation)?;
        tx.commit().map_err(|err| db_error(operation, &err))?;
        Ok(sha256)
    }

    /// Returns a file object's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a non-positive id and
    /// [`StoreError::NotFound`] when absent.
    pub fn get_file_object(&self, file_id: i64) -> Result<FileObject, StoreError> {
        let op = "get_file_object";
        validate_file_object_id(op, file_id)?;
        self.read(op, |connection| {
            find_file(connection, op, file_id)?
                .ok_or_else(|| StoreError::not_found(op, format!("file object not found: {file_id}")))
        })
    }

    /// Updates name, description, or tags. The payload is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for invalid fields and
    /// [`StoreError::NotFound`] when absent.
    pub fn update_file_object(
        &self,
        file_id: i64,
        params: UpdateFileObjectParams,
    ) -> Result<FileObject, StoreError> {
        let op = "update_file_object";
        validate_file_object_id(op, file_id)?;
        params.validate().map_err(|err| err.with_operation(op))?;
        let file = self.write_tx(op, |tx| {
            let mut file = find_file(tx, op, file_id)?.ok_or_else(|| {
                StoreError::not_found(op, format!("file object not found: {file_id}"))
            })?;
            if let Some(name) = params.name {
                file.name = name;
            }
            if let Some(description) = params.description {
                file.description = description;
            }
            if let Some(tags) = params.tags {
                let tags = normalize_tags(tags);
                if tags != file.tags {
                    write_file_tags(tx, op, file_id, &tags)?;
                    file.tags = tags;
                }
            }
            file.updated_at = unix_millis();
            tx.execute(
                "UPDATE file_objects SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
                params![file.name, file.description, file.updated_at, file_id],
            )
            .map_err(|err| db_error(op, &err))?;
            Ok(file)
        })?;
        debug!(file_id, "updated file object");
        self.publish(Operation::Update, ChangePayload::FileObject(file.clone()));
        Ok(file)
    }

    /// Deletes a file object and its payload; absent ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a non-positive id.
    pub fn delete_file_object(&self, file_id: i64) -> Result<(), StoreError> {
        let op = "delete_file_object";
        validate_file_object_id(op, file_id)?;
        let deleted = self.write_tx(op, |tx| {
            let Some(file) = find_file(tx, op, file_id)? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM file_objects WHERE id = ?1", params![file_id])
                .map_err(|err| db_error(op, &err))?;
            Ok(Some(file))
        })?;
        if let Some(file) = deleted {
            debug!(file_id, "deleted file object");
            self.publish(Operation::Delete, ChangePayload::FileObject(file));
        }
        Ok(())
    }

    /// Deletes every file object carrying all of `tags` and returns how many
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when `tags` normalizes to
    /// nothing.
    pub fn delete_file_objects_by_tags(&self, tags: &[String]) -> Result<u64, StoreError> {
        let op = "delete_file_objects_by_tags";
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Err(StoreError::invalid(op, "at least one tag is required"));
        }
        let (predicate, values) = tag_predicate(op, &tags)?;
        let deleted = self.write_tx(op, |tx| {
            let files = query_files(
                tx,
                op,
                &format!("SELECT {FILE_COLUMNS} FROM file_objects WHERE {predicate} ORDER BY id"),
                values,
            )?;
            let mut stmt = tx
                .prepare_cached("DELETE FROM file_objects WHERE id = ?1")
                .map_err(|err| db_error(op, &err))?;
            for file in &files {
                stmt.execute(params![file.id]).map_err(|err| db_error(op, &err))?;
            }
            Ok(files)
        })?;
        let count = u64::try_from(deleted.len()).unwrap_or(u64::MAX);
        debug!(count, tags = %tags.join(","), "deleted file objects by tags");
        for file in deleted {
            self.publish(Operation::Delete, ChangePayload::FileObject(file));
        }
        Ok(count)
    }

    /// Returns one page of file objects carrying all of `tags`, newest first.
    /// An empty tag list matches every object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn search_file_objects_by_tags(
        &self,
        tags: &[String],
        request: PageRequest,
    ) -> Result<Page<FileObject>, StoreError> {
        let op = "search_file_objects_by_tags";
        let tags = normalize_tags(tags);
        let (predicate, values) = tag_predicate(op, &tags)?;
        self.file_page(op, &predicate, values, request)
    }

    /// Returns one page of all file objects, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    pub fn list_file_objects(&self, request: PageRequest) -> Result<Page<FileObject>, StoreError> {
        let op = "list_file_objects";
        self.file_page(op, COMPLETE, Vec::new(), request)
    }

    /// Counts and fetches one page of file objects matching `predicate`.
    fn file_page(
        &self,
        operation: &'static str,
        predicate: &str,
        values: Vec<Value>,
        request: PageRequest,
    ) -> Result<Page<FileObject>, StoreError> {
        self.read(operation, |connection| {
            read_page(
                connection,
                operation,
                &format!("SELECT COUNT(*) FROM file_objects WHERE {predicate}"),
                values,
                request,
                |paged| {
                    query_files(
                        connection,
                        operation,
                        &format!(
                            "SELECT {FILE_COLUMNS} FROM file_objects WHERE {predicate} \
                             ORDER BY id DESC LIMIT ? OFFSET ?"
                        ),
                        paged,
                    )
                },
            )
        })
    }

    /// Opens a streaming reader over a file object's payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a non-positive id and
    /// [`StoreError::NotFound`] when absent.
    pub fn open_file_object_content(&self, file_id: i64) -> Result<FileObjectReader, StoreError> {
        let op = "open_file_object_content";
        validate_file_object_id(op, file_id)?;
        self.check_cancel(op)?;
        let connection = self.open_dedicated_connection()?;
        connection.execute_batch("BEGIN DEFERRED").map_err(|err| db_error(op, &err))?;
        let mut reader = FileObjectReader {
            connection: Some(connection),
            row_id: file_id,
            position: 0,
            size: 0,
        };
        reader.size = reader.stored_size(op)?;
        Ok(reader)
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Streaming reader over one file object's payload.
///
/// The reader owns a dedicated connection holding a read transaction, so the
/// payload stays consistent even if the object is deleted meanwhile. Call
/// [`FileObjectReader::close`] to observe release failures; dropping the
/// reader releases everything but only logs them.
#[derive(Debug)]
pub struct FileObjectReader {
    /// Dedicated connection; `None` once released.
    connection: Option<Connection>,
    /// Blob row id, equal to the file object id.
    row_id: i64,
    /// Next byte to read.
    position: u64,
    /// Payload length.
    size: u64,
}

impl FileObjectReader {
    /// Returns the payload length in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Ends the read transaction and closes the connection.
    ///
    /// Both steps are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure as [`StoreError::Backend`].
    pub fn close(mut self) -> Result<(), StoreError> {
        match self.connection.take() {
            Some(connection) => release(connection),
            None => Ok(()),
        }
    }

    /// Reads the payload length inside the reader's snapshot.
    fn stored_size(&self, operation: &'static str) -> Result<u64, StoreError> {
        let Some(connection) = &self.connection else {
            return Err(StoreError::backend(operation, "reader is closed"));
        };
        let size: Option<i64> = connection
            .query_row(
                &format!(
                    "SELECT size FROM file_objects WHERE id = ?1 AND {COMPLETE} \
                     AND EXISTS (SELECT 1 FROM file_blobs WHERE file_object_id = ?1)"
                ),
                params![self.row_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(operation, &err))?;
        let size = size.ok_or_else(|| {
            StoreError::not_found(operation, format!("file object not found: {}", self.row_id))
        })?;
        from_sql_u64(operation, size)
    }
}

impl Read for FileObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }
        let Some(connection) = &self.connection else {
            return Err(io::Error::other("file object reader is closed"));
        };
        let mut blob = connection
            .blob_open("main", "file_blobs", "content", self.row_id, true)
            .map_err(io::Error::other)?;
        blob.seek(SeekFrom::Start(self.position))?;
        let read = blob.read(buf)?;
        blob.close().map_err(io::Error::other)?;
        self.position = self.position.saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
        Ok(read)
    }
}

impl Drop for FileObjectReader {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take()
            && let Err(err) = release(connection)
        {
            warn!(file_id = self.row_id, error = %err, "failed to release file object reader");
        }
    }
}

/// Commits the read transaction, then closes the connection.
fn release(connection: Connection) -> Result<(), StoreError> {
    let op = "close_file_object_content";
    let committed = connection.execute_batch("COMMIT").map_err(|err| db_error(op, &err));
    let closed = connection.close().map_err(|(_, err)| db_error(op, &err));
    committed.and(closed)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::is_plain_text;
    use super::sniff_content_type;

    #[test]
    fn sniffs_binary_signatures() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_content_type(b"\x1f\x8b\x08\x00payload"), "application/x-gzip");
        assert_eq!(sniff_content_type(b"\x7fELF\x02\x01"), "application/x-executable");
        assert_eq!(sniff_content_type(b"PK\x03\x04zip"), "application/zip");
    }

    #[test]
    fn sniffs_tar_header_at_offset() {
        let mut header = vec![0_u8; 512];
        header[257 .. 262].copy_from_slice(b"ustar");
        assert_eq!(sniff_content_type(&header), "application/x-tar");
    }

    #[test]
    fn sniffs_markup_and_text() {
        assert_eq!(sniff_content_type(b"<?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        assert_eq!(sniff_content_type(b"  \n<!DOCTYPE HTML><p>"), "text/html; charset=utf-8");
        assert_eq!(sniff_content_type(b"#!/bin/sh\necho hi\n"), "text/plain; charset=utf-8");
        assert_eq!(sniff_content_type(b""), "text/plain; charset=utf-8");
    }

    #[test]
    fn control_bytes_are_binary() {
        assert_eq!(sniff_content_type(b"abc\x00\x01def"), "application/octet-stream");
    }

    #[test]
    fn truncated_utf8_tail_is_still_text() {
        let text = "caf\u{e9}".as_bytes();
        let cut = &text[.. text.len() - 1];
        assert!(is_plain_text(cut));
        assert!(!is_plain_text(b"\xff\xfe"));
        assert!(std::str::from_utf8(cut).is_err());
    }
}
