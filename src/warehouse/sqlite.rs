//! SQLite warehouse
//!
//! Each destination table has the schema
//! `(file_name TEXT, file_size INTEGER, file_content BLOB, upload_timestamp TEXT, s3_key TEXT)`
//! plus an index on `s3_key` for the dedup query.
//!
//! Every statement runs on the blocking pool and holds the connection lock
//! only for that statement. Streamed inserts reserve a zero-filled blob of the
//! listed size under a NULL `s3_key`, fill it chunk by chunk with incremental
//! blob I/O and set the key once the last byte is in. The dedup query skips
//! NULL keys, so a half-written row is never taken for a loaded object, and a
//! failed stream deletes its row.

use super::error::{WarehouseError, WarehouseResult};
use super::{check_table_name, FileRecord, Warehouse, WarehouseSession};
use crate::backend::ReadStream;
use crate::config::SqliteWarehouseConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use rusqlite::blob::ZeroBlob;
use rusqlite::limits::Limit;
use rusqlite::{params, Connection, DatabaseName};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONTENT_COLUMN: &str = "file_content";

/// Warehouse stored in a single SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteWarehouse {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &SqliteWarehouseConfig) -> Self {
        Self::new(&config.path).with_busy_timeout(Duration::from_millis(config.busy_timeout_ms))
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> WarehouseResult<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| WarehouseError::Unreachable(format!("{}: {}", path.display(), e)))?;

    // WAL lets readers of the warehouse proceed while a load is running
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn connect(&self) -> WarehouseResult<Box<dyn WarehouseSession>> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || open_connection(&path, busy_timeout))
            .await
            .map_err(|e| WarehouseError::Unreachable(format!("connect task failed: {}", e)))??;

        tracing::debug!(path = %self.path.display(), "Opened SQLite warehouse session");

        Ok(Box::new(SqliteSession::new(conn)))
    }
}

/// One connection shared by every transfer of a run
struct SqliteSession {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSession {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run `f` on the blocking pool with the connection locked for its duration
    async fn with_conn<T, F>(&self, f: F) -> WarehouseResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> WarehouseResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| WarehouseError::Rejected("connection lock poisoned".to_string()))?;
            let conn = open(&guard)?;
            f(conn)
        })
        .await
        .map_err(|e| WarehouseError::Rejected(format!("warehouse task failed: {}", e)))?
    }

    /// Copy every chunk of `content` into the reserved blob at `row_id`
    async fn fill_blob(
        &self,
        table: &str,
        row_id: i64,
        record: &FileRecord,
        content: &mut ReadStream,
    ) -> WarehouseResult<u64> {
        let mut offset: u64 = 0;

        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|source| WarehouseError::Stream {
                key: record.key.clone(),
                source,
            })?;

            let end = offset + chunk.len() as u64;
            if end > record.size {
                return Err(WarehouseError::SizeMismatch {
                    key: record.key.clone(),
                    expected: record.size,
                    actual: end,
                });
            }

            let table = table.to_string();
            let at = offset as usize;
            self.with_conn(move |conn| {
                let mut blob =
                    conn.blob_open(DatabaseName::Main, &table, CONTENT_COLUMN, row_id, false)?;
                blob.write_at(&chunk, at)?;
                Ok(())
            })
            .await?;

            offset = end;
        }

        if offset != record.size {
            return Err(WarehouseError::SizeMismatch {
                key: record.key.clone(),
                expected: record.size,
                actual: offset,
            });
        }

        Ok(offset)
    }
}

fn open(guard: &Option<Connection>) -> WarehouseResult<&Connection> {
    guard.as_ref().ok_or(WarehouseError::Closed)
}

fn quoted(table: &str) -> WarehouseResult<String> {
    check_table_name(table)?;
    Ok(format!("\"{}\"", table))
}

fn size_param(record: &FileRecord) -> WarehouseResult<i64> {
    i64::try_from(record.size).map_err(|_| WarehouseError::TooLarge {
        key: record.key.clone(),
        size: record.size,
        max: i64::MAX as u64,
    })
}

/// Reject content longer than the connection's string and blob limit
fn check_length(conn: &Connection, record: &FileRecord) -> WarehouseResult<i32> {
    let max = conn.limit(Limit::SQLITE_LIMIT_LENGTH);
    match i32::try_from(record.size) {
        Ok(size) if size <= max => Ok(size),
        _ => Err(WarehouseError::TooLarge {
            key: record.key.clone(),
            size: record.size,
            max: max.max(0) as u64,
        }),
    }
}

#[async_trait]
impl WarehouseSession for SqliteSession {
    async fn test_connection(&self) -> WarehouseResult<()> {
        let now: String = self
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT CURRENT_TIMESTAMP", [], |row| row.get::<_, String>(0))?)
            })
            .await?;
        tracing::debug!(server_time = %now, "SQLite warehouse reachable");
        Ok(())
    }

    async fn ensure_table(&self, table: &str) -> WarehouseResult<()> {
        let name = quoted(table)?;
        let index = format!("\"idx_{}_s3_key\"", table);
        self.with_conn(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {name} (
                    file_name TEXT,
                    file_size INTEGER,
                    {CONTENT_COLUMN} BLOB,
                    upload_timestamp TEXT,
                    s3_key TEXT
                );
                CREATE INDEX IF NOT EXISTS {index} ON {name} (s3_key);"
            ))?;
            Ok(())
        })
        .await
    }

    async fn query_distinct_keys(&self, table: &str) -> WarehouseResult<HashSet<String>> {
        let name = quoted(table)?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT s3_key FROM {name} WHERE s3_key IS NOT NULL"
            ))?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<HashSet<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn insert_buffered(
        &self,
        table: &str,
        record: &FileRecord,
        content: Bytes,
    ) -> WarehouseResult<()> {
        let name = quoted(table)?;
        let size = size_param(record)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            check_length(conn, &record)?;
            conn.execute(
                &format!(
                    "INSERT INTO {name} (file_name, file_size, {CONTENT_COLUMN}, upload_timestamp, s3_key)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![
                    record.file_name,
                    size,
                    content.as_ref(),
                    Utc::now().to_rfc3339(),
                    record.key
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_streamed(
        &self,
        table: &str,
        record: &FileRecord,
        mut content: ReadStream,
    ) -> WarehouseResult<u64> {
        let name = quoted(table)?;

        let row_id = {
            let name = name.clone();
            let record = record.clone();
            self.with_conn(move |conn| {
                let reserved = check_length(conn, &record)?;
                conn.execute(
                    &format!(
                        "INSERT INTO {name} (file_name, file_size, {CONTENT_COLUMN}, upload_timestamp, s3_key)
                         VALUES (?1, ?2, ?3, ?4, NULL)"
                    ),
                    params![
                        record.file_name,
                        reserved,
                        ZeroBlob(reserved),
                        Utc::now().to_rfc3339()
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?
        };

        let filled = match self.fill_blob(table, row_id, record, &mut content).await {
            Ok(written) => {
                let key = record.key.clone();
                let name = name.clone();
                self.with_conn(move |conn| {
                    conn.execute(
                        &format!("UPDATE {name} SET s3_key = ?1 WHERE rowid = ?2"),
                        params![key, row_id],
                    )?;
                    Ok(())
                })
                .await
                .map(|_| written)
            }
            Err(e) => Err(e),
        };

        if filled.is_err() {
            let removed = self
                .with_conn(move |conn| {
                    conn.execute(&format!("DELETE FROM {name} WHERE rowid = ?1"), [row_id])?;
                    Ok(())
                })
                .await;
            if let Err(e) = removed {
                tracing::warn!(key = %record.key, error = %e, "Failed to remove partial row");
            }
        }

        filled
    }

    async fn close(&self) -> WarehouseResult<()> {
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| WarehouseError::Rejected("connection lock poisoned".to_string()))?;
            let taken = guard.take();
            match taken {
                Some(conn) => conn
                    .close()
                    .map(|_| true)
                    .map_err(|(_, e)| WarehouseError::Sqlite(e)),
                None => Ok(false),
            }
        })
        .await
        .map_err(|e| WarehouseError::Rejected(format!("warehouse task failed: {}", e)))??;

        if closed {
            tracing::debug!("Closed SQLite warehouse session");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::tempdir;
    use tokio::time::timeout;

    fn chunks(parts: &[&'static [u8]]) -> ReadStream {
        let items: Vec<std::io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(stream::iter(items))
    }

    fn owned_chunk(data: Vec<u8>) -> ReadStream {
        let items: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from(data))];
        Box::pin(stream::iter(items))
    }

    fn stored_content(path: &Path, table: &str, key: &str) -> Vec<u8> {
        let conn = Connection::open(path).unwrap();
        conn.query_row(
            &format!("SELECT file_content FROM \"{}\" WHERE s3_key = ?1", table),
            [key],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn row_count(path: &Path, table: &str) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let dir = tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path().join("wh.db"));
        let session = warehouse.connect().await.unwrap();

        session.test_connection().await.unwrap();
        session.ensure_table("CSV_FILES").await.unwrap();
        session.ensure_table("CSV_FILES").await.unwrap();
        assert!(session.query_distinct_keys("CSV_FILES").await.unwrap().is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_buffered_insert() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session = SqliteWarehouse::new(&db).connect().await.unwrap();
        session.ensure_table("T").await.unwrap();

        let record = FileRecord::for_key("landing/a.csv", 5);
        session
            .insert_buffered("T", &record, Bytes::from_static(b"a,b,c"))
            .await
            .unwrap();

        let keys = session.query_distinct_keys("T").await.unwrap();
        assert_eq!(keys, HashSet::from(["landing/a.csv".to_string()]));
        session.close().await.unwrap();

        assert_eq!(stored_content(&db, "T", "landing/a.csv"), b"a,b,c");
        let conn = Connection::open(&db).unwrap();
        let (name, size): (String, i64) = conn
            .query_row("SELECT file_name, file_size FROM \"T\"", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "a.csv");
        assert_eq!(size, 5);
    }

    #[tokio::test]
    async fn test_streamed_insert_fills_blob() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session = SqliteWarehouse::new(&db).connect().await.unwrap();
        session.ensure_table("BIG").await.unwrap();

        let record = FileRecord::for_key("big.bin", 10);
        let written = session
            .insert_streamed("BIG", &record, chunks(&[b"0123", b"4567", b"89"]))
            .await
            .unwrap();
        assert_eq!(written, 10);
        session.close().await.unwrap();

        assert_eq!(stored_content(&db, "BIG", "big.bin"), b"0123456789");
    }

    #[tokio::test]
    async fn test_streamed_short_read_leaves_no_row() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session = SqliteWarehouse::new(&db).connect().await.unwrap();
        session.ensure_table("BIG").await.unwrap();

        let record = FileRecord::for_key("short.bin", 10);
        let err = session
            .insert_streamed("BIG", &record, chunks(&[b"0123"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::SizeMismatch { actual: 4, .. }));

        let record = FileRecord::for_key("long.bin", 3);
        let err = session
            .insert_streamed("BIG", &record, chunks(&[b"0123"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::SizeMismatch { .. }));

        // Session stays usable after a failed stream
        let record = FileRecord::for_key("ok.bin", 2);
        session
            .insert_streamed("BIG", &record, chunks(&[b"ok"]))
            .await
            .unwrap();
        session.close().await.unwrap();

        assert_eq!(row_count(&db, "BIG"), 1);
    }

    #[tokio::test]
    async fn test_streamed_error_leaves_no_row() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session = SqliteWarehouse::new(&db).connect().await.unwrap();
        session.ensure_table("BIG").await.unwrap();

        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"01")),
            Err(std::io::Error::other("connection reset")),
        ];
        let record = FileRecord::for_key("broken.bin", 4);
        let err = session
            .insert_streamed("BIG", &record, Box::pin(stream::iter(items)))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Stream { .. }));
        session.close().await.unwrap();

        assert_eq!(row_count(&db, "BIG"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_stream_does_not_block_other_tables() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session: Arc<dyn WarehouseSession> =
            Arc::from(SqliteWarehouse::new(&db).connect().await.unwrap());
        session.ensure_table("BIG").await.unwrap();
        session.ensure_table("SMALL").await.unwrap();

        // One chunk arrives, then the download hangs
        let stalled: ReadStream = Box::pin(
            stream::iter(vec![Ok(Bytes::from_static(b"0123"))])
                .chain(stream::pending::<std::io::Result<Bytes>>()),
        );
        let streaming = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let record = FileRecord::for_key("stalled.bin", 8);
                session.insert_streamed("BIG", &record, stalled).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = FileRecord::for_key("small.csv", 1);
        timeout(
            Duration::from_secs(2),
            session.insert_buffered("SMALL", &record, Bytes::from_static(b"x")),
        )
        .await
        .expect("insert waited on the stalled stream")
        .unwrap();

        let small = timeout(Duration::from_secs(2), session.query_distinct_keys("SMALL"))
            .await
            .expect("dedup query waited on the stalled stream")
            .unwrap();
        assert_eq!(small, HashSet::from(["small.csv".to_string()]));

        // The half-written row is not taken for a loaded object
        let big = timeout(Duration::from_secs(2), session.query_distinct_keys("BIG"))
            .await
            .expect("dedup query waited on the stalled stream")
            .unwrap();
        assert!(big.is_empty());

        streaming.abort();
    }

    #[tokio::test]
    async fn test_content_over_length_limit_is_too_large() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let conn = open_connection(&db, Duration::from_secs(5)).unwrap();
        conn.set_limit(Limit::SQLITE_LIMIT_LENGTH, 1000);
        let session = SqliteSession::new(conn);
        session.ensure_table("BIG").await.unwrap();

        let record = FileRecord::for_key("big.bin", 2000);
        let err = session
            .insert_streamed("BIG", &record, owned_chunk(vec![0u8; 2000]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WarehouseError::TooLarge { size: 2000, max: 1000, .. }
        ));

        let err = session
            .insert_buffered("BIG", &record, Bytes::from(vec![0u8; 2000]))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::TooLarge { max: 1000, .. }));

        let record = FileRecord::for_key("fits.bin", 800);
        session
            .insert_streamed("BIG", &record, owned_chunk(vec![1u8; 800]))
            .await
            .unwrap();
        session.close().await.unwrap();
        assert_eq!(row_count(&db, "BIG"), 1);
    }

    #[tokio::test]
    async fn test_empty_object_streams() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("wh.db");
        let session = SqliteWarehouse::new(&db).connect().await.unwrap();
        session.ensure_table("T").await.unwrap();

        let record = FileRecord::for_key("empty", 0);
        assert_eq!(
            session.insert_streamed("T", &record, chunks(&[])).await.unwrap(),
            0
        );
        session.close().await.unwrap();
        assert_eq!(row_count(&db, "T"), 1);
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let dir = tempdir().unwrap();
        let session = SqliteWarehouse::new(dir.path().join("wh.db"))
            .connect()
            .await
            .unwrap();
        assert!(matches!(
            session.ensure_table("x\"; DROP TABLE y; --").await,
            Err(WarehouseError::InvalidTableName(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_session() {
        let dir = tempdir().unwrap();
        let session = SqliteWarehouse::new(dir.path().join("wh.db"))
            .connect()
            .await
            .unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(
            session.test_connection().await,
            Err(WarehouseError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_path() {
        let dir = tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path().join("missing").join("wh.db"));
        assert!(matches!(
            warehouse.connect().await,
            Err(WarehouseError::Unreachable(_))
        ));
    }
}
