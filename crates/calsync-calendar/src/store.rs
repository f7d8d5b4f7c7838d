//! Durable storage for sync records.
//!
//! [`SyncStore`] is the seam the orchestrator depends on; [`SqliteSyncStore`]
//! is the SQLite implementation. SQLite work runs on the blocking pool so no
//! runtime thread ever waits on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::record::{CountFilter, Page, RecordFilter, SyncCounts, SyncKey, SyncRecord, SyncStatus};

const SCHEMA_VERSION: i32 = 1;

const RECORD_COLUMNS: &str = "user_id, persona_key, local_event_id, remote_event_id, remote_calendar_id, \
     content_hash, source_system, sync_status, sync_error, created_at, updated_at, \
     last_sync_attempt, last_synced_at";

/// Persistence for sync records.
///
/// Errors are returned as-is; implementations never retry internally.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get(&self, key: &SyncKey) -> StoreResult<Option<SyncRecord>>;

    /// Look a record up by the provider's event ID.
    async fn get_by_remote_id(&self, remote_event_id: &str) -> StoreResult<Option<SyncRecord>>;

    /// Insert or replace the record for `record.key()`.
    ///
    /// `created_at` of an existing row is preserved.
    async fn upsert(&self, record: &SyncRecord) -> StoreResult<()>;

    /// Returns `true` if a record existed.
    async fn delete(&self, key: &SyncKey) -> StoreResult<bool>;

    /// Records of one user, most recently updated first.
    async fn list(&self, filter: &RecordFilter, page: Page) -> StoreResult<Vec<SyncRecord>>;

    async fn count_by_calendar(&self, filter: &CountFilter) -> StoreResult<SyncCounts>;
}

/// SQLite-backed [`SyncStore`].
#[derive(Clone)]
pub struct SqliteSyncStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        // Other processes may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (for tests and dry runs).
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS sync_records (
            user_id TEXT NOT NULL,
            persona_key TEXT NOT NULL DEFAULT '',
            local_event_id TEXT NOT NULL,
            remote_event_id TEXT,
            remote_calendar_id TEXT NOT NULL DEFAULT 'primary',
            content_hash TEXT,
            source_system TEXT NOT NULL,
            sync_status TEXT NOT NULL,
            sync_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_sync_attempt INTEGER NOT NULL,
            last_synced_at INTEGER,
            PRIMARY KEY (user_id, persona_key, local_event_id)
        );

        CREATE INDEX IF NOT EXISTS idx_sync_records_remote ON sync_records(remote_event_id);
        CREATE INDEX IF NOT EXISTS idx_sync_records_user_updated ON sync_records(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_sync_records_calendar ON sync_records(user_id, remote_calendar_id);
        "#,
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// A null persona is stored as `''` so it takes part in the primary key.
fn persona_key(persona_id: Option<&str>) -> &str {
    persona_id.unwrap_or("")
}

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(idx, ms)
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SyncRecord> {
    let persona: String = row.get(1)?;
    let status_str: String = row.get(7)?;
    let sync_status = status_str.parse::<SyncStatus>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(7, "sync_status".to_string(), rusqlite::types::Type::Text)
    })?;
    let last_synced_at = match row.get::<_, Option<i64>>(12)? {
        Some(ms) => Some(from_millis(12, ms)?),
        None => None,
    };

    Ok(SyncRecord {
        user_id: row.get(0)?,
        persona_id: if persona.is_empty() { None } else { Some(persona) },
        local_event_id: row.get(2)?,
        remote_event_id: row.get(3)?,
        remote_calendar_id: row.get(4)?,
        content_hash: row.get(5)?,
        source_system: row.get(6)?,
        sync_status,
        sync_error: row.get(8)?,
        created_at: from_millis(9, row.get(9)?)?,
        updated_at: from_millis(10, row.get(10)?)?,
        last_sync_attempt: from_millis(11, row.get(11)?)?,
        last_synced_at,
    })
}

fn upsert_record(conn: &Connection, record: &SyncRecord) -> StoreResult<()> {
    match insert_record(conn, record) {
        Ok(_) => Ok(()),
        // Another writer got the row in first: apply ours as an update.
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            tracing::debug!(
                user_id = %record.user_id,
                local_event_id = %record.local_event_id,
                "Upsert raced with another writer, updating in place"
            );
            if update_record(conn, record)? == 0 {
                // The row was deleted in between; a plain insert now wins.
                insert_record(conn, record)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn insert_record(conn: &Connection, record: &SyncRecord) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            r#"
            INSERT INTO sync_records ({RECORD_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(user_id, persona_key, local_event_id) DO UPDATE SET
                remote_event_id = excluded.remote_event_id,
                remote_calendar_id = excluded.remote_calendar_id,
                content_hash = excluded.content_hash,
                source_system = excluded.source_system,
                sync_status = excluded.sync_status,
                sync_error = excluded.sync_error,
                updated_at = excluded.updated_at,
                last_sync_attempt = excluded.last_sync_attempt,
                last_synced_at = excluded.last_synced_at
            "#
        ),
        params![
            record.user_id,
            persona_key(record.persona_id.as_deref()),
            record.local_event_id,
            record.remote_event_id,
            record.remote_calendar_id,
            record.content_hash,
            record.source_system,
            record.sync_status.as_str(),
            record.sync_error,
            to_millis(&record.created_at),
            to_millis(&record.updated_at),
            to_millis(&record.last_sync_attempt),
            record.last_synced_at.as_ref().map(to_millis),
        ],
    )
}

/// Returns the number of rows changed.
fn update_record(conn: &Connection, record: &SyncRecord) -> StoreResult<usize> {
    let changed = conn.execute(
        r#"
        UPDATE sync_records SET
            remote_event_id = ?4,
            remote_calendar_id = ?5,
            content_hash = ?6,
            source_system = ?7,
            sync_status = ?8,
            sync_error = ?9,
            updated_at = ?10,
            last_sync_attempt = ?11,
            last_synced_at = ?12
        WHERE user_id = ?1 AND persona_key = ?2 AND local_event_id = ?3
        "#,
        params![
            record.user_id,
            persona_key(record.persona_id.as_deref()),
            record.local_event_id,
            record.remote_event_id,
            record.remote_calendar_id,
            record.content_hash,
            record.source_system,
            record.sync_status.as_str(),
            record.sync_error,
            to_millis(&record.updated_at),
            to_millis(&record.last_sync_attempt),
            record.last_synced_at.as_ref().map(to_millis),
        ],
    )?;
    Ok(changed)
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get(&self, key: &SyncKey) -> StoreResult<Option<SyncRecord>> {
        let key = key.clone();
        self.run(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM sync_records
                         WHERE user_id = ?1 AND persona_key = ?2 AND local_event_id = ?3"
                    ),
                    params![
                        key.user_id,
                        persona_key(key.persona_id.as_deref()),
                        key.local_event_id
                    ],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn get_by_remote_id(&self, remote_event_id: &str) -> StoreResult<Option<SyncRecord>> {
        let remote_event_id = remote_event_id.to_string();
        self.run(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM sync_records
                         WHERE remote_event_id = ?1
                         ORDER BY updated_at DESC LIMIT 1"
                    ),
                    params![remote_event_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn upsert(&self, record: &SyncRecord) -> StoreResult<()> {
        let record = record.clone();
        self.run(move |conn| upsert_record(conn, &record)).await
    }

    async fn delete(&self, key: &SyncKey) -> StoreResult<bool> {
        let key = key.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM sync_records
                 WHERE user_id = ?1 AND persona_key = ?2 AND local_event_id = ?3",
                params![
                    key.user_id,
                    persona_key(key.persona_id.as_deref()),
                    key.local_event_id
                ],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self, filter: &RecordFilter, page: Page) -> StoreResult<Vec<SyncRecord>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR persona_key = ?2)
                   AND (?3 IS NULL OR sync_status = ?3)
                 ORDER BY updated_at DESC, local_event_id ASC
                 LIMIT ?4 OFFSET ?5"
            ))?;

            let rows = stmt.query_map(
                params![
                    filter.user_id,
                    filter.persona_id,
                    filter.status.map(|s| s.as_str()),
                    page.limit,
                    page.offset,
                ],
                row_to_record,
            )?;

            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn count_by_calendar(&self, filter: &CountFilter) -> StoreResult<SyncCounts> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT remote_calendar_id, COUNT(*) FROM sync_records
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR persona_key = ?2)
                   AND (?3 IS NULL OR remote_calendar_id = ?3)
                   AND (?4 IS NULL OR sync_status = ?4)
                 GROUP BY remote_calendar_id",
            )?;

            let rows = stmt.query_map(
                params![
                    filter.user_id,
                    filter.persona_id,
                    filter.calendar_id,
                    filter.status.map(|s| s.as_str()),
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?;

            let mut counts = SyncCounts::default();
            for row in rows {
                let (calendar_id, count) = row?;
                let count = u64::try_from(count).unwrap_or(0);
                counts.total += count;
                counts.by_calendar.insert(calendar_id, count);
            }
            Ok(counts)
        })
        .await
    }
}
