use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use appdb_schema::ValidatedFields;
use appdb_types::{Document, DocumentKey, Fields, ItemKey, KeyRange, Partition};

use crate::error::{StoreError, StoreResult};
use crate::traits::StorageBackend;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS app_data_items (
    app        TEXT NOT NULL,
    wallet_id  TEXT NOT NULL,
    model      TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (app, wallet_id, model, key)
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row as read from SQLite, before decoding.
struct RawRow {
    key: String,
    value: String,
    created_at: String,
    updated_at: String,
}

/// Durable backend on a single SQLite database.
///
/// Upsert is one `INSERT ... ON CONFLICT DO UPDATE` statement keyed on the
/// composite primary key, so SQLite itself arbitrates concurrent writers.
/// The connection is serialized behind a mutex.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` in WAL mode.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        let backend = Self::init(conn)?;
        info!(path = %path.display(), "sqlite backend opened");
        Ok(backend)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {e}")))
    }
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(key: &DocumentKey, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn decode_value(key: &DocumentKey, raw: &str) -> StoreResult<Fields> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRecord {
        key: key.to_string(),
        reason: format!("bad value: {e}"),
    })
}

fn decode_row(partition: &Partition, row: RawRow) -> StoreResult<Document> {
    let item: ItemKey = row.key.parse().map_err(|e| StoreError::CorruptRecord {
        key: format!("{partition}/{}", row.key),
        reason: format!("{e}"),
    })?;
    let key = partition.key(item);
    Ok(Document {
        value: decode_value(&key, &row.value)?,
        created_at: decode_time(&key, &row.created_at)?,
        updated_at: decode_time(&key, &row.updated_at)?,
        key,
    })
}

impl StorageBackend for SqliteBackend {
    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT key, value, created_at, updated_at FROM app_data_items
                 WHERE app = ?1 AND wallet_id = ?2 AND model = ?3 AND key = ?4",
                params![
                    key.app.as_str(),
                    key.wallet.as_str(),
                    key.model.as_str(),
                    key.key.as_str()
                ],
                |row| {
                    Ok(RawRow {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        drop(conn);

        row.map(|raw| decode_row(&key.partition(), raw)).transpose()
    }

    fn upsert(&self, key: &DocumentKey, value: &ValidatedFields) -> StoreResult<Document> {
        let encoded = serde_json::to_string(value.as_fields())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = encode_time(Utc::now());

        let conn = self.conn()?;
        let (created_at, updated_at): (String, String) = conn.query_row(
            "INSERT INTO app_data_items (app, wallet_id, model, key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (app, wallet_id, model, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
             RETURNING created_at, updated_at",
            params![
                key.app.as_str(),
                key.wallet.as_str(),
                key.model.as_str(),
                key.key.as_str(),
                encoded,
                now
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        drop(conn);

        debug!(key = %key, "sqlite upsert");
        Ok(Document {
            key: key.clone(),
            value: value.as_fields().clone(),
            created_at: decode_time(key, &created_at)?,
            updated_at: decode_time(key, &updated_at)?,
        })
    }

    fn range(&self, partition: &Partition, range: &KeyRange) -> StoreResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value, created_at, updated_at FROM app_data_items
             WHERE app = ?1 AND wallet_id = ?2 AND model = ?3
               AND (?4 IS NULL OR key > ?4)
               AND (?5 IS NULL OR key < ?5)
             ORDER BY key ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    partition.app.as_str(),
                    partition.wallet.as_str(),
                    partition.model.as_str(),
                    range.start.as_ref().map(ItemKey::as_str),
                    range.end.as_ref().map(ItemKey::as_str)
                ],
                |row| {
                    Ok(RawRow {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(|raw| decode_row(partition, raw)).collect()
    }

    fn delete(&self, key: &DocumentKey) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM app_data_items
             WHERE app = ?1 AND wallet_id = ?2 AND model = ?3 AND key = ?4",
            params![
                key.app.as_str(),
                key.wallet.as_str(),
                key.model.as_str(),
                key.key.as_str()
            ],
        )?;
        Ok(removed > 0)
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}
