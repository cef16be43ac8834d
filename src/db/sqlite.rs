//! SQLite implementation of the durable store

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{schema, ProfileStore, SyncStateStore};
use crate::types::{
    normalize_pointer, now_millis, AuthLink, ContentFile, FailedProfileFetch, ProfileEntity,
    Result, SyncError, SyncState,
};

const SYNC_STATE_KEY: &str = "profile_sync_state";

const UPSERT_IF_NEWER: &str = "
    INSERT INTO profiles (pointer, entity_id, timestamp, content, metadata, local_timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(pointer) DO UPDATE SET
        entity_id = excluded.entity_id,
        timestamp = excluded.timestamp,
        content = excluded.content,
        metadata = excluded.metadata,
        local_timestamp = excluded.local_timestamp
    WHERE excluded.timestamp > profiles.timestamp";

const UPSERT_CORRECTION: &str = "
    INSERT INTO profiles (pointer, entity_id, timestamp, content, metadata, local_timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(pointer) DO UPDATE SET
        entity_id = excluded.entity_id,
        timestamp = excluded.timestamp,
        content = excluded.content,
        metadata = excluded.metadata,
        local_timestamp = excluded.local_timestamp
    WHERE excluded.timestamp >= profiles.timestamp";

/// SQLite-backed profile store, ledger and sync-state store
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    /// Open or create the database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = %path.as_ref().display(), "Opening SQLite database");

        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL lets readers proceed while the write queue is busy
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.with_conn(schema::init_schema)?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.with_conn(schema::init_schema)?;
        Ok(store)
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SyncError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    fn upsert(&self, sql: &str, entity: &ProfileEntity) -> Result<bool> {
        let pointer = entity
            .pointer()
            .ok_or_else(|| SyncError::Internal(format!("entity {} has no pointer", entity.id)))?;
        let content = serde_json::to_string(&entity.content)?;
        let metadata = serde_json::to_string(&entity.metadata)?;

        self.with_conn(|conn| {
            let changed = conn.execute(
                sql,
                params![
                    pointer,
                    entity.id,
                    entity.timestamp,
                    content,
                    metadata,
                    now_millis()
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Number of stored profiles
    pub fn profile_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, i64, String, String)> {
    Ok((
        row.get("pointer")?,
        row.get("entity_id")?,
        row.get("timestamp")?,
        row.get("content")?,
        row.get("metadata")?,
    ))
}

fn failed_fetch_from_row(row: &Row<'_>) -> rusqlite::Result<(FailedProfileFetch, Option<String>)> {
    let retry_count: i64 = row.get("retry_count")?;
    Ok((
        FailedProfileFetch {
            entity_id: row.get("entity_id")?,
            pointer: row.get("pointer")?,
            timestamp: row.get("timestamp")?,
            auth_chain: None,
            first_failed_at: row.get("first_failed_at")?,
            last_retry_at: row.get("last_retry_at")?,
            retry_count: retry_count.max(0) as u32,
            error_message: row.get("error_message")?,
        },
        row.get("auth_chain")?,
    ))
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn upsert_profile_if_newer(&self, entity: &ProfileEntity) -> Result<bool> {
        self.upsert(UPSERT_IF_NEWER, entity)
    }

    async fn upsert_profile_correction(&self, entity: &ProfileEntity) -> Result<bool> {
        self.upsert(UPSERT_CORRECTION, entity)
    }

    async fn get_profiles_by_pointers(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>> {
        if pointers.is_empty() {
            return Ok(Vec::new());
        }
        let normalized: Vec<String> = pointers.iter().map(|p| normalize_pointer(p)).collect();
        let placeholders = vec!["?"; normalized.len()].join(", ");
        let sql = format!(
            "SELECT pointer, entity_id, timestamp, content, metadata FROM profiles WHERE pointer IN ({})",
            placeholders
        );

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(normalized.iter()), profile_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(pointer, id, timestamp, content, metadata)| {
                Ok(ProfileEntity {
                    id,
                    pointers: vec![pointer],
                    timestamp,
                    content: serde_json::from_str::<Vec<ContentFile>>(&content)?,
                    metadata: serde_json::from_str(&metadata)?,
                })
            })
            .collect()
    }

    async fn get_latest_profile_timestamp(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let latest: Option<i64> =
                conn.query_row("SELECT MAX(timestamp) FROM profiles", [], |row| row.get(0))?;
            Ok(latest)
        })
    }

    async fn insert_failed_profile_fetch(&self, fetch: &FailedProfileFetch) -> Result<()> {
        let auth_chain = fetch
            .auth_chain
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO failed_profile_fetches
                    (entity_id, pointer, timestamp, auth_chain, first_failed_at, last_retry_at, retry_count, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(entity_id) DO UPDATE SET error_message = excluded.error_message",
                params![
                    fetch.entity_id,
                    normalize_pointer(&fetch.pointer),
                    fetch.timestamp,
                    auth_chain,
                    fetch.first_failed_at,
                    fetch.last_retry_at,
                    fetch.retry_count,
                    fetch.error_message,
                ],
            )?;
            Ok(())
        })
    }

    async fn get_failed_profile_fetches(
        &self,
        limit: usize,
        max_retry_count: u32,
    ) -> Result<Vec<FailedProfileFetch>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_id, pointer, timestamp, auth_chain, first_failed_at, last_retry_at, retry_count, error_message
                 FROM failed_profile_fetches
                 WHERE retry_count < ?1
                 ORDER BY first_failed_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![max_retry_count, limit as i64], failed_fetch_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(mut fetch, auth_chain)| {
                fetch.auth_chain = auth_chain
                    .map(|json| serde_json::from_str::<Vec<AuthLink>>(&json))
                    .transpose()?;
                Ok(fetch)
            })
            .collect()
    }

    async fn delete_failed_profile_fetch(&self, entity_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM failed_profile_fetches WHERE entity_id = ?1",
                [entity_id],
            )?;
            Ok(())
        })
    }

    async fn has_failed_profile_fetch(&self, entity_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM failed_profile_fetches WHERE entity_id = ?1",
                    [entity_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    async fn update_failed_profile_fetch_retry(
        &self,
        entity_id: &str,
        error_message: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE failed_profile_fetches
                 SET retry_count = retry_count + 1, last_retry_at = ?2, error_message = ?3
                 WHERE entity_id = ?1",
                params![entity_id, now_millis(), error_message],
            )?;
            Ok(())
        })
    }

    async fn mark_snapshot_processed(&self, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO processed_snapshots (hash, processed_at) VALUES (?1, ?2)",
                params![hash, now_millis()],
            )?;
            Ok(())
        })
    }

    async fn is_snapshot_processed(&self, hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM processed_snapshots WHERE hash = ?1",
                    [hash],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

#[async_trait]
impl SyncStateStore for SqliteProfileStore {
    async fn load(&self) -> Result<Option<SyncState>> {
        let value: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM sync_state WHERE key = ?1",
                    [SYNC_STATE_KEY],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        value
            .map(|json| serde_json::from_str::<SyncState>(&json).map_err(SyncError::from))
            .transpose()
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![SYNC_STATE_KEY, json, now_millis()],
            )?;
            Ok(())
        })
    }
}
