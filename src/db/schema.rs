//! Durable store schema

use rusqlite::Connection;
use tracing::info;

use crate::types::{Result, SyncError};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Apply every step after `from_version`, recording each one
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        match version {
            1 => {
                conn.execute_batch(PROFILES_SCHEMA)?;
                conn.execute_batch(SYNC_SCHEMA)?;
            }
            _ => {
                return Err(SyncError::Internal(format!(
                    "No migration step for schema v{}",
                    version
                )))
            }
        }
        set_schema_version(conn, version)?;
    }
    Ok(())
}

/// Current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Current profile per pointer plus the failed-fetch ledger
const PROFILES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    pointer TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    content TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT 'null',
    local_timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_timestamp ON profiles(timestamp);
CREATE INDEX IF NOT EXISTS idx_profiles_entity_id ON profiles(entity_id);

CREATE TABLE IF NOT EXISTS failed_profile_fetches (
    entity_id TEXT PRIMARY KEY,
    pointer TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    auth_chain TEXT,
    first_failed_at INTEGER NOT NULL,
    last_retry_at INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_failed_fetches_retry ON failed_profile_fetches(retry_count, first_failed_at);
"#;

/// Synchronizer bookkeeping
const SYNC_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_snapshots (
    hash TEXT PRIMARY KEY,
    processed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
