use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;

use crate::prelude::FutureResult;

use super::error::SqlStoreError;
use super::traits::SnapshotStore;
use super::{BookSnapshot, NewEntry, PersistedAddress, TriedEntry};

// Labels for the schema table
const SCHEMA_TABLE_NAME: &str = "book_schema_versions";
const SCHEMA_COLUMN: &str = "schema_key";
const VERSION_COLUMN: &str = "version";
const SCHEMA_KEY: &str = "current_version";
// Update this in the case of schema changes
const SCHEMA_VERSION: u8 = 0;
// Always execute this query and adjust the schema with migrations
const INITIAL_SLOTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS slots (
    tried INTEGER NOT NULL,
    bucket INTEGER NOT NULL,
    slot INTEGER NOT NULL,
    addr BLOB NOT NULL,
    port INTEGER NOT NULL,
    services INTEGER NOT NULL,
    source BLOB NOT NULL,
    last_seen INTEGER NOT NULL,
    last_success INTEGER NOT NULL,
    last_attempt INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    PRIMARY KEY (tried, bucket, slot)
)";
const INITIAL_META_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS book_meta (
    meta_key TEXT PRIMARY KEY,
    meta_value INTEGER NOT NULL
)";

/// A snapshot store backed by a SQLite database, one row per occupied slot.
///
/// New-table records referenced from several slots appear once per slot with
/// their metadata repeated; load groups them back together.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new snapshot storage with an optional directory path. If no
    /// path is provided, the file will be stored in a `data` subdirectory
    /// where the program is ran.
    pub fn new(path: Option<PathBuf>) -> Result<Self, SqlStoreError> {
        let mut path = path.unwrap_or_else(|| PathBuf::from("."));
        path.push("data");
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        let conn = Connection::open(path.join("peerbook.db"))?;
        // Create the schema version
        let schema_table_query = format!("CREATE TABLE IF NOT EXISTS {SCHEMA_TABLE_NAME} ({SCHEMA_COLUMN} TEXT PRIMARY KEY, {VERSION_COLUMN} INTEGER NOT NULL)");
        conn.execute(&schema_table_query, [])?;
        let schema_init_version = format!(
            "INSERT OR REPLACE INTO {SCHEMA_TABLE_NAME} ({SCHEMA_COLUMN}, {VERSION_COLUMN}) VALUES (?1, ?2)");
        conn.execute(&schema_init_version, params![SCHEMA_KEY, SCHEMA_VERSION])?;
        // Build the tables if they don't exist
        conn.execute(INITIAL_SLOTS_SCHEMA, [])?;
        conn.execute(INITIAL_META_SCHEMA, [])?;
        // Migrate to any new schema versions
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // This function currently does nothing, but if new columns are required
    // this may be used to alter the tables without breaking older ones.
    fn migrate(conn: &Connection) -> Result<(), SqlStoreError> {
        let version_query =
            format!("SELECT {VERSION_COLUMN} FROM {SCHEMA_TABLE_NAME} WHERE {SCHEMA_COLUMN} = ?1");
        let _current_version: u8 = conn.query_row(&version_query, [SCHEMA_KEY], |row| row.get(0))?;
        // Match on the version and migrate to new schemas in the future
        Ok(())
    }

    async fn load(&mut self) -> Result<Option<BookSnapshot>, SqlStoreError> {
        let lock = self.conn.lock().await;
        let version: Option<u64> = lock
            .query_row(
                "SELECT meta_value FROM book_meta WHERE meta_key = 'snapshot_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(version) = version else {
            return Ok(None);
        };
        let meta = |key: &str| -> Result<u64, rusqlite::Error> {
            lock.query_row(
                "SELECT meta_value FROM book_meta WHERE meta_key = ?1",
                [key],
                |row| row.get(0),
            )
        };
        let mut snapshot = BookSnapshot {
            version: version as u8,
            new_bucket_count: meta("new_bucket_count")? as u32,
            tried_bucket_count: meta("tried_bucket_count")? as u32,
            bucket_size: meta("bucket_size")? as u32,
            tried: Vec::new(),
            new: Vec::new(),
        };

        let mut stmt = lock.prepare("SELECT tried, bucket, slot, addr, port, services, source, last_seen, last_success, last_attempt, attempts FROM slots")?;
        let mut rows = stmt.query([])?;
        let mut new_entries: HashMap<(Vec<u8>, u16), NewEntry> = HashMap::new();
        let mut corrupt = 0usize;
        while let Some(row) = rows.next()? {
            let tried: bool = row.get(0)?;
            let bucket: u32 = row.get(1)?;
            let slot: u32 = row.get(2)?;
            let addr_blob: Vec<u8> = row.get(3)?;
            let port: u16 = row.get(4)?;
            let services: u64 = row.get(5)?;
            let source_blob: Vec<u8> = row.get(6)?;
            // a blob that fails to parse loses its row, not the whole load
            let (Ok(addr), Ok(source)) = (
                deserialize::<AddrV2>(&addr_blob),
                deserialize::<AddrV2>(&source_blob),
            ) else {
                corrupt += 1;
                continue;
            };
            let record = PersistedAddress {
                addr,
                port,
                services: ServiceFlags::from(services),
                source,
                last_seen: row.get(7)?,
                last_success: row.get(8)?,
                last_attempt: row.get(9)?,
                attempts: row.get(10)?,
            };
            if tried {
                snapshot.tried.push(TriedEntry {
                    record,
                    bucket,
                    slot,
                });
            } else {
                new_entries
                    .entry((addr_blob, port))
                    .or_insert_with(|| NewEntry {
                        record,
                        positions: Vec::new(),
                    })
                    .positions
                    .push((bucket, slot));
            }
        }
        if corrupt > 0 {
            warn!("dropped {corrupt} undecodable rows from the peer database");
        }
        snapshot.new = new_entries.into_values().collect();
        Ok(Some(snapshot))
    }

    async fn save(&mut self, snapshot: BookSnapshot) -> Result<(), SqlStoreError> {
        let mut lock = self.conn.lock().await;
        let tx = lock.transaction()?;
        tx.execute("DELETE FROM slots", [])?;
        tx.execute("DELETE FROM book_meta", [])?;

        let meta = [
            ("snapshot_version", snapshot.version as u64),
            ("new_bucket_count", snapshot.new_bucket_count as u64),
            ("tried_bucket_count", snapshot.tried_bucket_count as u64),
            ("bucket_size", snapshot.bucket_size as u64),
        ];
        for (key, value) in meta {
            tx.execute(
                "INSERT INTO book_meta (meta_key, meta_value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }

        let insert = "INSERT OR REPLACE INTO slots (tried, bucket, slot, addr, port, services, source, last_seen, last_success, last_attempt, attempts) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";
        for entry in &snapshot.tried {
            let record = &entry.record;
            tx.execute(
                insert,
                params![
                    true,
                    entry.bucket,
                    entry.slot,
                    serialize(&record.addr),
                    record.port,
                    record.services.to_u64(),
                    serialize(&record.source),
                    record.last_seen,
                    record.last_success,
                    record.last_attempt,
                    record.attempts,
                ],
            )?;
        }
        for entry in &snapshot.new {
            let record = &entry.record;
            for (bucket, slot) in &entry.positions {
                tx.execute(
                    insert,
                    params![
                        false,
                        bucket,
                        slot,
                        serialize(&record.addr),
                        record.port,
                        record.services.to_u64(),
                        serialize(&record.source),
                        record.last_seen,
                        record.last_success,
                        record.last_attempt,
                        record.attempts,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl SnapshotStore for SqliteStore {
    type Error = SqlStoreError;

    fn load(&mut self) -> FutureResult<Option<BookSnapshot>, Self::Error> {
        Box::pin(self.load())
    }

    fn save(&mut self, snapshot: BookSnapshot) -> FutureResult<(), Self::Error> {
        Box::pin(self.save(snapshot))
    }
}
