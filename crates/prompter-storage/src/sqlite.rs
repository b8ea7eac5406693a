//! SQLite storage backend.
//!
//! Two tables: `main` holds one header row per context, `turns` holds one
//! row per (context, turn_key) with a nullable blob column per history
//! field. A NULL column means "no value at this turn for this field".
//!
//! File-based and single-writer, so `is_concurrent` is false; the pipeline
//! serialises access accordingly.

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::contract::{ContextStorage, FieldName, MainInfo};
use crate::error::Result;
use crate::subscript::{Subscript, SubscriptConfig};

/// Initialise the context tables and index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS main (
            id              TEXT PRIMARY KEY,
            current_turn_id INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            misc            BLOB NOT NULL,
            framework_data  BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS turns (
            id        TEXT NOT NULL,
            turn_key  INTEGER NOT NULL,
            labels    BLOB,
            requests  BLOB,
            responses BLOB,
            PRIMARY KEY (id, turn_key)
        );
        CREATE INDEX IF NOT EXISTS idx_turns_id
            ON turns(id, turn_key DESC);",
    )?;
    Ok(())
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    subscripts: SubscriptConfig,
    rewrite_existing: bool,
}

impl SqliteStorage {
    /// Open (or create) a database file and initialise the schema.
    pub fn open(path: &str, subscripts: SubscriptConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, subscripts)
    }

    /// An in-memory database, mainly for tests.
    pub fn in_memory(subscripts: SubscriptConfig) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, subscripts)
    }

    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn with_connection(conn: Connection, subscripts: SubscriptConfig) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscripts,
            rewrite_existing: false,
        })
    }

    pub fn with_rewrite_existing(mut self, rewrite_existing: bool) -> Self {
        self.rewrite_existing = rewrite_existing;
        self
    }
}

#[async_trait]
impl ContextStorage for SqliteStorage {
    fn is_concurrent(&self) -> bool {
        false
    }

    fn rewrite_existing(&self) -> bool {
        self.rewrite_existing
    }

    fn subscript(&self, field: FieldName) -> &Subscript {
        self.subscripts.get(field)
    }

    #[instrument(skip(self), fields(ctx_id))]
    async fn load_main_info(&self, ctx_id: &str) -> Result<Option<MainInfo>> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                "SELECT current_turn_id, created_at, updated_at, misc, framework_data
                 FROM main WHERE id = ?1",
                rusqlite::params![ctx_id],
                |row| {
                    Ok(MainInfo {
                        current_turn_id: row.get(0)?,
                        created_at: row.get(1)?,
                        updated_at: row.get(2)?,
                        misc: row.get(3)?,
                        framework_data: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    #[instrument(skip(self, info), fields(ctx_id, turn_id = info.current_turn_id))]
    async fn update_main_info(&self, ctx_id: &str, info: &MainInfo) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO main (id, current_turn_id, created_at, updated_at, misc, framework_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                current_turn_id = excluded.current_turn_id,
                updated_at      = excluded.updated_at,
                misc            = excluded.misc,
                framework_data  = excluded.framework_data",
            rusqlite::params![
                ctx_id,
                info.current_turn_id,
                info.created_at,
                info.updated_at,
                info.misc,
                info.framework_data
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(ctx_id))]
    async fn delete_context(&self, ctx_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM main WHERE id = ?1", rusqlite::params![ctx_id])?;
        conn.execute("DELETE FROM turns WHERE id = ?1", rusqlite::params![ctx_id])?;
        debug!(ctx_id, "context deleted");
        Ok(())
    }

    async fn load_field_latest(
        &self,
        ctx_id: &str,
        field: FieldName,
    ) -> Result<Vec<(i64, Vec<u8>)>> {
        let column = field.as_str();
        let conn = self.conn.lock().unwrap();
        match self.subscript(field) {
            Subscript::Last(n) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT turn_key, {column} FROM turns
                     WHERE id = ?1 AND {column} IS NOT NULL
                     ORDER BY turn_key DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(rusqlite::params![ctx_id, *n as i64], row_to_item)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
            Subscript::Keys(keys) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT turn_key, {column} FROM turns
                     WHERE id = ?1 AND {column} IS NOT NULL
                     ORDER BY turn_key DESC"
                ))?;
                let rows = stmt.query_map(rusqlite::params![ctx_id], row_to_item)?;
                let items = rows
                    .collect::<rusqlite::Result<Vec<_>>>()?
                    .into_iter()
                    .filter(|(key, _)| keys.contains(key))
                    .collect();
                Ok(items)
            }
            Subscript::All => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT turn_key, {column} FROM turns
                     WHERE id = ?1 AND {column} IS NOT NULL
                     ORDER BY turn_key DESC"
                ))?;
                let rows = stmt.query_map(rusqlite::params![ctx_id], row_to_item)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
        }
    }

    async fn load_field_keys(&self, ctx_id: &str, field: FieldName) -> Result<Vec<i64>> {
        let column = field.as_str();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT turn_key FROM turns
             WHERE id = ?1 AND {column} IS NOT NULL
             ORDER BY turn_key"
        ))?;
        let rows = stmt.query_map(rusqlite::params![ctx_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn load_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        keys: &[i64],
    ) -> Result<Vec<(i64, Vec<u8>)>> {
        let column = field.as_str();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT turn_key, {column} FROM turns
             WHERE id = ?1 AND turn_key = ?2 AND {column} IS NOT NULL"
        ))?;
        let mut items = Vec::with_capacity(keys.len());
        for &key in keys {
            if let Some(item) = stmt
                .query_row(rusqlite::params![ctx_id, key], row_to_item)
                .optional()?
            {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn update_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        items: &[(i64, Option<Vec<u8>>)],
    ) -> Result<()> {
        let column = field.as_str();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare(&format!(
                "INSERT INTO turns (id, turn_key, {column}) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id, turn_key) DO UPDATE SET {column} = excluded.{column}"
            ))?;
            for (key, bytes) in items {
                upsert.execute(rusqlite::params![ctx_id, key, bytes])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DELETE FROM main; DELETE FROM turns;")?;
        Ok(())
    }
}

/// Map a turns row to a `(turn_key, bytes)` item.
fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Vec<u8>)> {
    Ok((row.get(0)?, row.get(1)?))
}
