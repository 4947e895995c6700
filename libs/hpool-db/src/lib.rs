pub mod migrations;
pub mod pool;
pub mod queries;

use hpool_core::{CoreError, ObjectType};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const POOL_DB: &str = "pool.db";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("{0} {1} not found")]
    NotFound(ObjectType, Uuid),

    #[error("pool doesn't support {0}")]
    Unsupported(ObjectType),

    #[error("pool {0} is not available")]
    PoolUnavailable(Uuid),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub(crate) conn: Connection,
    created_schema: bool,
}

impl Database {
    /// Opens (creating if needed) an index for writing. An index whose
    /// `user_version` differs from the required one is rebuilt empty.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;

        let mut db = Self { conn, created_schema: false };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Opens an index that must already carry the required schema.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn, created_schema: false };
        let version = db.get_schema_version()?;
        if version != migrations::REQUIRED_SCHEMA_VERSION {
            return Err(DbError::SchemaMismatch {
                expected: migrations::REQUIRED_SCHEMA_VERSION,
                found: version,
            });
        }
        Ok(db)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        let version = self.get_schema_version()?;

        if version != migrations::REQUIRED_SCHEMA_VERSION {
            info!(
                "Creating schema version {} (found {})",
                migrations::REQUIRED_SCHEMA_VERSION, version
            );
            self.conn.execute_batch(migrations::SCHEMA)?;
            self.conn.execute(
                "INSERT INTO installation_uuid (uuid) VALUES (?)",
                params![Uuid::new_v4().to_string()],
            )?;
            self.conn
                .pragma_update(None, "user_version", migrations::REQUIRED_SCHEMA_VERSION)?;
            self.created_schema = true;
        }

        Ok(())
    }

    pub fn get_schema_version(&self) -> Result<u32> {
        let version: u32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Whether opening this database (re)created the schema.
    pub fn created_schema(&self) -> bool {
        self.created_schema
    }

    pub fn installation_uuid(&self) -> Result<Option<Uuid>> {
        let uuid: Option<String> = self
            .conn
            .query_row("SELECT uuid FROM installation_uuid LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(uuid.and_then(|u| Uuid::parse_str(&u).ok()))
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
