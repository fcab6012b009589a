// SQLite database setup and migrations
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

// Thread-safe database connection wrapper
pub struct DbConnection {
    conn: Arc<Mutex<Connection>>,
}

impl DbConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// A panic while holding the lock leaves SQLite itself consistent, so a
    /// poisoned mutex is still usable.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for DbConnection {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

/// Open (or create) the progress database at `db_path`
pub fn init_db(db_path: &Path) -> DbResult<DbConnection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    // Several pipelines and the sweeper share the file
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    run_migrations(&conn)?;

    log::info!("Progress database ready at {}", db_path.display());
    Ok(DbConnection::new(conn))
}

/// Private in-memory database, used by tests and one-shot tools
pub fn init_in_memory() -> DbResult<DbConnection> {
    let conn = Connection::open_in_memory()?;
    run_migrations(&conn)?;
    Ok(DbConnection::new(conn))
}

/// Fixed-width RFC 3339 so timestamps compare correctly as TEXT
pub fn to_sql_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_sql_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn run_migrations(conn: &Connection) -> DbResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

fn migration_v1(conn: &Connection) -> DbResult<()> {
    // One marker per job, overwritten in place
    conn.execute(
        "CREATE TABLE IF NOT EXISTS progress (
            job_id TEXT PRIMARY KEY,
            marker TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leases (
            job_id TEXT PRIMARY KEY,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leases_expires_at ON leases(expires_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            path TEXT NOT NULL UNIQUE,
            sha256 TEXT NOT NULL,
            bytes INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_artifacts_job_id ON artifacts(job_id)",
        [],
    )?;

    Ok(())
}
