// Artifact ledger queries
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use super::db::{from_sql_timestamp, to_sql_timestamp, DbConnection, DbResult};
use super::models::{ArtifactKind, ArtifactRecord};
use super::storage::StoredFile;

const ARTIFACT_COLUMNS: &str = "id, job_id, kind, path, sha256, bytes, created_at";

/// Record a written artifact. Paths are unique, so re-running a stage
/// updates the existing row and keeps its id.
pub fn record_artifact(
    db: &DbConnection,
    job_id: &str,
    kind: ArtifactKind,
    file: &StoredFile,
) -> DbResult<ArtifactRecord> {
    let path = file.path.to_string_lossy().to_string();

    let conn = db.lock();
    conn.execute(
        "INSERT INTO artifacts (id, job_id, kind, path, sha256, bytes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(path) DO UPDATE SET
            job_id = excluded.job_id,
            kind = excluded.kind,
            sha256 = excluded.sha256,
            bytes = excluded.bytes,
            created_at = excluded.created_at",
        params![
            Uuid::new_v4().to_string(),
            job_id,
            kind.as_str(),
            path,
            file.sha256,
            file.bytes as i64,
            to_sql_timestamp(&Utc::now()),
        ],
    )?;

    let record = conn.query_row(
        &format!("SELECT {} FROM artifacts WHERE path = ?1", ARTIFACT_COLUMNS),
        [&path],
        row_to_artifact,
    )?;

    Ok(record)
}

/// All artifacts for a job, oldest first
pub fn list_artifacts(db: &DbConnection, job_id: &str) -> DbResult<Vec<ArtifactRecord>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM artifacts WHERE job_id = ?1 ORDER BY created_at, path",
        ARTIFACT_COLUMNS
    ))?;

    let artifacts = stmt
        .query_map([job_id], row_to_artifact)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(artifacts)
}

pub fn get_artifact_by_path(db: &DbConnection, path: &Path) -> DbResult<Option<ArtifactRecord>> {
    let conn = db.lock();
    let record = conn
        .query_row(
            &format!("SELECT {} FROM artifacts WHERE path = ?1", ARTIFACT_COLUMNS),
            [path.to_string_lossy().as_ref()],
            row_to_artifact,
        )
        .optional()?;
    Ok(record)
}

/// Drop the ledger row for a file the sweeper removed
pub fn forget_artifact(db: &DbConnection, path: &Path) -> DbResult<bool> {
    let conn = db.lock();
    let removed = conn.execute(
        "DELETE FROM artifacts WHERE path = ?1",
        [path.to_string_lossy().as_ref()],
    )?;
    Ok(removed > 0)
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let id: String = row.get(0)?;
    let kind: String = row.get(2)?;
    Ok(ArtifactRecord {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        job_id: row.get(1)?,
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        path: row.get(3)?,
        sha256: row.get(4)?,
        bytes: row.get(5)?,
        created_at: from_sql_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}
