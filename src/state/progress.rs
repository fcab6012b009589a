// Progress tracking and job leases
// Key/value markers per job id plus time-bounded ownership used by the sweeper

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::db::{from_sql_timestamp, to_sql_timestamp, DbConnection, DbResult};
use super::models::{Lease, ProgressRecord, COMPLETE_MARKER};

pub const NOT_STARTED_MESSAGE: &str = "Transformation not started";

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    InProgress { marker: String },
    Complete { job_id: String },
}

impl JobStatus {
    /// Text shown to the caller: a fixed message, the raw marker, or a link to the results
    pub fn render(&self) -> String {
        match self {
            JobStatus::NotStarted => NOT_STARTED_MESSAGE.to_string(),
            JobStatus::InProgress { marker } => marker.clone(),
            JobStatus::Complete { job_id } => format!(
                "<div><a href=\"/track/{}\"><button>Explore the results!</button></a></div>",
                job_id
            ),
        }
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    db: DbConnection,
}

impl ProgressTracker {
    pub fn new(db: DbConnection) -> Self {
        ProgressTracker { db }
    }

    pub fn db(&self) -> &DbConnection {
        &self.db
    }

    /// Overwrite the job's marker. Concurrent writers race; the last one wins.
    pub fn set(&self, job_id: &str, marker: &str) -> DbResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO progress (job_id, marker, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET marker = excluded.marker, updated_at = excluded.updated_at",
            params![job_id, marker, to_sql_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> DbResult<Option<String>> {
        Ok(self.record(job_id)?.map(|record| record.marker))
    }

    pub fn record(&self, job_id: &str) -> DbResult<Option<ProgressRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                "SELECT job_id, marker, updated_at FROM progress WHERE job_id = ?1",
                [job_id],
                |row| {
                    Ok(ProgressRecord {
                        job_id: row.get(0)?,
                        marker: row.get(1)?,
                        updated_at: from_sql_timestamp(2, &row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn status(&self, job_id: &str) -> DbResult<JobStatus> {
        let status = match self.get(job_id)? {
            None => JobStatus::NotStarted,
            Some(marker) if marker == COMPLETE_MARKER => JobStatus::Complete {
                job_id: job_id.to_string(),
            },
            Some(marker) => JobStatus::InProgress { marker },
        };
        Ok(status)
    }

    /// Take (or take over) the lease on a job for `ttl`
    pub fn acquire_lease(&self, job_id: &str, ttl: Duration) -> DbResult<Lease> {
        let now = Utc::now();
        let lease = Lease {
            job_id: job_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO leases (job_id, acquired_at, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET acquired_at = excluded.acquired_at, expires_at = excluded.expires_at",
            params![
                lease.job_id,
                to_sql_timestamp(&lease.acquired_at),
                to_sql_timestamp(&lease.expires_at),
            ],
        )?;

        Ok(lease)
    }

    /// Push an existing lease's expiry out to `now + ttl`. Returns false if no lease exists.
    pub fn renew_lease(&self, job_id: &str, ttl: Duration) -> DbResult<bool> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE leases SET expires_at = ?2 WHERE job_id = ?1",
            params![job_id, to_sql_timestamp(&(Utc::now() + ttl))],
        )?;
        Ok(updated > 0)
    }

    pub fn release_lease(&self, job_id: &str) -> DbResult<()> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM leases WHERE job_id = ?1", [job_id])?;
        Ok(())
    }

    pub fn lease(&self, job_id: &str) -> DbResult<Option<Lease>> {
        let conn = self.db.lock();
        let lease = conn
            .query_row(
                "SELECT job_id, acquired_at, expires_at FROM leases WHERE job_id = ?1",
                [job_id],
                row_to_lease,
            )
            .optional()?;
        Ok(lease)
    }

    pub fn active_leases(&self, now: DateTime<Utc>) -> DbResult<Vec<Lease>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, acquired_at, expires_at FROM leases
             WHERE expires_at > ?1 ORDER BY job_id",
        )?;
        let leases = stmt
            .query_map([to_sql_timestamp(&now)], row_to_lease)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leases)
    }

    pub fn purge_expired_leases(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.db.lock();
        let purged = conn.execute(
            "DELETE FROM leases WHERE expires_at <= ?1",
            [to_sql_timestamp(&now)],
        )?;
        Ok(purged)
    }

    /// A job that started, has not finished, and nobody holds a live lease on.
    /// The status contract never reports this; it is for operators.
    pub fn is_stale(&self, job_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let Some(marker) = self.get(job_id)? else {
            return Ok(false);
        };
        if marker == COMPLETE_MARKER {
            return Ok(false);
        }
        let leased = self
            .lease(job_id)?
            .map(|lease| lease.is_active(now))
            .unwrap_or(false);
        Ok(!leased)
    }
}

fn row_to_lease(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lease> {
    Ok(Lease {
        job_id: row.get(0)?,
        acquired_at: from_sql_timestamp(1, &row.get::<_, String>(1)?)?,
        expires_at: from_sql_timestamp(2, &row.get::<_, String>(2)?)?,
    })
}
