//! SQLite-backed job table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{JobFilter, JobRecord, JobStatus, JobStore, JobStoreError, Stage};

const SELECT_COLUMNS: &str = "SELECT job_id, status, source_key, transcript_key, sentiment_key, \
     summary_key, transcription_handle, sentiment_handle, error_detail, failed_stage, attempt, \
     created_at, updated_at FROM jobs";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                source_key TEXT NOT NULL,
                transcript_key TEXT,
                sentiment_key TEXT,
                summary_key TEXT,
                transcription_handle TEXT,
                sentiment_handle TEXT,
                error_detail TEXT,
                failed_stage TEXT,
                attempt INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                lease_owner TEXT,
                lease_expires_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if filter.active_only {
            conditions.push("status NOT IN ('COMPLETED', 'FAILED')");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let status_str: String = row.get(1)?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(1, "status".to_string(), rusqlite::types::Type::Text)
        })?;
        let failed_stage: Option<String> = row.get(9)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        Ok(JobRecord {
            job_id: row.get(0)?,
            status,
            source_key: row.get(2)?,
            transcript_key: row.get(3)?,
            sentiment_key: row.get(4)?,
            summary_key: row.get(5)?,
            transcription_handle: row.get(6)?,
            sentiment_handle: row.get(7)?,
            error_detail: row.get(8)?,
            failed_stage: failed_stage.as_deref().and_then(Stage::parse),
            attempt: row.get(10)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn fetch(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let sql = format!("{} WHERE job_id = ?", SELECT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![job_id], Self::row_to_job)
            .optional()?)
    }

    /// Unconditional column write. Callers have already checked the guard
    /// while holding the connection lock.
    fn write(
        conn: &Connection,
        record: &JobRecord,
        expected_prior: JobStatus,
    ) -> Result<usize, JobStoreError> {
        Ok(conn.execute(
            "UPDATE jobs SET status = ?1, transcript_key = ?2, sentiment_key = ?3, \
             summary_key = ?4, transcription_handle = ?5, sentiment_handle = ?6, \
             error_detail = ?7, failed_stage = ?8, attempt = ?9, updated_at = ?10 \
             WHERE job_id = ?11 AND status = ?12",
            params![
                record.status.as_str(),
                record.transcript_key,
                record.sentiment_key,
                record.summary_key,
                record.transcription_handle,
                record.sentiment_handle,
                record.error_detail,
                record.failed_stage.map(|s| s.as_str()),
                record.attempt,
                format_timestamp(&record.updated_at),
                record.job_id,
                expected_prior.as_str(),
            ],
        )?)
    }
}

impl JobStore for SqliteJobStore {
    fn create_if_absent(
        &self,
        job_id: &str,
        source_key: &str,
    ) -> Result<(JobRecord, bool), JobStoreError> {
        let conn = self.lock()?;

        let mut record = JobRecord::new(job_id, source_key);
        let now = truncate_micros(Utc::now());
        record.created_at = now;
        record.updated_at = now;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO jobs (job_id, status, source_key, attempt, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.job_id,
                record.status.as_str(),
                record.source_key,
                record.attempt,
                format_timestamp(&now),
                format_timestamp(&now),
            ],
        )?;

        if inserted == 1 {
            return Ok((record, true));
        }

        let existing =
            Self::fetch(&conn, job_id)?.ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        Ok((existing, false))
    }

    fn get(&self, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, job_id)
    }

    fn put(
        &self,
        record: &JobRecord,
        expected_prior: JobStatus,
    ) -> Result<JobRecord, JobStoreError> {
        let conn = self.lock()?;

        let current = Self::fetch(&conn, &record.job_id)?
            .ok_or_else(|| JobStoreError::NotFound(record.job_id.clone()))?;

        if current.status != expected_prior {
            return Err(JobStoreError::ConflictingStatus {
                job_id: record.job_id.clone(),
                expected: expected_prior,
                actual: current.status,
            });
        }

        if !current.status.can_transition_to(record.status) {
            return Err(JobStoreError::InvalidTransition {
                job_id: record.job_id.clone(),
                from: current.status,
                to: record.status,
            });
        }

        let mut written = record.clone();
        written.created_at = current.created_at;
        written.updated_at = next_timestamp(current.updated_at);

        if Self::write(&conn, &written, expected_prior)? == 0 {
            return Err(JobStoreError::ConflictingStatus {
                job_id: record.job_id.clone(),
                expected: expected_prior,
                actual: current.status,
            });
        }

        Ok(written)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "{} {} ORDER BY created_at ASC, job_id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result?);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn try_acquire_lease(
        &self,
        job_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, JobStoreError> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        let expires = now + ttl.as_millis() as i64;

        let changed = conn.execute(
            "UPDATE jobs SET lease_owner = ?1, lease_expires_at = ?2 \
             WHERE job_id = ?3 AND (lease_owner IS NULL OR lease_owner = ?1 OR lease_expires_at < ?4)",
            params![owner, expires, job_id, now],
        )?;

        if changed == 1 {
            return Ok(true);
        }

        match Self::fetch(&conn, job_id)? {
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(job_id.to_string())),
        }
    }

    fn renew_lease(
        &self,
        job_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, JobStoreError> {
        let conn = self.lock()?;
        let expires = Utc::now().timestamp_millis() + ttl.as_millis() as i64;

        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ? WHERE job_id = ? AND lease_owner = ?",
            params![expires, job_id, owner],
        )?;
        Ok(changed == 1)
    }

    fn release_lease(&self, job_id: &str, owner: &str) -> Result<(), JobStoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET lease_owner = NULL, lease_expires_at = NULL \
             WHERE job_id = ? AND lease_owner = ?",
            params![job_id, owner],
        )?;
        Ok(())
    }

    fn reopen(&self, job_id: &str) -> Result<JobRecord, JobStoreError> {
        let conn = self.lock()?;

        let current =
            Self::fetch(&conn, job_id)?.ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

        if current.status != JobStatus::Failed {
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current.status,
                to: JobStatus::Pending,
            });
        }

        let stage = current.failed_stage.unwrap_or(Stage::Transcription);

        let mut reopened = current.clone();
        reopened.status = stage.status();
        reopened.error_detail = None;
        reopened.failed_stage = None;
        reopened.set_handle(stage, None);
        reopened.attempt = current.attempt + 1;
        reopened.updated_at = next_timestamp(current.updated_at);

        // Results of the failed stage and later ones must not survive.
        let mut later = false;
        for s in Stage::ALL {
            later |= s == stage;
            if later {
                match s {
                    Stage::Transcription => reopened.transcript_key = None,
                    Stage::Sentiment => reopened.sentiment_key = None,
                    Stage::Summary => reopened.summary_key = None,
                }
                reopened.set_handle(s, None);
            }
        }

        if Self::write(&conn, &reopened, JobStatus::Failed)? == 0 {
            return Err(JobStoreError::ConflictingStatus {
                job_id: job_id.to_string(),
                expected: JobStatus::Failed,
                actual: current.status,
            });
        }

        Ok(reopened)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Timestamp for a write following one stamped `previous`: wall-clock now,
/// but always at least one microsecond later.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let micros = now.max(previous.timestamp_micros() + 1);
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}
