use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        job_id TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_job_id ON audit_events(job_id);
    CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
"#;

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Create a new SQLite audit store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref job_id) = filter.job_id {
            conditions.push("job_id = ?");
            params.push(Box::new(job_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(format_timestamp(from)));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(format_timestamp(to)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

// Fixed-width UTC timestamps so string comparison matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, job_id, data) VALUES (?, ?, ?, ?)",
            params![
                format_timestamp(&record.timestamp),
                record.event_type,
                record.job_id,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let order = if filter.oldest_first { "ASC" } else { "DESC" };

        let sql = format!(
            "SELECT id, timestamp, event_type, job_id, data FROM audit_events {} ORDER BY id {} LIMIT ? OFFSET ?",
            where_clause, order
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_type: String = row.get(2)?;
            let job_id: Option<String> = row.get(3)?;
            let data_json: String = row.get(4)?;

            Ok((id, timestamp_str, event_type, job_id, data_json))
        })?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, event_type, job_id, data_json) = row_result?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            let data: AuditEvent = serde_json::from_str(&data_json)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;

            records.push(AuditRecord {
                id,
                timestamp,
                event_type,
                job_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: AuditEvent) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            job_id: event.job_id().map(String::from),
            data: event,
        }
    }

    fn status_changed(job_id: &str, from: &str, to: &str) -> AuditEvent {
        AuditEvent::JobStatusChanged {
            job_id: job_id.to_string(),
            from_status: from.to_string(),
            to_status: to.to_string(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteAuditStore::in_memory().unwrap();

        let id = store
            .insert(&record(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc".to_string(),
            }))
            .unwrap();
        assert!(id > 0);

        let records = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "service_started");
        assert!(records[0].job_id.is_none());
    }

    #[test]
    fn test_job_history_in_order() {
        let store = SqliteAuditStore::in_memory().unwrap();
        store
            .insert(&record(status_changed("job-1", "PENDING", "TRANSCRIBING")))
            .unwrap();
        store
            .insert(&record(status_changed("job-2", "PENDING", "TRANSCRIBING")))
            .unwrap();
        store
            .insert(&record(status_changed("job-1", "TRANSCRIBING", "ANALYZING_SENTIMENT")))
            .unwrap();

        let history = store
            .query(&AuditFilter::new().with_job_id("job-1").oldest_first())
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(matches!(
            &history[0].data,
            AuditEvent::JobStatusChanged { to_status, .. } if to_status == "TRANSCRIBING"
        ));

        let newest = store
            .query(&AuditFilter::new().with_job_id("job-1"))
            .unwrap();
        assert_eq!(newest[0].id, history[1].id);
    }

    #[test]
    fn test_filter_by_event_type_and_count() {
        let store = SqliteAuditStore::in_memory().unwrap();
        store
            .insert(&record(status_changed("job-1", "PENDING", "TRANSCRIBING")))
            .unwrap();
        store
            .insert(&record(AuditEvent::JobCreated {
                job_id: "job-1".to_string(),
                source_key: "meetings/a.wav".to_string(),
            }))
            .unwrap();

        let filter = AuditFilter::new().with_event_type("job_created");
        assert_eq!(store.count(&filter).unwrap(), 1);
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_time_range_filter() {
        let store = SqliteAuditStore::in_memory().unwrap();
        store
            .insert(&record(status_changed("job-1", "PENDING", "TRANSCRIBING")))
            .unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let filter = AuditFilter::new().with_time_range(Some(future), None);
        assert_eq!(store.count(&filter).unwrap(), 0);
    }

    #[test]
    fn test_file_based_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let store = SqliteAuditStore::new(&path).unwrap();
        store
            .insert(&record(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            }))
            .unwrap();
        assert!(path.exists());
    }
}
