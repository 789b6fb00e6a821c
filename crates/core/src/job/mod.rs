//! Job table: the durable status record of every pipeline run.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobFilter, JobStore, JobStoreError};
pub use types::{JobRecord, JobStatus, MinutesKeys, Stage};
