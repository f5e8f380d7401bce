use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

use super::record::{JobConfiguration, JobId, JobRecord};

/// Errors returned by job stores.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} is already terminal and cannot be modified")]
    TerminalRecord(JobId),
    #[error("Could not create database folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("Stored JSON column is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Stored job row is invalid: {0}")]
    Corrupt(String),
}

/// Persistence for job records.
///
/// Implementations must give read-after-write consistency so that a status
/// poll right after `save` observes the write. A single worker owns a record
/// while it runs; stores do not lock records against concurrent writers.
pub trait JobRepository: Send + Sync {
    /// Store a new record in `waiting` and return it with its assigned id.
    fn insert(
        &self,
        configuration: JobConfiguration,
        created_at: i64,
    ) -> Result<JobRecord, RepositoryError>;

    fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError>;

    /// Overwrite the stored state of `record`. Terminal rows are never changed.
    fn save(&self, record: &JobRecord) -> Result<(), RepositoryError>;

    /// All records, oldest first.
    fn list(&self) -> Result<Vec<JobRecord>, RepositoryError>;
}

impl<R: JobRepository + ?Sized> JobRepository for std::sync::Arc<R> {
    fn insert(
        &self,
        configuration: JobConfiguration,
        created_at: i64,
    ) -> Result<JobRecord, RepositoryError> {
        (**self).insert(configuration, created_at)
    }

    fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError> {
        (**self).get(id)
    }

    fn save(&self, record: &JobRecord) -> Result<(), RepositoryError> {
        (**self).save(record)
    }

    fn list(&self) -> Result<Vec<JobRecord>, RepositoryError> {
        (**self).list()
    }
}

/// In-process store used by tests and embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: BTreeMap<JobId, JobRecord>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl JobRepository for MemoryJobRepository {
    fn insert(
        &self,
        configuration: JobConfiguration,
        created_at: i64,
    ) -> Result<JobRecord, RepositoryError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = JobId(state.next_id);
        let record = JobRecord::waiting(id, configuration, created_at);
        state.records.insert(id, record.clone());
        Ok(record)
    }

    fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError> {
        self.state()
            .records
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    fn save(&self, record: &JobRecord) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let stored = state
            .records
            .get_mut(&record.id())
            .ok_or(RepositoryError::NotFound(record.id()))?;
        if stored.status().is_terminal() {
            return Err(RepositoryError::TerminalRecord(record.id()));
        }
        *stored = record.clone();
        Ok(())
    }

    fn list(&self) -> Result<Vec<JobRecord>, RepositoryError> {
        Ok(self.state().records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::record::{JobOutcome, JobStatus};
    use crate::training::TrainingConfig;
    use std::time::Duration;

    fn config() -> JobConfiguration {
        JobConfiguration::Training(TrainingConfig {
            input_data_path: PathBuf::from("x.npy"),
            labels_path: PathBuf::from("y.npy"),
            backend: "nearest_centroid".to_string(),
            verbose: false,
            time_limit_secs: None,
        })
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let repo = MemoryJobRepository::new();
        let a = repo.insert(config(), 1).unwrap();
        let b = repo.insert(config(), 2).unwrap();
        assert!(b.id() > a.id());
        assert_eq!(repo.get(a.id()).unwrap().status(), JobStatus::Waiting);
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn save_is_visible_to_the_next_get() {
        let repo = MemoryJobRepository::new();
        let mut record = repo.insert(config(), 1).unwrap();
        record.start(2).unwrap();
        repo.save(&record).unwrap();
        assert_eq!(repo.get(record.id()).unwrap().status(), JobStatus::InProgress);
    }

    #[test]
    fn terminal_rows_are_frozen() {
        let repo = MemoryJobRepository::new();
        let mut record = repo.insert(config(), 1).unwrap();
        record.start(2).unwrap();
        record
            .succeed(
                JobOutcome::default().with_artifact("model", "m.dump"),
                2,
                Duration::from_secs(1),
                3,
            )
            .unwrap();
        repo.save(&record).unwrap();

        let stale = repo.get(record.id()).unwrap();
        let err = repo.save(&stale).unwrap_err();
        assert!(matches!(err, RepositoryError::TerminalRecord(id) if id == record.id()));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let repo = MemoryJobRepository::new();
        assert!(matches!(
            repo.get(JobId(99)),
            Err(RepositoryError::NotFound(JobId(99)))
        ));
    }
}
