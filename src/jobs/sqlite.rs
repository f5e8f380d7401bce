use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::record::{JobConfiguration, JobId, JobRecord, JobStatus, StoredJob};
use super::repository::{JobRepository, RepositoryError};

const SELECT_COLUMNS: &str = "id, configuration, status, started_at, training_time_secs,
     artifacts, metrics, additional_remarks, created_at, updated_at";

/// Job store backed by a single SQLite file.
pub struct SqliteJobRepository {
    connection: Mutex<Connection>,
}

impl SqliteJobRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RepositoryError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let connection = Connection::open(path)?;
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Self::with_connection(connection)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, RepositoryError> {
        apply_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn apply_schema(connection: &Connection) -> Result<(), RepositoryError> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            configuration TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER,
            training_time_secs REAL,
            artifacts TEXT NOT NULL DEFAULT '[]',
            metrics TEXT NOT NULL DEFAULT '{}',
            additional_remarks TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_jobs_status_updated
            ON jobs (status, updated_at);",
    )?;
    Ok(())
}

impl JobRepository for SqliteJobRepository {
    fn insert(
        &self,
        configuration: JobConfiguration,
        created_at: i64,
    ) -> Result<JobRecord, RepositoryError> {
        let conn = self.conn();
        let encoded = serde_json::to_string(&configuration)?;
        conn.execute(
            "INSERT INTO jobs (kind, configuration, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                configuration.kind().as_str(),
                encoded,
                JobStatus::Waiting.as_str(),
                created_at
            ],
        )?;
        let id = JobId(conn.last_insert_rowid());
        Ok(JobRecord::waiting(id, configuration, created_at))
    }

    fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1");
        let stored = conn
            .query_row(&sql, params![id.0], read_row)
            .optional()?
            .ok_or(RepositoryError::NotFound(id))?;
        decode(stored)
    }

    fn save(&self, record: &JobRecord) -> Result<(), RepositoryError> {
        let conn = self.conn();
        let artifacts = serde_json::to_string(record.artifacts())?;
        let metrics = serde_json::to_string(record.metrics())?;
        let changed = conn.execute(
            "UPDATE jobs
             SET status = ?2,
                 started_at = ?3,
                 training_time_secs = ?4,
                 artifacts = ?5,
                 metrics = ?6,
                 additional_remarks = ?7,
                 updated_at = ?8
             WHERE id = ?1 AND status NOT IN ('success', 'fail')",
            params![
                record.id().0,
                record.status().as_str(),
                record.started_at(),
                record.training_time().map(|elapsed| elapsed.as_secs_f64()),
                artifacts,
                metrics,
                record.additional_remarks(),
                record.updated_at()
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM jobs WHERE id = ?1",
                params![record.id().0],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(RepositoryError::TerminalRecord(record.id())),
            None => Err(RepositoryError::NotFound(record.id())),
        }
    }

    fn list(&self) -> Result<Vec<JobRecord>, RepositoryError> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(decode(row?)?);
        }
        Ok(records)
    }
}

struct RawRow {
    id: i64,
    configuration: String,
    status: String,
    started_at: Option<i64>,
    training_time_secs: Option<f64>,
    artifacts: String,
    metrics: String,
    additional_remarks: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        configuration: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        training_time_secs: row.get(4)?,
        artifacts: row.get(5)?,
        metrics: row.get(6)?,
        additional_remarks: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn decode(raw: RawRow) -> Result<JobRecord, RepositoryError> {
    let status = raw
        .status
        .parse::<JobStatus>()
        .map_err(RepositoryError::Corrupt)?;
    let training_time = match raw.training_time_secs {
        Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|err| {
            RepositoryError::Corrupt(format!("job {}: bad training time {secs}: {err}", raw.id))
        })?),
        None => None,
    };
    Ok(JobRecord::restore(StoredJob {
        id: JobId(raw.id),
        configuration: serde_json::from_str(&raw.configuration)?,
        status,
        started_at: raw.started_at,
        training_time,
        artifacts: serde_json::from_str(&raw.artifacts)?,
        metrics: serde_json::from_str(&raw.metrics)?,
        additional_remarks: raw.additional_remarks,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InputDataType, LabelStrategy, PreprocessingConfig};
    use crate::jobs::record::JobOutcome;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn preprocessing() -> JobConfiguration {
        JobConfiguration::Preprocessing(PreprocessingConfig {
            input_folder: PathBuf::from("clips"),
            input_data_type: InputDataType::Audio,
            label_strategy: LabelStrategy::ParentDirectory,
            binarize: true,
            positive_class: Some("perfect_condition".to_string()),
            seed: Some(7),
            audio_frames: 128,
            image_size: [32, 32],
        })
    }

    #[test]
    fn round_trips_a_terminal_record_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("jobs.db");
        let repo = SqliteJobRepository::open(&path).unwrap();
        let mut record = repo.insert(preprocessing(), 10).unwrap();
        record.start(20).unwrap();
        repo.save(&record).unwrap();
        let outcome = JobOutcome::default()
            .with_artifact("training_features", "/d/npy/training_features_t.npy")
            .with_metric("samples", 10.0);
        record
            .succeed(outcome, 25, Duration::from_millis(1_500), 1_525)
            .unwrap();
        repo.save(&record).unwrap();
        drop(repo);

        let reopened = SqliteJobRepository::open(&path).unwrap();
        let loaded = reopened.get(record.id()).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.training_time(), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn terminal_rows_are_not_updated() {
        let repo = SqliteJobRepository::open_in_memory().unwrap();
        let mut record = repo.insert(preprocessing(), 1).unwrap();
        record.start(2).unwrap();
        record.fail("decode failed", Some((2, Duration::from_secs(1))), 3).unwrap();
        repo.save(&record).unwrap();

        let mut stale = JobRecord::waiting(record.id(), preprocessing(), 1);
        stale.start(4).unwrap();
        let err = repo.save(&stale).unwrap_err();
        assert!(matches!(err, RepositoryError::TerminalRecord(_)));
        let stored = repo.get(record.id()).unwrap();
        assert_eq!(stored.status(), JobStatus::Fail);
        assert_eq!(stored.additional_remarks(), Some("decode failed"));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let repo = SqliteJobRepository::open_in_memory().unwrap();
        let mut ghost = JobRecord::waiting(JobId(41), preprocessing(), 1);
        ghost.start(2).unwrap();
        assert!(matches!(
            repo.save(&ghost),
            Err(RepositoryError::NotFound(JobId(41)))
        ));
        assert!(matches!(
            repo.get(JobId(41)),
            Err(RepositoryError::NotFound(JobId(41)))
        ));
    }

    #[test]
    fn list_returns_oldest_first() {
        let repo = SqliteJobRepository::open_in_memory().unwrap();
        let a = repo.insert(preprocessing(), 1).unwrap();
        let b = repo.insert(preprocessing(), 2).unwrap();
        let ids: Vec<_> = repo.list().unwrap().iter().map(JobRecord::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }
}
