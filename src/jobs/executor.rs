//! Containment boundary between compute steps and job records.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::JobError;
use super::record::{JobConfiguration, JobOutcome, JobRecord, JobStatus};
use super::repository::JobRepository;

/// The actual work of a job: preprocessing, training, evaluation.
pub trait ComputeStep {
    fn execute(self, configuration: &JobConfiguration) -> Result<JobOutcome, JobError>;
}

impl<F> ComputeStep for F
where
    F: FnOnce(&JobConfiguration) -> Result<JobOutcome, JobError>,
{
    fn execute(self, configuration: &JobConfiguration) -> Result<JobOutcome, JobError> {
        self(configuration)
    }
}

/// Runs compute steps and records their outcome.
///
/// `run` never returns an error and never panics because of the step: every
/// failure ends up as `status = fail` with a remark. Exactly one terminal
/// write is issued per invocation.
pub struct JobExecutor<R, C = SystemClock> {
    repository: R,
    clock: C,
}

impl<R: JobRepository> JobExecutor<R, SystemClock> {
    pub fn new(repository: R) -> Self {
        Self::with_clock(repository, SystemClock::new())
    }
}

impl<R: JobRepository, C: Clock> JobExecutor<R, C> {
    pub fn with_clock(repository: R, clock: C) -> Self {
        Self { repository, clock }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Drive `record` from `waiting` to a terminal status using `step`.
    ///
    /// Records that are not `waiting` are returned untouched; a retry must
    /// use a new record.
    ///
    /// The returned record is always terminal, but the store may not be: if
    /// the terminal save fails (busy database, full disk) the error is only
    /// logged and the stored row stays `in_progress`. Such rows are left for
    /// [`fail_stale_in_progress`](super::reconcile::fail_stale_in_progress).
    pub fn run<S: ComputeStep>(&self, mut record: JobRecord, step: S) -> JobRecord {
        let job_id = record.id();
        let kind = record.kind();
        if record.status() != JobStatus::Waiting {
            warn!(
                %job_id,
                status = %record.status(),
                "Refusing to run a job that is not waiting"
            );
            return record;
        }

        if let Err(err) = record.start(self.clock.unix_millis()) {
            warn!(%job_id, "{err}");
            return record;
        }
        if let Err(err) = self.repository.save(&record) {
            error!(%job_id, "Failed to mark job in progress: {err}");
            let remarks = format!("could not mark job in progress: {err}");
            if record.fail(&remarks, None, self.clock.unix_millis()).is_ok() {
                self.persist_terminal(&record);
            }
            return record;
        }
        info!(%job_id, %kind, "Job started");

        let started_at = self.clock.unix_millis();
        let t0 = self.clock.monotonic();
        let result = catch_unwind(AssertUnwindSafe(|| step.execute(record.configuration())));
        let elapsed = self.clock.monotonic().saturating_sub(t0);
        let now = self.clock.unix_millis();

        let settled = match result {
            Ok(Ok(outcome)) if outcome.artifacts.is_empty() => {
                let err = JobError::validation("compute step reported success without artifacts");
                record.fail(&err.to_string(), Some((started_at, elapsed)), now)
            }
            Ok(Ok(outcome)) => record.succeed(outcome, started_at, elapsed, now),
            Ok(Err(err)) => record.fail(&err.to_string(), Some((started_at, elapsed)), now),
            Err(payload) => {
                let err = JobError::compute(format!("panicked: {}", panic_message(&*payload)));
                record.fail(&err.to_string(), Some((started_at, elapsed)), now)
            }
        };
        if let Err(err) = settled {
            error!(%job_id, "{err}");
            return record;
        }

        match record.status() {
            JobStatus::Success => info!(
                %job_id,
                %kind,
                elapsed_secs = elapsed.as_secs_f64(),
                artifacts = record.artifacts().len(),
                "Job succeeded"
            ),
            _ => warn!(
                %job_id,
                %kind,
                elapsed_secs = elapsed.as_secs_f64(),
                remarks = record.additional_remarks().unwrap_or_default(),
                "Job failed"
            ),
        }
        self.persist_terminal(&record);
        record
    }

    fn persist_terminal(&self, record: &JobRecord) {
        if let Err(err) = self.repository.save(record) {
            error!(
                job_id = %record.id(),
                status = %record.status(),
                "Failed to persist terminal job state: {err}"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::record::{JobId, JobOutcome};
    use crate::jobs::repository::{MemoryJobRepository, RepositoryError};
    use crate::training::TrainingConfig;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn config() -> JobConfiguration {
        JobConfiguration::Training(TrainingConfig {
            input_data_path: PathBuf::from("x.npy"),
            labels_path: PathBuf::from("y.npy"),
            backend: "nearest_centroid".to_string(),
            verbose: true,
            time_limit_secs: Some(30),
        })
    }

    /// Records every saved status; can be told to fail the first save or
    /// every terminal save.
    #[derive(Default)]
    struct RecordingRepository {
        inner: MemoryJobRepository,
        saves: Mutex<Vec<JobStatus>>,
        fail_first_save: bool,
        fail_terminal_save: bool,
    }

    impl RecordingRepository {
        fn saved_statuses(&self) -> Vec<JobStatus> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl JobRepository for RecordingRepository {
        fn insert(
            &self,
            configuration: JobConfiguration,
            created_at: i64,
        ) -> Result<JobRecord, RepositoryError> {
            self.inner.insert(configuration, created_at)
        }

        fn get(&self, id: JobId) -> Result<JobRecord, RepositoryError> {
            self.inner.get(id)
        }

        fn save(&self, record: &JobRecord) -> Result<(), RepositoryError> {
            let mut saves = self.saves.lock().unwrap();
            saves.push(record.status());
            if self.fail_first_save && saves.len() == 1 {
                return Err(RepositoryError::Corrupt("disk full".to_string()));
            }
            if self.fail_terminal_save && record.status().is_terminal() {
                return Err(RepositoryError::Corrupt("database is locked".to_string()));
            }
            self.inner.save(record)
        }

        fn list(&self) -> Result<Vec<JobRecord>, RepositoryError> {
            self.inner.list()
        }
    }

    fn executor(
        repo: RecordingRepository,
    ) -> (
        JobExecutor<Arc<RecordingRepository>, Arc<ManualClock>>,
        Arc<RecordingRepository>,
        Arc<ManualClock>,
    ) {
        let repo = Arc::new(repo);
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (
            JobExecutor::with_clock(repo.clone(), clock.clone()),
            repo,
            clock,
        )
    }

    #[test]
    fn success_records_outcome_and_elapsed_time() {
        let (executor, repo, clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let id = record.id();
        let step_clock = clock.clone();
        let finished = executor.run(record, move |_: &JobConfiguration| {
            step_clock.advance(Duration::from_millis(4_250));
            Ok(JobOutcome::default()
                .with_artifact("model", "/models/nearest_centroid.dump")
                .with_metric("classes", 3.0))
        });

        assert_eq!(finished.status(), JobStatus::Success);
        assert_eq!(finished.training_time(), Some(Duration::from_millis(4_250)));
        assert_eq!(finished.started_at(), Some(1_700_000_000_000));
        assert_eq!(finished.metrics().get("classes"), Some(&3.0));
        assert_eq!(finished.additional_remarks(), None);
        assert_eq!(
            repo.saved_statuses(),
            vec![JobStatus::InProgress, JobStatus::Success]
        );
        assert_eq!(repo.get(id).unwrap(), finished);
    }

    #[test]
    fn compute_failure_after_measured_time_is_recorded() {
        let (executor, repo, clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let step_clock = clock.clone();
        let finished = executor.run(record, move |_: &JobConfiguration| {
            step_clock.advance(Duration::from_millis(12_300));
            Err(JobError::compute("backend ran out of memory"))
        });

        assert_eq!(finished.status(), JobStatus::Fail);
        let elapsed = finished.training_time().unwrap().as_secs_f64();
        assert!((elapsed - 12.3).abs() < 1e-9);
        assert!(
            finished
                .additional_remarks()
                .unwrap()
                .contains("backend ran out of memory")
        );
        assert!(finished.artifacts().is_empty());
        assert_eq!(
            repo.saved_statuses(),
            vec![JobStatus::InProgress, JobStatus::Fail]
        );
    }

    #[test]
    fn panics_are_contained() {
        let (executor, repo, _clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let finished = executor.run(record, |_: &JobConfiguration| -> Result<JobOutcome, JobError> {
            panic!("index out of bounds")
        });
        assert_eq!(finished.status(), JobStatus::Fail);
        assert_eq!(
            finished.additional_remarks(),
            Some("compute error: panicked: index out of bounds")
        );
        assert!(finished.training_time().is_some());
    }

    #[test]
    fn empty_success_payload_is_a_failure() {
        let (executor, repo, _clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let finished = executor.run(record, |_: &JobConfiguration| Ok(JobOutcome::default()));
        assert_eq!(finished.status(), JobStatus::Fail);
        assert!(
            finished
                .additional_remarks()
                .unwrap()
                .starts_with("validation error")
        );
    }

    #[test]
    fn failing_to_mark_in_progress_fails_without_timing() {
        let (executor, repo, _clock) = executor(RecordingRepository {
            fail_first_save: true,
            ..Default::default()
        });
        let record = repo.insert(config(), 0).unwrap();
        let mut called = false;
        let finished = executor.run(record, |_: &JobConfiguration| {
            called = true;
            Ok(JobOutcome::default().with_artifact("model", "m"))
        });
        assert!(!called);
        assert_eq!(finished.status(), JobStatus::Fail);
        assert_eq!(finished.training_time(), None);
        assert!(
            finished
                .additional_remarks()
                .unwrap()
                .contains("disk full")
        );
        assert_eq!(
            repo.saved_statuses(),
            vec![JobStatus::InProgress, JobStatus::Fail]
        );
    }

    #[test]
    fn lost_terminal_save_is_left_for_reconcile() {
        let (executor, repo, clock) = executor(RecordingRepository {
            fail_terminal_save: true,
            ..Default::default()
        });
        let record = repo.insert(config(), 0).unwrap();
        let id = record.id();
        let finished = executor.run(record, |_: &JobConfiguration| {
            Ok(JobOutcome::default().with_artifact("model", "m"))
        });
        assert_eq!(finished.status(), JobStatus::Success);
        assert_eq!(repo.get(id).unwrap().status(), JobStatus::InProgress);

        clock.advance(Duration::from_secs(3_600));
        let swept =
            crate::jobs::fail_stale_in_progress(&repo.inner, &*clock, Duration::from_secs(60))
                .unwrap();
        assert_eq!(swept, vec![id]);
        assert_eq!(repo.get(id).unwrap().status(), JobStatus::Fail);
    }

    #[test]
    fn system_clock_measures_wall_time() {
        let executor = JobExecutor::new(MemoryJobRepository::new());
        let record = executor.repository().insert(config(), 0).unwrap();
        let outer = std::time::Instant::now();
        let finished = executor.run(record, |_: &JobConfiguration| {
            std::thread::sleep(Duration::from_millis(60));
            Ok(JobOutcome::default().with_artifact("model", "m"))
        });
        let outer = outer.elapsed();
        let measured = finished.training_time().unwrap();
        assert!(measured >= Duration::from_millis(60), "{measured:?}");
        assert!(measured <= outer, "{measured:?} > {outer:?}");
    }

    #[test]
    fn terminal_records_are_not_rerun() {
        let (executor, repo, _clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let first = executor.run(record, |_: &JobConfiguration| Err(JobError::io("disk gone")));
        assert_eq!(first.status(), JobStatus::Fail);

        let mut called = false;
        let again = executor.run(first.clone(), |_: &JobConfiguration| {
            called = true;
            Ok(JobOutcome::default().with_artifact("model", "m"))
        });
        assert!(!called);
        assert_eq!(again, first);
        assert_eq!(repo.saved_statuses().len(), 2);
    }

    #[test]
    fn step_sees_the_record_configuration() {
        let (executor, repo, _clock) = executor(RecordingRepository::default());
        let record = repo.insert(config(), 0).unwrap();
        let finished = executor.run(record, |configuration: &JobConfiguration| {
            match configuration {
                JobConfiguration::Training(training) if training.time_limit_secs == Some(30) => {
                    Ok(JobOutcome::default().with_artifact("model", "m"))
                }
                _ => Err(JobError::configuration("unexpected configuration")),
            }
        });
        assert_eq!(finished.status(), JobStatus::Success);
        assert_eq!(finished.configuration(), &config());
    }
}
