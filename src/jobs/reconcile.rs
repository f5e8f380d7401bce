//! Sweep for records abandoned in `in_progress`.
//!
//! A worker that dies between marking a job in progress and writing its
//! terminal state leaves the row stuck. Nothing in the executor can recover
//! that; an operator (or a scheduled `reconcile` command) runs this sweep.

use std::time::Duration;

use tracing::{info, warn};

use super::clock::Clock;
use super::record::{JobId, JobStatus};
use super::repository::{JobRepository, RepositoryError};

/// Remark stored on records failed by the sweep.
pub const ABANDONED_REMARK: &str =
    "abandoned: no terminal status was reported before the reconcile deadline";

/// Fail every `in_progress` record whose last update is older than `older_than`.
///
/// `training_time` stays unset because the compute step was never observed to
/// finish. Returns the ids that were failed.
pub fn fail_stale_in_progress<R, C>(
    repository: &R,
    clock: &C,
    older_than: Duration,
) -> Result<Vec<JobId>, RepositoryError>
where
    R: JobRepository + ?Sized,
    C: Clock + ?Sized,
{
    let now = clock.unix_millis();
    let cutoff = now.saturating_sub(older_than.as_millis() as i64);
    let mut failed = Vec::new();
    for mut record in repository.list()? {
        if record.status() != JobStatus::InProgress || record.updated_at() > cutoff {
            continue;
        }
        if let Err(err) = record.fail(ABANDONED_REMARK, None, now) {
            warn!("Skipping stale job: {err}");
            continue;
        }
        repository.save(&record)?;
        warn!(job_id = %record.id(), "Failed abandoned in-progress job");
        failed.push(record.id());
    }
    info!(count = failed.len(), "Reconcile sweep finished");
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::record::JobConfiguration;
    use crate::jobs::repository::MemoryJobRepository;
    use crate::training::TrainingConfig;
    use std::path::PathBuf;

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
    fn fails_only_old_in_progress_records() {
        let repo = MemoryJobRepository::new();
        let clock = ManualClock::new(0);

        let mut stuck = repo.insert(config(), 0).unwrap();
        stuck.start(0).unwrap();
        repo.save(&stuck).unwrap();

        let waiting = repo.insert(config(), 0).unwrap();

        clock.advance(Duration::from_secs(3_600));
        let mut fresh = repo.insert(config(), clock.unix_millis()).unwrap();
        fresh.start(clock.unix_millis()).unwrap();
        repo.save(&fresh).unwrap();

        clock.advance(Duration::from_secs(60));
        let failed = fail_stale_in_progress(&repo, &clock, Duration::from_secs(1_800)).unwrap();
        assert_eq!(failed, vec![stuck.id()]);

        let stuck = repo.get(stuck.id()).unwrap();
        assert_eq!(stuck.status(), JobStatus::Fail);
        assert_eq!(stuck.training_time(), None);
        assert_eq!(stuck.additional_remarks(), Some(ABANDONED_REMARK));
        assert_eq!(repo.get(waiting.id()).unwrap().status(), JobStatus::Waiting);
        assert_eq!(repo.get(fresh.id()).unwrap().status(), JobStatus::InProgress);
    }
}
