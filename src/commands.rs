//! Command interface shared by the CLI and any admin surface.
//!
//! Callers submit jobs (records start in `waiting`), ask a worker to run them,
//! and poll record state. Job failures never come back as errors here; they
//! are stored on the record. `CommandError` only covers storage problems and
//! configurations rejected at submission.

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::WorkerConfig;
use crate::dataset::{PreprocessingConfig, PreprocessingPipeline};
use crate::evaluation::{EvaluationConfig, EvaluationStep};
use crate::jobs::{
    Clock, JobConfiguration, JobError, JobExecutor, JobId, JobOutcome, JobRecord, JobRepository,
    RepositoryError, SqliteJobRepository, SystemClock, fail_stale_in_progress,
};
use crate::training::{TrainingConfig, TrainingStep};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("job rejected: {0}")]
    Rejected(#[from] JobError),
}

/// A job worker bound to one configuration, store and clock.
pub struct Worker<R = SqliteJobRepository, C = SystemClock> {
    config: WorkerConfig,
    executor: JobExecutor<R, C>,
}

impl Worker<SqliteJobRepository, SystemClock> {
    /// Open the SQLite store named by `config.database`.
    pub fn open(config: WorkerConfig) -> Result<Self, CommandError> {
        let repository = SqliteJobRepository::open(&config.database)?;
        Ok(Self::with_parts(config, repository, SystemClock::new()))
    }
}

impl<R: JobRepository, C: Clock> Worker<R, C> {
    pub fn with_parts(config: WorkerConfig, repository: R, clock: C) -> Self {
        Self {
            config,
            executor: JobExecutor::with_clock(repository, clock),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn submit_preprocessing(
        &self,
        config: PreprocessingConfig,
    ) -> Result<JobRecord, CommandError> {
        config.validate()?;
        self.submit(JobConfiguration::Preprocessing(config))
    }

    pub fn submit_training(&self, config: TrainingConfig) -> Result<JobRecord, CommandError> {
        config.validate()?;
        self.submit(JobConfiguration::Training(config))
    }

    pub fn submit_evaluation(&self, config: EvaluationConfig) -> Result<JobRecord, CommandError> {
        config.validate()?;
        self.submit(JobConfiguration::Evaluation(config))
    }

    fn submit(&self, configuration: JobConfiguration) -> Result<JobRecord, CommandError> {
        let now = self.executor.clock().unix_millis();
        let record = self.executor.repository().insert(configuration, now)?;
        info!(job_id = %record.id(), kind = %record.kind(), "Job submitted");
        Ok(record)
    }

    /// Run a `waiting` job to completion and return its terminal record.
    ///
    /// Records that are not `waiting` come back unchanged.
    pub fn run_job(&self, id: JobId) -> Result<JobRecord, CommandError> {
        let record = self.executor.repository().get(id)?;
        let config = &self.config;
        Ok(self
            .executor
            .run(record, |configuration: &JobConfiguration| {
                dispatch(config, configuration)
            }))
    }

    pub fn job(&self, id: JobId) -> Result<JobRecord, CommandError> {
        Ok(self.executor.repository().get(id)?)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>, CommandError> {
        Ok(self.executor.repository().list()?)
    }

    /// Fail `in_progress` records older than `reconcile.stale_after_secs`.
    pub fn reconcile(&self) -> Result<Vec<JobId>, CommandError> {
        let older_than = Duration::from_secs(self.config.reconcile.stale_after_secs);
        Ok(fail_stale_in_progress(
            self.executor.repository(),
            self.executor.clock(),
            older_than,
        )?)
    }
}

fn dispatch(
    config: &WorkerConfig,
    configuration: &JobConfiguration,
) -> Result<JobOutcome, JobError> {
    match configuration {
        JobConfiguration::Preprocessing(preprocessing) => {
            PreprocessingPipeline::new(config.data_root.clone()).run(preprocessing)
        }
        JobConfiguration::Training(training) => {
            TrainingStep::new(config.data_root.clone(), config.model_root.clone()).run(training)
        }
        JobConfiguration::Evaluation(evaluation) => {
            EvaluationStep::new(config.data_root.clone(), config.model_root.clone())
                .run(evaluation)
        }
    }
}
