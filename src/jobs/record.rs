use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::PreprocessingConfig;
use crate::evaluation::EvaluationConfig;
use crate::training::TrainingConfig;

/// Persisted failure text is capped at this many characters.
pub const REMARKS_MAX_CHARS: usize = 2048;

/// Identifier assigned by the repository on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status: `waiting → in_progress → {success, fail}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    InProgress,
    Success,
    Fail,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Fail => "fail",
        }
    }

    /// `success` and `fail` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Fail)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(JobStatus::Waiting),
            "in_progress" => Ok(JobStatus::InProgress),
            "success" => Ok(JobStatus::Success),
            "fail" => Ok(JobStatus::Fail),
            other => Err(format!("Unknown job status: {other}")),
        }
    }
}

/// What a job runs, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobConfiguration {
    Preprocessing(PreprocessingConfig),
    Training(TrainingConfig),
    Evaluation(EvaluationConfig),
}

impl JobConfiguration {
    pub fn kind(&self) -> JobKind {
        match self {
            JobConfiguration::Preprocessing(_) => JobKind::Preprocessing,
            JobConfiguration::Training(_) => JobKind::Training,
            JobConfiguration::Evaluation(_) => JobKind::Evaluation,
        }
    }
}

/// Discriminant of [`JobConfiguration`], stored in its own column for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Preprocessing,
    Training,
    Evaluation,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Preprocessing => "preprocessing",
            JobKind::Training => "training",
            JobKind::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named file produced by a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Success payload returned by a compute step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub artifacts: Vec<Artifact>,
    pub metrics: BTreeMap<String, f64>,
}

impl JobOutcome {
    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(Artifact::new(name, path));
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Rejected status change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("job {id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One unit of work and everything recorded about it.
///
/// Fields are private; status only changes through [`JobRecord::start`],
/// [`JobRecord::succeed`] and [`JobRecord::fail`], which enforce the
/// lifecycle and keep terminal records frozen.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    id: JobId,
    configuration: JobConfiguration,
    status: JobStatus,
    started_at: Option<i64>,
    training_time: Option<Duration>,
    artifacts: Vec<Artifact>,
    metrics: BTreeMap<String, f64>,
    additional_remarks: Option<String>,
    created_at: i64,
    updated_at: i64,
}

/// Raw column values used by repositories to rebuild a record.
#[derive(Debug, Clone)]
pub(crate) struct StoredJob {
    pub(crate) id: JobId,
    pub(crate) configuration: JobConfiguration,
    pub(crate) status: JobStatus,
    pub(crate) started_at: Option<i64>,
    pub(crate) training_time: Option<Duration>,
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) metrics: BTreeMap<String, f64>,
    pub(crate) additional_remarks: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl JobRecord {
    /// New record in `waiting`.
    pub fn waiting(id: JobId, configuration: JobConfiguration, created_at: i64) -> Self {
        Self {
            id,
            configuration,
            status: JobStatus::Waiting,
            started_at: None,
            training_time: None,
            artifacts: Vec::new(),
            metrics: BTreeMap::new(),
            additional_remarks: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub(crate) fn restore(stored: StoredJob) -> Self {
        Self {
            id: stored.id,
            configuration: stored.configuration,
            status: stored.status,
            started_at: stored.started_at,
            training_time: stored.training_time,
            artifacts: stored.artifacts,
            metrics: stored.metrics,
            additional_remarks: stored.additional_remarks,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.configuration.kind()
    }

    pub fn configuration(&self) -> &JobConfiguration {
        &self.configuration
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Wall-clock start of the compute step; only set on terminal records.
    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    /// Locally measured duration of the compute step.
    pub fn training_time(&self) -> Option<Duration> {
        self.training_time
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Path of the artifact called `name`, if the job produced one.
    pub fn artifact(&self, name: &str) -> Option<&PathBuf> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.name == name)
            .map(|artifact| &artifact.path)
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn additional_remarks(&self) -> Option<&str> {
        self.additional_remarks.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// `waiting → in_progress`.
    pub fn start(&mut self, now_millis: i64) -> Result<(), TransitionError> {
        self.guard(JobStatus::Waiting, JobStatus::InProgress)?;
        self.status = JobStatus::InProgress;
        self.updated_at = now_millis;
        Ok(())
    }

    /// `in_progress → success`.
    pub fn succeed(
        &mut self,
        outcome: JobOutcome,
        started_at: i64,
        elapsed: Duration,
        now_millis: i64,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::InProgress, JobStatus::Success)?;
        self.status = JobStatus::Success;
        self.started_at = Some(started_at);
        self.training_time = Some(elapsed);
        self.artifacts = outcome.artifacts;
        self.metrics = outcome.metrics;
        self.updated_at = now_millis;
        Ok(())
    }

    /// `in_progress → fail`.
    ///
    /// `timing` is `None` when the failure happened before the compute step
    /// started; `training_time` then stays unset.
    pub fn fail(
        &mut self,
        remarks: &str,
        timing: Option<(i64, Duration)>,
        now_millis: i64,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::InProgress, JobStatus::Fail)?;
        self.status = JobStatus::Fail;
        if let Some((started_at, elapsed)) = timing {
            self.started_at = Some(started_at);
            self.training_time = Some(elapsed);
        }
        self.additional_remarks = Some(truncate_remarks(remarks));
        self.updated_at = now_millis;
        Ok(())
    }

    fn guard(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }
}

fn truncate_remarks(remarks: &str) -> String {
    match remarks.char_indices().nth(REMARKS_MAX_CHARS) {
        Some((cut, _)) => remarks[..cut].to_string(),
        None => remarks.to_string(),
    }
}
