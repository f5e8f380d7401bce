//! Job records, their persistence, and the executor that drives them.

mod clock;
mod error;
mod executor;
mod reconcile;
mod record;
mod repository;
mod sqlite;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::JobError;
pub use executor::{ComputeStep, JobExecutor};
pub use reconcile::{ABANDONED_REMARK, fail_stale_in_progress};
pub use record::{
    Artifact, JobConfiguration, JobId, JobKind, JobOutcome, JobRecord, JobStatus,
    REMARKS_MAX_CHARS, TransitionError,
};
pub use repository::{JobRepository, MemoryJobRepository, RepositoryError};
pub use sqlite::SqliteJobRepository;
