//! Long-running job supervision
//!
//! Discovery runs, batch dry-runs and batch migrations are all jobs: a
//! persisted progress record plus a tokio task bound to a cancellation
//! token. At most one job per scope key is in progress at any time.

pub mod error;
pub mod progress;
pub mod supervisor;

pub use error::{JobError, JobResult};
pub use progress::{ProgressCounters, ProgressTracker};
pub use supervisor::{BoxedJob, JobContext, JobSupervisor, RunningJob, ABANDONED_MESSAGE};
