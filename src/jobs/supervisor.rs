//! Job supervisor actor
//!
//! A single task owns the cancellation registry (`progress_id → token`) and
//! processes commands one at a time. [`JobSupervisor`] is the cloneable
//! handle; every method is a message plus a `oneshot` reply.
//!
//! ```text
//!  HTTP / CLI ──► JobSupervisor ──mpsc──► SupervisorActor ──spawn──► job task
//!                                              ▲                        │
//!                                              └──── Complete(id) ──────┘
//! ```
//!
//! Registry invariant: an entry exists only while the job task runs on this
//! process and has not been cancelled. The job wrapper finalizes the
//! progress record before it reports `Complete`.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::progress::ProgressTracker;
use super::{JobError, JobResult};
use crate::metrics;
use crate::models::{DiscoveryProgress, JobKind, JobScope, ProgressPhase, ProgressStatus};
use crate::storage::{ProgressUpdate, SharedDataStore};
use crate::utils::sanitize_message;

/// Message stored on records finalized by the reconciliation sweep
pub const ABANDONED_MESSAGE: &str = "job abandoned: no heartbeat";

const COMMAND_BUFFER: usize = 256;

/// Type-erased job body
pub type BoxedJob = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, JobResult<()>> + Send>;

// ============================================================================
// Job Context
// ============================================================================

/// Everything a job body needs while it runs
#[derive(Clone)]
pub struct JobContext {
    pub progress_id: i64,
    pub scope: JobScope,
    pub token: CancellationToken,
    pub store: SharedDataStore,
    pub progress: ProgressTracker,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Checkpoint between work items
    pub fn check_cancelled(&self) -> JobResult<()> {
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the job is cancelled first
    pub async fn until_cancelled<F: Future>(&self, fut: F) -> JobResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(JobError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

/// Registry entry as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningJob {
    pub progress_id: i64,
    pub kind: JobKind,
    pub scope_key: String,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Commands
// ============================================================================

enum Command {
    Start {
        scope: JobScope,
        job: BoxedJob,
        reply: oneshot::Sender<JobResult<i64>>,
    },
    Cancel {
        progress_id: i64,
        reply: oneshot::Sender<JobResult<()>>,
    },
    Complete {
        progress_id: i64,
    },
    IsRunning {
        progress_id: i64,
        reply: oneshot::Sender<bool>,
    },
    List {
        reply: oneshot::Sender<Vec<RunningJob>>,
    },
    Reconcile {
        older_than: DateTime<Utc>,
        reply: oneshot::Sender<JobResult<Vec<i64>>>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to the supervisor actor
#[derive(Clone)]
pub struct JobSupervisor {
    tx: mpsc::Sender<Command>,
    store: SharedDataStore,
}

impl JobSupervisor {
    /// Spawn the actor on the current tokio runtime
    pub fn spawn(store: SharedDataStore) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = SupervisorActor {
            store: store.clone(),
            registry: HashMap::new(),
            root: CancellationToken::new(),
            completions: tx.downgrade(),
            shutting_down: false,
        };
        tokio::spawn(actor.run(rx));

        Self { tx, store }
    }

    pub fn store(&self) -> &SharedDataStore {
        &self.store
    }

    /// Persist a progress record for `scope` and launch `job`.
    ///
    /// Returns the new progress id, or `Conflict` when a job for an
    /// equivalent scope is still in progress.
    pub async fn start<F, Fut>(&self, scope: JobScope, job: F) -> JobResult<i64>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        let job: BoxedJob = Box::new(move |ctx| job(ctx).boxed());
        self.request(|reply| Command::Start { scope, job, reply })
            .await?
    }

    /// Signal a running job to stop.
    ///
    /// The first call for a running job succeeds; any later call, or a call
    /// for an id not running here, returns `NotFound`.
    pub async fn cancel(&self, progress_id: i64) -> JobResult<()> {
        self.request(|reply| Command::Cancel { progress_id, reply })
            .await?
    }

    pub async fn get_progress(&self, progress_id: i64) -> JobResult<DiscoveryProgress> {
        self.store
            .get_progress(progress_id)
            .await?
            .ok_or(JobError::NotFound(progress_id))
    }

    pub async fn list_progress(&self, limit: usize) -> JobResult<Vec<DiscoveryProgress>> {
        Ok(self.store.list_progress(limit).await?)
    }

    pub async fn is_running(&self, progress_id: i64) -> JobResult<bool> {
        self.request(|reply| Command::IsRunning { progress_id, reply })
            .await
    }

    pub async fn running_jobs(&self) -> JobResult<Vec<RunningJob>> {
        self.request(|reply| Command::List { reply }).await
    }

    /// Mark in-progress records older than `older_than` that have no local
    /// registry entry as failed. Returns the ids that were finalized.
    pub async fn reconcile_stale(&self, older_than: DateTime<Utc>) -> JobResult<Vec<i64>> {
        self.request(|reply| Command::Reconcile { older_than, reply })
            .await?
    }

    /// Cancel every registered job and refuse new ones.
    /// Returns how many jobs were signalled.
    pub async fn shutdown(&self) -> JobResult<usize> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Poll until the progress record is finalized
    pub async fn wait_for_completion(
        &self,
        progress_id: i64,
        poll_interval: Duration,
    ) -> JobResult<DiscoveryProgress> {
        loop {
            let progress = self.get_progress(progress_id).await?;
            if !progress.is_active() {
                return Ok(progress);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> JobResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| JobError::internal("job supervisor is not running"))?;
        rx.await
            .map_err(|_| JobError::internal("job supervisor dropped the request"))
    }
}

// ============================================================================
// Actor
// ============================================================================

struct RegisteredJob {
    token: CancellationToken,
    info: RunningJob,
}

struct SupervisorActor {
    store: SharedDataStore,
    registry: HashMap<i64, RegisteredJob>,
    root: CancellationToken,
    completions: mpsc::WeakSender<Command>,
    shutting_down: bool,
}

impl SupervisorActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!("Job supervisor started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Start { scope, job, reply } => {
                    let result = self.start(scope, job).await;
                    let _ = reply.send(result);
                }
                Command::Cancel { progress_id, reply } => {
                    let result = self.cancel(progress_id).await;
                    let _ = reply.send(result);
                }
                Command::Complete { progress_id } => {
                    if self.registry.remove(&progress_id).is_some() {
                        debug!(progress_id = progress_id, "Job deregistered");
                    }
                    metrics::set_running_jobs(self.registry.len());
                }
                Command::IsRunning { progress_id, reply } => {
                    let _ = reply.send(self.registry.contains_key(&progress_id));
                }
                Command::List { reply } => {
                    let mut jobs: Vec<_> =
                        self.registry.values().map(|j| j.info.clone()).collect();
                    jobs.sort_by_key(|j| j.progress_id);
                    let _ = reply.send(jobs);
                }
                Command::Reconcile { older_than, reply } => {
                    let result = self.reconcile(older_than).await;
                    let _ = reply.send(result);
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(self.shutdown());
                }
            }
        }

        // Every handle is gone; nobody can cancel the remaining jobs anymore
        self.root.cancel();
        debug!("Job supervisor stopped");
    }

    async fn start(&mut self, scope: JobScope, job: BoxedJob) -> JobResult<i64> {
        if self.shutting_down {
            return Err(JobError::internal("job supervisor is shutting down"));
        }
        scope.validate().map_err(JobError::Validation)?;

        let record = self
            .store
            .create_progress_if_none_active(&DiscoveryProgress::start(&scope))
            .await?;
        let progress_id = record.id;
        let kind = scope.kind();

        let token = self.root.child_token();
        let ctx = JobContext {
            progress_id,
            scope: scope.clone(),
            token: token.clone(),
            store: self.store.clone(),
            progress: ProgressTracker::new(progress_id, self.store.clone()),
        };

        self.registry.insert(
            progress_id,
            RegisteredJob {
                token: token.clone(),
                info: RunningJob {
                    progress_id,
                    kind,
                    scope_key: record.scope_key.clone(),
                    started_at: record.started_at,
                },
            },
        );

        tokio::spawn(supervise(
            progress_id,
            scope,
            token,
            job(ctx),
            self.store.clone(),
            self.completions.clone(),
        ));

        metrics::record_job_started(kind.as_str());
        metrics::set_running_jobs(self.registry.len());
        info!(
            progress_id = progress_id,
            scope = %record.scope_key,
            kind = kind.as_str(),
            "Job started"
        );
        Ok(progress_id)
    }

    async fn cancel(&mut self, progress_id: i64) -> JobResult<()> {
        let Some(job) = self.registry.remove(&progress_id) else {
            return Err(JobError::NotFound(progress_id));
        };

        // The wrapper finalizes before it sends Complete; a final record
        // means the body already returned and there is nothing to cancel.
        let finished = match self.store.get_progress(progress_id).await {
            Ok(record) => !record.is_some_and(|r| r.is_active()),
            Err(e) => {
                warn!(
                    progress_id = progress_id,
                    scope = %job.info.scope_key,
                    error = %e,
                    "Failed to read job progress before cancelling"
                );
                false
            }
        };
        if finished {
            metrics::set_running_jobs(self.registry.len());
            debug!(
                progress_id = progress_id,
                scope = %job.info.scope_key,
                "Cancel found a finished job"
            );
            return Err(JobError::NotFound(progress_id));
        }

        job.token.cancel();
        metrics::record_cancellation();
        metrics::set_running_jobs(self.registry.len());

        if let Err(e) = self
            .store
            .update_progress(progress_id, &ProgressUpdate::phase(ProgressPhase::Cancelling))
            .await
        {
            warn!(
                progress_id = progress_id,
                scope = %job.info.scope_key,
                phase = "cancelling",
                error = %e,
                "Failed to record cancelling phase"
            );
        }

        info!(
            progress_id = progress_id,
            scope = %job.info.scope_key,
            "Job cancellation requested"
        );
        Ok(())
    }

    async fn reconcile(&mut self, older_than: DateTime<Utc>) -> JobResult<Vec<i64>> {
        let stale = self.store.find_stale_progress(older_than).await?;
        let mut reconciled = Vec::new();

        for record in stale {
            if self.registry.contains_key(&record.id) {
                continue;
            }

            match self
                .store
                .finalize_progress(record.id, ProgressStatus::Failed, Some(ABANDONED_MESSAGE))
                .await
            {
                Ok(true) => {
                    warn!(
                        progress_id = record.id,
                        scope = %record.scope_key,
                        last_update = %record.updated_at,
                        "Marked abandoned job as failed"
                    );
                    reconciled.push(record.id);
                }
                Ok(false) => {}
                Err(e) => warn!(
                    progress_id = record.id,
                    scope = %record.scope_key,
                    error = %e,
                    "Failed to finalize abandoned job"
                ),
            }
        }

        metrics::record_reconciled(reconciled.len());
        Ok(reconciled)
    }

    fn shutdown(&mut self) -> usize {
        self.shutting_down = true;
        self.root.cancel();
        let signalled = self.registry.len();
        info!(jobs = signalled, "Job supervisor shutting down");
        signalled
    }
}

/// Run one job body to completion, record the outcome and deregister it
async fn supervise(
    progress_id: i64,
    scope: JobScope,
    token: CancellationToken,
    body: BoxFuture<'static, JobResult<()>>,
    store: SharedDataStore,
    completions: mpsc::WeakSender<Command>,
) {
    let started = Instant::now();
    let scope_key = scope.scope_key();

    // Inner spawn so a panicking body surfaces as a JoinError
    let outcome = tokio::spawn(body).await;
    let (status, message) = classify_outcome(outcome, &token);

    match store
        .finalize_progress(progress_id, status, message.as_deref())
        .await
    {
        Ok(true) => info!(
            progress_id = progress_id,
            scope = %scope_key,
            status = status.as_str(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Job finished"
        ),
        Ok(false) => debug!(
            progress_id = progress_id,
            scope = %scope_key,
            "Job record was already finalized"
        ),
        Err(e) => error!(
            progress_id = progress_id,
            scope = %scope_key,
            phase = "finalizing",
            error = %e,
            "Failed to finalize job progress"
        ),
    }

    metrics::record_job_finished(
        scope.kind().as_str(),
        status.as_str(),
        started.elapsed().as_secs_f64(),
    );

    if let Some(tx) = completions.upgrade() {
        let _ = tx.send(Command::Complete { progress_id }).await;
    }
}

fn classify_outcome(
    outcome: Result<JobResult<()>, JoinError>,
    token: &CancellationToken,
) -> (ProgressStatus, Option<String>) {
    match outcome {
        Ok(Ok(())) if token.is_cancelled() => (ProgressStatus::Cancelled, None),
        Ok(Ok(())) => (ProgressStatus::Complete, None),
        Ok(Err(JobError::Cancelled)) => (ProgressStatus::Cancelled, None),
        Ok(Err(e)) => (ProgressStatus::Failed, Some(sanitize_message(&e.to_string()))),
        Err(e) if e.is_panic() => (ProgressStatus::Failed, Some("job panicked".to_string())),
        Err(_) => (ProgressStatus::Cancelled, None),
    }
}
