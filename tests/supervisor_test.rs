//! Job supervisor behavior against the in-memory store

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use ghmigrate::jobs::{JobContext, JobError, JobResult, JobSupervisor, ABANDONED_MESSAGE};
use ghmigrate::models::{DiscoveryProgress, DiscoveryType, JobScope, ProgressPhase, ProgressStatus};

use common::{memory_store, wait_deregistered, wait_final, SlowFinalizeStore};

fn org_scope(target: &str) -> JobScope {
    JobScope::discovery(DiscoveryType::Organization, target)
}

/// Runs until cancelled
async fn block_until_cancelled(ctx: JobContext) -> JobResult<()> {
    ctx.until_cancelled(std::future::pending::<()>()).await
}

#[tokio::test]
async fn test_concurrent_starts_for_same_scope_conflict() {
    let supervisor = JobSupervisor::spawn(memory_store());

    let (a, b) = tokio::join!(
        supervisor.start(org_scope("acme"), block_until_cancelled),
        supervisor.start(org_scope("ACME "), block_until_cancelled),
    );

    let (winner, loser) = match (a, b) {
        (Ok(id), Err(e)) | (Err(e), Ok(id)) => (id, e),
        other => panic!("expected one start to win, got {other:?}"),
    };
    match loser {
        JobError::Conflict {
            scope_key,
            existing_id,
        } => {
            assert_eq!(scope_key, "discovery:organization:acme");
            assert_eq!(existing_id, winner);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    supervisor.cancel(winner).await.unwrap();
    wait_final(&supervisor, winner).await;
}

#[tokio::test]
async fn test_different_scopes_run_side_by_side() {
    let supervisor = JobSupervisor::spawn(memory_store());

    let a = supervisor
        .start(org_scope("acme"), block_until_cancelled)
        .await
        .unwrap();
    let b = supervisor
        .start(
            JobScope::discovery(DiscoveryType::Enterprise, "acme"),
            block_until_cancelled,
        )
        .await
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(supervisor.running_jobs().await.unwrap().len(), 2);

    assert_eq!(supervisor.shutdown().await.unwrap(), 2);
    wait_final(&supervisor, a).await;
    wait_final(&supervisor, b).await;
}

#[tokio::test]
async fn test_cancel_is_accepted_once() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let id = supervisor
        .start(org_scope("acme"), block_until_cancelled)
        .await
        .unwrap();

    supervisor.cancel(id).await.unwrap();
    assert!(matches!(
        supervisor.cancel(id).await,
        Err(JobError::NotFound(found)) if found == id
    ));

    let progress = wait_final(&supervisor, id).await;
    assert_eq!(progress.status, ProgressStatus::Cancelled);
    assert_eq!(progress.phase, ProgressPhase::Done);
    assert!(progress.completed_at.is_some());
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let supervisor = JobSupervisor::spawn(memory_store());
    assert!(matches!(
        supervisor.cancel(4242).await,
        Err(JobError::NotFound(4242))
    ));
    assert!(matches!(
        supervisor.get_progress(4242).await,
        Err(JobError::NotFound(4242))
    ));
}

#[tokio::test]
async fn test_completed_job_is_deregistered_and_scope_freed() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let first = supervisor
        .start(org_scope("acme"), |_ctx| async { Ok(()) })
        .await
        .unwrap();

    let progress = wait_final(&supervisor, first).await;
    assert_eq!(progress.status, ProgressStatus::Complete);
    assert!(progress.error_message.is_none());
    wait_deregistered(&supervisor, first).await;

    // Cancelling a finished job is a no-op error
    assert!(matches!(
        supervisor.cancel(first).await,
        Err(JobError::NotFound(_))
    ));

    let second = supervisor
        .start(org_scope("acme"), |_ctx| async { Ok(()) })
        .await
        .unwrap();
    assert!(second > first);
    wait_final(&supervisor, second).await;
}

#[tokio::test]
async fn test_cancel_after_finalize_before_deregister_is_not_found() {
    let supervisor = JobSupervisor::spawn(SlowFinalizeStore::shared(Duration::from_millis(300)));
    let id = supervisor
        .start(org_scope("acme"), |_ctx| async { Ok(()) })
        .await
        .unwrap();

    // Record is final while the wrapper is still inside finalize_progress
    let progress = wait_final(&supervisor, id).await;
    assert_eq!(progress.status, ProgressStatus::Complete);
    assert!(supervisor.is_running(id).await.unwrap());

    assert!(matches!(
        supervisor.cancel(id).await,
        Err(JobError::NotFound(found)) if found == id
    ));
    assert!(!supervisor.is_running(id).await.unwrap());

    let progress = supervisor.get_progress(id).await.unwrap();
    assert_eq!(progress.status, ProgressStatus::Complete);
    assert_ne!(progress.phase, ProgressPhase::Cancelling);

    // The late Complete message finds nothing and the scope is free
    wait_deregistered(&supervisor, id).await;
    let next = supervisor
        .start(org_scope("acme"), |_ctx| async { Ok(()) })
        .await
        .unwrap();
    wait_final(&supervisor, next).await;
}

#[tokio::test]
async fn test_failed_job_records_sanitized_message() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let id = supervisor
        .start(org_scope("acme"), |_ctx| async {
            Err(JobError::transient("rate limited\n  by upstream"))
        })
        .await
        .unwrap();

    let progress = wait_final(&supervisor, id).await;
    assert_eq!(progress.status, ProgressStatus::Failed);
    let message = progress.error_message.unwrap();
    assert!(message.contains("rate limited by upstream"), "{message}");
    wait_deregistered(&supervisor, id).await;
}

#[tokio::test]
async fn test_panicking_job_is_failed_and_supervisor_survives() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let id = supervisor
        .start(org_scope("acme"), |ctx: JobContext| async move {
            if ctx.progress_id > 0 {
                panic!("body exploded");
            }
            Ok(())
        })
        .await
        .unwrap();

    let progress = wait_final(&supervisor, id).await;
    assert_eq!(progress.status, ProgressStatus::Failed);
    assert_eq!(progress.error_message.as_deref(), Some("job panicked"));
    wait_deregistered(&supervisor, id).await;

    // The actor still serves requests
    let next = supervisor
        .start(org_scope("acme"), |_ctx| async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(
        wait_final(&supervisor, next).await.status,
        ProgressStatus::Complete
    );
}

#[tokio::test]
async fn test_invalid_scope_is_rejected_without_record() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let result = supervisor
        .start(org_scope("not a slug"), |_ctx| async { Ok(()) })
        .await;
    assert!(matches!(result, Err(JobError::Validation(_))));
    assert!(supervisor.list_progress(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_finalizes_only_orphaned_records() {
    let store = memory_store();
    let supervisor = JobSupervisor::spawn(store.clone());

    // A record left behind by another process
    let orphan = store
        .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("orphaned")))
        .await
        .unwrap();

    let live = supervisor
        .start(org_scope("acme"), block_until_cancelled)
        .await
        .unwrap();

    let cutoff = Utc::now() + ChronoDuration::hours(1);
    let reconciled = supervisor.reconcile_stale(cutoff).await.unwrap();
    assert_eq!(reconciled, vec![orphan.id]);

    let orphan = supervisor.get_progress(orphan.id).await.unwrap();
    assert_eq!(orphan.status, ProgressStatus::Failed);
    assert_eq!(orphan.error_message.as_deref(), Some(ABANDONED_MESSAGE));

    let live_record = supervisor.get_progress(live).await.unwrap();
    assert_eq!(live_record.status, ProgressStatus::InProgress);

    // Nothing left to reconcile
    assert!(supervisor.reconcile_stale(cutoff).await.unwrap().is_empty());

    supervisor.cancel(live).await.unwrap();
    wait_final(&supervisor, live).await;
}

#[tokio::test]
async fn test_reconcile_ignores_recent_records() {
    let store = memory_store();
    let supervisor = JobSupervisor::spawn(store.clone());
    store
        .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("orphaned")))
        .await
        .unwrap();

    let cutoff = Utc::now() - ChronoDuration::hours(1);
    assert!(supervisor.reconcile_stale(cutoff).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_jobs_and_rejects_new_ones() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let id = supervisor
        .start(org_scope("acme"), block_until_cancelled)
        .await
        .unwrap();

    assert_eq!(supervisor.shutdown().await.unwrap(), 1);
    assert_eq!(
        wait_final(&supervisor, id).await.status,
        ProgressStatus::Cancelled
    );

    let result = supervisor
        .start(org_scope("other"), |_ctx| async { Ok(()) })
        .await;
    assert!(matches!(result, Err(JobError::Internal(_))));
}

#[tokio::test]
async fn test_job_that_ignores_cancel_is_still_recorded_cancelled() {
    let supervisor = JobSupervisor::spawn(memory_store());
    let id = supervisor
        .start(org_scope("acme"), |ctx: JobContext| async move {
            ctx.token.cancelled().await;
            Ok(())
        })
        .await
        .unwrap();

    supervisor.cancel(id).await.unwrap();
    assert_eq!(
        wait_final(&supervisor, id).await.status,
        ProgressStatus::Cancelled
    );
}
