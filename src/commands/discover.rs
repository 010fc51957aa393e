use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use ghmigrate::config::Config;
use ghmigrate::models::ProgressStatus;

use super::build_state;

const DEFAULT_STALE_SECS: u64 = 15 * 60;

/// Run one discovery and print progress until it finishes.
/// Ctrl+C cancels the job and waits for it to finalize.
pub async fn discover(config: Config, discovery_type: &str, target: &str) -> Result<()> {
    let state = build_state(&config)?;
    let supervisor = state.supervisor.clone();

    let progress_id = state
        .discovery
        .start_discovery_raw(discovery_type, target)
        .await?;
    println!("Discovery started (progress {progress_id})");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut cancel_requested = false;

    let progress = loop {
        tokio::select! {
            result = tokio::signal::ctrl_c(), if !cancel_requested => {
                result?;
                cancel_requested = true;
                println!("Cancelling...");
                if let Err(e) = supervisor.cancel(progress_id).await {
                    tracing::warn!(progress_id = progress_id, error = %e, "Cancel failed");
                }
            }
            _ = ticker.tick() => {
                let progress = supervisor.get_progress(progress_id).await?;
                println!(
                    "  [{}] orgs {}/{}  repos {}/{}  failed {}",
                    progress.phase.as_str(),
                    progress.processed_orgs,
                    progress.total_orgs,
                    progress.processed_repos,
                    progress.total_repos,
                    progress.failed_repos,
                );
                if !progress.is_active() {
                    break progress;
                }
            }
        }
    };

    match progress.status {
        ProgressStatus::Complete => {
            println!("Discovery complete: {} repositories", progress.processed_repos);
            Ok(())
        }
        ProgressStatus::Cancelled => {
            println!("Discovery cancelled");
            Ok(())
        }
        status => anyhow::bail!(
            "Discovery {}: {}",
            status.as_str(),
            progress.error_message.unwrap_or_default()
        ),
    }
}

/// Finalize in-progress records older than the cutoff.
///
/// This process runs no jobs, so every old in-progress record qualifies.
pub async fn reconcile(config: Config, older_than_secs: Option<u64>) -> Result<()> {
    let secs = older_than_secs
        .or(config.stale_job_timeout().map(|d| d.as_secs()))
        .unwrap_or(DEFAULT_STALE_SECS);
    let state = build_state(&config)?;

    let cutoff = Utc::now() - chrono::Duration::seconds(i64::try_from(secs)?);
    let ids = state.supervisor.reconcile_stale(cutoff).await?;

    if ids.is_empty() {
        println!("No abandoned jobs older than {secs}s");
    } else {
        println!("Marked {} abandoned job(s) as failed: {ids:?}", ids.len());
    }
    Ok(())
}
