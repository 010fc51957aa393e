use anyhow::Result;
use chrono::Utc;

use ghmigrate::analytics::MigrationAnalytics;
use ghmigrate::config::Config;
use ghmigrate::storage::RepositoryFilter;
use ghmigrate::utils::format_bytes;

use super::open_store;

/// Print analytics for the whole estate, one organization or one batch
pub async fn summary(
    config: Config,
    organization: Option<String>,
    batch_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let filter = RepositoryFilter {
        organization,
        batch_id,
        ..RepositoryFilter::default()
    };

    let analytics = MigrationAnalytics::compute(store.as_ref(), &filter, Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analytics)?);
        return Ok(());
    }

    let s = &analytics.summary;
    println!("Migration Summary");
    println!("=================");
    println!("  Total:        {}", s.total);
    println!("  Completed:    {}", s.completed);
    println!("  In progress:  {}", s.in_progress);
    println!("  Pending:      {}", s.pending);
    println!("  Failed:       {}", s.failed);
    println!("  Excluded:     {}", s.excluded);
    println!();
    println!("  Completion rate: {:.1}%", s.completion_rate * 100.0);
    println!("  Success rate:    {:.1}%", s.success_rate * 100.0);
    println!(
        "  Velocity: {:.2}/day (7d), {:.2}/day (30d)",
        analytics.velocity_7d.repos_per_day, analytics.velocity_30d.repos_per_day
    );
    match (analytics.eta.days_remaining, analytics.eta.estimated_completion) {
        (Some(days), Some(at)) => {
            println!("  ETA: {days:.1} days ({})", at.format("%Y-%m-%d"))
        }
        _ => println!("  ETA: unknown (no recent completions)"),
    }

    let c = &analytics.complexity;
    println!();
    println!(
        "  Complexity: simple {}, medium {}, complex {}, very complex {}",
        c.simple, c.medium, c.complex, c.very_complex
    );
    let z = &analytics.size;
    println!(
        "  Size: <{} {}, <{} {}, <{} {}, larger {}",
        format_bytes(100 * 1024 * 1024),
        z.small,
        format_bytes(1024 * 1024 * 1024),
        z.medium,
        format_bytes(5 * 1024 * 1024 * 1024),
        z.large,
        z.very_large
    );
    Ok(())
}
