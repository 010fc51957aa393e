use anyhow::Result;

use ghmigrate::api::ApiServer;
use ghmigrate::config::Config;

use super::build_state;

/// Start the API server and run until SIGINT/SIGTERM
pub async fn serve(config: Config) -> Result<()> {
    println!("Starting ghmigrate API server");
    println!("=============================");
    println!("  Bind: {}", config.server.bind_address);
    println!("  Database: {}", config.database.sqlite_path.display());
    println!("  Source API: {}", config.source.github_api_url);
    match config.stale_job_timeout() {
        Some(timeout) => println!("  Stale job timeout: {}s", timeout.as_secs()),
        None => println!("  Stale job sweep: disabled"),
    }
    println!();

    let state = build_state(&config)?;
    let server = ApiServer::new(&config, state);
    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
