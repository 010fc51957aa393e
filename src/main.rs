use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ghmigrate::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "ghmigrate",
    version,
    about = "Repository migration lifecycle engine: discovery, batches, dry-runs and migrations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one discovery in the foreground and wait for it
    Discover {
        /// organization, enterprise or project
        #[arg(short = 't', long, default_value = "organization")]
        discovery_type: String,

        /// Organization or enterprise slug, or `organization/project`
        target: String,
    },

    /// Mark abandoned in-progress jobs as failed
    Reconcile {
        /// Age after which an in-progress record counts as abandoned
        #[arg(long)]
        older_than_secs: Option<u64>,
    },

    /// Print migration progress, velocity and ETA
    Summary {
        /// Restrict to one organization
        #[arg(short, long)]
        organization: Option<String>,

        /// Restrict to one batch
        #[arg(short, long)]
        batch: Option<i64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;

    if let Err(e) = ghmigrate::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server = ghmigrate::config::ServerConfig::builder()
                    .bind_address_str(&bind)?
                    .enable_cors(config.server.enable_cors)
                    .enable_request_logging(config.server.enable_request_logging)
                    .build();
            }
            commands::serve(config).await?;
        }

        Commands::Discover {
            discovery_type,
            target,
        } => {
            tracing::info!(
                discovery_type = %discovery_type,
                target = %target,
                "Starting discover command"
            );
            commands::discover(config, &discovery_type, &target).await?;
        }

        Commands::Reconcile { older_than_secs } => {
            commands::reconcile(config, older_than_secs).await?;
        }

        Commands::Summary {
            organization,
            batch,
            json,
        } => {
            commands::summary(config, organization, batch, json).await?;
        }
    }

    Ok(())
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("ghmigrate=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(format!("ghmigrate={level},warn"))
        })?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
