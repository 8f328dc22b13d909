//! FlowCatalyst Project Retention
//!
//! Periodically removes superseded project versions, keeping the newest
//! `FC_PROJECT_VERSION_RETENTION` versions and the current version of
//! every active project.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FC_PROJECT_CONFIG` | - | Optional TOML config file |
//! | `FC_PROJECT_DB_TYPE` | `sqlite` | Database type: `memory`, `sqlite`, `postgres` |
//! | `FC_PROJECT_DB_URL` | `sqlite://./data/projects.db` | Database connection URL |
//! | `FC_PROJECT_DB_MAX_CONNECTIONS` | `10` | Connection pool size |
//! | `FC_PROJECT_ARTIFACT_DIR` | `./data/artifacts` | Artifact storage root |
//! | `FC_PROJECT_VERSION_RETENTION` | `3` | Versions kept per project |
//! | `FC_PROJECT_RETENTION_INTERVAL_SECS` | `3600` | Seconds between sweeps |
//! | `FC_PROJECT_LOG_JSON` | `false` | Emit JSON logs |
//! | `RUST_LOG` | `info` | Log level |

use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fc_project::{create_loader, ProjectStoreConfig, RetentionSweeper};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProjectStoreConfig::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting FlowCatalyst Project Retention");

    let loader = create_loader(&config).await?;
    info!(backend = %config.backend, "Project store initialized");

    let sweeper = RetentionSweeper::new(
        loader,
        config.version_retention,
        Duration::from_secs(config.retention_interval_secs),
    );

    info!("Press Ctrl+C to shutdown");
    tokio::select! {
        _ = sweeper.start() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received...");
        }
    }

    info!("FlowCatalyst Project Retention shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
