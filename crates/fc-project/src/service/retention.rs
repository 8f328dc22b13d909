//! Version Retention
//!
//! Periodically trims every active project down to its newest
//! `retained_versions` version numbers. The current version is never
//! removed, even when it falls below the threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::domain::{EventType, Project};
use crate::error::Result;
use crate::repository::ProjectLoader;

/// Principal recorded on purge events.
pub const RETENTION_USER: &str = "fc-project-retention";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub projects_scanned: usize,
    pub versions_removed: usize,
    pub failures: usize,
}

pub struct RetentionSweeper {
    loader: Arc<dyn ProjectLoader>,
    retained_versions: u32,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(loader: Arc<dyn ProjectLoader>, retained_versions: u32, interval: Duration) -> Self {
        Self {
            loader,
            retained_versions: retained_versions.max(1),
            interval,
        }
    }

    pub async fn start(&self) {
        info!(
            retained_versions = self.retained_versions,
            interval_secs = self.interval.as_secs(),
            "Starting project retention sweeper"
        );
        loop {
            match self.sweep_once().await {
                Ok(report) if report.versions_removed > 0 || report.failures > 0 => {
                    info!(
                        projects = report.projects_scanned,
                        removed = report.versions_removed,
                        failures = report.failures,
                        "Retention sweep finished"
                    );
                }
                Ok(_) => debug!("Retention sweep found nothing to remove"),
                Err(e) => error!("Error running retention sweep: {}", e),
            }
            sleep(self.interval).await;
        }
    }

    /// One pass over all active projects. A failing project is logged and
    /// counted; it does not stop the pass.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let projects = self.loader.fetch_all_active_projects().await?;
        let mut report = SweepReport {
            projects_scanned: projects.len(),
            ..Default::default()
        };

        for project in &projects {
            match self.sweep_project(project).await {
                Ok(removed) => report.versions_removed += removed,
                Err(e) => {
                    warn!(project_id = project.id, error = %e, "Retention sweep failed for project");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sweep_project(&self, project: &Project) -> Result<usize> {
        let versions = self.loader.fetch_project_versions(project.id).await?;
        let Some(newest) = versions.iter().map(|v| v.version).max() else {
            return Ok(0);
        };

        // Computed in i64 so retention values above i32::MAX cannot wrap.
        let threshold = i64::from(newest) - i64::from(self.retained_versions) + 1;
        if threshold <= 1 {
            return Ok(0);
        }
        let threshold = i32::try_from(threshold).unwrap_or(newest);

        let removed = self
            .loader
            .clean_older_project_version(project.id, threshold)
            .await?;
        if removed.is_empty() {
            return Ok(0);
        }

        let listed = removed
            .iter()
            .map(|v| v.version.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.loader
            .post_event(
                project,
                EventType::Purge,
                RETENTION_USER,
                &format!("Removed versions {} below retention threshold {}", listed, threshold),
            )
            .await;

        Ok(removed.len())
    }
}
