//! Repository Layer
//!
//! One trait per store component. `ProjectLoader` is the aggregate every
//! backend implements; callers usually hold an `Arc<dyn ProjectLoader>`.
//!
//! Backends:
//! - `MemoryProjectLoader` - single process, state behind one lock
//! - `SqliteProjectLoader` - sqlx/SQLite (feature `sqlite`)
//! - `PostgresProjectLoader` - sqlx/PostgreSQL (feature `postgres`)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::artifact::{compute_md5, ArtifactTransport, LocalArtifactTransport};
use crate::config::ProjectStoreConfig;
use crate::domain::{
    EventType, Flow, Md5Digest, Permission, PermissionEntry, Project, ProjectFileHandler, ProjectLogEvent,
    ProjectVersion, Props,
};
use crate::error::{ProjectError, Result};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryProjectLoader;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProjectLoader;
#[cfg(feature = "postgres")]
pub use postgres::PostgresProjectLoader;

/// Project lifecycle
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Active projects ordered by id.
    async fn fetch_all_active_projects(&self) -> Result<Vec<Project>>;

    async fn fetch_project_by_id(&self, id: i32) -> Result<Project>;

    /// The active project with this name, or the most recently created
    /// inactive one when no active project holds the name.
    async fn fetch_project_by_name(&self, name: &str) -> Result<Project>;

    /// Creates the project, grants the creator ADMIN and records a CREATED event.
    async fn create_new_project(&self, name: &str, description: &str, creator: &str) -> Result<Project>;

    /// Soft delete. Removing an inactive project is a no-op.
    async fn remove_project(&self, project: &Project, user: &str) -> Result<()>;

    async fn update_description(&self, project: &Project, description: &str, user: &str) -> Result<()>;

    async fn update_project_settings(&self, project: &Project) -> Result<()>;
}

/// Access-control entries keyed by (project, principal, is_group)
#[async_trait]
pub trait PermissionRegistry: Send + Sync {
    /// Upsert. An empty permission removes the entry.
    async fn update_permission(
        &self,
        project: &Project,
        principal: &str,
        permission: Permission,
        is_group: bool,
    ) -> Result<()>;

    /// Absent entries are a no-op.
    async fn remove_permission(&self, project: &Project, principal: &str, is_group: bool) -> Result<()>;

    async fn get_project_permissions(&self, project_id: i32) -> Result<Vec<PermissionEntry>>;
}

/// Per-project audit trail
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Best effort. Backend failures are logged and reported as `false`.
    async fn post_event(&self, project: &Project, event_type: EventType, user: &str, message: &str) -> bool;

    /// Most recent first.
    async fn get_project_events(&self, project: &Project, limit: usize, offset: usize) -> Result<Vec<ProjectLogEvent>>;
}

/// Uploaded artifact versions and the current-version pointer
#[async_trait]
pub trait VersionStore: Send + Sync {
    fn artifacts(&self) -> &dyn ArtifactTransport;

    /// Hands the file to the artifact transport and registers the version.
    async fn upload_project_file(&self, project_id: i32, version: i32, local_file: &Path, user: &str) -> Result<()> {
        let md5 = compute_md5(local_file).await?;
        let resource_id = self.artifacts().store(project_id, version, local_file, &md5).await?;

        if let Err(e) = self
            .add_project_version(project_id, version, local_file, user, md5, &resource_id)
            .await
        {
            if let Err(cleanup) = self.artifacts().delete(&resource_id).await {
                warn!(
                    resource_id = %resource_id,
                    error = %cleanup,
                    "Failed to discard artifact of rejected version"
                );
            }
            return Err(e);
        }

        info!(
            project_id,
            version,
            resource_id = %resource_id,
            uploader = %user,
            "Project file uploaded"
        );
        Ok(())
    }

    /// Registers version metadata. Rejects an existing version with
    /// `DuplicateVersion` and any version not above the project's
    /// high-water mark with `VersionOrdering`.
    async fn add_project_version(
        &self,
        project_id: i32,
        version: i32,
        local_file: &Path,
        uploader: &str,
        md5: Md5Digest,
        resource_id: &str,
    ) -> Result<()>;

    /// Metadata only; `None` when the version does not exist.
    async fn fetch_project_meta_data(&self, project_id: i32, version: i32) -> Result<Option<ProjectFileHandler>>;

    async fn get_uploaded_file(&self, project_id: i32, version: i32) -> Result<ProjectFileHandler> {
        let handler = self
            .fetch_project_meta_data(project_id, version)
            .await?
            .ok_or_else(|| ProjectError::not_found("ProjectVersion", version_key(project_id, version)))?;
        let path = self.artifacts().fetch(handler.resource_id()).await?;
        Ok(handler.with_local_file(path))
    }

    async fn change_project_version(&self, project: &Project, version: i32, user: &str) -> Result<()>;

    /// The current-version pointer, `None` before the first version.
    async fn get_latest_project_version(&self, project: &Project) -> Result<Option<i32>>;

    /// Retained versions in ascending order.
    async fn fetch_project_versions(&self, project_id: i32) -> Result<Vec<ProjectVersion>>;

    /// Deletes versions below `version` with their properties and flows,
    /// never the current one. Returns the removed versions.
    async fn clean_older_project_version(&self, project_id: i32, version: i32) -> Result<Vec<ProjectVersion>>;
}

/// Property bundles per project version
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Writes to `project.version`, replacing a bundle with the same path.
    async fn upload_project_property(&self, project: &Project, props: &Props) -> Result<()> {
        self.upload_project_properties(project, std::slice::from_ref(props)).await
    }

    async fn upload_project_properties(&self, project: &Project, properties: &[Props]) -> Result<()>;

    async fn update_project_property(&self, project: &Project, props: &Props) -> Result<()> {
        self.upload_project_property(project, props).await
    }

    /// Resolved against the stored current-version pointer.
    async fn fetch_project_property(&self, project: &Project, path_name: &str) -> Result<Props>;

    async fn fetch_project_property_at(&self, project_id: i32, version: i32, path_name: &str) -> Result<Props>;

    async fn fetch_project_properties(&self, project_id: i32, version: i32) -> Result<BTreeMap<String, Props>>;
}

/// Flow snapshots per project version
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn upload_flows(&self, project: &Project, version: i32, flows: &[Flow]) -> Result<()>;

    async fn upload_flow(&self, project: &Project, version: i32, flow: &Flow) -> Result<()> {
        self.upload_flows(project, version, std::slice::from_ref(flow)).await
    }

    /// Overwrites an existing snapshot; `NotFound` if there is none.
    async fn update_flow(&self, project: &Project, version: i32, flow: &Flow) -> Result<()>;

    /// Resolved against the stored current-version pointer.
    async fn fetch_flow(&self, project: &Project, flow_id: &str) -> Result<Flow>;

    /// All flows of the current version, ordered by flow id.
    async fn fetch_all_project_flows(&self, project: &Project) -> Result<Vec<Flow>>;
}

/// The complete store contract.
pub trait ProjectLoader: ProjectStore + PermissionRegistry + EventLog + VersionStore + PropertyStore + FlowStore {}

impl<T> ProjectLoader for T where T: ProjectStore + PermissionRegistry + EventLog + VersionStore + PropertyStore + FlowStore {}

/// Create a loader based on configuration
pub async fn create_loader(config: &ProjectStoreConfig) -> Result<Arc<dyn ProjectLoader>> {
    let local = LocalArtifactTransport::new(&config.artifact_dir);
    info!(transport = local.name(), root = %local.root().display(), "Using artifact transport");
    let artifacts: Arc<dyn ArtifactTransport> = Arc::new(local);

    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory project store");
            Ok(Arc::new(MemoryProjectLoader::new(artifacts, config.limits())))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            info!(url = %config.database_url, "Using SQLite project store");
            let loader =
                SqliteProjectLoader::connect(&config.database_url, config.max_connections, artifacts, config.limits())
                    .await?;
            loader.init_schema().await?;
            Ok(Arc::new(loader))
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            info!("Using PostgreSQL project store");
            let loader =
                PostgresProjectLoader::connect(&config.database_url, config.max_connections, artifacts, config.limits())
                    .await?;
            loader.init_schema().await?;
            Ok(Arc::new(loader))
        }
        other => Err(ProjectError::constraint(format!("Unknown project store backend: {}", other))),
    }
}

/// Remove the blobs of cleaned versions. Failures leave orphaned blobs
/// behind but never undo the cleanup.
pub(crate) async fn purge_artifacts(transport: &dyn ArtifactTransport, removed: &[ProjectVersion]) {
    for version in removed {
        if let Err(e) = transport.delete(&version.resource_id).await {
            warn!(
                project_id = version.project_id,
                version = version.version,
                resource_id = %version.resource_id,
                error = %e,
                "Failed to delete artifact of cleaned version"
            );
        }
    }
}

/// The version property uploads target.
pub(crate) fn target_version(project: &Project) -> Result<i32> {
    project
        .version
        .ok_or_else(|| ProjectError::not_found("ProjectVersion", format!("{}:current", project.id)))
}

pub(crate) fn version_key(project_id: i32, version: i32) -> String {
    format!("{}:{}", project_id, version)
}
