//! PostgreSQL Project Loader
//!
//! Mutations lock the owning `projects` row with `SELECT ... FOR UPDATE`
//! before reading the state they validate against.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, info};

use super::{
    purge_artifacts, target_version, version_key, EventLog, FlowStore, PermissionRegistry, ProjectStore,
    PropertyStore, VersionStore,
};
use crate::artifact::ArtifactTransport;
use crate::config::FieldLimits;
use crate::domain::{
    EventType, Flow, Md5Digest, Permission, PermissionEntry, Project, ProjectFileHandler, ProjectLogEvent,
    ProjectSettings, ProjectVersion, Props,
};
use crate::error::{is_unique_violation, ProjectError, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id SERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        active BOOLEAN NOT NULL DEFAULT TRUE,
        current_version INTEGER,
        last_version INTEGER NOT NULL DEFAULT 0,
        settings TEXT NOT NULL DEFAULT '{}',
        created_by VARCHAR(255) NOT NULL,
        last_modified_by VARCHAR(255) NOT NULL,
        created_at BIGINT NOT NULL,
        modified_at BIGINT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_active_name ON projects(name) WHERE active",
    r#"
    CREATE TABLE IF NOT EXISTS project_versions (
        project_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        uploader VARCHAR(255) NOT NULL,
        upload_time BIGINT NOT NULL,
        file_type VARCHAR(64) NOT NULL,
        file_name VARCHAR(512) NOT NULL,
        md5 BYTEA NOT NULL,
        resource_id TEXT NOT NULL,
        PRIMARY KEY (project_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_permissions (
        project_id INTEGER NOT NULL,
        name VARCHAR(255) NOT NULL,
        is_group BOOLEAN NOT NULL,
        permissions BIGINT NOT NULL,
        modified_time BIGINT NOT NULL,
        PRIMARY KEY (project_id, name, is_group)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_properties (
        project_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        name VARCHAR(512) NOT NULL,
        modified_time BIGINT NOT NULL,
        property TEXT NOT NULL,
        PRIMARY KEY (project_id, version, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_flows (
        project_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        flow_id VARCHAR(255) NOT NULL,
        modified_time BIGINT NOT NULL,
        json TEXT NOT NULL,
        PRIMARY KEY (project_id, version, flow_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_events (
        id BIGSERIAL PRIMARY KEY,
        project_id INTEGER NOT NULL,
        event_type INTEGER NOT NULL,
        event_time BIGINT NOT NULL,
        username VARCHAR(255) NOT NULL,
        message TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_project_events_project ON project_events(project_id, event_time)",
];

const PROJECT_COLUMNS: &str = "id, name, description, active, current_version, settings, \
     created_by, last_modified_by, created_at, modified_at";

const VERSION_COLUMNS: &str = "project_id, version, uploader, upload_time, file_type, file_name, md5, resource_id";

pub struct PostgresProjectLoader {
    pool: PgPool,
    artifacts: Arc<dyn ArtifactTransport>,
    limits: FieldLimits,
}

impl PostgresProjectLoader {
    pub fn new(pool: PgPool, artifacts: Arc<dyn ArtifactTransport>, limits: FieldLimits) -> Self {
        Self {
            pool,
            artifacts,
            limits,
        }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        artifacts: Arc<dyn ArtifactTransport>,
        limits: FieldLimits,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        Ok(Self::new(pool, artifacts, limits))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Project store schema initialized");
        Ok(())
    }

    async fn current_version(&self, project_id: i32) -> Result<i32> {
        let pointer = sqlx::query_scalar::<_, Option<i32>>("SELECT current_version FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ProjectError::not_found("Project", project_id))?;
        pointer.ok_or_else(|| ProjectError::not_found("ProjectVersion", format!("{}:current", project_id)))
    }

    async fn try_post_event(&self, project_id: i32, event_type: EventType, user: &str, message: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut conn, project_id, event_type, user, message).await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| ProjectError::storage(format!("invalid timestamp {}", ms)))
}

fn project_from_row(row: &PgRow) -> Result<Project> {
    let settings: String = row.try_get("settings")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        version: row.try_get("current_version")?,
        settings: serde_json::from_str(&settings)?,
        permissions: Vec::new(),
        created_by: row.try_get("created_by")?,
        last_modified_by: row.try_get("last_modified_by")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        last_modified_at: from_millis(row.try_get("modified_at")?)?,
    })
}

fn version_from_row(row: &PgRow) -> Result<ProjectVersion> {
    let md5: Vec<u8> = row.try_get("md5")?;
    let md5: Md5Digest = md5
        .try_into()
        .map_err(|_| ProjectError::storage("stored md5 is not 16 bytes"))?;
    Ok(ProjectVersion {
        project_id: row.try_get("project_id")?,
        version: row.try_get("version")?,
        uploader: row.try_get("uploader")?,
        upload_time: from_millis(row.try_get("upload_time")?)?,
        file_type: row.try_get("file_type")?,
        file_name: row.try_get("file_name")?,
        md5,
        resource_id: row.try_get("resource_id")?,
    })
}

fn props_from_row(row: &PgRow) -> Result<Props> {
    let name: String = row.try_get("name")?;
    let property: String = row.try_get("property")?;
    Ok(Props::from_entries_json(name, &property)?)
}

fn flow_from_row(row: &PgRow) -> Result<Flow> {
    let json: String = row.try_get("json")?;
    Ok(Flow {
        id: row.try_get("flow_id")?,
        graph: serde_json::from_str(&json)?,
    })
}

/// Lock the project row for the rest of the transaction and return its
/// version high-water mark.
async fn lock_project(conn: &mut PgConnection, project_id: i32) -> Result<i32> {
    sqlx::query_scalar::<_, i32>("SELECT last_version FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ProjectError::not_found("Project", project_id))
}

async fn version_exists(conn: &mut PgConnection, project_id: i32, version: i32) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i32>("SELECT version FROM project_versions WHERE project_id = $1 AND version = $2")
        .bind(project_id)
        .bind(version)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

async fn require_version(conn: &mut PgConnection, project_id: i32, version: i32) -> Result<()> {
    if version_exists(conn, project_id, version).await? {
        Ok(())
    } else {
        Err(ProjectError::not_found("ProjectVersion", version_key(project_id, version)))
    }
}

async fn load_permissions(conn: &mut PgConnection, project_id: i32) -> Result<Vec<PermissionEntry>> {
    let rows = sqlx::query(
        "SELECT name, is_group, permissions FROM project_permissions WHERE project_id = $1 ORDER BY is_group, name",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<PermissionEntry> {
            Ok(PermissionEntry {
                principal: row.try_get("name")?,
                is_group: row.try_get("is_group")?,
                permission: Permission::from_db(row.try_get("permissions")?),
            })
        })
        .collect()
}

async fn load_project(conn: &mut PgConnection, row: &PgRow) -> Result<Project> {
    let mut project = project_from_row(row)?;
    project.permissions = load_permissions(conn, project.id).await?;
    Ok(project)
}

async fn upsert_permission(
    conn: &mut PgConnection,
    project_id: i32,
    principal: &str,
    permission: Permission,
    is_group: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO project_permissions (project_id, name, is_group, permissions, modified_time)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (project_id, name, is_group)
        DO UPDATE SET permissions = EXCLUDED.permissions, modified_time = EXCLUDED.modified_time
        "#,
    )
    .bind(project_id)
    .bind(principal)
    .bind(is_group)
    .bind(permission.to_db())
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_event(
    conn: &mut PgConnection,
    project_id: i32,
    event_type: EventType,
    user: &str,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_events (project_id, event_type, event_time, username, message) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(project_id)
    .bind(event_type.code())
    .bind(now_millis())
    .bind(user)
    .bind(message)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ProjectStore for PostgresProjectLoader {
    async fn fetch_all_active_projects(&self) -> Result<Vec<Project>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!("SELECT {} FROM projects WHERE active ORDER BY id", PROJECT_COLUMNS))
            .fetch_all(&mut *conn)
            .await?;

        let mut projects = Vec::with_capacity(rows.len());
        for row in &rows {
            projects.push(load_project(&mut conn, row).await?);
        }
        Ok(projects)
    }

    async fn fetch_project_by_id(&self, id: i32) -> Result<Project> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = $1", PROJECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| ProjectError::not_found("Project", id))?;
        load_project(&mut conn, &row).await
    }

    async fn fetch_project_by_name(&self, name: &str) -> Result<Project> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE name = $1 ORDER BY active DESC, id DESC LIMIT 1",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ProjectError::not_found("Project", name))?;
        load_project(&mut conn, &row).await
    }

    async fn create_new_project(&self, name: &str, description: &str, creator: &str) -> Result<Project> {
        self.limits.check_name(name)?;
        self.limits.check_description(description)?;

        let now = now_millis();
        let settings = serde_json::to_string(&ProjectSettings::default())?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO projects (name, description, active, settings, created_by, last_modified_by, created_at, modified_at)
            VALUES ($1, $2, TRUE, $3, $4, $4, $5, $5)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(&settings)
        .bind(creator)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => return Err(ProjectError::duplicate_name(name)),
            Err(e) => return Err(e.into()),
        };

        upsert_permission(&mut tx, id, creator, Permission::ADMIN, false).await?;
        insert_event(&mut tx, id, EventType::Created, creator, &format!("Project {} created", name)).await?;

        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = $1", PROJECT_COLUMNS))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let project = load_project(&mut tx, &row).await?;
        tx.commit().await?;

        info!(project_id = id, name = %name, creator = %creator, "Project created");
        Ok(project)
    }

    async fn remove_project(&self, project: &Project, user: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;

        let result = sqlx::query(
            "UPDATE projects SET active = FALSE, last_modified_by = $1, modified_at = $2 WHERE id = $3 AND active",
        )
        .bind(user)
        .bind(now_millis())
        .bind(project.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            debug!(project_id = project.id, "Project already inactive");
            return Ok(());
        }

        insert_event(&mut tx, project.id, EventType::Deleted, user, &format!("Project {} removed", project.name))
            .await?;
        tx.commit().await?;

        info!(project_id = project.id, user = %user, "Project removed");
        Ok(())
    }

    async fn update_description(&self, project: &Project, description: &str, user: &str) -> Result<()> {
        self.limits.check_description(description)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE projects SET description = $1, last_modified_by = $2, modified_at = $3 WHERE id = $4")
            .bind(description)
            .bind(user)
            .bind(now_millis())
            .bind(project.id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProjectError::not_found("Project", project.id));
        }

        insert_event(
            &mut tx,
            project.id,
            EventType::Description,
            user,
            &format!("Description changed to '{}'", description),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_project_settings(&self, project: &Project) -> Result<()> {
        let settings = serde_json::to_string(&project.settings)?;
        let result = sqlx::query("UPDATE projects SET settings = $1, modified_at = $2 WHERE id = $3")
            .bind(&settings)
            .bind(now_millis())
            .bind(project.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProjectError::not_found("Project", project.id));
        }
        debug!(project_id = project.id, "Project settings updated");
        Ok(())
    }
}

#[async_trait]
impl PermissionRegistry for PostgresProjectLoader {
    async fn update_permission(
        &self,
        project: &Project,
        principal: &str,
        permission: Permission,
        is_group: bool,
    ) -> Result<()> {
        if permission.is_empty() {
            return self.remove_permission(project, principal, is_group).await;
        }

        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;
        upsert_permission(&mut tx, project.id, principal, permission, is_group).await?;
        tx.commit().await?;

        debug!(project_id = project.id, principal = %principal, is_group, "Permission updated");
        Ok(())
    }

    async fn remove_permission(&self, project: &Project, principal: &str, is_group: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;
        sqlx::query("DELETE FROM project_permissions WHERE project_id = $1 AND name = $2 AND is_group = $3")
            .bind(project.id)
            .bind(principal)
            .bind(is_group)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_project_permissions(&self, project_id: i32) -> Result<Vec<PermissionEntry>> {
        let mut conn = self.pool.acquire().await?;
        load_permissions(&mut conn, project_id).await
    }
}

#[async_trait]
impl EventLog for PostgresProjectLoader {
    async fn post_event(&self, project: &Project, event_type: EventType, user: &str, message: &str) -> bool {
        match self.try_post_event(project.id, event_type, user, message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    project_id = project.id,
                    event_type = ?event_type,
                    error = %e,
                    "Failed to post project event"
                );
                false
            }
        }
    }

    async fn get_project_events(&self, project: &Project, limit: usize, offset: usize) -> Result<Vec<ProjectLogEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, event_type, event_time, username, message
            FROM project_events
            WHERE project_id = $1
            ORDER BY event_time DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(project.id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ProjectLogEvent> {
                let code: i32 = row.try_get("event_type")?;
                Ok(ProjectLogEvent {
                    project_id: row.try_get("project_id")?,
                    event_type: EventType::from_code(code)
                        .ok_or_else(|| ProjectError::storage(format!("unknown event type {}", code)))?,
                    user: row.try_get("username")?,
                    message: row.try_get("message")?,
                    time: from_millis(row.try_get("event_time")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VersionStore for PostgresProjectLoader {
    fn artifacts(&self) -> &dyn ArtifactTransport {
        self.artifacts.as_ref()
    }

    async fn add_project_version(
        &self,
        project_id: i32,
        version: i32,
        local_file: &Path,
        uploader: &str,
        md5: Md5Digest,
        resource_id: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let last_version = lock_project(&mut tx, project_id).await?;

        if version_exists(&mut tx, project_id, version).await? {
            return Err(ProjectError::DuplicateVersion { project_id, version });
        }
        if version < 1 || version <= last_version {
            return Err(ProjectError::VersionOrdering {
                project_id,
                version,
                latest: last_version,
            });
        }

        let record = ProjectVersion::new(project_id, version, local_file, uploader, md5, resource_id);
        let inserted = sqlx::query(&format!(
            "INSERT INTO project_versions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            VERSION_COLUMNS
        ))
        .bind(record.project_id)
        .bind(record.version)
        .bind(&record.uploader)
        .bind(record.upload_time.timestamp_millis())
        .bind(&record.file_type)
        .bind(&record.file_name)
        .bind(record.md5.to_vec())
        .bind(&record.resource_id)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(ProjectError::DuplicateVersion { project_id, version }),
            Err(e) => return Err(e.into()),
        }

        sqlx::query("UPDATE projects SET last_version = $1, current_version = COALESCE(current_version, $1) WHERE id = $2")
            .bind(version)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(project_id, version, uploader = %uploader, "Project version added");
        Ok(())
    }

    async fn fetch_project_meta_data(&self, project_id: i32, version: i32) -> Result<Option<ProjectFileHandler>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM project_versions WHERE project_id = $1 AND version = $2",
            VERSION_COLUMNS
        ))
        .bind(project_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| version_from_row(&row).map(ProjectFileHandler::metadata_only))
            .transpose()
    }

    async fn change_project_version(&self, project: &Project, version: i32, user: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;
        require_version(&mut tx, project.id, version).await?;

        sqlx::query("UPDATE projects SET current_version = $1, last_modified_by = $2, modified_at = $3 WHERE id = $4")
            .bind(version)
            .bind(user)
            .bind(now_millis())
            .bind(project.id)
            .execute(&mut *tx)
            .await?;

        insert_event(
            &mut tx,
            project.id,
            EventType::VersionChanged,
            user,
            &format!("Current version set to {}", version),
        )
        .await?;
        tx.commit().await?;

        info!(project_id = project.id, version, user = %user, "Project version changed");
        Ok(())
    }

    async fn get_latest_project_version(&self, project: &Project) -> Result<Option<i32>> {
        sqlx::query_scalar::<_, Option<i32>>("SELECT current_version FROM projects WHERE id = $1")
            .bind(project.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ProjectError::not_found("Project", project.id))
    }

    async fn fetch_project_versions(&self, project_id: i32) -> Result<Vec<ProjectVersion>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM project_versions WHERE project_id = $1 ORDER BY version",
            VERSION_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(version_from_row).collect()
    }

    async fn clean_older_project_version(&self, project_id: i32, version: i32) -> Result<Vec<ProjectVersion>> {
        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project_id).await?;

        // Versions start at 1, so 0 never matches when there is no pointer.
        let keep = sqlx::query_scalar::<_, Option<i32>>("SELECT current_version FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await?
            .unwrap_or(0);

        let rows = sqlx::query(&format!(
            "DELETE FROM project_versions WHERE project_id = $1 AND version < $2 AND version <> $3 RETURNING {}",
            VERSION_COLUMNS
        ))
        .bind(project_id)
        .bind(version)
        .bind(keep)
        .fetch_all(&mut *tx)
        .await?;
        let mut removed = rows.iter().map(version_from_row).collect::<Result<Vec<_>>>()?;
        removed.sort_by_key(|v| v.version);

        for table in ["project_properties", "project_flows"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE project_id = $1 AND version < $2 AND version <> $3",
                table
            ))
            .bind(project_id)
            .bind(version)
            .bind(keep)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        if !removed.is_empty() {
            info!(project_id, below = version, removed = removed.len(), "Cleaned older project versions");
        }
        purge_artifacts(self.artifacts(), &removed).await;
        Ok(removed)
    }
}

#[async_trait]
impl PropertyStore for PostgresProjectLoader {
    async fn upload_project_properties(&self, project: &Project, properties: &[Props]) -> Result<()> {
        let version = target_version(project)?;
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;
        require_version(&mut tx, project.id, version).await?;

        for props in properties {
            sqlx::query(
                r#"
                INSERT INTO project_properties (project_id, version, name, modified_time, property)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (project_id, version, name)
                DO UPDATE SET modified_time = EXCLUDED.modified_time, property = EXCLUDED.property
                "#,
            )
            .bind(project.id)
            .bind(version)
            .bind(&props.path_name)
            .bind(now)
            .bind(props.entries_json()?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(project_id = project.id, version, count = properties.len(), "Project properties uploaded");
        Ok(())
    }

    async fn fetch_project_property(&self, project: &Project, path_name: &str) -> Result<Props> {
        let version = self.current_version(project.id).await?;
        self.fetch_project_property_at(project.id, version, path_name)
            .await
    }

    async fn fetch_project_property_at(&self, project_id: i32, version: i32, path_name: &str) -> Result<Props> {
        let row = sqlx::query(
            "SELECT name, property FROM project_properties WHERE project_id = $1 AND version = $2 AND name = $3",
        )
        .bind(project_id)
        .bind(version)
        .bind(path_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ProjectError::not_found("Props", format!("{}:{}", version_key(project_id, version), path_name)))?;
        props_from_row(&row)
    }

    async fn fetch_project_properties(&self, project_id: i32, version: i32) -> Result<BTreeMap<String, Props>> {
        let rows = sqlx::query("SELECT name, property FROM project_properties WHERE project_id = $1 AND version = $2")
            .bind(project_id)
            .bind(version)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| props_from_row(row).map(|props| (props.path_name.clone(), props)))
            .collect()
    }
}

#[async_trait]
impl FlowStore for PostgresProjectLoader {
    async fn upload_flows(&self, project: &Project, version: i32, flows: &[Flow]) -> Result<()> {
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        lock_project(&mut tx, project.id).await?;
        require_version(&mut tx, project.id, version).await?;

        for flow in flows {
            sqlx::query(
                r#"
                INSERT INTO project_flows (project_id, version, flow_id, modified_time, json)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (project_id, version, flow_id)
                DO UPDATE SET modified_time = EXCLUDED.modified_time, json = EXCLUDED.json
                "#,
            )
            .bind(project.id)
            .bind(version)
            .bind(&flow.id)
            .bind(now)
            .bind(serde_json::to_string(&flow.graph)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(project_id = project.id, version, count = flows.len(), "Project flows uploaded");
        Ok(())
    }

    async fn update_flow(&self, project: &Project, version: i32, flow: &Flow) -> Result<()> {
        let result = sqlx::query(
            "UPDATE project_flows SET json = $1, modified_time = $2 WHERE project_id = $3 AND version = $4 AND flow_id = $5",
        )
        .bind(serde_json::to_string(&flow.graph)?)
        .bind(now_millis())
        .bind(project.id)
        .bind(version)
        .bind(&flow.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::not_found(
                "Flow",
                format!("{}:{}", version_key(project.id, version), flow.id),
            ));
        }
        Ok(())
    }

    async fn fetch_flow(&self, project: &Project, flow_id: &str) -> Result<Flow> {
        let version = self.current_version(project.id).await?;
        let row = sqlx::query("SELECT flow_id, json FROM project_flows WHERE project_id = $1 AND version = $2 AND flow_id = $3")
            .bind(project.id)
            .bind(version)
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ProjectError::not_found("Flow", format!("{}:{}", version_key(project.id, version), flow_id)))?;
        flow_from_row(&row)
    }

    async fn fetch_all_project_flows(&self, project: &Project) -> Result<Vec<Flow>> {
        let version = self.current_version(project.id).await?;
        let rows = sqlx::query("SELECT flow_id, json FROM project_flows WHERE project_id = $1 AND version = $2 ORDER BY flow_id")
            .bind(project.id)
            .bind(version)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(flow_from_row).collect()
    }
}
