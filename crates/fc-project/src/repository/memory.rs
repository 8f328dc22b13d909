//! In-Memory Project Loader
//!
//! All relations live in one `MemoryState` behind a single lock; every
//! operation takes the lock once, so each call is one linearizable unit.
//! Intended for tests and single-process deployments.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{
    purge_artifacts, target_version, version_key, EventLog, FlowStore, PermissionRegistry,
    ProjectStore, PropertyStore, VersionStore,
};
use crate::artifact::ArtifactTransport;
use crate::config::FieldLimits;
use crate::domain::{
    EventType, Flow, Md5Digest, Permission, PermissionEntry, Project, ProjectFileHandler, ProjectLogEvent,
    ProjectVersion, Props,
};
use crate::error::{ProjectError, Result};

struct ProjectRow {
    project: Project,
    /// Highest version ever registered; survives cleanup
    last_version: i32,
}

#[derive(Default)]
struct MemoryState {
    last_project_id: i32,
    projects: BTreeMap<i32, ProjectRow>,
    versions: BTreeMap<(i32, i32), ProjectVersion>,
    permissions: BTreeMap<(i32, bool, String), Permission>,
    properties: BTreeMap<(i32, i32, String), Props>,
    flows: BTreeMap<(i32, i32, String), Flow>,
    events: Vec<ProjectLogEvent>,
}

impl MemoryState {
    fn row(&self, project_id: i32) -> Result<&ProjectRow> {
        self.projects
            .get(&project_id)
            .ok_or_else(|| ProjectError::not_found("Project", project_id))
    }

    fn row_mut(&mut self, project_id: i32) -> Result<&mut ProjectRow> {
        self.projects
            .get_mut(&project_id)
            .ok_or_else(|| ProjectError::not_found("Project", project_id))
    }

    fn assemble(&self, row: &ProjectRow) -> Project {
        let mut project = row.project.clone();
        project.permissions = self.permissions_of(project.id);
        project
    }

    fn permissions_of(&self, project_id: i32) -> Vec<PermissionEntry> {
        self.permissions
            .range((project_id, false, String::new())..)
            .take_while(|((pid, _, _), _)| *pid == project_id)
            .map(|((_, is_group, principal), permission)| PermissionEntry {
                principal: principal.clone(),
                is_group: *is_group,
                permission: *permission,
            })
            .collect()
    }

    fn current_version(&self, project_id: i32) -> Result<i32> {
        self.row(project_id)?
            .project
            .version
            .ok_or_else(|| ProjectError::not_found("ProjectVersion", format!("{}:current", project_id)))
    }

    fn require_version(&self, project_id: i32, version: i32) -> Result<()> {
        if self.versions.contains_key(&(project_id, version)) {
            Ok(())
        } else {
            Err(ProjectError::not_found("ProjectVersion", version_key(project_id, version)))
        }
    }

    fn append_event(&mut self, project_id: i32, event_type: EventType, user: &str, message: impl Into<String>) {
        self.events
            .push(ProjectLogEvent::new(project_id, event_type, user, message));
    }

    fn touch(&mut self, project_id: i32, user: &str) -> Result<()> {
        let row = self.row_mut(project_id)?;
        row.project.last_modified_by = user.to_string();
        row.project.last_modified_at = Utc::now();
        Ok(())
    }
}

pub struct MemoryProjectLoader {
    state: RwLock<MemoryState>,
    artifacts: Arc<dyn ArtifactTransport>,
    limits: FieldLimits,
}

impl MemoryProjectLoader {
    pub fn new(artifacts: Arc<dyn ArtifactTransport>, limits: FieldLimits) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            artifacts,
            limits,
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectLoader {
    async fn fetch_all_active_projects(&self) -> Result<Vec<Project>> {
        let state = self.state.read();
        Ok(state
            .projects
            .values()
            .filter(|row| row.project.active)
            .map(|row| state.assemble(row))
            .collect())
    }

    async fn fetch_project_by_id(&self, id: i32) -> Result<Project> {
        let state = self.state.read();
        let row = state.row(id)?;
        Ok(state.assemble(row))
    }

    async fn fetch_project_by_name(&self, name: &str) -> Result<Project> {
        let state = self.state.read();
        let mut named = state.projects.values().filter(|row| row.project.name == name);
        let row = match named.clone().find(|row| row.project.active) {
            Some(active) => Some(active),
            None => named.next_back(),
        };
        row.map(|row| state.assemble(row))
            .ok_or_else(|| ProjectError::not_found("Project", name))
    }

    async fn create_new_project(&self, name: &str, description: &str, creator: &str) -> Result<Project> {
        self.limits.check_name(name)?;
        self.limits.check_description(description)?;

        let mut state = self.state.write();
        if state
            .projects
            .values()
            .any(|row| row.project.active && row.project.name == name)
        {
            return Err(ProjectError::duplicate_name(name));
        }

        let id = state
            .last_project_id
            .checked_add(1)
            .ok_or_else(|| ProjectError::storage("project id sequence exhausted"))?;
        state.last_project_id = id;
        let project = Project::new(id, name, description, creator);
        state.projects.insert(
            id,
            ProjectRow {
                project,
                last_version: 0,
            },
        );
        state
            .permissions
            .insert((id, false, creator.to_string()), Permission::ADMIN);
        state.append_event(id, EventType::Created, creator, format!("Project {} created", name));

        info!(project_id = id, name = %name, creator = %creator, "Project created");
        let row = state.row(id)?;
        Ok(state.assemble(row))
    }

    async fn remove_project(&self, project: &Project, user: &str) -> Result<()> {
        let mut state = self.state.write();
        let row = state.row_mut(project.id)?;
        if !row.project.active {
            debug!(project_id = project.id, "Project already inactive");
            return Ok(());
        }
        row.project.active = false;
        state.touch(project.id, user)?;
        state.append_event(project.id, EventType::Deleted, user, format!("Project {} removed", project.name));

        info!(project_id = project.id, user = %user, "Project removed");
        Ok(())
    }

    async fn update_description(&self, project: &Project, description: &str, user: &str) -> Result<()> {
        self.limits.check_description(description)?;

        let mut state = self.state.write();
        state.row_mut(project.id)?.project.description = description.to_string();
        state.touch(project.id, user)?;
        state.append_event(
            project.id,
            EventType::Description,
            user,
            format!("Description changed to '{}'", description),
        );
        Ok(())
    }

    async fn update_project_settings(&self, project: &Project) -> Result<()> {
        let mut state = self.state.write();
        state.row_mut(project.id)?.project.settings = project.settings.clone();
        debug!(project_id = project.id, "Project settings updated");
        Ok(())
    }
}

#[async_trait]
impl PermissionRegistry for MemoryProjectLoader {
    async fn update_permission(
        &self,
        project: &Project,
        principal: &str,
        permission: Permission,
        is_group: bool,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.row(project.id)?;

        let key = (project.id, is_group, principal.to_string());
        if permission.is_empty() {
            state.permissions.remove(&key);
        } else {
            state.permissions.insert(key, permission);
        }
        debug!(project_id = project.id, principal = %principal, is_group, "Permission updated");
        Ok(())
    }

    async fn remove_permission(&self, project: &Project, principal: &str, is_group: bool) -> Result<()> {
        self.update_permission(project, principal, Permission::empty(), is_group)
            .await
    }

    async fn get_project_permissions(&self, project_id: i32) -> Result<Vec<PermissionEntry>> {
        Ok(self.state.read().permissions_of(project_id))
    }
}

#[async_trait]
impl EventLog for MemoryProjectLoader {
    async fn post_event(&self, project: &Project, event_type: EventType, user: &str, message: &str) -> bool {
        self.state
            .write()
            .append_event(project.id, event_type, user, message);
        true
    }

    async fn get_project_events(&self, project: &Project, limit: usize, offset: usize) -> Result<Vec<ProjectLogEvent>> {
        let state = self.state.read();
        // Vec order is commit order, so ties on time resolve to the later append.
        let mut events: Vec<(usize, &ProjectLogEvent)> = state
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.project_id == project.id)
            .collect();
        events.sort_by(|(seq_a, a), (seq_b, b)| b.time.cmp(&a.time).then(seq_b.cmp(seq_a)));

        Ok(events
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[async_trait]
impl VersionStore for MemoryProjectLoader {
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
        let mut state = self.state.write();
        let row = state.row(project_id)?;
        let last_version = row.last_version;

        if state.versions.contains_key(&(project_id, version)) {
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
        state.versions.insert((project_id, version), record);

        let row = state.row_mut(project_id)?;
        row.last_version = version;
        if row.project.version.is_none() {
            row.project.version = Some(version);
        }

        debug!(project_id, version, uploader = %uploader, "Project version added");
        Ok(())
    }

    async fn fetch_project_meta_data(&self, project_id: i32, version: i32) -> Result<Option<ProjectFileHandler>> {
        Ok(self
            .state
            .read()
            .versions
            .get(&(project_id, version))
            .cloned()
            .map(ProjectFileHandler::metadata_only))
    }

    async fn change_project_version(&self, project: &Project, version: i32, user: &str) -> Result<()> {
        let mut state = self.state.write();
        state.row(project.id)?;
        state.require_version(project.id, version)?;

        state.row_mut(project.id)?.project.version = Some(version);
        state.touch(project.id, user)?;
        state.append_event(
            project.id,
            EventType::VersionChanged,
            user,
            format!("Current version set to {}", version),
        );

        info!(project_id = project.id, version, user = %user, "Project version changed");
        Ok(())
    }

    async fn get_latest_project_version(&self, project: &Project) -> Result<Option<i32>> {
        Ok(self.state.read().row(project.id)?.project.version)
    }

    async fn fetch_project_versions(&self, project_id: i32) -> Result<Vec<ProjectVersion>> {
        Ok(self
            .state
            .read()
            .versions
            .range((project_id, i32::MIN)..=(project_id, i32::MAX))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn clean_older_project_version(&self, project_id: i32, version: i32) -> Result<Vec<ProjectVersion>> {
        let removed = {
            let mut state = self.state.write();
            let current = state.row(project_id)?.project.version;

            let doomed: Vec<i32> = state
                .versions
                .range((project_id, i32::MIN)..(project_id, version))
                .map(|((_, v), _)| *v)
                .filter(|v| Some(*v) != current)
                .collect();

            let mut removed = Vec::with_capacity(doomed.len());
            for v in &doomed {
                if let Some(record) = state.versions.remove(&(project_id, *v)) {
                    removed.push(record);
                }
            }
            state
                .properties
                .retain(|(pid, v, _), _| *pid != project_id || !doomed.contains(v));
            state
                .flows
                .retain(|(pid, v, _), _| *pid != project_id || !doomed.contains(v));
            removed
        };

        if !removed.is_empty() {
            info!(project_id, below = version, removed = removed.len(), "Cleaned older project versions");
        }
        purge_artifacts(self.artifacts(), &removed).await;
        Ok(removed)
    }
}

#[async_trait]
impl PropertyStore for MemoryProjectLoader {
    async fn upload_project_properties(&self, project: &Project, properties: &[Props]) -> Result<()> {
        let version = target_version(project)?;
        let mut state = self.state.write();
        state.require_version(project.id, version)?;

        for props in properties {
            state
                .properties
                .insert((project.id, version, props.path_name.clone()), props.clone());
        }
        debug!(project_id = project.id, version, count = properties.len(), "Project properties uploaded");
        Ok(())
    }

    async fn fetch_project_property(&self, project: &Project, path_name: &str) -> Result<Props> {
        let version = self.state.read().current_version(project.id)?;
        self.fetch_project_property_at(project.id, version, path_name)
            .await
    }

    async fn fetch_project_property_at(&self, project_id: i32, version: i32, path_name: &str) -> Result<Props> {
        self.state
            .read()
            .properties
            .get(&(project_id, version, path_name.to_string()))
            .cloned()
            .ok_or_else(|| ProjectError::not_found("Props", format!("{}:{}", version_key(project_id, version), path_name)))
    }

    async fn fetch_project_properties(&self, project_id: i32, version: i32) -> Result<BTreeMap<String, Props>> {
        Ok(self
            .state
            .read()
            .properties
            .iter()
            .filter(|((pid, v, _), _)| *pid == project_id && *v == version)
            .map(|((_, _, path), props)| (path.clone(), props.clone()))
            .collect())
    }
}

#[async_trait]
impl FlowStore for MemoryProjectLoader {
    async fn upload_flows(&self, project: &Project, version: i32, flows: &[Flow]) -> Result<()> {
        let mut state = self.state.write();
        state.require_version(project.id, version)?;

        for flow in flows {
            state
                .flows
                .insert((project.id, version, flow.id.clone()), flow.clone());
        }
        debug!(project_id = project.id, version, count = flows.len(), "Project flows uploaded");
        Ok(())
    }

    async fn update_flow(&self, project: &Project, version: i32, flow: &Flow) -> Result<()> {
        let mut state = self.state.write();
        let slot = state
            .flows
            .get_mut(&(project.id, version, flow.id.clone()))
            .ok_or_else(|| ProjectError::not_found("Flow", format!("{}:{}", version_key(project.id, version), flow.id)))?;
        *slot = flow.clone();
        Ok(())
    }

    async fn fetch_flow(&self, project: &Project, flow_id: &str) -> Result<Flow> {
        let state = self.state.read();
        let version = state.current_version(project.id)?;
        state
            .flows
            .get(&(project.id, version, flow_id.to_string()))
            .cloned()
            .ok_or_else(|| ProjectError::not_found("Flow", format!("{}:{}", version_key(project.id, version), flow_id)))
    }

    async fn fetch_all_project_flows(&self, project: &Project) -> Result<Vec<Flow>> {
        let state = self.state.read();
        let version = state.current_version(project.id)?;
        Ok(state
            .flows
            .iter()
            .filter(|((pid, v, _), _)| *pid == project.id && *v == version)
            .map(|(_, flow)| flow.clone())
            .collect())
    }
}
