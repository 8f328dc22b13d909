//! Project Entity
//!
//! The top-level aggregate. Versions, properties, flows, permissions and
//! events hang off the project id and outlive soft deletion.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permission::{Permission, PermissionEntry};

/// Project-level configuration that is not covered by description or permissions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    /// Users the project's flows may run as
    #[serde(default)]
    pub proxy_users: BTreeSet<String>,

    /// Free-form settings owned by callers
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ProjectSettings {
    pub fn with_proxy_user(mut self, user: impl Into<String>) -> Self {
        self.proxy_users.insert(user.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i32,

    /// Unique among active projects
    pub name: String,

    pub description: String,

    pub active: bool,

    /// Current version pointer as of the time this value was loaded.
    /// Property uploads target this version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,

    pub settings: ProjectSettings,

    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,

    /// Audit fields
    pub created_by: String,
    pub last_modified_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: i32, name: impl Into<String>, description: impl Into<String>, creator: impl Into<String>) -> Self {
        let creator = creator.into();
        let now = Utc::now();

        Self {
            id,
            name: name.into(),
            description: description.into(),
            active: true,
            version: None,
            settings: ProjectSettings::default(),
            permissions: Vec::new(),
            created_by: creator.clone(),
            last_modified_by: creator,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// Same project, targeting a specific version for property uploads.
    pub fn at_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_settings(mut self, settings: ProjectSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn user_permission(&self, user: &str) -> Option<Permission> {
        self.find_permission(user, false)
    }

    pub fn group_permission(&self, group: &str) -> Option<Permission> {
        self.find_permission(group, true)
    }

    /// Whether the user, directly or through one of its groups, holds `required`.
    pub fn has_permission(&self, user: &str, groups: &[String], required: Permission) -> bool {
        if self.user_permission(user).is_some_and(|p| p.allows(required)) {
            return true;
        }
        groups
            .iter()
            .filter_map(|g| self.group_permission(g))
            .any(|p| p.allows(required))
    }

    fn find_permission(&self, principal: &str, is_group: bool) -> Option<Permission> {
        self.permissions
            .iter()
            .find(|e| e.is_group == is_group && e.principal == principal)
            .map(|e| e.permission)
    }
}
