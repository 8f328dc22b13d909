//! Project Permissions
//!
//! Access-control entries keyed by (project, principal, is_group).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of rights a principal holds on a project
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permission: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const EXECUTE = 0x0000_0004;
        const SCHEDULE = 0x0000_0008;
        const METRICS = 0x0000_0010;
        const ADMIN = 0x0800_0000;
        const CREATE_PROJECTS = 0x4000_0000;
    }
}

impl Permission {
    /// ADMIN implies every other right.
    pub fn allows(self, required: Permission) -> bool {
        self.contains(Permission::ADMIN) || self.contains(required)
    }

    pub fn to_db(self) -> i64 {
        i64::from(self.bits())
    }

    pub fn from_db(bits: i64) -> Self {
        Self::from_bits_retain(bits as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    /// User id or group name
    pub principal: String,
    pub is_group: bool,
    pub permission: Permission,
}

impl PermissionEntry {
    pub fn user(principal: impl Into<String>, permission: Permission) -> Self {
        Self {
            principal: principal.into(),
            is_group: false,
            permission,
        }
    }

    pub fn group(principal: impl Into<String>, permission: Permission) -> Self {
        Self {
            principal: principal.into(),
            is_group: true,
            permission,
        }
    }
}
