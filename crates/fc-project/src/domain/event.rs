//! Project Log Events
//!
//! Append-only audit trail per project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type. Numeric codes are persisted and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Deleted,
    UserPermission,
    GroupPermission,
    Description,
    Uploaded,
    Schedule,
    Sla,
    ProxyUser,
    Purge,
    VersionChanged,
    Error,
}

impl EventType {
    pub fn code(self) -> i32 {
        match self {
            EventType::Created => 1,
            EventType::Deleted => 2,
            EventType::UserPermission => 3,
            EventType::GroupPermission => 4,
            EventType::Description => 5,
            EventType::Uploaded => 6,
            EventType::Schedule => 7,
            EventType::Sla => 8,
            EventType::ProxyUser => 9,
            EventType::Purge => 10,
            EventType::VersionChanged => 11,
            EventType::Error => 128,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let event_type = match code {
            1 => EventType::Created,
            2 => EventType::Deleted,
            3 => EventType::UserPermission,
            4 => EventType::GroupPermission,
            5 => EventType::Description,
            6 => EventType::Uploaded,
            7 => EventType::Schedule,
            8 => EventType::Sla,
            9 => EventType::ProxyUser,
            10 => EventType::Purge,
            11 => EventType::VersionChanged,
            128 => EventType::Error,
            _ => return None,
        };
        Some(event_type)
    }

    pub fn permission(is_group: bool) -> Self {
        if is_group {
            EventType::GroupPermission
        } else {
            EventType::UserPermission
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLogEvent {
    pub project_id: i32,
    pub event_type: EventType,
    pub user: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl ProjectLogEvent {
    pub fn new(project_id: i32, event_type: EventType, user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            project_id,
            event_type,
            user: user.into(),
            message: message.into(),
            time: Utc::now(),
        }
    }
}
