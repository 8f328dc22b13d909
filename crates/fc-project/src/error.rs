//! Project Store Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate project name: an active project named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Duplicate version: project {project_id} already has version {version}")]
    DuplicateVersion { project_id: i32, version: i32 },

    #[error("Version ordering error: version {version} for project {project_id} is not newer than {latest}")]
    VersionOrdering { project_id: i32, version: i32, latest: i32 },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String, transient: bool },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProjectError {
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
impl From<sqlx::Error> for ProjectError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::transient(err.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::constraint(db.message().to_string())
            }
            _ => Self::storage(err.to_string()),
        }
    }
}

/// True when the error is a unique/primary key violation reported by the database.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub type Result<T> = std::result::Result<T, ProjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_storage_is_retryable() {
        assert!(ProjectError::transient("pool timed out").is_retryable());
        assert!(!ProjectError::storage("disk full").is_retryable());
        assert!(!ProjectError::constraint("name too long").is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = ProjectError::not_found("Project", 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Entity not found: Project with id 42");
    }
}
