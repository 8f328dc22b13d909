//! FlowCatalyst Project Store
//!
//! Persistent metadata for workflow projects:
//! - Project lifecycle with soft delete and name reuse after removal
//! - Uploaded artifact versions and the current-version pointer
//! - User and group permissions
//! - Property bundles and flow snapshots per version
//! - Append-only audit event log
//! - Retention sweeps over old versions

pub mod domain;
pub mod repository;
pub mod service;
pub mod artifact;
pub mod config;
pub mod error;

pub use domain::*;
pub use error::{ProjectError, Result};
pub use artifact::{compute_md5, ArtifactTransport, LocalArtifactTransport};
pub use config::{FieldLimits, ProjectStoreConfig};
pub use repository::{
    create_loader, EventLog, FlowStore, MemoryProjectLoader, PermissionRegistry, ProjectLoader, ProjectStore,
    PropertyStore, VersionStore,
};
pub use service::{RetentionSweeper, SweepReport};
