//! Domain Models
//!
//! Projects and everything a project owns: versions, permissions,
//! property bundles, flow snapshots and audit events.

pub mod project;
pub mod permission;
pub mod version;
pub mod props;
pub mod flow;
pub mod event;

pub use project::*;
pub use permission::*;
pub use version::*;
pub use props::*;
pub use flow::*;
pub use event::*;
