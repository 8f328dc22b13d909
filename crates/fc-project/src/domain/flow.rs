//! Flow Snapshots

use serde::{Deserialize, Serialize};

/// A flow graph as decomposed from an uploaded archive.
///
/// The graph is produced by the archive loader and is opaque to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub graph: serde_json::Value,
}

impl Flow {
    pub fn new(id: impl Into<String>, graph: serde_json::Value) -> Self {
        Self { id: id.into(), graph }
    }

    /// A flow with no nodes or edges.
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, serde_json::json!({ "nodes": [], "edges": [] }))
    }
}
