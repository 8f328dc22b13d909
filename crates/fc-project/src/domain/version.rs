//! Project Versions
//!
//! Metadata for an uploaded artifact. The bytes themselves live with the
//! artifact transport and are addressed by `resource_id`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, Result};

pub type Md5Digest = [u8; 16];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    pub project_id: i32,
    pub version: i32,
    pub uploader: String,
    pub upload_time: DateTime<Utc>,
    /// Extension of the uploaded file, e.g. "zip"
    pub file_type: String,
    pub file_name: String,
    pub md5: Md5Digest,
    pub resource_id: String,
}

impl ProjectVersion {
    pub fn new(
        project_id: i32,
        version: i32,
        local_file: &Path,
        uploader: impl Into<String>,
        md5: Md5Digest,
        resource_id: impl Into<String>,
    ) -> Self {
        let file_name = local_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = local_file
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            project_id,
            version,
            uploader: uploader.into(),
            upload_time: Utc::now(),
            file_type,
            file_name,
            md5,
            resource_id: resource_id.into(),
        }
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }
}

/// Version metadata plus, once fetched, a local path to the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFileHandler {
    pub version: ProjectVersion,
    pub local_file: Option<PathBuf>,
}

impl ProjectFileHandler {
    pub fn metadata_only(version: ProjectVersion) -> Self {
        Self {
            version,
            local_file: None,
        }
    }

    pub fn with_local_file(mut self, path: PathBuf) -> Self {
        self.local_file = Some(path);
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.version.resource_id
    }
}

/// Parse a 32-character hex string into an MD5 digest.
pub fn parse_md5(hex_digest: &str) -> Result<Md5Digest> {
    let bytes = hex::decode(hex_digest)
        .map_err(|e| ProjectError::constraint(format!("invalid md5 '{}': {}", hex_digest, e)))?;
    bytes
        .try_into()
        .map_err(|_| ProjectError::constraint(format!("md5 '{}' is not 16 bytes", hex_digest)))
}
