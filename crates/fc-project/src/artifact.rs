//! Artifact Transport
//!
//! The store never holds archive bytes. Uploaded archives are handed to a
//! transport which returns a resource id; the store records that id with
//! the version metadata.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md5::{Digest, Md5};
use tracing::debug;

use crate::domain::Md5Digest;
use crate::error::{ProjectError, Result};

#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    /// Persist the file and return the resource id that addresses it.
    async fn store(&self, project_id: i32, version: i32, local_file: &Path, md5: &Md5Digest) -> Result<String>;

    /// Resolve a resource id to a readable local path.
    async fn fetch(&self, resource_id: &str) -> Result<PathBuf>;

    /// Remove the artifact. Missing artifacts are not an error.
    async fn delete(&self, resource_id: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Compute the MD5 digest of a local file.
pub async fn compute_md5(path: &Path) -> Result<Md5Digest> {
    let bytes = tokio::fs::read(path).await?;
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&Md5::digest(&bytes));
    Ok(digest)
}

/// Stores artifacts as plain files below a root directory.
///
/// Resource ids have the form `{project_id}/{version}/{uuid}-{file_name}`.
pub struct LocalArtifactTransport {
    root: PathBuf,
}

impl LocalArtifactTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, resource_id: &str) -> Result<PathBuf> {
        let relative = Path::new(resource_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes {
            return Err(ProjectError::constraint(format!("invalid resource id '{}'", resource_id)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactTransport for LocalArtifactTransport {
    async fn store(&self, project_id: i32, version: i32, local_file: &Path, md5: &Md5Digest) -> Result<String> {
        let file_name = local_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ProjectError::constraint(format!("'{}' is not a file", local_file.display())))?;

        let resource_id = format!("{}/{}/{}-{}", project_id, version, uuid::Uuid::new_v4(), file_name);
        let target = self.resolve(&resource_id)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_file, &target).await?;

        debug!(
            resource_id = %resource_id,
            md5 = %hex::encode(md5),
            "Stored project artifact"
        );
        Ok(resource_id)
    }

    async fn fetch(&self, resource_id: &str) -> Result<PathBuf> {
        let path = self.resolve(resource_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ProjectError::not_found("Artifact", resource_id));
        }
        Ok(path)
    }

    async fn delete(&self, resource_id: &str) -> Result<()> {
        let path = self.resolve(resource_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}
