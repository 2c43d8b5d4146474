//! Persistence boundary for completed downloads.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{Artifact, ItemId};

/// Abstraction over artifact persistence.
///
/// `exists` is what makes the whole pipeline restartable: identifiers whose
/// artifact is already persisted are skipped without touching the network.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Whether an artifact for this identifier is already persisted
    async fn exists(&self, id: &ItemId) -> bool;

    /// Persist the artifact for this identifier
    async fn persist(&self, id: &ItemId, artifact: Artifact) -> Result<()>;
}

/// [`Sink`] writing one file per artifact under a directory.
///
/// Identifiers are percent-encoded to form safe file names, so ids containing
/// separators or unicode cannot escape the sink directory.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create a sink rooted at `dir` (created on first persist)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory artifacts are written into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ItemId) -> PathBuf {
        self.dir
            .join(urlencoding::encode(id.as_str()).into_owned())
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn exists(&self, id: &ItemId) -> bool {
        tokio::fs::try_exists(self.path_for(id))
            .await
            .unwrap_or(false)
    }

    async fn persist(&self, id: &ItemId, artifact: Artifact) -> Result<()> {
        let path = self.path_for(id);
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Persistence(format!(
                "failed to create sink directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        tokio::fs::write(&path, &artifact.data).await.map_err(|e| {
            Error::Persistence(format!("failed to write '{}': {e}", path.display()))
        })?;
        tracing::debug!(id = %id, path = %path.display(), bytes = artifact.data.len(), "Artifact persisted");
        Ok(())
    }
}
