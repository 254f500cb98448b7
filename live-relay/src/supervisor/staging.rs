//! Local staging storage for fetched source assets.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;

/// Directory holding one staged file per running job.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_exists(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Staging file for a job. Job ids are generated UUIDs, so they are path-safe.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("relay_{job_id}.mp4"))
    }

    /// Remove the staged file of a job. Missing files are not an error.
    pub async fn cleanup(&self, job_id: &str) {
        let path = self.path_for(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(job_id, path = %path.display(), "Removed staged asset"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id, path = %path.display(), "Failed to remove staged asset: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.ensure_exists().await.unwrap();

        let path = staging.path_for("job-1");
        tokio::fs::write(&path, b"video").await.unwrap();

        staging.cleanup("job-1").await;
        assert!(!path.exists());
        staging.cleanup("job-1").await;
        assert!(!path.exists());
    }

    #[test]
    fn test_path_is_named_by_job() {
        let staging = StagingArea::new("/var/tmp/relay");
        assert_eq!(
            staging.path_for("abc"),
            PathBuf::from("/var/tmp/relay/relay_abc.mp4")
        );
    }
}
