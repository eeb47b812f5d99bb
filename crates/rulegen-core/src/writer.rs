//! `.mdc` document writer.
//!
//! ## Storage Layout
//!
//! ```text
//! rules-mdc/
//! └── frontend_frameworks/
//!     └── react/
//!         ├── react.mdc
//!         └── next-js.mdc
//! ```
//!
//! Writes go through a temp file and a rename, so a reader never sees a
//! half-written document and a repeated write simply replaces the file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::catalog::slugify;
use crate::job::{Job, JobId};
use crate::scheduler::OutputSink;
use crate::{Error, Result};

/// File extension of generated documents.
pub const MDC_EXTENSION: &str = "mdc";

/// Writes succeeded jobs under an output root.
#[derive(Debug, Clone)]
pub struct MdcWriter {
    root: PathBuf,
}

impl MdcWriter {
    /// Writer rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination of the document for `id`.
    ///
    /// Leading segments become directories; the last segment is slugified
    /// into the file name.
    pub fn path_for(&self, id: &JobId) -> Result<PathBuf> {
        let segments: Vec<&str> = id.segments().collect();
        let Some((library, dirs)) = segments.split_last() else {
            return Err(Error::Storage(format!("empty job id '{id}'")));
        };

        let mut path = self.root.clone();
        for dir in dirs {
            if dir.is_empty() || *dir == "." || *dir == ".." || dir.contains('\\') {
                return Err(Error::Storage(format!(
                    "job id '{id}' has an unusable path segment '{dir}'"
                )));
            }
            path.push(dir);
        }

        let slug = slugify(library);
        if slug.is_empty() {
            return Err(Error::Storage(format!(
                "job id '{id}' has no usable file name"
            )));
        }
        path.push(format!("{slug}.{MDC_EXTENSION}"));
        Ok(path)
    }

    /// Atomically write `text` for `id`, returning the final path.
    pub async fn write_text(&self, id: &JobId, text: &str) -> Result<PathBuf> {
        let path = self.path_for(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let tmp_path = path.with_extension(format!("{MDC_EXTENSION}.tmp"));
        fs::write(&tmp_path, text)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {e}", tmp_path.display())))?;

        #[cfg(target_os = "windows")]
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to replace document: {e}")))?;
        }

        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!(
                "Failed to commit {}: {err}",
                path.display()
            )));
        }

        info!("Created {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl OutputSink for MdcWriter {
    async fn write(&self, job: &Job, text: &str) -> Result<()> {
        self.write_text(&job.id, text).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_layout() {
        let writer = MdcWriter::new("/out");
        let path = writer
            .path_for(&JobId::new("frontend_frameworks/react/Next.js"))
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/out/frontend_frameworks/react/next-js.mdc")
        );
    }

    #[test]
    fn test_traversal_segments_are_rejected() {
        let writer = MdcWriter::new("/out");
        assert!(writer.path_for(&JobId::new("../etc/passwd")).is_err());
        assert!(writer.path_for(&JobId::new("a//b")).is_err());
        assert!(writer.path_for(&JobId::new("a/b/+++")).is_err());
    }

    #[tokio::test]
    async fn test_write_creates_dirs_and_replaces() {
        let dir = TempDir::new().unwrap();
        let writer = MdcWriter::new(dir.path());
        let id = JobId::new("backend/python/django");

        let path = writer.write_text(&id, "first").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        let again = writer.write_text(&id, "second").await.unwrap();
        assert_eq!(again, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("mdc.tmp").exists());
    }

    #[tokio::test]
    async fn test_output_sink_writes_job_text() {
        let dir = TempDir::new().unwrap();
        let writer = MdcWriter::new(dir.path());
        let job = Job::new(JobId::new("a/b/c"), "", "");

        OutputSink::write(&writer, &job, "---\nbody").await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("a/b/c.mdc")).unwrap();
        assert_eq!(written, "---\nbody");
    }
}
