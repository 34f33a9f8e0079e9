//! Per-request workspace
//!
//! A uniquely named directory under the configured temp root that holds a
//! job's input, output and scratch files. The directory is removed when the
//! workspace is dropped, whichever way the request ends.
//!
//! Creation runs on the blocking pool. Removal in `Drop` is synchronous, so
//! the directory is gone by the time the owning body stream finishes.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use crate::compress::{CompressionJob, CompressionProfile};

const INPUT_FILE: &str = "input.pdf";
const OUTPUT_FILE: &str = "output.pdf";

pub struct Workspace {
    id: Uuid,
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root` (created if missing)
    pub async fn create(root: &Path, id: Uuid) -> io::Result<Self> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix(&format!("gearpdf-{}-", id))
                .tempdir_in(&root)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        let path = dir.path().to_path_buf();

        tracing::debug!(job_id = %id, path = %path.display(), "Workspace created");

        Ok(Self {
            id,
            dir: Some(dir),
            path,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_path(&self) -> PathBuf {
        self.path.join(INPUT_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.path.join(OUTPUT_FILE)
    }

    /// Store the validated upload as the job input
    pub async fn write_input(&self, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.input_path();
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Describe a job whose files live in this workspace
    pub fn job(&self, profile: CompressionProfile, target_size: Option<u64>) -> CompressionJob {
        CompressionJob::new(
            self.id,
            self.input_path(),
            self.output_path(),
            profile,
            target_size,
        )
    }

    /// Remove the directory now, reporting failures to the caller
    pub fn close(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => tracing::debug!(job_id = %self.id, "Workspace removed"),
                Err(e) => tracing::error!(
                    job_id = %self.id,
                    path = %self.path.display(),
                    "Failed to remove workspace: {}",
                    e
                ),
            }
        }
    }
}
