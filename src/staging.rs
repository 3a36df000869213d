//! Local staging area
//!
//! One regular file per task at `{download_dir}/{file_name}`. Presence with a
//! non-zero size is the only resumability signal. Downloads stream into a
//! `{file_name}.part` sibling that is renamed into place once the body is
//! complete and non-empty, so the staged path never holds a partial file.

use crate::error::{AttemptError, PrerequisiteError};
use crate::types::{FileTask, LocalArtifact};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

const PARTIAL_SUFFIX: &str = ".part";

/// Filesystem staging directory shared by all download workers
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Staging area rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Staging directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the staging directory if needed
    pub async fn prepare(&self) -> Result<(), PrerequisiteError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| PrerequisiteError::StagingDirectory {
                path: self.root.clone(),
                source,
            })
    }

    /// Final path of a task's staged file
    pub fn path_for(&self, task: &FileTask) -> PathBuf {
        self.root.join(&task.file_name)
    }

    /// Path the download is streamed into before it is committed
    pub fn partial_path_for(&self, task: &FileTask) -> PathBuf {
        self.root.join(format!("{}{}", task.file_name, PARTIAL_SUFFIX))
    }

    /// The staged artifact, if the file exists and is non-empty
    pub async fn existing(&self, task: &FileTask) -> Option<LocalArtifact> {
        let path = self.path_for(task);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(LocalArtifact {
                path,
                size_bytes: meta.len(),
            }),
            _ => None,
        }
    }

    /// Open (truncating) the partial file for a new download attempt
    pub async fn begin(
        &self,
        task: &FileTask,
        chunk_size: usize,
    ) -> Result<StagingFile, AttemptError> {
        let partial = self.partial_path_for(task);
        let file = File::create(&partial).await?;
        Ok(StagingFile {
            writer: BufWriter::with_capacity(chunk_size.max(1), file),
            partial,
            target: self.path_for(task),
            chunk_size: chunk_size.max(1),
            largest_write: 0,
        })
    }

    /// Remove a leftover partial file; missing files are not an error
    pub async fn discard_partial(&self, task: &FileTask) {
        let partial = self.partial_path_for(task);
        match tokio::fs::remove_file(&partial).await {
            Ok(()) => tracing::debug!(path = %partial.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %partial.display(),
                error = %e,
                "Failed to remove partial download"
            ),
        }
    }
}

/// An in-progress download attempt
///
/// Writes go through a buffer of `chunk_size` bytes and larger inputs are
/// split, so no single write exceeds the chunk size.
pub struct StagingFile {
    writer: BufWriter<File>,
    partial: PathBuf,
    target: PathBuf,
    chunk_size: usize,
    largest_write: usize,
}

impl StagingFile {
    /// Append bytes from the response body
    pub async fn write(&mut self, data: &[u8]) -> Result<(), AttemptError> {
        for piece in data.chunks(self.chunk_size) {
            self.writer.write_all(piece).await?;
            self.largest_write = self.largest_write.max(piece.len());
        }
        Ok(())
    }

    /// Largest single write issued so far
    pub fn largest_write(&self) -> usize {
        self.largest_write
    }

    /// Flush, check the result is non-empty, and move it to its final path
    pub async fn commit(mut self) -> Result<LocalArtifact, AttemptError> {
        self.writer.flush().await?;
        let file = self.writer.into_inner();
        file.sync_all().await?;
        drop(file);

        let size_bytes = tokio::fs::metadata(&self.partial).await?.len();
        if size_bytes == 0 {
            return Err(AttemptError::EmptyBody);
        }

        tokio::fs::rename(&self.partial, &self.target).await?;
        tracing::debug!(
            path = %self.target.display(),
            size_bytes,
            largest_write = self.largest_write,
            "Committed staged file"
        );
        Ok(LocalArtifact {
            path: self.target,
            size_bytes,
        })
    }
}
