//! Working-storage layout and cleanup.
//!
//! Every in-flight item gets its own directories, namespaced by execution
//! context and work id:
//!
//! ```text
//! <download_root>/<context>/<work_id>/<raw file>
//! <encoded_root>/<context>/<work_id>/<encoded file>
//! ```
//!
//! A background item and an on-demand item can therefore never collide,
//! even when their filenames are identical.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Errors that can occur while preparing working storage
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which pipeline owns a work directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkContext {
    /// Background scheduler
    Auto,

    /// On-demand requests
    Manual,
}

impl WorkContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pair of directories owned by one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirs {
    pub download: PathBuf,
    pub encoded: PathBuf,
}

/// Allocates and cleans working paths
#[derive(Debug, Clone)]
pub struct Workspace {
    download_root: PathBuf,
    encoded_root: PathBuf,
}

impl Workspace {
    pub fn new(download_root: impl Into<PathBuf>, encoded_root: impl Into<PathBuf>) -> Self {
        Self {
            download_root: download_root.into(),
            encoded_root: encoded_root.into(),
        }
    }

    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    pub fn encoded_root(&self) -> &Path {
        &self.encoded_root
    }

    /// Create both roots if absent (called once at startup)
    pub async fn ensure_roots(&self) -> Result<(), WorkspaceError> {
        create_dir(&self.download_root).await?;
        create_dir(&self.encoded_root).await
    }

    /// Directories for a work item, without touching the filesystem
    pub fn dirs(&self, context: WorkContext, work_id: &str) -> WorkDirs {
        WorkDirs {
            download: self.download_root.join(context.as_str()).join(work_id),
            encoded: self.encoded_root.join(context.as_str()).join(work_id),
        }
    }

    /// Create the directories for a work item
    pub async fn prepare(&self, context: WorkContext, work_id: &str) -> Result<WorkDirs, WorkspaceError> {
        let dirs = self.dirs(context, work_id);
        create_dir(&dirs.download).await?;
        create_dir(&dirs.encoded).await?;
        Ok(dirs)
    }

    /// Remove both directories of a work item and everything in them
    pub async fn release(&self, dirs: &WorkDirs) {
        cleanup(&dirs.download).await;
        cleanup(&dirs.encoded).await;
    }
}

/// Delete a file or directory if it exists.
///
/// Never fails the caller: a missing path is success, and any other IO
/// error is logged.
pub async fn cleanup(path: &Path) {
    let result = match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Cleanup failed"),
    }
}

/// Make a user- or feed-supplied name safe to use as a single path component
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }

    // Keep well under common 255-byte filename limits
    let mut end = trimmed.len().min(200);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

async fn create_dir(path: &Path) -> Result<(), WorkspaceError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| WorkspaceError::Create {
            path: path.to_path_buf(),
            source,
        })
}
