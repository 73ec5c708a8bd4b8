//! # File Staging
//!
//! Capability interface over the physical artifact store: uploaded source
//! archives, fetched result archives, and temporary download bundles.
//!
//! Names never collide: writing `kpt.zip` into a folder that already holds it
//! produces `kpt(1).zip`, then `kpt(2).zip`, and so on.

pub mod archive;
pub mod local;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use local::LocalArtifactStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Blocking storage task failed: {0}")]
    Join(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<zip::result::ZipError> for StorageError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// File received from a client, not yet written anywhere
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Task name this upload would get
    pub fn task_name(&self) -> String {
        derive_task_name(Some(&self.file_name))
    }

    pub fn is_archive(&self) -> bool {
        archive::has_archive_extension(Path::new(&self.file_name))
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("size", &self.content.len())
            .finish()
    }
}

/// Upload written to the staging folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Task name derived from the original file name
    pub name: String,
    pub path: PathBuf,
}

/// Folder an artifact is written into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFolder {
    Uploaded,
    Results,
    Tmp,
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync + fmt::Debug {
    /// Write an upload into the staging folder
    async fn stage(&self, upload: UploadedFile) -> StorageResult<StagedFile>;

    /// Write `content` as `{name}.zip` into `folder`
    async fn save(&self, content: &[u8], name: &str, folder: ArtifactFolder) -> StorageResult<PathBuf>;

    /// Remove a file. Missing files are not an error.
    async fn delete(&self, path: &Path) -> StorageResult<()>;

    /// Pack the given files into one archive and return its location
    async fn bundle(&self, paths: &[PathBuf]) -> StorageResult<PathBuf>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Task name for a file: its stem, or a random identifier when there is none
pub fn derive_task_name(file_name: Option<&str>) -> String {
    file_name
        .map(Path::new)
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
