use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    archive, derive_task_name, ArtifactFolder, ArtifactStorage, StagedFile, StorageError,
    StorageResult, UploadedFile,
};
use crate::config::StorageConfig;
use crate::constants;

/// Artifact storage on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArtifactStorage {
    uploaded_dir: PathBuf,
    results_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl LocalArtifactStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            uploaded_dir: config.uploaded_dir(),
            results_dir: config.results_dir(),
            tmp_dir: config.tmp_dir(),
        }
    }

    pub fn folder(&self, folder: ArtifactFolder) -> &Path {
        match folder {
            ArtifactFolder::Uploaded => &self.uploaded_dir,
            ArtifactFolder::Results => &self.results_dir,
            ArtifactFolder::Tmp => &self.tmp_dir,
        }
    }

    /// Create a new empty file for `file_name` in `folder`, stepping to
    /// `stem(1).ext`, `stem(2).ext`, ... while the name is taken
    async fn create_unique(folder: &Path, file_name: &str) -> StorageResult<(fs::File, PathBuf)> {
        fs::create_dir_all(folder)
            .await
            .map_err(|e| StorageError::io(folder, e))?;

        let requested = Path::new(file_name);
        let stem = requested
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = requested
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut candidate = folder.join(file_name);
        let mut counter = 1u32;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => return Ok((file, candidate)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    candidate = folder.join(format!("{stem}({counter}){extension}"));
                    counter += 1;
                }
                Err(e) => return Err(StorageError::io(candidate, e)),
            }
        }
    }

    /// Copy `content` into a new file. A file left incomplete by a failed
    /// copy is removed.
    async fn write_unique<R>(folder: &Path, file_name: &str, mut content: R) -> StorageResult<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        let (mut file, path) = Self::create_unique(folder, file_name).await?;
        let written = match tokio::io::copy(&mut content, &mut file).await {
            Ok(_) => file.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => Ok(path),
            Err(e) => {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path).await {
                    warn!(file = %path.display(), error = %remove_err, "Failed to remove partial file");
                }
                Err(StorageError::io(path, e))
            }
        }
    }
}

/// Strip directories from a client supplied name
fn sanitize_file_name(file_name: &str) -> StorageResult<String> {
    Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StorageError::InvalidName(file_name.to_string()))
}

#[async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    async fn stage(&self, upload: UploadedFile) -> StorageResult<StagedFile> {
        let file_name = sanitize_file_name(&upload.file_name)?;
        let path = Self::write_unique(&self.uploaded_dir, &file_name, upload.content.as_slice()).await?;

        debug!(file = %path.display(), size = upload.content.len(), "Upload staged");

        Ok(StagedFile {
            name: derive_task_name(Some(&file_name)),
            path,
        })
    }

    async fn save(&self, content: &[u8], name: &str, folder: ArtifactFolder) -> StorageResult<PathBuf> {
        let file_name = sanitize_file_name(&format!(
            "{name}.{}",
            constants::storage::ARCHIVE_EXTENSION
        ))?;
        let path = Self::write_unique(self.folder(folder), &file_name, content).await?;

        debug!(file = %path.display(), size = content.len(), "Artifact saved");
        Ok(path)
    }

    async fn delete(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!(file = %path.display(), "Artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn bundle(&self, paths: &[PathBuf]) -> StorageResult<PathBuf> {
        let file_name = format!("{}.{}", Uuid::new_v4(), constants::storage::ARCHIVE_EXTENSION);
        let (file, target) = Self::create_unique(&self.tmp_dir, &file_name).await?;
        drop(file);

        let sources = paths.to_vec();
        let bundle_path = target.clone();
        let written =
            tokio::task::spawn_blocking(move || archive::write_bundle(&bundle_path, &sources))
                .await
                .map_err(StorageError::from)
                .and_then(|result| result);

        if let Err(e) = written {
            let _ = fs::remove_file(&target).await;
            return Err(e);
        }

        info!(file = %target.display(), files = paths.len(), "Bundle created");
        Ok(target)
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}
