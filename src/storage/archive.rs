//! Blocking ZIP helpers. Callers run these on the blocking pool.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{StorageError, StorageResult};
use crate::constants;

pub fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(constants::storage::ARCHIVE_EXTENSION))
}

/// Write every file in `paths` into the already created, empty `target`,
/// flattened to its base name
pub fn write_bundle(target: &Path, paths: &[PathBuf]) -> StorageResult<()> {
    let file = File::create(target).map_err(|e| StorageError::io(target, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in paths {
        let entry_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidName(path.display().to_string()))?;

        writer.start_file(entry_name, options)?;
        let mut source =
            BufReader::new(File::open(path).map_err(|e| StorageError::io(path, e))?);
        io::copy(&mut source, &mut writer).map_err(|e| StorageError::io(path, e))?;
    }

    writer.finish()?;
    Ok(())
}

/// Number of entries in a readable ZIP archive
pub fn entry_count(path: &Path) -> StorageResult<usize> {
    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let archive = ZipArchive::new(BufReader::new(file))?;
    Ok(archive.len())
}
