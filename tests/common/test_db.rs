use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use geoconv_core::config::{DatabaseConfig, StorageConfig};
use geoconv_core::database::{DatabaseConnection, DatabaseMigrations};
use geoconv_core::orchestration::BackoffCalculatorConfig;
use geoconv_core::storage::LocalArtifactStorage;
use sqlx::SqlitePool;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Fresh in-memory database with the schema applied
pub async fn test_pool() -> SqlitePool {
    let database = DatabaseConnection::in_memory()
        .await
        .expect("Failed to open in-memory database");
    DatabaseMigrations::run_all(database.pool())
        .await
        .expect("Failed to run migrations");
    database.into_pool()
}

/// Database file in WAL mode behind a multi-connection pool, as the worker
/// runs it. The file lives as long as the value.
pub struct FileDatabase {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

impl FileDatabase {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("geoconv.db").display()),
            max_connections: 4,
            acquire_timeout_seconds: 10,
        };
        let database = DatabaseConnection::connect(&config)
            .await
            .expect("Failed to open file database");
        DatabaseMigrations::run_all(database.pool())
            .await
            .expect("Failed to run migrations");
        Self {
            dir,
            pool: database.into_pool(),
        }
    }
}

/// Local storage rooted in a temporary directory that lives as long as the value
pub struct TestStorage {
    pub dir: TempDir,
    pub storage: Arc<LocalArtifactStorage>,
}

impl TestStorage {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = StorageConfig {
            data_root: dir.path().to_path_buf(),
        };
        let storage = Arc::new(LocalArtifactStorage::new(&config));
        Self { dir, storage }
    }

    pub fn config(&self) -> StorageConfig {
        StorageConfig {
            data_root: self.dir.path().to_path_buf(),
        }
    }
}

/// Small valid ZIP archive with one entry
pub fn zip_bytes(entry: &str, content: &[u8]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry, SimpleFileOptions::default())
        .expect("Failed to start zip entry");
    writer.write_all(content).expect("Failed to write zip entry");
    writer
        .finish()
        .expect("Failed to finish zip archive")
        .into_inner()
}

/// Backoff that keeps tests fast: no jitter, millisecond steps
pub fn fast_backoff() -> BackoffCalculatorConfig {
    BackoffCalculatorConfig {
        initial_jitter_max: Duration::ZERO,
        step: Duration::from_millis(1),
        retry_jitter_max: Duration::ZERO,
        max_delay: Duration::from_millis(5),
        budget: Duration::from_secs(30),
    }
}

/// Generate a unique name for test data
pub fn unique_name(prefix: &str) -> String {
    let random: u32 = fastrand::u32(..);
    format!("{prefix}_{random}")
}
