//! Test doubles for the remote service and the dispatcher

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use geoconv_core::error::GeoconvResult;
use geoconv_core::models::{ConversionOptions, Task, TaskPatch, WriteOutcome};
use geoconv_core::orchestration::{TaskDispatcher, TaskRun};
use geoconv_core::remote::{ConversionClient, RemoteError, RemoteJobStatus, RemoteResult};
use geoconv_core::state_machine::TaskState;
use geoconv_core::storage::{
    ArtifactFolder, ArtifactStorage, LocalArtifactStorage, StagedFile, StorageResult, UploadedFile,
};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use super::zip_bytes;

/// Conversion client that replays queued poll responses.
///
/// Once the queue is empty every poll reports `pending`.
#[derive(Debug)]
pub struct ScriptedClient {
    handle: String,
    result: Vec<u8>,
    polls: Mutex<VecDeque<RemoteResult<RemoteJobStatus>>>,
    submit_error: Mutex<Option<RemoteError>>,
    submits: AtomicUsize,
    poll_calls: AtomicUsize,
    fetches: AtomicUsize,
    submitted_identifiers: Mutex<Vec<String>>,
    polled_handles: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            handle: "job-1".to_string(),
            result: zip_bytes("result.geojson", b"{\"type\":\"FeatureCollection\"}"),
            polls: Mutex::new(VecDeque::new()),
            submit_error: Mutex::new(None),
            submits: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            submitted_identifiers: Mutex::new(Vec::new()),
            polled_handles: Mutex::new(Vec::new()),
        }
    }

    /// Client whose job succeeds on the first poll
    pub fn succeeding() -> Self {
        let client = Self::new();
        client.push_poll(Ok(RemoteJobStatus::success("https://toolbox.test/result.zip")));
        client
    }

    pub fn push_poll(&self, response: RemoteResult<RemoteJobStatus>) {
        self.polls.lock().unwrap().push_back(response);
    }

    pub fn fail_submit(&self, error: RemoteError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submitted_identifiers(&self) -> Vec<String> {
        self.submitted_identifiers.lock().unwrap().clone()
    }

    pub fn polled_handles(&self) -> Vec<String> {
        self.polled_handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionClient for ScriptedClient {
    async fn submit(
        &self,
        _source: &Path,
        identifier: &str,
        _options: &ConversionOptions,
    ) -> RemoteResult<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.submit_error.lock().unwrap().take() {
            return Err(error);
        }
        self.submitted_identifiers
            .lock()
            .unwrap()
            .push(identifier.to_string());
        Ok(self.handle.clone())
    }

    async fn poll(&self, handle: &str) -> RemoteResult<RemoteJobStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polled_handles.lock().unwrap().push(handle.to_string());
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteJobStatus::pending()))
    }

    async fn fetch(&self, _locator: &str) -> RemoteResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Dispatcher that only records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<TaskRun>>,
    revoked: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<TaskRun> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, run: TaskRun) -> GeoconvResult<()> {
        self.dispatched.lock().unwrap().push(run);
        Ok(())
    }

    async fn revoke(&self, execution_token: &str) {
        self.revoked
            .lock()
            .unwrap()
            .push(execution_token.to_string());
    }
}

/// Storage that commits a status write on a running task whenever the
/// handler stages or deletes a file, the way a pipeline writes while a
/// handler operation is in progress.
///
/// Writes during staging are awaited in place. Writes during deletion run
/// as spawned tasks, since deletion happens while the handler holds its
/// transaction; collect them with [`ConcurrentWriterStorage::finish_writes`].
#[derive(Debug)]
pub struct ConcurrentWriterStorage {
    inner: Arc<LocalArtifactStorage>,
    pool: SqlitePool,
    running: Task,
    spawned: Mutex<Vec<JoinHandle<Result<WriteOutcome, sqlx::Error>>>>,
    staged_writes: AtomicUsize,
}

impl ConcurrentWriterStorage {
    pub fn new(inner: Arc<LocalArtifactStorage>, pool: SqlitePool, running: Task) -> Self {
        Self {
            inner,
            pool,
            running,
            spawned: Mutex::new(Vec::new()),
            staged_writes: AtomicUsize::new(0),
        }
    }

    fn status_write(
        &self,
    ) -> impl std::future::Future<Output = Result<WriteOutcome, sqlx::Error>> + Send + 'static {
        let pool = self.pool.clone();
        let task_id = self.running.id;
        let token = self.running.execution_token.clone();
        async move {
            let patch = TaskPatch::new().status(TaskState::Converting);
            Task::update_if_current(&pool, task_id, &token, &patch).await
        }
    }

    pub fn staged_writes(&self) -> usize {
        self.staged_writes.load(Ordering::SeqCst)
    }

    /// Wait for every write started during deletion
    pub async fn finish_writes(&self) -> Vec<Result<WriteOutcome, sqlx::Error>> {
        let handles: Vec<_> = self.spawned.lock().unwrap().drain(..).collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.expect("status write panicked"));
        }
        outcomes
    }
}

#[async_trait]
impl ArtifactStorage for ConcurrentWriterStorage {
    async fn stage(&self, upload: UploadedFile) -> StorageResult<StagedFile> {
        let outcome = self
            .status_write()
            .await
            .expect("status write during staging failed");
        assert_eq!(outcome, WriteOutcome::Applied);
        self.staged_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.stage(upload).await
    }

    async fn save(&self, content: &[u8], name: &str, folder: ArtifactFolder) -> StorageResult<PathBuf> {
        self.inner.save(content, name, folder).await
    }

    async fn delete(&self, path: &Path) -> StorageResult<()> {
        let handle = tokio::spawn(self.status_write());
        self.spawned.lock().unwrap().push(handle);
        self.inner.delete(path).await
    }

    async fn bundle(&self, paths: &[PathBuf]) -> StorageResult<PathBuf> {
        self.inner.bundle(paths).await
    }

    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }
}
