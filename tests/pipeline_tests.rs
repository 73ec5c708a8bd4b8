mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use geoconv_core::constants::messages;
use geoconv_core::hooks::{ArchiveIntegrityHook, NoopHook};
use geoconv_core::models::{new_execution_token, Task, TaskPatch};
use geoconv_core::orchestration::{
    BackoffCalculator, BackoffCalculatorConfig, RunOutcome, TaskPipeline, TaskRun,
};
use geoconv_core::pause::PauseGate;
use geoconv_core::remote::{RemoteError, RemoteJobStatus};
use geoconv_core::state_machine::TaskState;
use geoconv_core::storage::{ArtifactStorage, UploadedFile};
use sqlx::SqlitePool;

struct Harness {
    pool: SqlitePool,
    storage: TestStorage,
    client: Arc<ScriptedClient>,
    pause: PauseGate,
    pipeline: Arc<TaskPipeline>,
}

async fn harness(client: ScriptedClient) -> Harness {
    harness_with(client, fast_backoff()).await
}

async fn harness_with(client: ScriptedClient, backoff: BackoffCalculatorConfig) -> Harness {
    let pool = test_pool().await;
    let storage = TestStorage::new();
    let client = Arc::new(client);
    let pause = PauseGate::in_memory(Duration::from_millis(10));
    let pipeline = Arc::new(TaskPipeline::new(
        pool.clone(),
        pause.clone(),
        client.clone(),
        storage.storage.clone(),
        Arc::new(ArchiveIntegrityHook),
        Arc::new(NoopHook),
        BackoffCalculator::new(backoff),
    ));
    Harness {
        pool,
        storage,
        client,
        pause,
        pipeline,
    }
}

/// Accepted task whose source is a valid archive in the staging folder
async fn staged_task(h: &Harness, name: &str) -> Task {
    let staged = h
        .storage
        .storage
        .stage(UploadedFile::new(
            format!("{name}.zip"),
            zip_bytes("extract.xml", b"<extract/>"),
        ))
        .await
        .unwrap();
    let group = create_group(&h.pool, name).await;
    TaskBuilder::new(group.id)
        .with_name(name)
        .with_source(staged.path)
        .build(&h.pool)
        .await
}

async fn reload(pool: &SqlitePool, id: i64) -> Task {
    Task::find_by_id(pool, id).await.unwrap().unwrap()
}

fn assert_consistent(task: &Task) {
    assert_eq!(task.status == TaskState::Failed, task.error.is_some());
    assert_eq!(
        task.status == TaskState::Completed,
        task.result_artifact_path.is_some()
    );
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_successful_conversion() {
    let h = harness(ScriptedClient::succeeding()).await;
    let task = staged_task(&h, "kpt_001").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.remote_job_handle.as_deref(), Some("job-1"));
    assert!(task.error.is_none());
    assert_consistent(&task);

    let result = task.result_path().unwrap();
    assert_eq!(outcome, RunOutcome::Completed { result_path: result.clone() });
    assert!(result.exists());
    assert_eq!(result.file_name().unwrap(), "kpt_001.zip");

    assert_eq!(h.client.submits(), 1);
    assert_eq!(h.client.submitted_identifiers(), vec!["kpt_001".to_string()]);
    assert_eq!(h.client.fetches(), 1);
}

#[tokio::test]
async fn test_pending_polls_until_success() {
    let client = ScriptedClient::new();
    client.push_poll(Ok(RemoteJobStatus::pending()));
    client.push_poll(Ok(RemoteJobStatus::pending()));
    client.push_poll(Ok(RemoteJobStatus::success("https://toolbox.test/out.zip")));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_pending").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.client.polls(), 3);
}

#[tokio::test]
async fn test_remote_failure_is_recorded() {
    let client = ScriptedClient::new();
    client.push_poll(Ok(RemoteJobStatus::failed(Some(
        "invalid extract structure".to_string(),
    ))));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_bad").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    let error = task.error.clone().unwrap();
    assert!(error.contains("invalid extract structure"), "{error}");
    assert_eq!(outcome, RunOutcome::Failed { error });
    assert_consistent(&task);
    assert_eq!(h.client.fetches(), 0);
}

#[tokio::test]
async fn test_remote_failure_without_message_uses_fallback() {
    let client = ScriptedClient::new();
    client.push_poll(Ok(RemoteJobStatus::failed(None)));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_silent").await;

    h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task
        .error
        .unwrap()
        .contains(messages::REMOTE_FAILED_FALLBACK));
}

#[tokio::test]
async fn test_remote_cancellation_fails_task() {
    let client = ScriptedClient::new();
    client.push_poll(Ok(RemoteJobStatus::cancelled()));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_cancelled").await;

    h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.unwrap().contains(messages::REMOTE_CANCELLED));
}

#[tokio::test]
async fn test_transport_errors_are_retried() {
    let client = ScriptedClient::new();
    client.push_poll(Err(RemoteError::Transport("connection reset".into())));
    client.push_poll(Err(RemoteError::Transport("timed out".into())));
    client.push_poll(Ok(RemoteJobStatus::success("https://toolbox.test/out.zip")));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_flaky").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.client.polls(), 3);
}

#[tokio::test]
async fn test_rejected_poll_fails_without_retry() {
    let client = ScriptedClient::new();
    client.push_poll(Err(RemoteError::Rejected {
        status: 404,
        body: "unknown task".into(),
    }));
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_unknown").await;

    h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.unwrap().contains("404"));
    assert_eq!(h.client.polls(), 1);
}

#[tokio::test]
async fn test_polling_budget_times_out() {
    let backoff = BackoffCalculatorConfig {
        initial_jitter_max: Duration::ZERO,
        step: Duration::from_millis(100),
        retry_jitter_max: Duration::ZERO,
        max_delay: Duration::from_millis(100),
        budget: Duration::from_millis(50),
    };
    let h = harness_with(ScriptedClient::new(), backoff).await;
    let task = staged_task(&h, "kpt_slow").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Failed { .. }));
    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.unwrap().starts_with("Timed out"));
    assert_eq!(h.client.polls(), 1);
}

#[tokio::test]
async fn test_existing_handle_resumes_without_resubmitting() {
    let h = harness(ScriptedClient::succeeding()).await;
    let group = create_group(&h.pool, "resume").await;
    let task = TaskBuilder::new(group.id)
        .with_name("kpt_resume")
        .with_handle("job-existing")
        .build(&h.pool)
        .await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.client.submits(), 0);
    assert_eq!(h.client.polled_handles(), vec!["job-existing".to_string()]);
    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.remote_job_handle.as_deref(), Some("job-existing"));
}

#[tokio::test]
async fn test_stale_token_does_nothing() {
    let h = harness(ScriptedClient::succeeding()).await;
    let task = staged_task(&h, "kpt_stale").await;

    let outcome = h
        .pipeline
        .run(&TaskRun::new(task.id, new_execution_token()))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Superseded);
    assert_eq!(reload(&h.pool, task.id).await, task);
    assert_eq!(h.client.submits(), 0);
    assert_eq!(h.client.polls(), 0);
}

#[tokio::test]
async fn test_deleted_task_is_superseded() {
    let h = harness(ScriptedClient::succeeding()).await;
    let task = staged_task(&h, "kpt_gone").await;
    Task::delete(&h.pool, task.id).await.unwrap();

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert_eq!(outcome, RunOutcome::Superseded);
    assert_eq!(h.client.submits(), 0);
}

#[tokio::test]
async fn test_finished_task_is_skipped() {
    let h = harness(ScriptedClient::succeeding()).await;
    let group = create_group(&h.pool, "done").await;
    let task = TaskBuilder::new(group.id)
        .with_status(TaskState::Failed)
        .with_error("earlier failure")
        .build(&h.pool)
        .await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            status: TaskState::Failed
        }
    );
    assert_eq!(h.client.submits(), 0);
}

#[tokio::test]
async fn test_restart_during_run_discards_stale_result() {
    let h = harness(ScriptedClient::new()).await;
    let task = staged_task(&h, "kpt_race").await;

    let pipeline = h.pipeline.clone();
    let run = TaskRun::from(&task);
    let running = tokio::spawn(async move { pipeline.run(&run).await });

    // Wait until the attempt is polling the remote job
    let mut converting = false;
    for _ in 0..200 {
        if reload(&h.pool, task.id).await.status == TaskState::Converting {
            converting = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(converting, "attempt never reached converting");

    // Restart behind the attempt's back, then let the old job finish
    let patch = TaskPatch::new()
        .status(TaskState::Accepted)
        .execution_token(new_execution_token())
        .remote_job_handle(None);
    Task::update(&h.pool, task.id, &patch).await.unwrap();
    h.client
        .push_poll(Ok(RemoteJobStatus::success("https://toolbox.test/late.zip")));

    let outcome = running.await.unwrap().unwrap();

    assert_eq!(outcome, RunOutcome::Superseded);
    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Accepted);
    assert!(task.result_artifact_path.is_none());
    assert!(task.remote_job_handle.is_none());
    assert_eq!(files_in(&h.storage.config().results_dir()), 0);
}

#[tokio::test]
async fn test_pause_holds_attempt_before_remote_calls() {
    let h = harness(ScriptedClient::succeeding()).await;
    let task = staged_task(&h, "kpt_paused").await;
    h.pause.set_pause().await.unwrap();

    let pipeline = h.pipeline.clone();
    let run = TaskRun::from(&task);
    let running = tokio::spawn(async move { pipeline.run(&run).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!running.is_finished());
    assert_eq!(h.client.submits(), 0);
    assert_eq!(h.client.polls(), 0);
    assert_eq!(reload(&h.pool, task.id).await.status, TaskState::Accepted);

    h.pause.unset_pause().await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("attempt did not resume after unpause")
        .unwrap()
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.client.submits(), 1);
}

#[tokio::test]
async fn test_invalid_archive_fails_before_submit() {
    let h = harness(ScriptedClient::succeeding()).await;
    let staged = h
        .storage
        .storage
        .stage(UploadedFile::new("broken.zip", b"definitely not a zip".to_vec()))
        .await
        .unwrap();
    let group = create_group(&h.pool, "broken").await;
    let task = TaskBuilder::new(group.id)
        .with_name("broken")
        .with_source(staged.path)
        .build(&h.pool)
        .await;

    h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.unwrap().contains("archive_integrity"));
    assert_eq!(h.client.submits(), 0);
}

#[tokio::test]
async fn test_submit_rejection_fails_task() {
    let client = ScriptedClient::new();
    client.fail_submit(RemoteError::Rejected {
        status: 401,
        body: "invalid token".into(),
    });
    let h = harness(client).await;
    let task = staged_task(&h, "kpt_unauthorized").await;

    let outcome = h.pipeline.run(&TaskRun::from(&task)).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Failed { .. }));
    let task = reload(&h.pool, task.id).await;
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.remote_job_handle.is_none());
    assert!(task.error.unwrap().contains("invalid token"));
    assert_eq!(h.client.polls(), 0);
}
