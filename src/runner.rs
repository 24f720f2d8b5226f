// src/runner.rs
use chrono::Utc;
use futures::future;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::api::handlers::ws::WsMessage;
use crate::api::AppState;
use crate::errors::{CodeboxError, Result};
use crate::models::{ExecutionRequest, Job, JobStatus};
use crate::workspace;

/// Upper bound on submissions in one batch request.
pub const MAX_BATCH_SIZE: usize = 32;

/// Jobs kept in memory for `/api/jobs/{id}`; older ones live only in history.
const MAX_TRACKED_JOBS: usize = 1000;

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    order: VecDeque<String>,
}

/// In-memory registry of recent jobs.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<JobTable>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        let mut table = self.inner.write().await;
        table.order.push_back(job.id.clone());
        table.jobs.insert(job.id.clone(), job);
        while table.order.len() > MAX_TRACKED_JOBS {
            if let Some(old) = table.order.pop_front() {
                table.jobs.remove(&old);
            }
        }
    }

    /// Applies `f` to the job and returns the updated copy.
    pub async fn update<F>(&self, id: &str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut table = self.inner.write().await;
        let job = table.jobs.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

#[derive(Serialize)]
struct JobUpdate<'a> {
    id: &'a str,
    project_name: &'a str,
    language: &'a str,
    success: Option<bool>,
    execution_time: Option<f64>,
}

async fn publish(state: &AppState, job: &Job) {
    let update = JobUpdate {
        id: &job.id,
        project_name: &job.project_name,
        language: &job.language,
        success: job.result.as_ref().map(|r| r.success),
        execution_time: job.result.as_ref().map(|r| r.execution_time),
    };
    match serde_json::to_value(&update) {
        Ok(data) => state.hub.broadcast(WsMessage::job(&job.status.to_string(), data)).await,
        Err(e) => log::error!("Failed to encode job update: {}", e),
    }
}

/// Runs one submission through its whole lifecycle: queued, running, then a
/// terminal status. Requests that fail validation never become jobs.
///
/// Execution happens on its own task, so a caller that goes away (a dropped
/// HTTP request, a closed socket) does not strand the job or its container.
pub async fn run_job(state: &AppState, request: ExecutionRequest) -> Result<Job> {
    state.sandbox.validate(&request)?;
    let project_dir = workspace::ensure_project(&state.config.workspace_dir, &request.project_name)?;

    let job = Job {
        id: Uuid::new_v4().to_string(),
        project_name: request.project_name.clone(),
        language: request.language.trim().to_lowercase(),
        status: JobStatus::Queued,
        result: None,
        error: None,
        created_at: Utc::now().to_rfc3339(),
        finished_at: None,
    };
    state.jobs.insert(job.clone()).await;
    publish(state, &job).await;

    let job_id = job.id.clone();
    tokio::spawn(execute_job(state.clone(), job, request, project_dir))
        .await
        .map_err(|e| {
            log::error!("Job {} task failed: {}", job_id, e);
            CodeboxError::Io(std::io::Error::other(e.to_string()))
        })
}

async fn execute_job(state: AppState, mut job: Job, request: ExecutionRequest, project_dir: PathBuf) -> Job {
    if let Some(running) = state.jobs.update(&job.id, |j| j.status = JobStatus::Running).await {
        publish(&state, &running).await;
    }

    log::info!("Job {} running {} code for project {}", job.id, job.language, job.project_name);
    match state.sandbox.execute(&request, Some(&project_dir)).await {
        Ok(result) => {
            job.status = JobStatus::from_result(&result);
            job.result = Some(result);
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
        }
    }
    job.finished_at = Some(Utc::now().to_rfc3339());

    let finished = job.clone();
    state.jobs.update(&job.id, move |j| *j = finished).await;
    publish(&state, &job).await;

    match &job.result {
        Some(r) => log::info!("Job {} {} in {:.2}s", job.id, job.status, r.execution_time),
        None => log::warn!("Job {} failed: {}", job.id, job.error.as_deref().unwrap_or("unknown error")),
    }

    if let Some(pool) = state.db_pool.as_ref() {
        if let Err(e) = crate::database::save_execution(pool, &job, &request.code).await {
            log::error!("Failed to save job {} to database: {}", job.id, e);
        }
    }

    job
}

#[derive(Serialize, Debug)]
pub struct BatchItem {
    pub index: usize,
    pub job: Option<Job>,
    pub error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub rejected: usize,
    pub total_time_ms: u64,
    pub results: Vec<BatchItem>,
}

/// Runs submissions concurrently; the sandbox semaphore bounds how many
/// actually execute at once. Per-item validation errors do not fail the batch.
pub async fn run_batch(state: &AppState, requests: Vec<ExecutionRequest>) -> Result<BatchOutcome> {
    if requests.len() > MAX_BATCH_SIZE {
        return Err(CodeboxError::BatchTooLarge {
            size: requests.len(),
            max: MAX_BATCH_SIZE,
        });
    }

    let batch_start = Instant::now();
    let total = requests.len();
    let outcomes = future::join_all(requests.into_iter().map(|r| run_job(state, r))).await;

    let mut batch = BatchOutcome {
        batch_id: Uuid::new_v4().to_string(),
        total,
        succeeded: 0,
        failed: 0,
        timed_out: 0,
        rejected: 0,
        total_time_ms: 0,
        results: Vec::with_capacity(total),
    };

    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(job) => {
                match job.status {
                    JobStatus::Succeeded => batch.succeeded += 1,
                    JobStatus::TimedOut => batch.timed_out += 1,
                    _ => batch.failed += 1,
                }
                batch.results.push(BatchItem { index, job: Some(job), error: None });
            }
            Err(e) => {
                batch.rejected += 1;
                batch.results.push(BatchItem { index, job: None, error: Some(e.to_string()) });
            }
        }
    }

    batch.total_time_ms = batch_start.elapsed().as_millis() as u64;
    log::info!("Batch of {} completed in {}ms", total, batch.total_time_ms);
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, BackendKind};

    fn local_state(root: &std::path::Path) -> AppState {
        local_state_with_db(root, None)
    }

    fn local_state_with_db(root: &std::path::Path, pool: Option<sqlx::SqlitePool>) -> AppState {
        let mut config = AppConfig::default();
        config.workspace_dir = root.to_path_buf();
        config.sandbox.backend = BackendKind::Local;
        config.sandbox.max_execution_time = 10;
        AppState::new(config, pool).unwrap()
    }

    fn shell(code: &str, project: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            language: "shell".to_string(),
            timeout: None,
            project_name: project.to_string(),
        }
    }

    #[tokio::test]
    async fn test_job_lifecycle_is_tracked() {
        let root = tempfile::tempdir().unwrap();
        let state = local_state(root.path());

        let job = run_job(&state, shell("echo done", "demo")).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.as_ref().unwrap().output, "done\n");
        assert!(job.finished_at.is_some());
        assert!(root.path().join("demo").is_dir());

        let stored = state.jobs.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_requests_never_become_jobs() {
        let root = tempfile::tempdir().unwrap();
        let state = local_state(root.path());

        assert!(matches!(
            run_job(&state, shell("echo x", "../escape")).await,
            Err(CodeboxError::InvalidProjectName(_))
        ));
        assert!(matches!(run_job(&state, shell("", "demo")).await, Err(CodeboxError::EmptyCode)));
        assert_eq!(state.jobs.len().await, 0);
    }

    #[tokio::test]
    async fn test_batch_counts_outcomes() {
        let root = tempfile::tempdir().unwrap();
        let state = local_state(root.path());

        let batch = run_batch(
            &state,
            vec![shell("echo ok", "demo"), shell("exit 1", "demo"), shell(" ", "demo")],
        )
        .await
        .unwrap();

        assert_eq!(batch.total, 3);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.rejected, 1);
        assert_eq!(batch.results[2].error.as_deref(), Some("Code cannot be empty"));
    }

    #[tokio::test]
    async fn test_batch_size_is_limited() {
        let root = tempfile::tempdir().unwrap();
        let state = local_state(root.path());
        let requests = vec![shell("echo", "demo"); MAX_BATCH_SIZE + 1];
        assert!(matches!(run_batch(&state, requests).await, Err(CodeboxError::BatchTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_job_completes_after_caller_goes_away() {
        let root = tempfile::tempdir().unwrap();
        let pool = crate::database::init_db(Some("sqlite::memory:")).await.unwrap();
        let state = local_state_with_db(root.path(), Some(pool.clone()));

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            run_job(&state, shell("sleep 1; echo late", "demo")),
        )
        .await;
        assert!(abandoned.is_err());

        let mut saved = Vec::new();
        for _ in 0..50 {
            saved = crate::database::get_all_executions(&pool, 10).await.unwrap();
            if !saved.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].status, "succeeded");
        assert_eq!(saved[0].output.as_deref(), Some("late\n"));

        let tracked = state.jobs.get(&saved[0].id).await.unwrap();
        assert_eq!(tracked.status, JobStatus::Succeeded);
    }
}
