// src/models.rs
use serde::{Deserialize, Serialize};

fn default_language() -> String {
    "python".to_string()
}

fn default_project() -> String {
    "default".to_string()
}

/// A code submission as accepted by `/api/run` and the websocket `execute` message.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Wall-clock limit in seconds. `None` or `0` means the server maximum.
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default = "default_project")]
    pub project_name: String,
}

/// Captured outcome of one sandboxed run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub stderr: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Seconds, measured around the whole run.
    pub execution_time: f64,
}

impl ExecutionResult {
    /// A run that never reached the program, e.g. the backend was missing.
    pub fn failed(error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            execution_time,
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut)
    }

    /// Terminal status implied by a finished run.
    pub fn from_result(result: &ExecutionResult) -> Self {
        if result.timed_out {
            JobStatus::TimedOut
        } else if result.success {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Job {
    pub id: String,
    pub project_name: String,
    pub language: String,
    pub status: JobStatus,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct ProjectFile {
    pub path: String,
    pub kind: String,
    pub size: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct ProjectInfo {
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub files: Vec<ProjectFile>,
    pub size_mb: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub path: String,
}

/// Standard error body for every non-2xx response.
#[derive(Serialize, Clone, Debug)]
pub struct ApiError {
    pub detail: String,
}
