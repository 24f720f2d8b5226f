// src/sandbox/mod.rs
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::{BackendKind, SandboxConfig};
use crate::errors::{CodeboxError, Result};
use crate::models::{ExecutionRequest, ExecutionResult};

pub mod docker;
pub mod languages;
pub mod local;
pub mod process;

pub use docker::DockerBackend;
pub use languages::{LanguageRegistry, LanguageSpec};
pub use local::LocalBackend;
pub use process::RawOutput;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Everything a backend needs for one run. The submission has already been
/// written to `code_dir/<language.file_name>`.
pub struct PreparedRun<'a> {
    pub id: String,
    pub language: &'a LanguageSpec,
    pub code_dir: &'a Path,
    /// Project directory, exposed read-write to the program.
    pub workspace: Option<&'a Path>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// An isolation mechanism that can run a prepared submission.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the submission to completion or until `run.timeout` elapses.
    async fn run(&self, run: &PreparedRun<'_>) -> Result<RawOutput>;

    /// Releases anything left behind by earlier runs.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Admission, timeout policy and result shaping in front of a backend.
pub struct Sandbox {
    backend: Arc<dyn SandboxBackend>,
    languages: LanguageRegistry,
    config: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl Sandbox {
    /// Builds the sandbox described by `config`, loading language overrides.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let languages = LanguageRegistry::load(config.languages_file.as_deref())?;
        let backend: Arc<dyn SandboxBackend> = match config.backend {
            BackendKind::Docker => Arc::new(DockerBackend::connect(config.clone())?),
            BackendKind::Local => {
                log::warn!("Local sandbox backend enforces only timeouts; do not expose it to untrusted users");
                Arc::new(LocalBackend::new())
            }
        };
        Ok(Self::with_backend(config, languages, backend))
    }

    pub fn with_backend(config: SandboxConfig, languages: LanguageRegistry, backend: Arc<dyn SandboxBackend>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            backend,
            languages,
            config,
            permits,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// `None` and `0` mean the server maximum; anything above it is refused.
    pub fn resolve_timeout(&self, requested: Option<u64>) -> Result<Duration> {
        let max = self.config.max_execution_time;
        match requested {
            None | Some(0) => Ok(Duration::from_secs(max)),
            Some(secs) if secs <= max => Ok(Duration::from_secs(secs)),
            Some(secs) => Err(CodeboxError::TimeoutOutOfRange { requested: secs, max }),
        }
    }

    /// Checks a request without running it.
    pub fn validate(&self, request: &ExecutionRequest) -> Result<(&LanguageSpec, Duration)> {
        if request.code.trim().is_empty() {
            return Err(CodeboxError::EmptyCode);
        }
        let language = self.languages.get(&request.language)?;
        let timeout = self.resolve_timeout(request.timeout)?;
        Ok((language, timeout))
    }

    /// Runs a submission. Validation problems are errors; everything that
    /// happens once the run has been admitted ends up in the result.
    pub async fn execute(&self, request: &ExecutionRequest, workspace: Option<&Path>) -> Result<ExecutionResult> {
        let (language, timeout) = self.validate(request)?;

        let _permit = self.permits.acquire().await.map_err(|_| CodeboxError::BackendUnavailable {
            backend: self.backend.name().to_string(),
            reason: "sandbox is shutting down".to_string(),
        })?;

        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let code_dir = match tempfile::Builder::new().prefix("codebox-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return Ok(ExecutionResult::failed(e.to_string(), start.elapsed().as_secs_f64())),
        };
        if let Err(e) = tokio::fs::write(code_dir.path().join(&language.file_name), &request.code).await {
            return Ok(ExecutionResult::failed(e.to_string(), start.elapsed().as_secs_f64()));
        }

        let run = PreparedRun {
            id: run_id,
            language,
            code_dir: code_dir.path(),
            workspace,
            timeout,
            max_output_bytes: self.config.max_output_bytes,
        };

        log::info!(
            "Executing {} code ({} bytes, timeout {}s) on {} backend",
            request.language,
            request.code.len(),
            timeout.as_secs(),
            self.backend.name()
        );

        let outcome = self.backend.run(&run).await;
        let elapsed = start.elapsed().as_secs_f64();
        Ok(match outcome {
            Ok(raw) => shape_result(raw, timeout, elapsed),
            Err(e) => {
                log::error!("Sandbox execution failed: {}", e);
                ExecutionResult::failed(e.to_string(), elapsed)
            }
        })
    }

    pub async fn cleanup(&self) {
        if let Err(e) = self.backend.cleanup().await {
            log::error!("Sandbox cleanup failed: {}", e);
        }
    }
}

fn decode(bytes: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

fn shape_result(raw: RawOutput, timeout: Duration, elapsed: f64) -> ExecutionResult {
    let output = decode(&raw.stdout, raw.stdout_truncated);
    let stderr = decode(&raw.stderr, raw.stderr_truncated);

    let (success, error) = if raw.timed_out {
        (false, Some(format!("Execution timed out after {}s", timeout.as_secs())))
    } else {
        match raw.exit_code {
            Some(0) => (true, None),
            Some(code) => (false, Some(format!("Exit code: {}", code))),
            None => (false, Some("Process terminated by signal".to_string())),
        }
    };

    ExecutionResult {
        success,
        output,
        stderr,
        error,
        exit_code: raw.exit_code,
        timed_out: raw.timed_out,
        execution_time: elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local_sandbox(max_execution_time: u64) -> Sandbox {
        let config = SandboxConfig {
            backend: BackendKind::Local,
            max_execution_time,
            max_output_bytes: 4096,
            ..SandboxConfig::default()
        };
        Sandbox::with_backend(config, LanguageRegistry::builtin(), Arc::new(LocalBackend::new()))
    }

    fn shell(code: &str, timeout: Option<u64>) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            language: "shell".to_string(),
            timeout,
            project_name: "default".to_string(),
        }
    }

    /// Records the largest number of runs it saw at once.
    struct CountingBackend {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SandboxBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _run: &PreparedRun<'_>) -> Result<RawOutput> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RawOutput { exit_code: Some(0), ..Default::default() })
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl SandboxBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn run(&self, _run: &PreparedRun<'_>) -> Result<RawOutput> {
            Err(CodeboxError::BackendUnavailable {
                backend: "broken".to_string(),
                reason: "daemon not running".to_string(),
            })
        }
    }

    #[test]
    fn test_resolve_timeout() {
        let sandbox = local_sandbox(30);
        assert_eq!(sandbox.resolve_timeout(None).unwrap(), Duration::from_secs(30));
        assert_eq!(sandbox.resolve_timeout(Some(0)).unwrap(), Duration::from_secs(30));
        assert_eq!(sandbox.resolve_timeout(Some(5)).unwrap(), Duration::from_secs(5));
        assert!(matches!(
            sandbox.resolve_timeout(Some(31)),
            Err(CodeboxError::TimeoutOutOfRange { requested: 31, max: 30 })
        ));
    }

    #[tokio::test]
    async fn test_validation_errors_are_returned() {
        let sandbox = local_sandbox(30);
        assert!(matches!(sandbox.execute(&shell("   \n", None), None).await, Err(CodeboxError::EmptyCode)));

        let mut req = shell("echo hi", None);
        req.language = "cobol".to_string();
        assert!(matches!(sandbox.execute(&req, None).await, Err(CodeboxError::UnsupportedLanguage(_))));
    }

    #[tokio::test]
    async fn test_successful_run() {
        let sandbox = local_sandbox(30);
        let result = sandbox.execute(&shell("echo hello", Some(10)), None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.error, None);
        assert!(result.execution_time > 0.0);
    }

    #[tokio::test]
    async fn test_failing_run_reports_exit_code() {
        let sandbox = local_sandbox(30);
        let result = sandbox
            .execute(&shell("echo oops >&2\nexit 2", Some(10)), None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.error.as_deref(), Some("Exit code: 2"));
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let sandbox = local_sandbox(30);
        let result = sandbox.execute(&shell("sleep 20", Some(1)), None).await.unwrap();
        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 1s"));
        assert!(result.execution_time < 10.0);
    }

    #[tokio::test]
    async fn test_workspace_is_exposed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), "42").unwrap();
        let sandbox = local_sandbox(30);
        let result = sandbox
            .execute(&shell("cat \"$CODEBOX_DATA/input.txt\"", Some(10)), Some(dir.path()))
            .await
            .unwrap();
        assert!(result.success, "{:?}", result);
        assert_eq!(result.output, "42");
    }

    #[tokio::test]
    async fn test_large_output_is_truncated() {
        let sandbox = local_sandbox(30);
        let result = sandbox
            .execute(&shell("yes | head -c 100000", Some(10)), None)
            .await
            .unwrap();
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.output.len(), 4096 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_backend_errors_become_failed_results() {
        let sandbox = Sandbox::with_backend(SandboxConfig::default(), LanguageRegistry::builtin(), Arc::new(BrokenBackend));
        let result = sandbox.execute(&shell("echo hi", None), None).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("daemon not running"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let backend = Arc::new(CountingBackend {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = SandboxConfig {
            max_concurrent: 2,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::with_backend(config, LanguageRegistry::builtin(), backend.clone());

        let requests: Vec<_> = (0..6).map(|i| shell(&format!("echo {}", i), None)).collect();
        let runs = requests.iter().map(|r| sandbox.execute(r, None));
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(|r| r.as_ref().unwrap().success));
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }
}
