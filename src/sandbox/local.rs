// src/sandbox/local.rs
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::{CodeboxError, Result};
use crate::sandbox::process::{wait_with_limits, RawOutput};
use crate::sandbox::{PreparedRun, SandboxBackend};

/// Runs submissions as plain child processes of the server.
///
/// Only the wall-clock timeout and output caps are enforced here; CPU, memory
/// and network limits need the docker backend. Meant for development hosts
/// without a docker daemon.
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, run: &PreparedRun<'_>) -> Result<RawOutput> {
        let argv = run.language.local_command();
        let (program, args) = argv.split_first().ok_or_else(|| {
            CodeboxError::Config(format!("empty local command for {}", run.language.file_name))
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(run.code_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("CODEBOX_JOB_ID", &run.id)
            .kill_on_drop(true);
        if let Some(workspace) = run.workspace {
            command.env("CODEBOX_DATA", workspace);
        }

        let child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CodeboxError::BackendUnavailable {
                backend: self.name().to_string(),
                reason: format!("'{}' is not installed", program),
            },
            _ => CodeboxError::Io(e),
        })?;

        log::debug!("Local run {} started: {}", run.id, argv.join(" "));
        wait_with_limits(child, run.timeout, run.max_output_bytes).await
    }
}
