// src/sandbox/docker.rs
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerWaitResponse, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::time::timeout;

use crate::config::SandboxConfig;
use crate::errors::{CodeboxError, Result};
use crate::sandbox::process::RawOutput;
use crate::sandbox::{PreparedRun, SandboxBackend};

/// Label put on every container we create, used by `cleanup`.
pub const MANAGED_LABEL_KEY: &str = "codebox.managed";
pub const MANAGED_LABEL_VALUE: &str = "true";

const PIDS_LIMIT: i64 = 256;

/// Runs each submission in a throwaway container through the docker daemon API.
pub struct DockerBackend {
    docker: Docker,
    limits: SandboxConfig,
}

impl DockerBackend {
    /// Connects with the local defaults (`DOCKER_HOST` or the unix socket).
    /// Nothing is sent to the daemon until the first run.
    pub fn connect(limits: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| unavailable(e.to_string()))?;
        Ok(Self::with_client(docker, limits))
    }

    pub fn with_client(docker: Docker, limits: SandboxConfig) -> Self {
        Self { docker, limits }
    }

    /// Pulls the image unless it is already present, outside the run timeout.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        log::info!("Pulling Docker image: {}", image);
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut progress = self.docker.create_image(options, None, None);
        while let Some(step) = progress.next().await {
            step.map_err(|e| unavailable(format!("failed to pull {}: {}", image, e)))?;
        }
        Ok(())
    }

    /// Starts the container and streams its logs until it exits or the
    /// run's time limit is reached.
    async fn drive(&self, id: &str, run: &PreparedRun<'_>) -> Result<RawOutput> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| unavailable(format!("failed to start container: {}", e)))?;
        log::debug!("Started container {}", container_name(&run.id));

        let mut output = RawOutput::default();
        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let streamed = timeout(run.timeout, async {
            while let Some(frame) = logs.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) => append_capped(
                        &mut output.stdout,
                        &mut output.stdout_truncated,
                        &message,
                        run.max_output_bytes,
                    ),
                    Ok(LogOutput::StdErr { message }) => append_capped(
                        &mut output.stderr,
                        &mut output.stderr_truncated,
                        &message,
                        run.max_output_bytes,
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Log stream for {} ended early: {}", id, e);
                        break;
                    }
                }
            }
        })
        .await;

        if streamed.is_err() {
            output.timed_out = true;
            match self
                .docker
                .kill_container(id, None::<KillContainerOptions<String>>)
                .await
            {
                Ok(()) => log::info!("Killed timed out container {}", container_name(&run.id)),
                Err(e) => log::debug!("Kill of {} failed: {}", id, e),
            }
            return Ok(output);
        }

        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        output.exit_code = exit_code(wait.next().await);
        Ok(output)
    }

    async fn remove(&self, id: &str) {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        if let Err(e) = self.docker.remove_container(id, options).await {
            log::warn!("Failed to remove container {}: {}", id, e);
        }
    }
}

fn unavailable(reason: impl Into<String>) -> CodeboxError {
    CodeboxError::BackendUnavailable {
        backend: "docker".to_string(),
        reason: reason.into(),
    }
}

fn append_capped(kept: &mut Vec<u8>, truncated: &mut bool, chunk: &[u8], limit: usize) {
    let room = limit.saturating_sub(kept.len());
    if chunk.len() > room {
        *truncated = true;
    }
    kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

/// Exit status of the program. bollard reports non-zero exits as
/// `DockerContainerWaitError`; those are still the program's own exit codes.
pub fn exit_code(frame: Option<std::result::Result<ContainerWaitResponse, bollard::errors::Error>>) -> Option<i32> {
    match frame {
        Some(Ok(response)) => Some(response.status_code as i32),
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code as i32),
        Some(Err(e)) => {
            log::warn!("Waiting for container failed: {}", e);
            None
        }
        None => None,
    }
}

pub fn container_name(run_id: &str) -> String {
    format!("codebox-{}", run_id)
}

/// Parses a docker-style size such as `512m` or `2g` into bytes.
pub fn memory_bytes(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_ascii_lowercase();
    let (digits, unit) = match limit.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&limit[..i], c),
        _ => (limit.as_str(), 'b'),
    };
    let multiplier: i64 = match unit {
        'b' => 1,
        'k' => 1 << 10,
        'm' => 1 << 20,
        'g' => 1 << 30,
        _ => return None,
    };
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// Container definition for one run, resource limits included.
pub fn container_config(run: &PreparedRun<'_>, limits: &SandboxConfig) -> Result<Config<String>> {
    let memory = memory_bytes(&limits.memory_limit)
        .ok_or_else(|| CodeboxError::Config(format!("invalid memory limit '{}'", limits.memory_limit)))?;

    let mut binds = vec![format!("{}:/workspace:rw", run.code_dir.display())];
    if let Some(workspace) = run.workspace {
        binds.push(format!("{}:/data:rw", workspace.display()));
    }

    let host_config = HostConfig {
        memory: Some(memory),
        memory_swap: Some(memory),
        nano_cpus: Some((limits.cpu_limit * 1_000_000_000.0) as i64),
        pids_limit: Some(PIDS_LIMIT),
        binds: Some(binds),
        network_mode: (!limits.network_enabled).then(|| "none".to_string()),
        ..Default::default()
    };

    let mut env = vec![format!("CODEBOX_JOB_ID={}", run.id)];
    if run.workspace.is_some() {
        env.push("CODEBOX_DATA=/data".to_string());
    }

    Ok(Config {
        image: Some(run.language.image.clone()),
        cmd: Some(run.language.command.clone()),
        env: Some(env),
        working_dir: Some("/workspace".to_string()),
        labels: Some(HashMap::from([(MANAGED_LABEL_KEY.to_string(), MANAGED_LABEL_VALUE.to_string())])),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(!limits.network_enabled),
        host_config: Some(host_config),
        ..Default::default()
    })
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, run: &PreparedRun<'_>) -> Result<RawOutput> {
        self.ensure_image(&run.language.image).await?;

        let config = container_config(run, &self.limits)?;
        let options = Some(CreateContainerOptions {
            name: container_name(&run.id),
            platform: None,
        });
        let container = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| unavailable(format!("failed to create container: {}", e)))?;

        let outcome = self.drive(&container.id, run).await;
        self.remove(&container.id).await;
        outcome
    }

    async fn cleanup(&self) -> Result<()> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}={}", MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE)],
        )]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let ids: Vec<String> = containers.into_iter().filter_map(|c| c.id).collect();
        for id in &ids {
            self.remove(id).await;
        }
        if !ids.is_empty() {
            log::info!("Removed {} leftover container(s)", ids.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::languages::LanguageRegistry;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_container_config_carries_limits_and_mounts() {
        let registry = LanguageRegistry::builtin();
        let limits = SandboxConfig {
            memory_limit: "512m".to_string(),
            cpu_limit: 1.5,
            network_enabled: false,
            ..SandboxConfig::default()
        };
        let run = PreparedRun {
            id: "abc".to_string(),
            language: registry.get("python").unwrap(),
            code_dir: Path::new("/tmp/codebox-abc"),
            workspace: Some(Path::new("/workspace/demo")),
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024,
        };

        let config = container_config(&run, &limits).unwrap();
        assert_eq!(config.image.as_deref(), Some("python:3.11-slim"));
        assert_eq!(config.cmd.unwrap(), vec!["python", "-u", "code.py"]);
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(config.labels.unwrap()[MANAGED_LABEL_KEY], MANAGED_LABEL_VALUE);
        assert!(config.env.unwrap().contains(&"CODEBOX_DATA=/data".to_string()));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.pids_limit, Some(PIDS_LIMIT));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(
            host.binds.unwrap(),
            vec!["/tmp/codebox-abc:/workspace:rw", "/workspace/demo:/data:rw"]
        );
    }

    #[test]
    fn test_network_left_alone_when_enabled() {
        let registry = LanguageRegistry::builtin();
        let run = PreparedRun {
            id: "n".to_string(),
            language: registry.get("shell").unwrap(),
            code_dir: Path::new("/tmp/x"),
            workspace: None,
            timeout: Duration::from_secs(1),
            max_output_bytes: 1,
        };
        let config = container_config(&run, &SandboxConfig::default()).unwrap();
        assert_eq!(config.network_disabled, Some(false));
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode, None);
        assert_eq!(host.binds.unwrap().len(), 1);
    }

    #[test]
    fn test_memory_bytes() {
        assert_eq!(memory_bytes("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(memory_bytes("512M"), Some(512 * 1024 * 1024));
        assert_eq!(memory_bytes("64k"), Some(64 * 1024));
        assert_eq!(memory_bytes("1000"), Some(1000));
        assert_eq!(memory_bytes("10x"), None);
        assert_eq!(memory_bytes(""), None);
    }

    #[test]
    fn test_program_exit_codes_are_not_daemon_failures() {
        let wait_error = bollard::errors::Error::DockerContainerWaitError {
            error: String::new(),
            code: 125,
        };
        assert_eq!(exit_code(Some(Err(wait_error))), Some(125));

        let clean = ContainerWaitResponse {
            status_code: 0,
            ..Default::default()
        };
        assert_eq!(exit_code(Some(Ok(clean))), Some(0));
        assert_eq!(exit_code(None), None);
    }

    #[test]
    fn test_output_cap_keeps_prefix() {
        let mut kept = Vec::new();
        let mut truncated = false;
        append_capped(&mut kept, &mut truncated, b"hello ", 8);
        append_capped(&mut kept, &mut truncated, b"world", 8);
        assert_eq!(kept, b"hello wo");
        assert!(truncated);
    }

    #[tokio::test]
    async fn test_unreachable_daemon_reports_unavailable() {
        let docker =
            Docker::connect_with_unix("/nonexistent/codebox-docker.sock", 2, bollard::API_DEFAULT_VERSION).unwrap();
        let backend = DockerBackend::with_client(docker, SandboxConfig::default());
        let err = backend.ensure_image("alpine:3.19").await.unwrap_err();
        assert!(matches!(err, CodeboxError::BackendUnavailable { .. }));
    }
}
