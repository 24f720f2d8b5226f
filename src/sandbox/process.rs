// src/sandbox/process.rs
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::errors::Result;

/// How long we keep reading pipes after the child is gone. Grandchildren that
/// inherited the pipes can otherwise hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Raw outcome of a child process, before it is turned into an `ExecutionResult`.
#[derive(Debug, Default, Clone)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Bytes read from one pipe so far. Shared with the reader task so that a
/// reader abandoned after `DRAIN_GRACE` still leaves its output behind.
#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

fn lock(capture: &SharedCapture) -> MutexGuard<'_, Capture> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads the whole stream but keeps only the first `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize, sink: SharedCapture) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut capture = lock(&sink);
        let room = limit.saturating_sub(capture.bytes.len());
        if n > room {
            capture.truncated = true;
        }
        capture.bytes.extend_from_slice(&buf[..n.min(room)]);
    }
}

struct Reader {
    task: JoinHandle<()>,
    capture: SharedCapture,
}

fn spawn_reader<R: AsyncRead + Unpin + Send + 'static>(stream: R, limit: usize) -> Reader {
    let capture = SharedCapture::default();
    let task = tokio::spawn(read_capped(stream, limit, capture.clone()));
    Reader { task, capture }
}

/// Waits for `child` with a wall-clock limit while capturing both pipes.
/// On timeout the child is killed and `timed_out` is set.
pub async fn wait_with_limits(mut child: Child, limit: Duration, max_bytes: usize) -> Result<RawOutput> {
    let stdout_reader = child.stdout.take().map(|s| spawn_reader(s, max_bytes));
    let stderr_reader = child.stderr.take().map(|s| spawn_reader(s, max_bytes));

    let mut output = RawOutput::default();
    let waited = timeout(limit, child.wait()).await;
    match waited {
        Ok(status) => output.exit_code = status?.code(),
        Err(_) => {
            output.timed_out = true;
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill timed out process: {}", e);
            }
        }
    }

    if let Some(reader) = stdout_reader {
        (output.stdout, output.stdout_truncated) = collect(reader).await;
    }
    if let Some(reader) = stderr_reader {
        (output.stderr, output.stderr_truncated) = collect(reader).await;
    }
    Ok(output)
}

/// Waits briefly for the reader to hit end of stream, then keeps whatever it
/// has read. A pipe still held open by a background process is abandoned.
async fn collect(mut reader: Reader) -> (Vec<u8>, bool) {
    match timeout(DRAIN_GRACE, &mut reader.task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Output reader failed: {}", e),
        Err(_) => {
            reader.task.abort();
            log::debug!("Output pipe still open after exit; keeping what was read");
        }
    }
    let mut capture = lock(&reader.capture);
    (std::mem::take(&mut capture.bytes), capture.truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let out = wait_with_limits(sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5), 1024)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "err\n");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let out = wait_with_limits(sh("yes | head -c 10000"), Duration::from_secs(5), 100)
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 100);
        assert!(out.stdout_truncated);
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let started = std::time::Instant::now();
        let out = wait_with_limits(sh("sleep 30"), Duration::from_millis(200), 1024)
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_survives_a_background_child_holding_the_pipe() {
        let started = std::time::Instant::now();
        let out = wait_with_limits(sh("echo hello; sleep 5 &"), Duration::from_secs(10), 1024)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
        assert!(!out.stdout_truncated);
        assert_eq!(out.exit_code, Some(0));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
