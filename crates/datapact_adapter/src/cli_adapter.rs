//! CLI subprocess adapter.
//!
//! Spawns the service command with piped stdio, drains stdout/stderr on
//! background threads while polling for completion, and kills the
//! process on timeout expiry or run cancellation. A hung external
//! process can therefore never block the worker pool past its own
//! timeout.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{AdapterError, CancelFlag, FetchParams, ServiceAdapter, ServiceHealth, ServiceSpec};

/// Poll interval while waiting on a child process.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Production [`ServiceAdapter`] backed by an external CLI command.
pub struct CliAdapter {
    name: String,
    spec: ServiceSpec,
    cancel: CancelFlag,
}

impl CliAdapter {
    pub fn new(name: impl Into<String>, spec: ServiceSpec, cancel: CancelFlag) -> Self {
        Self {
            name: name.into(),
            spec,
            cancel,
        }
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    fn build_command(&self, extra_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .args(extra_args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, extra_args: &[String], timeout: Duration) -> Result<ProcessOutput, AdapterError> {
        let child = self
            .build_command(extra_args)
            .spawn()
            .map_err(|e| AdapterError::Unavailable(format!("{}: {}", self.spec.command, e)))?;

        wait_with_timeout(child, timeout, &self.cancel)
    }
}

impl ServiceAdapter for CliAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn health_check(&self, timeout: Duration) -> ServiceHealth {
        let started = Instant::now();
        let checked_at = Utc::now();

        let reachable = match self.run(&self.spec.health_args, timeout) {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!(service = self.name.as_str(), error = %err, "health probe failed");
                false
            }
        };

        let latency = started.elapsed();
        if !reachable {
            warn!(
                service = self.name.as_str(),
                latency_ms = latency.as_millis() as u64,
                "service unreachable"
            );
        }

        ServiceHealth {
            service: self.name.clone(),
            reachable,
            checked_at,
            latency,
        }
    }

    fn fetch(&self, params: &FetchParams, timeout: Duration) -> Result<String, AdapterError> {
        // BTreeMap iteration is sorted, so the argument vector is stable
        // across runs for the same parameters.
        let mut extra_args = Vec::with_capacity(params.len() * 2);
        for (key, value) in params {
            extra_args.push(format!("--{}", key));
            extra_args.push(value.clone());
        }

        debug!(
            service = self.name.as_str(),
            command = self.spec.command.as_str(),
            "fetching"
        );

        let output = self.run(&extra_args, timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdapterError::Unavailable(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| AdapterError::MalformedOutput(format!("output is not UTF-8: {}", e)))?;

        if stdout.trim().is_empty() {
            return Err(AdapterError::MalformedOutput(
                "service exited successfully but produced no output".to_string(),
            ));
        }

        Ok(stdout)
    }
}

struct ProcessOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Poll the child until exit, timeout, or cancellation. Stdout and
/// stderr are drained on reader threads for the whole lifetime of the
/// child: a service producing more output than the OS pipe buffer must
/// not block on write waiting for us to read. On timeout or cancellation
/// the child is killed and reaped before returning.
fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<ProcessOutput, AdapterError> {
    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| AdapterError::Unavailable("missing stdout pipe".to_string()))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::Unavailable("missing stderr pipe".to_string()))?;
    let stdout_reader = spawn_reader(stdout_pipe);
    let stderr_reader = spawn_reader(stderr_pipe);

    let start = Instant::now();
    let status = loop {
        if cancel.is_cancelled() {
            kill_and_reap(&mut child, stdout_reader, stderr_reader);
            return Err(AdapterError::Cancelled);
        }

        match child.try_wait() {
            Err(e) => {
                kill_and_reap(&mut child, stdout_reader, stderr_reader);
                return Err(AdapterError::Unavailable(e.to_string()));
            }
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_and_reap(&mut child, stdout_reader, stderr_reader);
                    return Err(AdapterError::Timeout { timeout });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: join_reader(stdout_reader)?,
        stderr: join_reader(stderr_reader)?,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_reader(reader: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, AdapterError> {
    reader
        .join()
        .map_err(|_| AdapterError::Unavailable("pipe reader panicked".to_string()))?
        .map_err(|e| AdapterError::Unavailable(e.to_string()))
}

/// Killing the child closes its ends of the pipes, so the readers hit
/// EOF and both joins return promptly.
fn kill_and_reap(
    child: &mut Child,
    stdout_reader: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr_reader: JoinHandle<std::io::Result<Vec<u8>>>,
) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = stdout_reader.join();
    let _ = stderr_reader.join();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ServiceSpec {
        let mut spec = ServiceSpec::new("sh");
        spec.args = vec!["-c".to_string(), script.to_string()];
        spec.health_args = vec![];
        spec
    }

    fn adapter(script: &str) -> CliAdapter {
        CliAdapter::new("test", sh(script), CancelFlag::new())
    }

    #[test]
    fn test_fetch_captures_stdout() {
        let out = adapter("echo Date,PnL; echo 2024-01-10,1.5")
            .fetch(&FetchParams::new(), Duration::from_secs(5))
            .unwrap();
        assert!(out.contains("Date,PnL"));
        assert!(out.contains("2024-01-10,1.5"));
    }

    #[test]
    fn test_large_output_drained_while_running() {
        // Well past the OS pipe buffer: the child can only finish if its
        // stdout is consumed before it exits.
        let out = adapter("yes 2024-01-10,1.5 | head -c 1048576")
            .fetch(&FetchParams::new(), Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.len(), 1_048_576);
        assert!(out.starts_with("2024-01-10,1.5"));
    }

    #[test]
    fn test_nonzero_exit_is_unavailable() {
        let err = adapter("echo boom >&2; exit 3")
            .fetch(&FetchParams::new(), Duration::from_secs(5))
            .unwrap_err();
        match err {
            AdapterError::Unavailable(msg) => assert!(msg.contains("boom")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_output_is_malformed() {
        let err = adapter("true")
            .fetch(&FetchParams::new(), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, AdapterError::MalformedOutput(_)));
    }

    #[test]
    fn test_timeout_kills_hung_process() {
        let start = Instant::now();
        let err = adapter("sleep 30")
            .fetch(&FetchParams::new(), Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancellation_terminates_promptly() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let adapter = CliAdapter::new("test", sh("sleep 30"), cancel);
        let start = Instant::now();
        let err = adapter
            .fetch(&FetchParams::new(), Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_params_rendered_as_sorted_flags() {
        let mut params = FetchParams::new();
        params.insert("ticker".to_string(), "TSLA".to_string());
        params.insert("from".to_string(), "2024-01-01".to_string());
        let out = adapter("echo \"$0\" \"$@\"")
            .fetch(&params, Duration::from_secs(5))
            .unwrap();
        // BTreeMap order: from before ticker.
        assert!(out.contains("--from 2024-01-01 --ticker TSLA"));
    }

    #[test]
    fn test_health_check_reachable() {
        let mut spec = sh("exit 0");
        spec.health_args = vec![];
        let health =
            CliAdapter::new("svc", spec, CancelFlag::new()).health_check(Duration::from_secs(5));
        assert!(health.reachable);
        assert_eq!(health.service, "svc");
    }

    #[test]
    fn test_health_check_missing_binary_unreachable() {
        let spec = ServiceSpec::new("datapact-no-such-binary");
        let health = CliAdapter::new("gone", spec, CancelFlag::new())
            .health_check(Duration::from_secs(1));
        assert!(!health.reachable);
    }
}
