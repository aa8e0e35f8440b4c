//! Host process runner for device commands

use super::{CommandRunner, DeviceCommand, StreamSignals};
use async_trait::async_trait;
use ota_shared::CommandResult;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs each `DeviceCommand` as a host process
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(device_cmd: &DeviceCommand) -> Command {
        let mut cmd = Command::new(device_cmd.program());
        cmd.args(device_cmd.arg_values());
        if let Some(dir) = device_cmd.working_dir() {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, command: &DeviceCommand) -> CommandResult {
        let output = Self::command(command)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => CommandResult {
                succeeded: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            // Spawn failures surface as a failed result, like a non-zero exit
            Err(e) => CommandResult::failure(format!("failed to spawn '{}': {}", command, e)),
        }
    }

    async fn execute_streaming(
        &self,
        command: &DeviceCommand,
        sink: &Path,
        mut signals: StreamSignals,
    ) -> CommandResult {
        let file = match OpenOptions::new().create(true).append(true).open(sink) {
            Ok(file) => file,
            Err(e) => {
                return CommandResult::failure(format!(
                    "failed to open {}: {}",
                    sink.display(),
                    e
                ))
            }
        };
        let stderr_file = match file.try_clone() {
            Ok(f) => f,
            Err(e) => return CommandResult::failure(format!("failed to share sink: {}", e)),
        };

        let mut child = match Self::command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return CommandResult::failure(format!("failed to spawn '{}': {}", command, e))
            }
        };
        signals.mark_started();

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = signals.stop_requested() => None,
        };

        match exited {
            Some(Ok(status)) => CommandResult {
                succeeded: status.success(),
                ..Default::default()
            },
            Some(Err(e)) => CommandResult::failure(e.to_string()),
            None => {
                debug!("Stop requested for '{}'", command.label());
                if let Err(e) = child.start_kill() {
                    warn!("Failed to signal '{}': {}", command.label(), e);
                }
                match child.wait().await {
                    Ok(_) => CommandResult::success(""),
                    Err(e) => CommandResult::failure(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{oneshot, watch};

    #[tokio::test]
    async fn test_execute_collects_output() {
        let runner = ShellRunner::new();
        let cmd = DeviceCommand::new("echo", "sh").args(["-c", "echo hello; echo oops >&2"]);

        let result = runner.execute(&cmd).await;
        assert!(result.succeeded);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_exit_status_maps_to_failure() {
        let runner = ShellRunner::new();
        let result = runner
            .execute(&DeviceCommand::new("fail", "sh").args(["-c", "exit 3"]))
            .await;
        assert!(!result.succeeded);
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let runner = ShellRunner::new();
        let result = runner
            .execute(&DeviceCommand::new("missing", "definitely-not-a-real-binary"))
            .await;
        assert!(!result.succeeded);
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_streaming_appends_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("capture.txt");
        std::fs::write(&sink, "previous\n").unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();
        let cmd = DeviceCommand::new("stream", "sh").args(["-c", "echo line; exec sleep 30"]);

        let runner = ShellRunner::new();
        let sink_clone = sink.clone();
        let task = tokio::spawn(async move {
            let signals = StreamSignals::new(stop_rx, started_tx);
            runner.execute_streaming(&cmd, &sink_clone, signals).await
        });

        started_rx.await.expect("child should be reported as started");
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        stop_tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("streaming command should stop")
            .unwrap();
        assert!(result.succeeded);

        let contents = std::fs::read_to_string(&sink).unwrap();
        assert!(contents.starts_with("previous\n"));
        assert!(contents.contains("line"));
    }

    #[tokio::test]
    async fn test_spawn_failure_never_reports_started() {
        let dir = tempfile::tempdir().unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();

        let result = ShellRunner::new()
            .execute_streaming(
                &DeviceCommand::new("missing", "definitely-not-a-real-binary"),
                &dir.path().join("capture.txt"),
                StreamSignals::new(stop_rx, started_tx),
            )
            .await;

        assert!(!result.succeeded);
        assert!(started_rx.await.is_err());
    }
}
