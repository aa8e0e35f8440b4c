//! Uniform logging around every command result

use super::{CommandRunner, DeviceCommand, StreamSignals};
use async_trait::async_trait;
use ota_shared::CommandResult;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Wraps a runner and logs each command and its outcome
///
/// Commands are logged through their `Display` form, so secret arguments are
/// never written out.
#[derive(Debug, Clone)]
pub struct LoggedRunner<R> {
    inner: R,
}

impl<R> LoggedRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for LoggedRunner<R> {
    async fn execute(&self, command: &DeviceCommand) -> CommandResult {
        debug!(step = command.label(), "$ {}", command);
        let started = Instant::now();

        let result = self.inner.execute(command).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if result.succeeded {
            info!(step = command.label(), elapsed_ms, "Command succeeded");
            if !result.stdout.trim().is_empty() {
                debug!(step = command.label(), "stdout: {}", result.stdout.trim());
            }
        } else {
            warn!(
                step = command.label(),
                elapsed_ms,
                "Command failed: {}",
                result.error_text()
            );
        }
        result
    }

    async fn execute_streaming(
        &self,
        command: &DeviceCommand,
        sink: &Path,
        signals: StreamSignals,
    ) -> CommandResult {
        info!(step = command.label(), sink = %sink.display(), "Streaming $ {}", command);

        let result = self.inner.execute_streaming(command, sink, signals).await;
        if result.succeeded {
            info!(step = command.label(), "Stream finished");
        } else {
            warn!(step = command.label(), "Stream ended with failure: {}", result.error_text());
        }
        result
    }
}
