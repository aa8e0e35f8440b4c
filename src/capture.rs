//! Log Capture
//!
//! Streams a long-running diagnostic command to a file in a background task
//! while the orchestrator keeps issuing commands. Capture is best-effort:
//! stopping it never fails the run.

use crate::command::{CommandRunner, DeviceCommand, StreamSignals};
use ota_shared::{CommandResult, OtaError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument, Span};

/// How a capture ended when it was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStop {
    /// The task finished within the grace timeout
    StoppedCleanly,
    /// The task was still running at the timeout and was left running
    TimedOut,
}

/// Handle to a running capture, consumed by [`LogCapture::stop`]
#[derive(Debug)]
pub struct CaptureHandle {
    task: JoinHandle<CommandResult>,
    stop_tx: watch::Sender<bool>,
    output: PathBuf,
    label: &'static str,
}

/// Owns the single capture slot of an orchestration run
pub struct LogCapture {
    runner: Arc<dyn CommandRunner>,
    /// Set while a capture task is outstanding
    active: Arc<RwLock<bool>>,
    span: Span,
}

impl LogCapture {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            active: Arc::new(RwLock::new(false)),
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn is_active(&self) -> bool {
        *self.active.read().await
    }

    /// Launch `command` in the background, appending its output to `output`
    ///
    /// Returns once the runner reports the command running, so everything
    /// issued afterwards lands inside the capture. Only one capture may be
    /// active at a time; the slot stays taken until the task exits.
    pub async fn start(&self, command: DeviceCommand, output: &Path) -> Result<CaptureHandle, OtaError> {
        let mut active = self.active.write().await;
        if *active {
            return Err(OtaError::CaptureAlreadyActive);
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        *active = true;
        drop(active);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();
        let runner = self.runner.clone();
        let active = self.active.clone();
        let sink = output.to_path_buf();
        let label = command.label();

        let task = tokio::spawn(
            async move {
                let signals = StreamSignals::new(stop_rx, started_tx);
                let result = runner.execute_streaming(&command, &sink, signals).await;
                *active.write().await = false;
                result
            }
            .instrument(self.span.clone()),
        );

        if started_rx.await.is_ok() {
            info!(step = label, output = %output.display(), "Log capture started");
        } else {
            warn!(step = label, "Log capture command never started");
        }
        Ok(CaptureHandle {
            task,
            stop_tx,
            output: output.to_path_buf(),
            label,
        })
    }

    /// Request the capture to finish and wait up to `timeout` for it
    ///
    /// A capture that does not finish in time is left running and reported
    /// as [`CaptureStop::TimedOut`]; it keeps the slot until it exits.
    pub async fn stop(&self, handle: CaptureHandle, timeout: Duration) -> CaptureStop {
        let CaptureHandle {
            mut task,
            stop_tx,
            output,
            label,
        } = handle;

        // The receiver is gone only if the task already finished
        let _ = stop_tx.send(true);

        let stopped = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => {
                if !result.succeeded {
                    warn!(step = label, "Log capture ended with failure: {}", result.error_text());
                }
                info!(step = label, output = %output.display(), "Log capture stopped");
                CaptureStop::StoppedCleanly
            }
            Ok(Err(e)) => {
                // The task never reached its own release
                warn!(step = label, "Log capture task ended abnormally: {}", e);
                *self.active.write().await = false;
                CaptureStop::StoppedCleanly
            }
            Err(_) => {
                warn!(
                    step = label,
                    timeout_secs = timeout.as_secs(),
                    "Log capture did not stop in time, leaving it running"
                );
                CaptureStop::TimedOut
            }
        };
        stopped
    }
}
