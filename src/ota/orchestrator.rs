//! OTA Orchestrator
//!
//! Runs the trigger sequence (force-sync, force-update, start, show-status)
//! while a log capture streams the update daemon's output to a per-case
//! file, then waits out the install.

use crate::capture::{CaptureStop, LogCapture};
use crate::command::{Adb, CommandRunner, DeviceCommand};
use ota_shared::{timing, CommandResult, OtaError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, Instrument, Span};

/// Timing and options for one OTA attempt
#[derive(Debug, Clone)]
pub struct OtaSettings {
    /// Delay between trigger commands
    pub command_delay: Duration,
    /// Blocking wait for download and install once triggered
    pub install_settle: Duration,
    /// Grace timeout when stopping the log capture
    pub capture_grace: Duration,
    /// Re-issue force-update once after the sequence
    pub renudge_force_update: bool,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_secs(timing::OTA_COMMAND_DELAY_SECS),
            install_settle: Duration::from_secs(timing::OTA_INSTALL_SETTLE_SECS),
            capture_grace: Duration::from_secs(timing::CAPTURE_STOP_GRACE_SECS),
            renudge_force_update: false,
        }
    }
}

/// One command of the trigger sequence and what it returned
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step: &'static str,
    pub result: CommandResult,
}

/// Everything one OTA trigger produced
#[derive(Debug, Clone)]
pub struct OtaRunRecord {
    pub steps: Vec<StepResult>,
    pub capture: CaptureStop,
    pub log_path: PathBuf,
}

pub struct OtaOrchestrator {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    capture: LogCapture,
    settings: OtaSettings,
    span: Span,
}

impl OtaOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb, settings: OtaSettings) -> Self {
        Self {
            capture: LogCapture::new(runner.clone()),
            runner,
            adb,
            settings,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.capture = self.capture.with_span(span.clone());
        self.span = span;
        self
    }

    /// Trigger the update and wait for it to install
    ///
    /// The log capture is started first and stopped on every exit path,
    /// including an aborted sequence.
    pub async fn trigger(&self, log_path: &Path) -> Result<OtaRunRecord, OtaError> {
        self.run_trigger(log_path)
            .instrument(self.span.clone())
            .await
    }

    async fn run_trigger(&self, log_path: &Path) -> Result<OtaRunRecord, OtaError> {
        let handle = self.capture.start(self.adb.ota_log_stream(), log_path).await?;

        let sequence = match self.run_sequence().await {
            Ok(steps) => {
                info!(
                    settle_secs = self.settings.install_settle.as_secs(),
                    "OTA triggered, waiting for install"
                );
                sleep(self.settings.install_settle).await;
                Ok(steps)
            }
            Err(e) => Err(e),
        };

        let capture = self.capture.stop(handle, self.settings.capture_grace).await;
        let steps = sequence?;

        Ok(OtaRunRecord {
            steps,
            capture,
            log_path: log_path.to_path_buf(),
        })
    }

    async fn run_sequence(&self) -> Result<Vec<StepResult>, OtaError> {
        let mut commands = vec![
            self.adb.ota_force_sync(),
            self.adb.ota_force_update(),
            self.adb.ota_start(),
            self.adb.ota_status(),
        ];
        if self.settings.renudge_force_update {
            commands.push(self.adb.ota_force_update());
        }

        let mut steps: Vec<StepResult> = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                sleep(self.settings.command_delay).await;
            }
            let result = self.runner.execute(command).await;
            let failed = !result.succeeded;
            steps.push(StepResult {
                step: command.label(),
                result,
            });

            if failed {
                return Err(abort(command, &steps));
            }
        }
        Ok(steps)
    }
}

fn abort(command: &DeviceCommand, steps: &[StepResult]) -> OtaError {
    let detail = steps
        .last()
        .map(|s| s.result.error_text().to_string())
        .unwrap_or_default();
    error!(step = command.label(), "OTA sequence aborted: {}", detail);
    OtaError::OtaSequence {
        step: command.label().to_string(),
        detail,
        results: steps.iter().map(|s| s.result.clone()).collect(),
    }
}
