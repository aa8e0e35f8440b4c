//! Build flashing before a test case

use crate::command::{Adb, CommandRunner};
use ota_shared::{timing, OtaError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, Instrument, Span};

/// Flashes a named build onto the device with the vendor flash script
pub struct DeviceFlasher {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    builds: HashMap<String, PathBuf>,
    /// Wait for the device to come back after flashing
    settle: Duration,
    /// Extra wait before setup may start
    ready_wait: Duration,
    span: Span,
}

impl DeviceFlasher {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb, builds: HashMap<String, PathBuf>) -> Self {
        Self {
            runner,
            adb,
            builds,
            settle: Duration::from_secs(timing::FLASH_SETTLE_SECS),
            ready_wait: Duration::from_secs(timing::POST_FLASH_READY_SECS),
            span: Span::none(),
        }
    }

    pub fn with_waits(mut self, settle: Duration, ready_wait: Duration) -> Self {
        self.settle = settle;
        self.ready_wait = ready_wait;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Flash `build_name` and wait until the device should be usable again
    pub async fn flash(&self, build_name: &str) -> Result<(), OtaError> {
        self.run_flash(build_name)
            .instrument(self.span.clone())
            .await
    }

    async fn run_flash(&self, build_name: &str) -> Result<(), OtaError> {
        let serial = self.adb.serial().ok_or(OtaError::MissingSerial)?;

        let build_dir = match self.builds.get(build_name) {
            Some(dir) if dir.is_dir() => dir,
            other => {
                return Err(OtaError::MissingBuild {
                    name: build_name.to_string(),
                    path: other
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "<not configured>".to_string()),
                })
            }
        };

        info!(build = build_name, dir = %build_dir.display(), "Flashing build");
        let command = self.adb.flash_image(build_dir, serial);
        let result = self.runner.execute(&command).await;
        if !result.succeeded {
            error!(build = build_name, "Flash failed");
            return Err(OtaError::CommandFailed {
                step: command.label().to_string(),
                detail: result.error_text().to_string(),
            });
        }

        info!(settle_secs = self.settle.as_secs(), "Build flashed, waiting for device");
        sleep(self.settle).await;
        info!(ready_secs = self.ready_wait.as_secs(), "Waiting for device to be ready");
        sleep(self.ready_wait).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::ScriptedRunner;
    use ota_shared::CommandResult;
    use tokio::time::Instant;

    fn builds(dir: &std::path::Path) -> HashMap<String, PathBuf> {
        HashMap::from([
            ("n_1_to_n".to_string(), dir.to_path_buf()),
            ("prod_to_n".to_string(), dir.join("missing")),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_runs_script_then_waits() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let flasher = DeviceFlasher::new(
            runner.clone(),
            Adb::new(Some("G0701234".into())),
            builds(dir.path()),
        );

        let start = Instant::now();
        flasher.flash("n_1_to_n").await.unwrap();

        assert_eq!(runner.calls(), vec!["flash build"]);
        assert_eq!(
            runner.rendered()[0],
            "python3 flashimage.py --aserial=G0701234 --fserial=G0701234"
        );
        assert_eq!(start.elapsed(), Duration::from_secs(240 + 30));
    }

    #[tokio::test]
    async fn test_flash_requires_serial() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let flasher = DeviceFlasher::new(runner.clone(), Adb::default(), builds(dir.path()));

        assert!(matches!(
            flasher.flash("n_1_to_n").await,
            Err(OtaError::MissingSerial)
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_or_absent_build() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let flasher = DeviceFlasher::new(
            runner.clone(),
            Adb::new(Some("G0701234".into())),
            builds(dir.path()),
        );

        assert!(matches!(
            flasher.flash("n_to_u").await,
            Err(OtaError::MissingBuild { ref path, .. }) if path == "<not configured>"
        ));
        assert!(matches!(
            flasher.flash("prod_to_n").await,
            Err(OtaError::MissingBuild { ref name, .. }) if name == "prod_to_n"
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_failure_skips_waits() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("flash build", CommandResult::failure("fastboot: no device"));
        let flasher = DeviceFlasher::new(
            runner.clone(),
            Adb::new(Some("G0701234".into())),
            builds(dir.path()),
        );

        let start = Instant::now();
        let err = flasher.flash("n_1_to_n").await.unwrap_err();
        assert!(matches!(err, OtaError::CommandFailed { ref step, .. } if step == "flash build"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
