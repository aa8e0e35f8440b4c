//! Device-state probes used around the OTA
//!
//! Each probe issues one or a few commands and turns the output into a
//! typed answer or an [`OtaError`] naming the step and what was observed.

use crate::command::{Adb, CommandRunner, DeviceCommand};
use crate::retry::{retry_until, RetryOutcome, RetryPolicy};
use ota_shared::{parse, timing, BootSlots, CommandResult, DeviceProfile, OtaError, SoftwareVersion};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, Instrument, Span};

/// Where installed packages are staged on the device
const APP_STAGING_DIR: &str = "/data";

/// Timing of the out-of-box completion flow
#[derive(Debug, Clone, Copy)]
pub struct OobeTiming {
    pub command_delay: Duration,
    pub reboot_settle: Duration,
}

impl Default for OobeTiming {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_secs(timing::OOBE_COMMAND_DELAY_SECS),
            reboot_settle: Duration::from_secs(timing::OOBE_REBOOT_SETTLE_SECS),
        }
    }
}

pub struct DeviceProbe {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    online_policy: RetryPolicy,
    span: Span,
}

impl DeviceProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb) -> Self {
        Self {
            runner,
            adb,
            online_policy: RetryPolicy::device_online(),
            span: Span::none(),
        }
    }

    pub fn with_online_policy(mut self, policy: RetryPolicy) -> Self {
        self.online_policy = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run a command and turn a failed result into `CommandFailed`
    async fn run(&self, command: &DeviceCommand) -> Result<CommandResult, OtaError> {
        let result = self.runner.execute(command).await;
        if result.succeeded {
            Ok(result)
        } else {
            Err(OtaError::CommandFailed {
                step: command.label().to_string(),
                detail: result.error_text().to_string(),
            })
        }
    }

    /// Poll the bridge's device list until the target device is ready
    ///
    /// Without a serial, any ready device counts.
    pub async fn wait_until_online(&self) -> Result<RetryOutcome, OtaError> {
        let command = self.adb.devices();
        let serial = self.adb.serial();

        let outcome = retry_until(
            || self.runner.execute(&command),
            |r| {
                let attached = parse::parse_attached_devices(&r.stdout);
                r.succeeded
                    && match serial {
                        Some(serial) => attached.iter().any(|s| s == serial),
                        None => !attached.is_empty(),
                    }
            },
            &self.online_policy,
            "device online",
        )
        .instrument(self.span.clone())
        .await;

        if outcome.succeeded {
            info!(attempts = outcome.attempts_used, "Device online");
            Ok(outcome)
        } else {
            Err(OtaError::ValidationTimeout {
                what: "device online".to_string(),
                attempts: outcome.attempts_used,
                last_output: outcome.last_result.error_text().to_string(),
            })
        }
    }

    /// Running software version, if the device reports one
    pub async fn read_software_version(&self) -> Option<SoftwareVersion> {
        let result = self.runner.execute(&self.adb.software_version()).await;
        let version = parse::parse_software_version(&result.stdout);
        debug!(version = ?version, "Read software version");
        version
    }

    /// Running software version; a missing token is an error
    pub async fn software_version(&self) -> Result<SoftwareVersion, OtaError> {
        let command = self.adb.software_version();
        let result = self.run(&command).await?;
        parse::parse_software_version(&result.stdout).ok_or_else(|| OtaError::UnexpectedOutput {
            step: command.label().to_string(),
            expected: "a software version token".to_string(),
            observed: result.stdout.trim().to_string(),
        })
    }

    pub async fn product_name(&self) -> Result<String, OtaError> {
        let command = self.adb.device_name();
        let result = self.run(&command).await?;
        parse::parse_product_name(&result.stdout).ok_or_else(|| OtaError::UnexpectedOutput {
            step: command.label().to_string(),
            expected: "a PRODUCT_NAME line".to_string(),
            observed: result.stdout.trim().to_string(),
        })
    }

    /// Classify the device; an unlisted product is an error
    pub async fn profile(&self) -> Result<DeviceProfile, OtaError> {
        let name = self.product_name().await?;
        let profile = DeviceProfile::from_product_name(&name)?;
        info!(product = %name, %profile, "Device profile");
        Ok(profile)
    }

    pub async fn reboot(&self) -> Result<(), OtaError> {
        self.run(&self.adb.reboot()).await.map(|_| ())
    }

    /// Copy a host file or directory to the device
    pub async fn push(&self, local: &Path, remote: &str) -> Result<(), OtaError> {
        info!(local = %local.display(), remote, "Pushing to device");
        self.run(&self.adb.push(local, remote)).await.map(|_| ())
    }

    /// Stage a package under the device data dir and install it
    pub async fn install_app(&self, package: &Path) -> Result<(), OtaError> {
        let file_name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| OtaError::CommandFailed {
                step: "install app".to_string(),
                detail: format!("{} has no file name", package.display()),
            })?;
        let remote = format!("{}/{}", APP_STAGING_DIR, file_name);

        self.push(package, &remote).await?;
        self.run(&self.adb.install_app(&remote)).await?;
        info!(package = %file_name, "App installed");
        Ok(())
    }

    /// Require every expected app id in the installed-app listing
    pub async fn check_apps(&self, expected: &[String]) -> Result<(), OtaError> {
        let command = self.adb.list_apps();
        let result = self.run(&command).await?;

        let missing: Vec<&str> = expected
            .iter()
            .map(String::as_str)
            .filter(|app| !parse::lists_app(&result.stdout, app))
            .collect();

        if missing.is_empty() {
            info!(count = expected.len(), "Expected apps present");
            Ok(())
        } else {
            Err(OtaError::UnexpectedOutput {
                step: command.label().to_string(),
                expected: format!("apps {}", expected.join(", ")),
                observed: format!("missing {}", missing.join(", ")),
            })
        }
    }

    /// Mark out-of-box setup complete, reboot and wait for the device
    pub async fn complete_oobe(&self, oobe: OobeTiming) -> Result<(), OtaError> {
        let commands = [
            self.adb.oobe_user_setup_complete(),
            self.adb.oobe_complete(),
            self.adb.oobe_home_launcher(),
        ];
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                sleep(oobe.command_delay).await;
            }
            self.run(command).await?;
        }

        self.reboot().await?;
        info!(settle_secs = oobe.reboot_settle.as_secs(), "OOBE complete, waiting for reboot");
        sleep(oobe.reboot_settle).await;
        self.wait_until_online().await?;
        Ok(())
    }

    pub async fn boot_slots(&self) -> Result<BootSlots, OtaError> {
        let command = self.adb.boot_control();
        let result = self.run(&command).await?;
        parse::parse_boot_slots(&result.stdout).ok_or_else(|| OtaError::UnexpectedOutput {
            step: command.label().to_string(),
            expected: "rows for slots _a and _b".to_string(),
            observed: result.stdout.trim().to_string(),
        })
    }

    /// Read the boot-slot table and compare it with `expected`
    pub async fn verify_boot_slots(&self, expected: &BootSlots) -> Result<BootSlots, OtaError> {
        let slots = self.boot_slots().await?;
        if &slots != expected {
            return Err(OtaError::UnexpectedOutput {
                step: "boot control".to_string(),
                expected: format!("_a={} _b={}", expected.slot_a, expected.slot_b),
                observed: format!("_a={} _b={}", slots.slot_a, slots.slot_b),
            });
        }
        info!(slot_a = %slots.slot_a, slot_b = %slots.slot_b, "Boot slots as expected");
        Ok(slots)
    }

    /// Enable the voice assistant and require the device's acknowledgement
    pub async fn enable_voice_assistant(&self) -> Result<(), OtaError> {
        let command = self.adb.enable_voice_assistant();
        let result = self.run(&command).await?;
        if !parse::is_setting_enabled(&result.stdout) {
            return Err(OtaError::UnexpectedOutput {
                step: command.label().to_string(),
                expected: format!("'{}'", parse::SETTING_ENABLED_MARKER),
                observed: result.stdout.trim().to_string(),
            });
        }
        info!("Voice assistant enabled");
        Ok(())
    }
}
