//! Pre-OTA and post-OTA procedures

use super::device::{DeviceProbe, OobeTiming};
use crate::command::{Adb, CommandRunner};
use crate::connectivity::{ConnectivityManager, WifiCredentials};
use crate::flags::FlagController;
use crate::ota::verify_version_changed;
use crate::registration::{AccountCredentials, RegistrationManager};
use crate::retry::RetryPolicy;
use ota_shared::{timing, BootSlots, DeviceProfile, FlagTarget, OtaError, SoftwareVersion};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Instrument, Span};

/// A host file or directory pushed to a fixed device location before the OTA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local: PathBuf,
    pub remote: String,
}

/// Resolved settings for both procedures
#[derive(Debug, Clone)]
pub struct SetupSettings {
    pub wifi_policy: RetryPolicy,
    pub registration_policy: RetryPolicy,
    pub flag_validation: RetryPolicy,
    pub verify_policy: RetryPolicy,
    pub online_policy: RetryPolicy,
    /// Wait between a flag reboot and the flag read-back
    pub flag_settle: Duration,
    pub app_install_settle: Duration,
    pub artifacts: Vec<Artifact>,
    /// Packages installed before the OTA
    pub apps: Vec<PathBuf>,
    /// App ids that must be installed after the OTA (TV only)
    pub expected_apps: Vec<String>,
    pub expected_boot_slots: BootSlots,
    pub oobe: OobeTiming,
}

impl Default for SetupSettings {
    fn default() -> Self {
        Self {
            wifi_policy: RetryPolicy::wifi_validation(),
            registration_policy: RetryPolicy::registration(),
            flag_validation: RetryPolicy::flag_validation(),
            verify_policy: RetryPolicy::version_verification(),
            online_policy: RetryPolicy::device_online(),
            flag_settle: Duration::from_secs(timing::FLAG_SETTLE_SECS),
            app_install_settle: Duration::from_secs(timing::APP_INSTALL_SETTLE_SECS),
            artifacts: Vec::new(),
            apps: Vec::new(),
            expected_apps: Vec::new(),
            expected_boot_slots: BootSlots {
                slot_a: "No".to_string(),
                slot_b: "Yes".to_string(),
            },
            oobe: OobeTiming::default(),
        }
    }
}

/// What the post-OTA procedure observed
#[derive(Debug, Clone)]
pub struct PostOtaReport {
    pub version: Option<SoftwareVersion>,
    pub verify_attempts: u32,
    pub profile: DeviceProfile,
    pub boot_slots: BootSlots,
}

pub struct DeviceSetupPipeline {
    connectivity: ConnectivityManager,
    registration: RegistrationManager,
    flags: FlagController,
    probe: DeviceProbe,
    wifi: WifiCredentials,
    account: AccountCredentials,
    settings: SetupSettings,
    span: Span,
}

impl DeviceSetupPipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        adb: Adb,
        wifi: WifiCredentials,
        account: AccountCredentials,
        settings: SetupSettings,
    ) -> Self {
        Self {
            connectivity: ConnectivityManager::new(runner.clone(), adb.clone())
                .with_policy(settings.wifi_policy),
            registration: RegistrationManager::new(runner.clone(), adb.clone())
                .with_policy(settings.registration_policy),
            flags: FlagController::new(runner.clone(), adb.clone())
                .with_validation_policy(settings.flag_validation),
            probe: DeviceProbe::new(runner, adb).with_online_policy(settings.online_policy),
            wifi,
            account,
            settings,
            span: Span::none(),
        }
    }

    /// Propagate a span to the pipeline and every component it drives
    pub fn with_span(mut self, span: Span) -> Self {
        self.connectivity = self.connectivity.with_span(span.clone());
        self.registration = self.registration.with_span(span.clone());
        self.flags = self.flags.with_span(span.clone());
        self.probe = self.probe.with_span(span.clone());
        self.span = span;
        self
    }

    pub fn probe(&self) -> &DeviceProbe {
        &self.probe
    }

    /// Bring the device into a known state and capture the baseline version
    pub async fn pre_ota(&self) -> Result<SoftwareVersion, OtaError> {
        self.run_pre_ota().instrument(self.span.clone()).await
    }

    async fn run_pre_ota(&self) -> Result<SoftwareVersion, OtaError> {
        info!("Pre-OTA setup started");

        self.connectivity.connect(&self.wifi).await?;
        self.registration.register(&self.account).await?;

        let baseline = self.probe.software_version().await?;
        info!(%baseline, "Baseline software version");

        for artifact in &self.settings.artifacts {
            self.probe.push(&artifact.local, &artifact.remote).await?;
        }

        if !self.settings.apps.is_empty() {
            for app in &self.settings.apps {
                self.probe.install_app(app).await?;
            }
            sleep(self.settings.app_install_settle).await;
        }

        self.flags
            .apply(FlagTarget::Zero, self.settings.flag_settle)
            .await?;

        info!(%baseline, "Pre-OTA setup complete");
        Ok(baseline)
    }

    /// Confirm the update took effect and restore the device for use
    pub async fn post_ota(&self, baseline: &SoftwareVersion) -> Result<PostOtaReport, OtaError> {
        self.run_post_ota(baseline)
            .instrument(self.span.clone())
            .await
    }

    async fn run_post_ota(&self, baseline: &SoftwareVersion) -> Result<PostOtaReport, OtaError> {
        info!(%baseline, "Post-OTA checks started");

        let verified = verify_version_changed(
            || self.probe.read_software_version(),
            baseline,
            &self.settings.verify_policy,
        )
        .await?;

        self.flags
            .apply(FlagTarget::Hex440, self.settings.flag_settle)
            .await?;

        let profile = self.probe.profile().await?;
        match &profile {
            DeviceProfile::Tv => {
                self.probe.wait_until_online().await?;
                self.probe.check_apps(&self.settings.expected_apps).await?;
            }
            DeviceProfile::Multimodal(name) => {
                info!(product = %name, "Skipping app checks, completing OOBE");
                self.probe.complete_oobe(self.settings.oobe).await?;
            }
        }

        let boot_slots = self
            .probe
            .verify_boot_slots(&self.settings.expected_boot_slots)
            .await?;
        self.probe.enable_voice_assistant().await?;

        info!("Post-OTA checks complete");
        Ok(PostOtaReport {
            version: verified.last_result,
            verify_attempts: verified.attempts_used,
            profile,
            boot_slots,
        })
    }
}
