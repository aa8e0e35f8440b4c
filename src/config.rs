//! Run configuration
//!
//! Loaded from a TOML file and resolved into the plain values the managers
//! take. Nothing below this module reads configuration storage.

use crate::command::Adb;
use crate::connectivity::WifiCredentials;
use crate::ota::OtaSettings;
use crate::pipeline::{Artifact, OobeTiming, SetupSettings};
use crate::registration::AccountCredentials;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use ota_shared::{timing, BootSlots, OtaError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEBUG_CERTS_DEVICE_DIR: &str = "/etc/pkgmgrd/certs/";
const SERVICE_CONFIG_DEVICE_DIR: &str = "/etc/pkgmgrd/";

#[derive(Deserialize)]
pub struct RunConfig {
    /// Directory for per-case OTA logs
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default)]
    pub device: DeviceSection,
    pub wifi: WifiSection,
    pub registration: RegistrationSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub apps: AppsSection,
    /// Build name to build directory
    #[serde(default)]
    pub builds: HashMap<String, PathBuf>,
    #[serde(default)]
    pub boot_slots: BootSlotsSection,
    #[serde(default)]
    pub timing: TimingSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceSection {
    pub serial: Option<String>,
}

#[derive(Deserialize)]
pub struct WifiSection {
    pub ssid: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegistrationSection {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ArtifactsSection {
    pub debug_certs: Option<PathBuf>,
    pub service_config: Option<PathBuf>,
    pub debug_certs_device_dir: String,
    pub service_config_device_dir: String,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            debug_certs: None,
            service_config: None,
            debug_certs_device_dir: DEBUG_CERTS_DEVICE_DIR.to_string(),
            service_config_device_dir: SERVICE_CONFIG_DEVICE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppsSection {
    /// App name to local package, installed before the OTA
    pub install: BTreeMap<String, PathBuf>,
    /// App ids that must be present after the OTA
    pub expected: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BootSlotsSection {
    pub slot_a: String,
    pub slot_b: String,
}

impl Default for BootSlotsSection {
    fn default() -> Self {
        Self {
            slot_a: "No".to_string(),
            slot_b: "Yes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub wifi_validate_attempts: u32,
    pub wifi_validate_delay_secs: u64,
    pub registration_attempts: u32,
    pub registration_delay_secs: u64,
    pub flag_settle_secs: u64,
    pub flag_validate_attempts: u32,
    pub flag_validate_delay_secs: u64,
    pub ota_command_delay_secs: u64,
    pub ota_install_settle_secs: u64,
    pub capture_stop_grace_secs: u64,
    pub version_verify_attempts: u32,
    pub version_verify_delay_secs: u64,
    pub flash_settle_secs: u64,
    pub post_flash_ready_secs: u64,
    pub oobe_command_delay_secs: u64,
    pub oobe_reboot_settle_secs: u64,
    pub device_online_attempts: u32,
    pub device_online_delay_secs: u64,
    pub app_install_settle_secs: u64,
    pub renudge_force_update: bool,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            wifi_validate_attempts: timing::WIFI_VALIDATE_ATTEMPTS,
            wifi_validate_delay_secs: timing::WIFI_VALIDATE_DELAY_SECS,
            registration_attempts: timing::REGISTRATION_ATTEMPTS,
            registration_delay_secs: timing::REGISTRATION_DELAY_SECS,
            flag_settle_secs: timing::FLAG_SETTLE_SECS,
            flag_validate_attempts: timing::FLAG_VALIDATE_ATTEMPTS,
            flag_validate_delay_secs: timing::FLAG_VALIDATE_DELAY_SECS,
            ota_command_delay_secs: timing::OTA_COMMAND_DELAY_SECS,
            ota_install_settle_secs: timing::OTA_INSTALL_SETTLE_SECS,
            capture_stop_grace_secs: timing::CAPTURE_STOP_GRACE_SECS,
            version_verify_attempts: timing::VERSION_VERIFY_ATTEMPTS,
            version_verify_delay_secs: timing::VERSION_VERIFY_DELAY_SECS,
            flash_settle_secs: timing::FLASH_SETTLE_SECS,
            post_flash_ready_secs: timing::POST_FLASH_READY_SECS,
            oobe_command_delay_secs: timing::OOBE_COMMAND_DELAY_SECS,
            oobe_reboot_settle_secs: timing::OOBE_REBOOT_SETTLE_SECS,
            device_online_attempts: timing::DEVICE_ONLINE_ATTEMPTS,
            device_online_delay_secs: timing::DEVICE_ONLINE_DELAY_SECS,
            app_install_settle_secs: timing::APP_INSTALL_SETTLE_SECS,
            renudge_force_update: false,
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Replace the configured serial, e.g. from the command line or environment
    pub fn override_serial(&mut self, serial: Option<String>) {
        if let Some(serial) = serial.filter(|s| !s.trim().is_empty()) {
            self.device.serial = Some(serial);
        }
    }

    pub fn adb(&self) -> Adb {
        Adb::new(self.device.serial.clone())
    }

    pub fn wifi_credentials(&self) -> WifiCredentials {
        WifiCredentials::new(&self.wifi.ssid, &self.wifi.password)
    }

    pub fn account_credentials(&self) -> AccountCredentials {
        AccountCredentials::new(&self.registration.username, &self.registration.password)
    }

    /// Per-case OTA log file
    pub fn log_path(&self, case_name: &str) -> PathBuf {
        self.logs_dir.join(format!("{}_ota_logs.txt", case_name))
    }

    /// Debug-level run log for a test case
    pub fn run_log_path(&self, case_name: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.log", case_name))
    }

    /// Debug certificates and service configuration, when configured
    pub fn artifacts(&self) -> Vec<Artifact> {
        let a = &self.artifacts;
        [
            (&a.debug_certs, &a.debug_certs_device_dir),
            (&a.service_config, &a.service_config_device_dir),
        ]
        .into_iter()
        .filter_map(|(local, remote)| {
            local.as_ref().map(|local| Artifact {
                local: local.clone(),
                remote: remote.clone(),
            })
        })
        .collect()
    }

    pub fn setup_settings(&self) -> Result<SetupSettings, OtaError> {
        let t = &self.timing;
        Ok(SetupSettings {
            wifi_policy: RetryPolicy::new(t.wifi_validate_attempts, secs(t.wifi_validate_delay_secs))?,
            registration_policy: RetryPolicy::new(
                t.registration_attempts,
                secs(t.registration_delay_secs),
            )?,
            flag_validation: RetryPolicy::new(
                t.flag_validate_attempts,
                secs(t.flag_validate_delay_secs),
            )?,
            verify_policy: RetryPolicy::new(
                t.version_verify_attempts,
                secs(t.version_verify_delay_secs),
            )?,
            online_policy: RetryPolicy::new(t.device_online_attempts, secs(t.device_online_delay_secs))?,
            flag_settle: secs(t.flag_settle_secs),
            app_install_settle: secs(t.app_install_settle_secs),
            artifacts: self.artifacts(),
            apps: self.apps.install.values().cloned().collect(),
            expected_apps: self.apps.expected.clone(),
            expected_boot_slots: BootSlots {
                slot_a: self.boot_slots.slot_a.clone(),
                slot_b: self.boot_slots.slot_b.clone(),
            },
            oobe: OobeTiming {
                command_delay: secs(t.oobe_command_delay_secs),
                reboot_settle: secs(t.oobe_reboot_settle_secs),
            },
        })
    }

    pub fn ota_settings(&self) -> OtaSettings {
        let t = &self.timing;
        OtaSettings {
            command_delay: secs(t.ota_command_delay_secs),
            install_settle: secs(t.ota_install_settle_secs),
            capture_grace: secs(t.capture_stop_grace_secs),
            renudge_force_update: t.renudge_force_update,
        }
    }

    /// Flash script waits: settle, then readiness
    pub fn flash_waits(&self) -> (Duration, Duration) {
        (
            secs(self.timing.flash_settle_secs),
            secs(self.timing.post_flash_ready_secs),
        )
    }
}
