//! OTA Shared Types
//!
//! This crate provides the device-facing vocabulary used by the OTA test
//! orchestrator: command results, parsed device state, the flag phase machine
//! and the error taxonomy.

pub mod error;
pub mod parse;
pub mod state_machine;

use std::fmt;

pub use error::{ErrorKind, OtaError};

/// Timing parameters observed on real devices
pub mod timing {
    /// Link-state validation attempts after joining a network
    pub const WIFI_VALIDATE_ATTEMPTS: u32 = 5;

    /// Delay between link-state validation attempts
    pub const WIFI_VALIDATE_DELAY_SECS: u64 = 5;

    /// Registration status attempts after issuing the register command
    pub const REGISTRATION_ATTEMPTS: u32 = 5;

    /// Delay between registration status attempts
    pub const REGISTRATION_DELAY_SECS: u64 = 5;

    /// Settle wait between a flag reboot and flag validation
    pub const FLAG_SETTLE_SECS: u64 = 60;

    /// Flag validation attempts once the settle wait is over
    pub const FLAG_VALIDATE_ATTEMPTS: u32 = 1;

    /// Delay between flag validation attempts, when more than one is configured
    pub const FLAG_VALIDATE_DELAY_SECS: u64 = 10;

    /// Delay between OTA trigger commands
    pub const OTA_COMMAND_DELAY_SECS: u64 = 5;

    /// Blocking wait for download and install after the trigger sequence
    pub const OTA_INSTALL_SETTLE_SECS: u64 = 600;

    /// Grace period given to the log capture task when stopping it
    pub const CAPTURE_STOP_GRACE_SECS: u64 = 5;

    /// Post-update version verification attempts
    pub const VERSION_VERIFY_ATTEMPTS: u32 = 3;

    /// Delay between post-update version verification attempts
    pub const VERSION_VERIFY_DELAY_SECS: u64 = 60;

    /// Wait for the device to come back after flashing a build
    pub const FLASH_SETTLE_SECS: u64 = 240;

    /// Additional readiness wait before setup starts on a freshly flashed device
    pub const POST_FLASH_READY_SECS: u64 = 30;

    /// Delay between out-of-box completion commands
    pub const OOBE_COMMAND_DELAY_SECS: u64 = 2;

    /// Wait for the device to come back after the out-of-box reboot
    pub const OOBE_REBOOT_SETTLE_SECS: u64 = 60;

    /// Device presence attempts on the command channel
    pub const DEVICE_ONLINE_ATTEMPTS: u32 = 5;

    /// Delay between device presence attempts
    pub const DEVICE_ONLINE_DELAY_SECS: u64 = 1;

    /// Settle wait after installing test apps
    pub const APP_INSTALL_SETTLE_SECS: u64 = 3;
}

/// Outcome of a single command execution on the device channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given stderr
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Best available description of what went wrong
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Opaque software version token reported by the device
///
/// Versions are only ever compared for equality; the token carries no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoftwareVersion(String);

impl SoftwareVersion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Developer flag value as read back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlagState {
    Zero,
    Hex440,
    Unknown,
}

impl fmt::Display for DeviceFlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFlagState::Zero => write!(f, "dev_flags: 0"),
            DeviceFlagState::Hex440 => write!(f, "dev_flags: 0x440"),
            DeviceFlagState::Unknown => write!(f, "dev_flags: unknown"),
        }
    }
}

/// Flag values the orchestrator is allowed to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTarget {
    /// Test mode off, used before the update
    Zero,
    /// Test mode on, restored after the update
    Hex440,
}

impl FlagTarget {
    /// Literal value passed to the flag-set command
    pub fn value(&self) -> &'static str {
        match self {
            FlagTarget::Zero => "0",
            FlagTarget::Hex440 => "0x440",
        }
    }

    /// State the device must report once the flag has been applied
    pub fn expected_state(&self) -> DeviceFlagState {
        match self {
            FlagTarget::Zero => DeviceFlagState::Zero,
            FlagTarget::Hex440 => DeviceFlagState::Hex440,
        }
    }
}

impl fmt::Display for FlagTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Product names recognised as the TV form factor
pub const TV_PRODUCTS: &[&str] = &["callie"];

/// Product names recognised as multimodal (voice + screen) devices
pub const MULTIMODAL_PRODUCTS: &[&str] = &["hypnos", "galileo", "baklava"];

/// Device form factor, decides which post-update steps apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceProfile {
    Tv,
    Multimodal(String),
}

impl DeviceProfile {
    /// Classify a device-reported product name against the allow-lists
    pub fn from_product_name(name: &str) -> Result<Self, OtaError> {
        let name = name.trim();
        if TV_PRODUCTS.contains(&name) {
            Ok(DeviceProfile::Tv)
        } else if MULTIMODAL_PRODUCTS.contains(&name) {
            Ok(DeviceProfile::Multimodal(name.to_string()))
        } else {
            Err(OtaError::UnknownProfile(name.to_string()))
        }
    }

    pub fn is_tv(&self) -> bool {
        matches!(self, DeviceProfile::Tv)
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Tv => write!(f, "TV"),
            DeviceProfile::Multimodal(name) => write!(f, "MULTIMODAL({})", name),
        }
    }
}

/// Status column of the two boot slots from the boot-control table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSlots {
    pub slot_a: String,
    pub slot_b: String,
}
