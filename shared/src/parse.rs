//! Parsers for device command output
//!
//! One function per output shape. Each returns a typed value, or `None` /
//! `DeviceFlagState::Unknown` when the expected marker is absent, so callers
//! decide whether a missing value is an error or a reason to poll again.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{BootSlots, DeviceFlagState, SoftwareVersion};

/// Link state reported once the device has joined a network
pub const NETWORK_CONNECTED_MARKER: &str = "networkState: CONNECTED";

/// Registration status reported once the device is bound to an account
pub const REGISTERED_MARKER: &str = "DEVICE_REGISTERED";

/// Acknowledgement printed when a boolean device setting is written
pub const SETTING_ENABLED_MARKER: &str = "successfully set to 'true'";

/// Header line of the bridge's device listing
const DEVICE_LIST_HEADER: &str = "List of devices attached";

/// Column of the boot-control table holding the slot status
const BOOT_SLOT_STATUS_COLUMN: usize = 3;

static SOFTWARE_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'com\.amazon\.devconf/system/device-info/software-version'\s*=\s*'(\d+)'")
        .expect("software version pattern is valid")
});

static DEV_FLAGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"dev_flags:\s*(0[xX][0-9a-fA-F]+|\d+)\b").expect("dev_flags pattern is valid")
});

/// Extract the software version token from the device-info query
pub fn parse_software_version(output: &str) -> Option<SoftwareVersion> {
    SOFTWARE_VERSION_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| SoftwareVersion::new(m.as_str()))
}

/// Read the developer flag value from the flag dump
///
/// The token must match exactly: `0x440` is never read as `0`.
pub fn parse_flag_state(output: &str) -> DeviceFlagState {
    let Some(token) = DEV_FLAGS_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        return DeviceFlagState::Unknown;
    };

    if token == "0" {
        DeviceFlagState::Zero
    } else if token.eq_ignore_ascii_case("0x440") {
        DeviceFlagState::Hex440
    } else {
        DeviceFlagState::Unknown
    }
}

/// Whether the link-state query reports a connected network
pub fn is_network_connected(output: &str) -> bool {
    output.contains(NETWORK_CONNECTED_MARKER)
}

/// Whether the registration status query reports a bound device
pub fn is_device_registered(output: &str) -> bool {
    output.contains(REGISTERED_MARKER)
}

/// Whether a setting write was acknowledged as enabled
pub fn is_setting_enabled(output: &str) -> bool {
    output.contains(SETTING_ENABLED_MARKER)
}

/// Product name from the device-info listing (`PRODUCT_NAME=<name>`)
pub fn parse_product_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("PRODUCT_NAME"))
        .find_map(|line| line.split_once('='))
        .map(|(_, name)| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Status column for one slot of the boot-control table
///
/// The first line is a header; each following row starts with the slot name.
pub fn parse_boot_slot(output: &str, slot: &str) -> Option<String> {
    output
        .trim()
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|row| row.first() == Some(&slot))
        .and_then(|row| row.get(BOOT_SLOT_STATUS_COLUMN).map(|s| s.to_string()))
}

/// Both slots of the boot-control table
pub fn parse_boot_slots(output: &str) -> Option<BootSlots> {
    Some(BootSlots {
        slot_a: parse_boot_slot(output, "_a")?,
        slot_b: parse_boot_slot(output, "_b")?,
    })
}

/// Serials listed by the bridge in the ready (`device`) state
pub fn parse_attached_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(DEVICE_LIST_HEADER))
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            match (cols.next(), cols.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Whether the installed-app listing contains the given app id
pub fn lists_app(output: &str, app_id: &str) -> bool {
    output
        .lines()
        .any(|line| line.split_whitespace().any(|token| token == app_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_OUTPUT: &str =
        "'com.amazon.devconf/system/device-info/software-version' = '1234567'\n";

    const BOOT_TABLE: &str = "\
Slot  Bootable  Successful  Active
_a    Yes       Yes         No
_b    Yes       Yes         Yes
";

    #[test]
    fn test_software_version() {
        assert_eq!(
            parse_software_version(VERSION_OUTPUT),
            Some(SoftwareVersion::new("1234567"))
        );
        assert_eq!(parse_software_version("error: device offline"), None);
    }

    #[test]
    fn test_flag_state_exact_match() {
        assert_eq!(parse_flag_state("dev_flags: 0\n"), DeviceFlagState::Zero);
        assert_eq!(parse_flag_state("dev_flags: 0x440\n"), DeviceFlagState::Hex440);
        assert_eq!(parse_flag_state("dev_flags: 0X440"), DeviceFlagState::Hex440);
        assert_eq!(parse_flag_state("dev_flags: 0x4"), DeviceFlagState::Unknown);
        assert_eq!(parse_flag_state(""), DeviceFlagState::Unknown);
    }

    #[test]
    fn test_hex440_never_reads_as_zero() {
        // "dev_flags: 0x440" contains "dev_flags: 0" as a substring
        assert_ne!(parse_flag_state("dev_flags: 0x440"), DeviceFlagState::Zero);
    }

    #[test]
    fn test_state_markers() {
        assert!(is_network_connected("ssid: lab\nnetworkState: CONNECTED\n"));
        assert!(!is_network_connected("networkState: DISCONNECTED"));
        assert!(is_device_registered("status: DEVICE_REGISTERED"));
        assert!(!is_device_registered("status: UNKNOWN"));
        assert!(is_setting_enabled("oobe-complete successfully set to 'true'"));
    }

    #[test]
    fn test_product_name() {
        let output = "SERIAL=G0701234\nPRODUCT_NAME = callie\nBOARD=x\n";
        assert_eq!(parse_product_name(output), Some("callie".into()));
        assert_eq!(parse_product_name("SERIAL=G0701234"), None);
        assert_eq!(parse_product_name("PRODUCT_NAME="), None);
    }

    #[test]
    fn test_boot_slots() {
        assert_eq!(parse_boot_slot(BOOT_TABLE, "_a"), Some("No".into()));
        let slots = parse_boot_slots(BOOT_TABLE).unwrap();
        assert_eq!(slots.slot_a, "No");
        assert_eq!(slots.slot_b, "Yes");
        assert_eq!(parse_boot_slots("Slot Bootable\n_a Yes"), None);
    }

    #[test]
    fn test_attached_devices() {
        let output = "List of devices attached\nG0701234\tdevice\nG0705678\toffline\n\n";
        assert_eq!(parse_attached_devices(output), vec!["G0701234".to_string()]);
        assert!(parse_attached_devices("List of devices attached\n").is_empty());
    }

    #[test]
    fn test_lists_app() {
        let output = "com.amazon.systemtest.settings_app.main\ncom.amazon.homelauncher.main\n";
        assert!(lists_app(output, "com.amazon.homelauncher.main"));
        assert!(!lists_app(output, "com.amazon.homelauncher"));
    }
}
