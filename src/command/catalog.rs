//! Typed builders for every command the orchestrator sends

use super::DeviceCommand;
use ota_shared::FlagTarget;
use std::path::Path;

const BRIDGE: &str = "adb";

const SOFTWARE_VERSION_KEY: &str = "com.amazon.devconf/system/device-info/software-version";
const OOBE_COMPLETE_KEY: &str = "com.amazon.devconf/system/oobe/oobe-complete";
const LAUNCHER_CATEGORY: &str = "com.amazon.category.launcher";
const HOME_LAUNCHER: &str = "com.amazon.homelauncher.main";

/// Command builder for a device reached through the debug bridge
#[derive(Debug, Clone, Default)]
pub struct Adb {
    serial: Option<String>,
}

impl Adb {
    /// Target a specific device; without a serial the bridge picks the only one attached
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn bridge(&self, label: &'static str) -> DeviceCommand {
        let cmd = DeviceCommand::new(label, BRIDGE);
        match &self.serial {
            Some(serial) => cmd.args(["-s", serial.as_str()]),
            None => cmd,
        }
    }

    fn shell<'a>(&self, label: &'static str, words: impl IntoIterator<Item = &'a str>) -> DeviceCommand {
        self.bridge(label).arg("shell").args(words)
    }

    // Wi-Fi

    pub fn wifi_scan(&self) -> DeviceCommand {
        self.shell("wifi scan", ["ace", "mw", "wifi", "scan"])
    }

    pub fn wifi_scan_results(&self) -> DeviceCommand {
        self.shell("wifi scan results", ["ace", "mw", "wifi", "get_scan_results"])
    }

    pub fn wifi_add_network(&self, ssid: &str, psk: &str) -> DeviceCommand {
        self.shell("wifi add network", ["ace", "mw", "wifi", "add_network"])
            .arg(format!("ssid={}", ssid))
            .secret_arg(format!("psk={}", psk))
    }

    pub fn wifi_config(&self) -> DeviceCommand {
        self.shell("wifi get config", ["ace", "mw", "wifi", "get_config"])
    }

    pub fn wifi_connect(&self, ssid: &str) -> DeviceCommand {
        self.shell("wifi connect", ["ace", "mw", "wifi", "connect", ssid])
    }

    pub fn wifi_save_config(&self) -> DeviceCommand {
        self.shell("wifi save config", ["ace", "mw", "wifi", "save_config"])
    }

    pub fn wifi_net_state(&self) -> DeviceCommand {
        self.shell("wifi net state", ["ace", "mw", "wifi", "get_net_state"])
    }

    // Registration

    pub fn register(&self, username: &str, password: &str) -> DeviceCommand {
        self.shell("register device", ["ace", "mw", "map", "-u", username, "-p"])
            .secret_arg(password)
    }

    pub fn registration_status(&self) -> DeviceCommand {
        self.shell("registration status", ["ace", "mw", "map", "-y"])
    }

    // System

    pub fn devices(&self) -> DeviceCommand {
        DeviceCommand::new("list devices", BRIDGE).arg("devices")
    }

    pub fn software_version(&self) -> DeviceCommand {
        self.shell("software version", ["vdcm", "get", SOFTWARE_VERSION_KEY])
    }

    pub fn device_name(&self) -> DeviceCommand {
        self.shell("device name", ["ace", "hal", "device_info", "cli", "-l", "-n"])
    }

    pub fn enable_voice_assistant(&self) -> DeviceCommand {
        self.shell("enable voice assistant", ["vdcm", "set", OOBE_COMPLETE_KEY, "'true'"])
    }

    pub fn push(&self, local: &Path, remote: &str) -> DeviceCommand {
        self.bridge("push file")
            .arg("push")
            .arg(local.to_string_lossy())
            .arg(remote)
    }

    pub fn install_app(&self, remote: &str) -> DeviceCommand {
        self.shell("install app", ["vpm", "install", remote])
    }

    pub fn list_apps(&self) -> DeviceCommand {
        self.shell("list apps", ["vpm", "list", "apps"])
    }

    pub fn reboot(&self) -> DeviceCommand {
        self.shell("reboot", ["reboot"])
    }

    pub fn boot_control(&self) -> DeviceCommand {
        self.shell("boot control", ["boot_control_utility"])
    }

    // Flags

    pub fn set_dev_flags(&self, target: FlagTarget) -> DeviceCommand {
        self.shell("set dev flags", ["idme", "dev_flags", target.value()])
    }

    pub fn dev_flags(&self) -> DeviceCommand {
        // The pipe runs in the device shell, not on the host
        self.shell("read dev flags", ["idme print | grep flags"])
    }

    // Out-of-box experience

    pub fn oobe_user_setup_complete(&self) -> DeviceCommand {
        self.shell(
            "oobe user setup complete",
            ["ace", "hal", "kvs", "cli", "-s", "-k", "user_setup_complete", "-v", "1"],
        )
    }

    pub fn oobe_complete(&self) -> DeviceCommand {
        self.shell("oobe complete", ["vdcm", "set", OOBE_COMPLETE_KEY, "'true'"])
    }

    pub fn oobe_home_launcher(&self) -> DeviceCommand {
        self.shell(
            "oobe home launcher",
            ["vpm", "set", "default", LAUNCHER_CATEGORY, HOME_LAUNCHER],
        )
    }

    // OTA

    pub fn ota_force_sync(&self) -> DeviceCommand {
        self.shell("ota force sync", ["ace", "mw", "ota", "forceSync"])
    }

    pub fn ota_force_update(&self) -> DeviceCommand {
        self.shell("ota force update", ["ace", "mw", "ota", "forceUpdate"])
    }

    pub fn ota_start(&self) -> DeviceCommand {
        self.shell("ota start", ["ace", "mw", "ota", "start"])
    }

    pub fn ota_status(&self) -> DeviceCommand {
        self.shell("ota show status", ["ace", "mw", "ota", "show_status"])
    }

    pub fn ota_log_stream(&self) -> DeviceCommand {
        self.shell("ota log stream", ["journalctl -f | grep ace_otad"])
    }

    // Flashing (host side)

    /// Vendor flash script, run from inside the build directory
    pub fn flash_image(&self, build_dir: &Path, serial: &str) -> DeviceCommand {
        DeviceCommand::new("flash build", "python3")
            .arg("flashimage.py")
            .arg(format!("--aserial={}", serial))
            .arg(format!("--fserial={}", serial))
            .current_dir(build_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_is_passed_to_bridge() {
        let adb = Adb::new(Some("G0701234".into()));
        assert_eq!(
            adb.ota_start().to_string(),
            "adb -s G0701234 shell ace mw ota start"
        );

        let any = Adb::default();
        assert_eq!(any.ota_start().to_string(), "adb shell ace mw ota start");
    }

    #[test]
    fn test_credentials_are_redacted() {
        let adb = Adb::default();
        let add = adb.wifi_add_network("lab-net", "s3cret");
        assert_eq!(
            add.to_string(),
            "adb shell ace mw wifi add_network ssid=lab-net ****"
        );
        assert!(add.arg_values().any(|a| a == "psk=s3cret"));

        let register = adb.register("qa@example.com", "s3cret");
        assert!(!register.to_string().contains("s3cret"));
    }

    #[test]
    fn test_flag_values() {
        let adb = Adb::default();
        assert_eq!(
            adb.set_dev_flags(FlagTarget::Hex440).to_string(),
            "adb shell idme dev_flags 0x440"
        );
        assert_eq!(
            adb.set_dev_flags(FlagTarget::Zero).to_string(),
            "adb shell idme dev_flags 0"
        );
    }

    #[test]
    fn test_device_listing_ignores_serial() {
        let adb = Adb::new(Some("G0701234".into()));
        assert_eq!(adb.devices().to_string(), "adb devices");
    }

    #[test]
    fn test_flash_runs_in_build_dir() {
        let adb = Adb::default();
        let cmd = adb.flash_image(Path::new("/builds/n_1_to_n"), "G0701234");
        assert_eq!(
            cmd.to_string(),
            "python3 flashimage.py --aserial=G0701234 --fserial=G0701234"
        );
        assert_eq!(cmd.working_dir(), Some(Path::new("/builds/n_1_to_n")));
    }
}
