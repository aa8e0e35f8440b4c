//! Device setup around the OTA
//!
//! This module handles:
//! - Device-state probes (presence, version, profile, apps, boot slots)
//! - The pre-OTA procedure that produces the baseline version
//! - The post-OTA procedure, branched on device profile

mod device;
mod setup;

pub use device::{DeviceProbe, OobeTiming};
pub use setup::{Artifact, DeviceSetupPipeline, PostOtaReport, SetupSettings};
