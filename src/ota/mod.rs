//! OTA trigger and post-update verification
//!
//! This module handles:
//! - The ordered trigger sequence with background log capture around it
//! - Confirming the running software version changed after install

mod orchestrator;
mod verify;

pub use orchestrator::{OtaOrchestrator, OtaRunRecord, OtaSettings, StepResult};
pub use verify::verify_version_changed;
