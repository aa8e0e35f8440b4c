//! Named OTA test cases
//!
//! Each case flashes a starting build, prepares the device, triggers the
//! update and checks the result.

use crate::flash::DeviceFlasher;
use crate::ota::{OtaOrchestrator, OtaRunRecord};
use crate::pipeline::{DeviceSetupPipeline, PostOtaReport};
use clap::ValueEnum;
use ota_shared::{BootSlots, OtaError, SoftwareVersion};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TestCase {
    /// Previous release to current
    #[value(name = "n_1_to_n")]
    NMinusOneToN,
    /// Production build to current
    #[value(name = "prod_to_n")]
    ProdToN,
    /// Current to upcoming
    #[value(name = "n_to_u")]
    NToU,
    /// Differential package from current to upcoming
    #[value(name = "diff_binary_ota")]
    DiffBinaryOta,
    /// Previous release to current with a boot-slot probe before the update (TV only)
    #[value(name = "slot_check_callie")]
    SlotCheckCallie,
}

impl TestCase {
    pub fn name(&self) -> &'static str {
        match self {
            TestCase::NMinusOneToN => "n_1_to_n",
            TestCase::ProdToN => "prod_to_n",
            TestCase::NToU => "n_to_u",
            TestCase::DiffBinaryOta => "diff_binary_ota",
            TestCase::SlotCheckCallie => "slot_check_callie",
        }
    }

    /// Build flashed before the case starts
    pub fn build(&self) -> &'static str {
        match self {
            TestCase::NMinusOneToN | TestCase::SlotCheckCallie => "n_1_to_n",
            TestCase::ProdToN => "prod_to_n",
            TestCase::NToU | TestCase::DiffBinaryOta => "n_to_u",
        }
    }

    pub fn tv_only(&self) -> bool {
        matches!(self, TestCase::SlotCheckCallie)
    }

    pub fn probes_slots_before_ota(&self) -> bool {
        matches!(self, TestCase::SlotCheckCallie)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a passing case observed
#[derive(Debug)]
pub struct CaseReport {
    pub baseline: SoftwareVersion,
    pub pre_ota_slots: Option<BootSlots>,
    pub ota: OtaRunRecord,
    pub post: PostOtaReport,
}

#[derive(Debug)]
pub enum CaseOutcome {
    Passed(Box<CaseReport>),
    /// The case does not apply to this device
    Skipped { reason: String },
}

/// Components a case runs against
pub struct Harness {
    /// `None` when the device is already on the starting build
    pub flasher: Option<DeviceFlasher>,
    pub pipeline: DeviceSetupPipeline,
    pub orchestrator: OtaOrchestrator,
}

/// Run one case end to end, writing the OTA log to `log_path`
pub async fn run_test_case(
    case: TestCase,
    harness: &Harness,
    log_path: &Path,
) -> Result<CaseOutcome, OtaError> {
    info!(case = %case, "Test case started");

    if case.tv_only() {
        let profile = harness.pipeline.probe().profile().await?;
        if !profile.is_tv() {
            let reason = format!("{} applies to TV devices only, device is {}", case, profile);
            warn!(case = %case, "Skipping: {}", reason);
            return Ok(CaseOutcome::Skipped { reason });
        }
    }

    if let Some(flasher) = &harness.flasher {
        flasher.flash(case.build()).await?;
    }

    let baseline = harness.pipeline.pre_ota().await?;

    let pre_ota_slots = if case.probes_slots_before_ota() {
        let slots = harness.pipeline.probe().boot_slots().await?;
        info!(slot_a = %slots.slot_a, slot_b = %slots.slot_b, "Boot slots before OTA");
        Some(slots)
    } else {
        None
    };

    let ota = harness.orchestrator.trigger(log_path).await?;
    let post = harness.pipeline.post_ota(&baseline).await?;

    info!(case = %case, from = %baseline, "Test case passed");
    Ok(CaseOutcome::Passed(Box::new(CaseReport {
        baseline,
        pre_ota_slots,
        ota,
        post,
    })))
}
