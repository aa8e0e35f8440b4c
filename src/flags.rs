//! Flag controller
//!
//! Drives the set → reboot → settle → validate chain through
//! [`FlagStateMachine`]. The chain never retries a single step; a failed
//! chain is reported with the phase it failed in.

use crate::command::{Adb, CommandRunner};
use crate::retry::{retry_until, RetryPolicy};
use ota_shared::state_machine::{FlagEvent, FlagPhase, FlagStateMachine, TransitionResult};
use ota_shared::{parse, DeviceFlagState, FlagTarget, OtaError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, Instrument, Span};

pub struct FlagController {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    validation: RetryPolicy,
    span: Span,
}

impl FlagController {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb) -> Self {
        Self {
            runner,
            adb,
            validation: RetryPolicy::flag_validation(),
            span: Span::none(),
        }
    }

    /// Policy for the read-back once the settle wait is over
    pub fn with_validation_policy(mut self, policy: RetryPolicy) -> Self {
        self.validation = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Set the flag, reboot, wait `settle` and confirm the value survived
    ///
    /// A reboot that is accepted only means the command went through; the
    /// `settle` wait is what gives the device time to come back.
    pub async fn apply(&self, target: FlagTarget, settle: Duration) -> Result<DeviceFlagState, OtaError> {
        self.run_chain(target, settle)
            .instrument(self.span.clone())
            .await
    }

    async fn run_chain(&self, target: FlagTarget, settle: Duration) -> Result<DeviceFlagState, OtaError> {
        let mut fsm = FlagStateMachine::new(target);
        info!(flag = %target, "Setting dev flags");

        let result = self.runner.execute(&self.adb.set_dev_flags(target)).await;
        let event = if result.succeeded {
            FlagEvent::SetAccepted
        } else {
            FlagEvent::SetRejected {
                reason: result.error_text().to_string(),
            }
        };
        step(&mut fsm, event)?;

        let result = self.runner.execute(&self.adb.reboot()).await;
        let event = if result.succeeded {
            FlagEvent::RebootAccepted
        } else {
            FlagEvent::RebootRejected {
                reason: result.error_text().to_string(),
            }
        };
        step(&mut fsm, event)?;

        info!(flag = %target, settle_secs = settle.as_secs(), "Waiting for device after flag reboot");
        sleep(settle).await;

        let expected = target.expected_state();
        let command = self.adb.dev_flags();
        let outcome = retry_until(
            || self.runner.execute(&command),
            |r| r.succeeded && parse::parse_flag_state(&r.stdout) == expected,
            &self.validation,
            "dev flags",
        )
        .await;

        let observed = parse::parse_flag_state(&outcome.last_result.stdout);
        let event = if outcome.succeeded || outcome.last_result.succeeded {
            FlagEvent::Observed(observed)
        } else {
            // Output of a failed read is not trusted, whatever it says
            FlagEvent::ReadFailed {
                reason: outcome
                    .failure_reason
                    .unwrap_or_else(|| outcome.last_result.error_text().to_string()),
            }
        };
        step(&mut fsm, event)?;

        info!(flag = %target, attempts = outcome.attempts_used, "Flag applied");
        Ok(observed)
    }
}

fn step(fsm: &mut FlagStateMachine, event: FlagEvent) -> Result<FlagPhase, OtaError> {
    match fsm.process_event(event) {
        TransitionResult::Success(phase) => Ok(phase),
        TransitionResult::Failed { from, reason } => {
            error!(flag = %fsm.target(), phase = ?from, "Flag chain failed: {}", reason);
            Err(OtaError::Flag {
                target: fsm.target(),
                phase: from,
                detail: reason,
            })
        }
        TransitionResult::Invalid { from, event } => Err(OtaError::Flag {
            target: fsm.target(),
            phase: from,
            detail: format!("event {:?} out of order", event),
        }),
    }
}
