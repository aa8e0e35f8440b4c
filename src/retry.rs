//! Bounded polling with a fixed inter-attempt delay
//!
//! Every "act once, then poll until the device agrees" step goes through
//! [`retry_until`]: link state, registration state, flag read-back, device
//! presence and post-update version verification.

use ota_shared::{timing, CommandResult, OtaError, SoftwareVersion};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// How many times to check and how long to wait between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Build a policy, rejecting zero attempts
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, OtaError> {
        if max_attempts == 0 {
            return Err(OtaError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_attempts, delay })
    }

    pub const fn wifi_validation() -> Self {
        Self {
            max_attempts: timing::WIFI_VALIDATE_ATTEMPTS,
            delay: Duration::from_secs(timing::WIFI_VALIDATE_DELAY_SECS),
        }
    }

    pub const fn registration() -> Self {
        Self {
            max_attempts: timing::REGISTRATION_ATTEMPTS,
            delay: Duration::from_secs(timing::REGISTRATION_DELAY_SECS),
        }
    }

    pub const fn flag_validation() -> Self {
        Self {
            max_attempts: timing::FLAG_VALIDATE_ATTEMPTS,
            delay: Duration::from_secs(timing::FLAG_VALIDATE_DELAY_SECS),
        }
    }

    pub const fn version_verification() -> Self {
        Self {
            max_attempts: timing::VERSION_VERIFY_ATTEMPTS,
            delay: Duration::from_secs(timing::VERSION_VERIFY_DELAY_SECS),
        }
    }

    pub const fn device_online() -> Self {
        Self {
            max_attempts: timing::DEVICE_ONLINE_ATTEMPTS,
            delay: Duration::from_secs(timing::DEVICE_ONLINE_DELAY_SECS),
        }
    }
}

/// Something a check observed, summarised for failure reports
pub trait Observation {
    fn summary(&self) -> String;
}

impl Observation for CommandResult {
    fn summary(&self) -> String {
        self.error_text().to_string()
    }
}

impl Observation for Option<SoftwareVersion> {
    fn summary(&self) -> String {
        match self {
            Some(version) => version.to_string(),
            None => "no version reported".to_string(),
        }
    }
}

/// Result of a polling loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T = CommandResult> {
    pub succeeded: bool,
    pub attempts_used: u32,
    pub last_result: T,
    /// Set when attempts ran out; built from the last observation
    pub failure_reason: Option<String>,
}

/// Invoke `check` until `is_success` holds or the policy's attempts run out
///
/// Returns as soon as a check succeeds, without sleeping. Between failed
/// checks it sleeps for the policy delay; there is no sleep after the last.
pub async fn retry_until<T, F, Fut, P>(
    mut check: F,
    is_success: P,
    policy: &RetryPolicy,
    what: &str,
) -> RetryOutcome<T>
where
    T: Observation,
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let mut attempt = 1;
    loop {
        let result = check().await;

        if is_success(&result) {
            debug!(what, attempt, "Condition satisfied");
            return RetryOutcome {
                succeeded: true,
                attempts_used: attempt,
                last_result: result,
                failure_reason: None,
            };
        }

        if attempt >= policy.max_attempts {
            let reason = format!(
                "{} not satisfied after {} attempts, last output: {}",
                what,
                attempt,
                result.summary()
            );
            return RetryOutcome {
                succeeded: false,
                attempts_used: attempt,
                last_result: result,
                failure_reason: Some(reason),
            };
        }

        debug!(
            what,
            attempt,
            max_attempts = policy.max_attempts,
            "Not yet satisfied, retrying in {:?}",
            policy.delay
        );
        sleep(policy.delay).await;
        attempt += 1;
    }
}
