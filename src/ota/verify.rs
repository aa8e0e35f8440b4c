//! Post-update version verification

use crate::retry::{retry_until, Observation, RetryOutcome, RetryPolicy};
use ota_shared::{OtaError, SoftwareVersion};
use std::future::Future;
use tracing::{error, info};

/// Poll the running version until it differs from `baseline`
///
/// A read that yields no version counts as "not changed yet", since the
/// device may still be rebooting. Exhausting the policy is a fatal
/// [`OtaError::VerificationFailed`].
pub async fn verify_version_changed<F, Fut>(
    read_version: F,
    baseline: &SoftwareVersion,
    policy: &RetryPolicy,
) -> Result<RetryOutcome<Option<SoftwareVersion>>, OtaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<SoftwareVersion>>,
{
    let outcome = retry_until(
        read_version,
        |current| matches!(current, Some(v) if v != baseline),
        policy,
        "software version change",
    )
    .await;

    if outcome.succeeded {
        info!(
            %baseline,
            current = %outcome.last_result.summary(),
            attempts = outcome.attempts_used,
            "Software version changed"
        );
        Ok(outcome)
    } else {
        error!(%baseline, attempts = outcome.attempts_used, "Software version did not change");
        Err(OtaError::VerificationFailed {
            baseline: baseline.clone(),
            observed: outcome.last_result.summary(),
            attempts: outcome.attempts_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn reader(versions: &[&str]) -> Mutex<VecDeque<Option<SoftwareVersion>>> {
        Mutex::new(
            versions
                .iter()
                .map(|v| Some(SoftwareVersion::new(*v)))
                .collect(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(60)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_on_third_check() {
        let versions = reader(&["100", "100", "101"]);
        let baseline = SoftwareVersion::new("100");

        let outcome = verify_version_changed(
            || {
                let next = versions.lock().unwrap().pop_front().flatten();
                async move { next }
            },
            &baseline,
            &policy(),
        )
        .await
        .unwrap();

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(outcome.last_result, Some(SoftwareVersion::new("101")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_version_is_fatal() {
        let versions = reader(&["100", "100", "100"]);
        let baseline = SoftwareVersion::new("100");

        let err = verify_version_changed(
            || {
                let next = versions.lock().unwrap().pop_front().flatten();
                async move { next }
            },
            &baseline,
            &policy(),
        )
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        match err {
            OtaError::VerificationFailed { baseline, observed, attempts } => {
                assert_eq!(baseline.as_str(), "100");
                assert_eq!(observed, "100");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_version_is_not_a_change() {
        let baseline = SoftwareVersion::new("100");
        let err = verify_version_changed(|| async { None }, &baseline, &policy())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OtaError::VerificationFailed { ref observed, .. } if observed == "no version reported"
        ));
    }
}
