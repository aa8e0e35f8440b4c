//! Device registration against the backend account

use crate::command::{Adb, CommandRunner};
use crate::retry::{retry_until, RetryOutcome, RetryPolicy};
use ota_shared::{parse, OtaError};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn, Instrument, Span};

/// Backend account the device is bound to
#[derive(Clone)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
}

impl AccountCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

pub struct RegistrationManager {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    policy: RetryPolicy,
    span: Span,
}

impl RegistrationManager {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb) -> Self {
        Self {
            runner,
            adb,
            policy: RetryPolicy::registration(),
            span: Span::none(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Issue the register command, then poll the status query
    ///
    /// The register command's own exit status is only logged; the status
    /// query decides the outcome.
    pub async fn register(&self, credentials: &AccountCredentials) -> Result<RetryOutcome, OtaError> {
        async {
            info!(user = %credentials.username, "Registering device");

            let result = self
                .runner
                .execute(&self.adb.register(&credentials.username, &credentials.password))
                .await;
            if !result.succeeded {
                warn!("Register command reported failure, checking status anyway: {}", result.error_text());
            }

            let status = self.adb.registration_status();
            let outcome = retry_until(
                || self.runner.execute(&status),
                |r| parse::is_device_registered(&r.stdout),
                &self.policy,
                "registration status",
            )
            .await;

            if outcome.succeeded {
                info!(attempts = outcome.attempts_used, "Device registered");
                Ok(outcome)
            } else {
                Err(OtaError::Registration {
                    attempts: outcome.attempts_used,
                    last_status: outcome.last_result.error_text().to_string(),
                })
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::ScriptedRunner;
    use ota_shared::CommandResult;

    fn account() -> AccountCredentials {
        AccountCredentials::new("qa@example.com", "hunter2")
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_never_registered_after_five_queries() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "registration status",
            CommandResult::success("DEVICE_NOT_REGISTERED"),
        );

        let manager = RegistrationManager::new(runner.clone(), Adb::default());
        let err = manager.register(&account()).await.unwrap_err();

        match err {
            OtaError::Registration { attempts, last_status } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_status, "DEVICE_NOT_REGISTERED");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(runner.count("registration status"), 5);
        assert_eq!(runner.count("register device"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_exit_status_is_not_authoritative() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("register device", CommandResult::failure("timeout talking to backend"));
        runner.queue(
            "registration status",
            [
                CommandResult::success("DEVICE_NOT_REGISTERED"),
                CommandResult::success("DEVICE_REGISTERED"),
            ],
        );

        let manager = RegistrationManager::new(runner.clone(), Adb::default());
        let outcome = manager.register(&account()).await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts_used, 2);
        assert!(runner.rendered().iter().all(|c| !c.contains("hunter2")));
    }
}
