//! Connectivity manager: ordered join sequence plus link validation

use crate::command::{Adb, CommandRunner};
use crate::retry::{retry_until, RetryOutcome, RetryPolicy};
use ota_shared::{parse, OtaError};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, Instrument, Span};

/// Network credentials handed to the device
#[derive(Clone)]
pub struct WifiCredentials {
    pub ssid: String,
    pub psk: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            psk: psk.into(),
        }
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("psk", &"****")
            .finish()
    }
}

/// Joins the device to a network and confirms the link is up
pub struct ConnectivityManager {
    runner: Arc<dyn CommandRunner>,
    adb: Adb,
    policy: RetryPolicy,
    span: Span,
}

impl ConnectivityManager {
    pub fn new(runner: Arc<dyn CommandRunner>, adb: Adb) -> Self {
        Self {
            runner,
            adb,
            policy: RetryPolicy::wifi_validation(),
            span: Span::none(),
        }
    }

    /// Override the link validation policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run the join sequence, aborting at the first failing step, then
    /// validate the link
    pub async fn connect(&self, credentials: &WifiCredentials) -> Result<RetryOutcome, OtaError> {
        self.join(credentials).instrument(self.span.clone()).await
    }

    async fn join(&self, credentials: &WifiCredentials) -> Result<RetryOutcome, OtaError> {
        info!(ssid = %credentials.ssid, "Joining network");

        let sequence = [
            self.adb.wifi_scan(),
            self.adb.wifi_scan_results(),
            self.adb.wifi_add_network(&credentials.ssid, &credentials.psk),
            self.adb.wifi_config(),
            self.adb.wifi_connect(&credentials.ssid),
            self.adb.wifi_save_config(),
        ];

        for command in &sequence {
            let result = self.runner.execute(command).await;
            if !result.succeeded {
                error!(step = command.label(), "Network join aborted");
                return Err(OtaError::Connectivity {
                    step: command.label().to_string(),
                    detail: result.error_text().to_string(),
                });
            }
        }

        self.validate_link(&credentials.ssid).await
    }

    /// Poll link state until the device reports a connected network
    pub async fn validate_link(&self, ssid: &str) -> Result<RetryOutcome, OtaError> {
        let command = self.adb.wifi_net_state();
        let outcome = retry_until(
            || self.runner.execute(&command),
            |r| r.succeeded && parse::is_network_connected(&r.stdout),
            &self.policy,
            "link state",
        )
        .await;

        if outcome.succeeded {
            info!(ssid, attempts = outcome.attempts_used, "Network connected");
            Ok(outcome)
        } else {
            Err(OtaError::ConnectivityTimeout {
                ssid: ssid.to_string(),
                attempts: outcome.attempts_used,
                last_output: outcome.last_result.error_text().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::ScriptedRunner;
    use ota_shared::CommandResult;

    fn creds() -> WifiCredentials {
        WifiCredentials::new("lab-net", "s3cret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_validate() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.queue(
            "wifi net state",
            [
                CommandResult::success("networkState: DISCONNECTED"),
                CommandResult::success("networkState: CONNECTED"),
            ],
        );

        let manager = ConnectivityManager::new(runner.clone(), Adb::default());
        let outcome = manager.connect(&creds()).await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(
            runner.calls(),
            vec![
                "wifi scan",
                "wifi scan results",
                "wifi add network",
                "wifi get config",
                "wifi connect",
                "wifi save config",
                "wifi net state",
                "wifi net state",
            ]
        );
    }

    #[tokio::test]
    async fn test_add_network_failure_stops_sequence() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("wifi add network", CommandResult::failure("invalid psk"));

        let manager = ConnectivityManager::new(runner.clone(), Adb::default());
        let err = manager.connect(&creds()).await.unwrap_err();

        match err {
            OtaError::Connectivity { step, detail } => {
                assert_eq!(step, "wifi add network");
                assert_eq!(detail, "invalid psk");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(runner.count("wifi connect"), 0);
        assert_eq!(runner.count("wifi save config"), 0);
        assert_eq!(runner.count("wifi get config"), 0);
        assert_eq!(runner.count("wifi net state"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_never_comes_up() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "wifi net state",
            CommandResult::success("networkState: DISCONNECTED"),
        );

        let manager = ConnectivityManager::new(runner.clone(), Adb::default());
        let err = manager.connect(&creds()).await.unwrap_err();

        assert!(matches!(
            err,
            OtaError::ConnectivityTimeout { attempts: 5, ref ssid, .. } if ssid == "lab-net"
        ));
        assert_eq!(runner.count("wifi net state"), 5);
    }

    #[tokio::test]
    async fn test_passphrase_never_rendered() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "wifi net state",
            CommandResult::success("networkState: CONNECTED"),
        );

        let manager = ConnectivityManager::new(runner.clone(), Adb::default());
        manager.connect(&creds()).await.unwrap();

        assert!(runner.rendered().iter().all(|c| !c.contains("s3cret")));
        assert!(!format!("{:?}", creds()).contains("s3cret"));
    }
}
