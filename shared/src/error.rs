//! Error taxonomy for OTA orchestration
//!
//! Every failure carries which step failed, what was expected and what the
//! device actually reported.

use crate::state_machine::FlagPhase;
use crate::{CommandResult, FlagTarget, SoftwareVersion};
use thiserror::Error;

/// Coarse classification used by callers to decide whether to re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single command reported failure
    Command,
    /// Commands succeeded but device state never converged
    ValidationTimeout,
    /// Programming or environment error, never retried
    ProtocolViolation,
    /// The update did not take effect
    Verification,
}

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("network join failed at step '{step}': {detail}")]
    Connectivity { step: String, detail: String },

    #[error("network '{ssid}' not connected after {attempts} attempts, last state: {last_output}")]
    ConnectivityTimeout {
        ssid: String,
        attempts: u32,
        last_output: String,
    },

    #[error("device not registered after {attempts} attempts, last status: {last_status}")]
    Registration { attempts: u32, last_status: String },

    #[error("setting flag {target} failed while {phase:?}: {detail}")]
    Flag {
        target: FlagTarget,
        phase: FlagPhase,
        detail: String,
    },

    #[error("OTA sequence aborted at '{step}' after {} commands: {detail}", .results.len())]
    OtaSequence {
        step: String,
        detail: String,
        results: Vec<CommandResult>,
    },

    #[error("command '{step}' failed: {detail}")]
    CommandFailed { step: String, detail: String },

    #[error("unexpected output from '{step}': expected {expected}, got: {observed}")]
    UnexpectedOutput {
        step: String,
        expected: String,
        observed: String,
    },

    #[error("{what} did not converge after {attempts} attempts: {last_output}")]
    ValidationTimeout {
        what: String,
        attempts: u32,
        last_output: String,
    },

    #[error("a log capture is already active for this run")]
    CaptureAlreadyActive,

    #[error("unknown device profile: {0}")]
    UnknownProfile(String),

    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),

    #[error("build '{name}' has no usable directory: {path}")]
    MissingBuild { name: String, path: String },

    #[error("device serial number is required but was not configured")]
    MissingSerial,

    #[error("OTA update failed: software version still {baseline} after {attempts} attempts (last: {observed})")]
    VerificationFailed {
        baseline: SoftwareVersion,
        observed: String,
        attempts: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OtaError {
    /// Classify this error per the propagation policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            OtaError::Connectivity { .. }
            | OtaError::Flag { .. }
            | OtaError::OtaSequence { .. }
            | OtaError::CommandFailed { .. }
            | OtaError::UnexpectedOutput { .. }
            | OtaError::Io(_) => ErrorKind::Command,

            OtaError::ConnectivityTimeout { .. }
            | OtaError::Registration { .. }
            | OtaError::ValidationTimeout { .. } => ErrorKind::ValidationTimeout,

            OtaError::CaptureAlreadyActive
            | OtaError::UnknownProfile(_)
            | OtaError::InvalidPolicy(_)
            | OtaError::MissingBuild { .. }
            | OtaError::MissingSerial => ErrorKind::ProtocolViolation,

            OtaError::VerificationFailed { .. } => ErrorKind::Verification,
        }
    }

    /// Fatal errors end the run; nothing short of a new run can recover them
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Verification
    }
}
