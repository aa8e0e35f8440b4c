//! Command channel to the device
//!
//! This module handles:
//! - Building typed device commands (no string templating)
//! - The `CommandRunner` seam every manager talks through
//! - A process-backed runner and a logging interceptor around it

mod catalog;
mod logging;
#[cfg(test)]
pub mod mock;
mod shell;

pub use catalog::Adb;
pub use logging::LoggedRunner;
pub use shell::ShellRunner;

use async_trait::async_trait;
use ota_shared::CommandResult;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::{oneshot, watch};

/// Control channel between a streaming command and whoever launched it
///
/// The runner reports once the command is running; the launcher requests a
/// stop by sending `true`.
#[derive(Debug)]
pub struct StreamSignals {
    stop: watch::Receiver<bool>,
    started: Option<oneshot::Sender<()>>,
}

impl StreamSignals {
    pub fn new(stop: watch::Receiver<bool>, started: oneshot::Sender<()>) -> Self {
        Self {
            stop,
            started: Some(started),
        }
    }

    /// Report that the command is running; only the first call has an effect
    pub fn mark_started(&mut self) {
        if let Some(started) = self.started.take() {
            // The launcher may have given up waiting
            let _ = started.send(());
        }
    }

    /// Resolves once a stop is requested or the launcher is gone
    pub async fn stop_requested(&mut self) {
        let _ = self.stop.wait_for(|requested| *requested).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    Secret(String),
}

impl Arg {
    fn value(&self) -> &str {
        match self {
            Arg::Plain(v) | Arg::Secret(v) => v,
        }
    }
}

/// An opaque command for the device channel
///
/// Arguments are kept as a list and never interpolated into a shell string.
/// Secret arguments are redacted whenever the command is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    label: &'static str,
    program: String,
    args: Vec<Arg>,
    current_dir: Option<PathBuf>,
}

impl DeviceCommand {
    /// Create a command running `program` with no arguments
    pub fn new(label: &'static str, program: impl Into<String>) -> Self {
        Self {
            label,
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// Argument that must never appear in logs or errors
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Secret(arg.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Short step name used in logs and errors (e.g. "wifi scan")
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Raw argument values, secrets included
    pub fn arg_values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Arg::value)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            match arg {
                Arg::Plain(v) => write!(f, " {}", v)?,
                Arg::Secret(_) => f.write_str(" ****")?,
            }
        }
        Ok(())
    }
}

/// Executes commands against the device or backend
///
/// The channel is synchronous and one-command-at-a-time: callers await each
/// command before issuing the next.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and collect its output
    async fn execute(&self, command: &DeviceCommand) -> CommandResult;

    /// Run a long-lived command, appending stdout and stderr to `sink`
    ///
    /// Calls [`StreamSignals::mark_started`] once the command is running.
    /// Returns once the command exits on its own or after a stop request
    /// has been honoured. Buffered fields of the result stay empty.
    async fn execute_streaming(
        &self,
        command: &DeviceCommand,
        sink: &Path,
        signals: StreamSignals,
    ) -> CommandResult;
}
