//! Scripted command runner for tests
//!
//! Responses are looked up by command label: queued responses are consumed
//! first, then the label's default, then an empty success.

use super::{CommandRunner, DeviceCommand, StreamSignals};
use async_trait::async_trait;
use ota_shared::CommandResult;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// How a scripted streaming command reacts to a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBehavior {
    /// Write one line to the sink, then finish when stop is requested
    UntilStopped,
    /// Never finish, even after a stop request
    IgnoreStop,
}

#[derive(Debug)]
struct Script {
    queued: HashMap<&'static str, VecDeque<CommandResult>>,
    defaults: HashMap<&'static str, CommandResult>,
    calls: Vec<&'static str>,
    rendered: Vec<String>,
    stream: StreamBehavior,
}

#[derive(Debug)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                queued: HashMap::new(),
                defaults: HashMap::new(),
                calls: Vec::new(),
                rendered: Vec::new(),
                stream: StreamBehavior::UntilStopped,
            }),
        }
    }

    /// Default response for every call with this label
    pub fn respond(&self, label: &'static str, result: CommandResult) {
        self.script.lock().unwrap().defaults.insert(label, result);
    }

    /// Responses consumed one per call, before the default applies
    pub fn queue(&self, label: &'static str, results: impl IntoIterator<Item = CommandResult>) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(label)
            .or_default()
            .extend(results);
    }

    pub fn set_stream_behavior(&self, behavior: StreamBehavior) {
        self.script.lock().unwrap().stream = behavior;
    }

    /// Labels of every command executed, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Displayed (redacted) form of every command executed, in order
    pub fn rendered(&self) -> Vec<String> {
        self.script.lock().unwrap().rendered.clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|l| **l == label)
            .count()
    }

    fn record(&self, command: &DeviceCommand) -> Option<CommandResult> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(command.label());
        script.rendered.push(command.to_string());

        if let Some(result) = script
            .queued
            .get_mut(command.label())
            .and_then(VecDeque::pop_front)
        {
            return Some(result);
        }
        script.defaults.get(command.label()).cloned()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command: &DeviceCommand) -> CommandResult {
        self.record(command)
            .unwrap_or_else(|| CommandResult::success(""))
    }

    async fn execute_streaming(
        &self,
        command: &DeviceCommand,
        sink: &Path,
        mut signals: StreamSignals,
    ) -> CommandResult {
        self.record(command);
        let behavior = self.script.lock().unwrap().stream;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(sink)
            .unwrap();
        writeln!(file, "{}: streaming", command.label()).unwrap();
        signals.mark_started();

        match behavior {
            StreamBehavior::UntilStopped => {
                signals.stop_requested().await;
                CommandResult::success("")
            }
            StreamBehavior::IgnoreStop => std::future::pending().await,
        }
    }
}
