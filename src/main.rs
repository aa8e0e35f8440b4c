mod capture;
mod command;
mod config;
mod connectivity;
mod flags;
mod flash;
mod ota;
mod pipeline;
mod registration;
mod retry;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use command::{CommandRunner, LoggedRunner, ShellRunner};
use config::RunConfig;
use flash::DeviceFlasher;
use ota::OtaOrchestrator;
use ota_shared::OtaError;
use pipeline::DeviceSetupPipeline;
use scenario::{run_test_case, CaseOutcome, CaseReport, Harness, TestCase};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, info_span, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter, Layer};

/// Exit code for an update that did not take effect
const EXIT_VERIFICATION_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "ota-runner", version, about = "Run an over-the-air update test case against a device")]
struct Cli {
    /// Test case to run
    #[arg(value_enum)]
    test_case: TestCase,

    /// Run configuration file
    #[arg(short, long, default_value = "ota.toml")]
    config: PathBuf,

    /// Device serial; overrides the configuration file
    #[arg(long, env = "DEVICE_SERIAL_NUMBER")]
    serial: Option<String>,

    /// Use the build already on the device instead of flashing
    #[arg(long)]
    skip_flash: bool,

    /// Re-issue force-update once after the trigger sequence
    #[arg(long)]
    renudge: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let case = cli.test_case;

    // The run log lives under the configured logs directory
    let config = RunConfig::from_file(&cli.config);
    let run_log = config
        .as_ref()
        .ok()
        .map(|c| c.run_log_path(case.name()));
    let _log_guard = init_tracing(run_log.as_deref());

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(CaseOutcome::Passed(report)) => {
            summarize(case, &report);
            ExitCode::SUCCESS
        }
        Ok(CaseOutcome::Skipped { reason }) => {
            warn!(case = %case, "Skipped: {}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let fatal = e
                .downcast_ref::<OtaError>()
                .map_or(false, OtaError::is_fatal);
            error!("{:#}", e);
            if fatal {
                ExitCode::from(EXIT_VERIFICATION_FAILED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Console output at INFO (or `RUST_LOG`), plus a DEBUG file log when a path is given
fn init_tracing(run_log: Option<&Path>) -> Option<WorkerGuard> {
    let console = fmt::layer()
        .with_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()));

    let appender = run_log.map(|path| {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ota-runner.log".to_string());
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)
            .map_err(|e| (path.to_path_buf(), e))
    });

    match appender {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            tracing_subscriber::registry().with(console).with(file).init();
            Some(guard)
        }
        Some(Err((path, e))) => {
            tracing_subscriber::registry().with(console).init();
            warn!(path = %path.display(), "Run log unavailable: {}", e);
            None
        }
        None => {
            tracing_subscriber::registry().with(console).init();
            None
        }
    }
}

async fn run(cli: Cli, mut config: RunConfig) -> Result<CaseOutcome> {
    config.override_serial(cli.serial);

    let adb = config.adb();
    let runner: Arc<dyn CommandRunner> = Arc::new(LoggedRunner::new(ShellRunner::new()));
    let span = info_span!(
        "ota",
        case = %cli.test_case,
        serial = adb.serial().unwrap_or("any")
    );

    info!(
        case = %cli.test_case,
        config = %cli.config.display(),
        "OTA runner starting"
    );

    let flasher = if cli.skip_flash {
        info!("Flashing skipped");
        None
    } else {
        let (settle, ready) = config.flash_waits();
        Some(
            DeviceFlasher::new(runner.clone(), adb.clone(), config.builds.clone())
                .with_waits(settle, ready)
                .with_span(span.clone()),
        )
    };

    let mut ota_settings = config.ota_settings();
    ota_settings.renudge_force_update |= cli.renudge;

    let harness = Harness {
        flasher,
        pipeline: DeviceSetupPipeline::new(
            runner.clone(),
            adb.clone(),
            config.wifi_credentials(),
            config.account_credentials(),
            config.setup_settings()?,
        )
        .with_span(span.clone()),
        orchestrator: OtaOrchestrator::new(runner, adb, ota_settings).with_span(span),
    };

    let log_path = config.log_path(cli.test_case.name());
    let outcome = run_test_case(cli.test_case, &harness, &log_path)
        .await
        .with_context(|| format!("test case {} failed", cli.test_case))?;
    Ok(outcome)
}

fn summarize(case: TestCase, report: &CaseReport) {
    let post = &report.post;
    info!(
        case = %case,
        baseline = %report.baseline,
        current = post.version.as_ref().map(|v| v.as_str()).unwrap_or("unknown"),
        verify_attempts = post.verify_attempts,
        profile = %post.profile,
        "Test case passed"
    );
    for step in &report.ota.steps {
        info!(step = step.step, succeeded = step.result.succeeded, "OTA step");
    }
    info!(
        capture = ?report.ota.capture,
        log = %report.ota.log_path.display(),
        "OTA log written"
    );
    if let Some(slots) = &report.pre_ota_slots {
        info!(slot_a = %slots.slot_a, slot_b = %slots.slot_b, "Boot slots before OTA");
    }
    info!(
        slot_a = %post.boot_slots.slot_a,
        slot_b = %post.boot_slots.slot_b,
        "Boot slots after OTA"
    );
}
