//! `orc`: the command-line driver. Parses argv into an input file list (either standalone or
//! linker-driver shape), loads `.orc-config`, runs the engine, prints reports, and optionally
//! forwards the original invocation to the real linker.

mod cli;
mod config;
mod linker;
mod report;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use orc_core::settings::LogLevel;
use orc_core::scheduler::TaskSystem;
use orc_core::Engine;

fn level_filter(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Silent => "off",
        LogLevel::Warning => "warn",
        LogLevel::Info => "info",
        LogLevel::Verbose => "debug",
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = cli::Cli::parse();

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let settings = config::load_settings(&exe_dir)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level_filter(settings.core.log_level)))
        .init();

    let invocation = cli::collect_inputs(&cli.args, settings.standalone_mode);
    if invocation.inputs.is_empty() {
        anyhow::bail!("no input object files or archives found in argv");
    }

    let engine = Engine::new();
    let tasks = TaskSystem::new(settings.core.parallel_processing);
    let reports = engine.process(&invocation.inputs, &settings.core, &tasks);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    report::write_reports(&mut handle, &reports, settings.core.output_file_mode, settings.core.graceful_exit)?;

    if settings.forward_to_linker {
        if let Err(err) = linker::forward_to_linker(&cli.args) {
            tracing::warn!(error = %err, "linker forwarding failed; analysis results are unaffected");
        }
    }

    if settings.core.graceful_exit || reports.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
