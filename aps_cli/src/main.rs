#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `aps`: replay cycle snapshots through the dosing decision core.

mod cli;
mod error_fmt;
mod run;

use std::path::Path;

use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Console layer on stderr (pretty or JSON) plus an optional JSON file layer
/// from `[logging]`. Stdout stays reserved for command output.
fn init_tracing(level: &str, json: bool, logging: Option<&aps_config::Logging>) {
    let pretty = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter(level))
    });
    let structured = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(level))
    });

    let file = logging.and_then(|l| l.file.as_deref().map(|path| (l, path))).map(|(l, path)| {
        let p = Path::new(path);
        let dir = p.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = p.file_name().map_or_else(|| "aps.log".into(), std::ffi::OsStr::to_os_string);
        let appender = match l.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(l.level.as_deref().unwrap_or("info")))
    });

    let _ = tracing_subscriber::registry()
        .with(pretty)
        .with(structured)
        .with(file)
        .try_init();
}

fn run(cli: &Cli) -> Result<()> {
    // Logging config lives in the TOML; a broken config still gets console logs.
    let cfg = run::load_config(&cli.config);
    init_tracing(&cli.log_level, cli.json, cfg.as_ref().ok().map(|c| &c.logging));
    let cfg = cfg?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match &cli.cmd {
        Commands::Cycle {
            input,
            deliver,
            deadline_ms,
        } => run::run_cycle(&cfg, input, *deliver, *deadline_ms, cli.json),
        Commands::Forecast { input } => run::run_forecast(&cfg, input, cli.json),
        Commands::SelfCheck => run::run_self_check(&cfg, cli.json),
    }
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = ?e, "command failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}
