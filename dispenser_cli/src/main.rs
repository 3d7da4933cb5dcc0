mod cli;
mod console;
mod error_fmt;
mod run;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, FILE_GUARD};

fn init_tracing(args: &Cli, logging: &dispenser_config::Logging) -> eyre::Result<()> {
    let level = logging.level.as_deref().unwrap_or(&args.log_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err("invalid log level")?;

    match &logging.file {
        Some(path) => {
            let appender = tracing_appender::rolling::never(".", path);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .json()
                .init();
        }
        None if args.json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn load_config(args: &Cli) -> eyre::Result<dispenser_config::Config> {
    match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("read config {}", path.display()))?;
            dispenser_config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {}", path.display()))
        }
        None => Ok(dispenser_config::Config::default()),
    }
}

fn main() -> std::process::ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("error: {e}");
        return std::process::ExitCode::FAILURE;
    }
    let args = Cli::parse();

    let result = (|| -> eyre::Result<()> {
        let cfg = load_config(&args)?;
        init_tracing(&args, &cfg.logging)?;
        match &args.cmd {
            Commands::Run {
                pills,
                interval_ms,
                once,
                auto,
                sim_steps_per_rev,
                sim_gap_span,
                sim_drop_delay_ms,
                max_steps,
            } => run::run(
                cfg,
                &run::RunOpts {
                    pills: *pills,
                    interval_ms: *interval_ms,
                    once: *once,
                    auto: *auto,
                    sim_steps_per_rev: *sim_steps_per_rev,
                    sim_gap_span: *sim_gap_span,
                    sim_drop_delay_ms: *sim_drop_delay_ms,
                    max_steps: *max_steps,
                },
            ),
        }
    })();

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error_fmt::humanize(&e));
            std::process::ExitCode::FAILURE
        }
    }
}
