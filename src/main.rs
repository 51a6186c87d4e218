use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};

use panectl::alert::{self, Alerter};
use panectl::backlog::{CliBacklog, RetryPolicy, ShellCommandRunner};
use panectl::cancel::CancelToken;
use panectl::cli::Cli;
use panectl::commands::{self, RunSettings};
use panectl::config::ProjectConfig;
use panectl::context::Context;
use panectl::log::EventLog;
use panectl::paths;
use panectl::tmux::cli::Tmux;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Stdout carries the envelope; logs go to stderr and stay quiet unless
    // asked for or a watch loop is running.
    let filter = match cli.verbose {
        0 if cli.command.is_watch() => "panectl=info",
        0 => "panectl=warn",
        1 => "panectl=debug",
        _ => "panectl=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .ntm/config.toml found, using defaults"),
    }

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel()).ok();

    alert::set_global(Some(Arc::new(Alerter::from_config(&config.alerts, &cancel))));

    let state_root = paths::resolve_state_root(&cwd);
    let events = match EventLog::new(&paths::events_log(&state_root)) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "event log unavailable; continuing without history");
            None
        }
    };

    let mux = Tmux::new();
    let backlog = CliBacklog::new(
        ShellCommandRunner,
        config.backlog.clone(),
        RetryPolicy::from_config(&config.retry),
        cancel.clone(),
        cwd.clone(),
    );
    let ctx = Context {
        mux: &mux,
        backlog: &backlog,
        config: &config,
        cancel: &cancel,
        events: events.as_ref(),
        state_root,
    };

    let settings = RunSettings {
        format: cli.format,
        short_keys: cli.short_keys,
        config_path,
    };
    let output = commands::run(&ctx, cli.command, &settings);
    print!("{}", output.render());
    std::process::exit(output.exit_code());
}
