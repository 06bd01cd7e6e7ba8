use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;

use teststream::config::Config;
use teststream::display::{to_ansi, Formatter};
use teststream::headless::run_headless;
use teststream::subprocess::CommandSpec;
use teststream::test_model::{FilterMode, Verbosity};
use teststream::tui::{run_tui, App, AppOptions};
use teststream::{logging, replay};

#[derive(Parser)]
#[command(name = "teststream")]
#[command(about = "Run go tests with a live streaming dashboard")]
#[command(version)]
struct Cli {
    /// Package patterns to test (default from config: ./...)
    packages: Vec<String>,

    /// Path to config file (default: teststream.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only run tests matching this pattern
    #[arg(long)]
    run: Option<String>,

    /// Which tests to show: all, failed, passed, skipped, collapsed, none
    #[arg(long)]
    show: Option<FilterMode>,

    /// Output detail: minimal, standard, with-output, verbose
    #[arg(long)]
    verbosity: Option<Verbosity>,

    /// Expected number of tests, used until the real count is known
    #[arg(long)]
    estimate: Option<usize>,

    /// Write and merge a coverage profile at this path
    #[arg(long)]
    cover_profile: Option<PathBuf>,

    /// Where to save the raw event stream
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// Print package results as plain output instead of the dashboard
    #[arg(long)]
    headless: bool,

    /// Ring the terminal bell when the run completes
    #[arg(long)]
    alert: bool,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Extra arguments for the test runner
    #[arg(last = true)]
    extra: Vec<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = Config::discover(cli.config.as_deref())?;
    let run = &mut config.run;

    if !cli.packages.is_empty() {
        run.packages = cli.packages;
    }
    run.args.extend(cli.extra);
    if let Some(show) = cli.show {
        run.show = show;
    }
    if let Some(verbosity) = cli.verbosity {
        run.verbosity = verbosity;
    }
    if let Some(path) = cli.cover_profile {
        run.cover_profile = Some(path);
    }
    if let Some(path) = cli.replay_file {
        run.replay_file = path;
    }
    if let Some(path) = cli.log_file {
        run.log_file = Some(path);
    }
    run.alert |= cli.alert;
    config.validate()?;
    let run = &config.run;

    let headless = cli.headless || !std::io::stdout().is_terminal();
    if headless {
        logging::init_headless();
    } else {
        logging::init_tui(run.log_file.as_deref());
    }

    // Read the previous replay before this run overwrites it
    let seed_estimate = cli.estimate.or_else(|| {
        run.seed_from_replay
            .then(|| replay::seed_estimate(&run.replay_file))
            .flatten()
    });

    let command = CommandSpec::go_test(
        &run.runner,
        &run.packages,
        cli.run.as_deref(),
        run.cover_profile.as_ref(),
        &run.args,
    )
    .quiet_stderr(!headless);

    let app = App::new(AppOptions {
        command,
        replay_path: run.replay_file.clone(),
        cover_profile: run.cover_profile.clone(),
        seed_estimate,
        formatter: Formatter::new(run.show, run.verbosity, cli.run),
        alert: run.alert,
        grace_period: run.grace_period(),
    });

    let app = execute(app, headless)?;
    let summary = app.finish().context("Test run failed")?;

    eprint!("{}", to_ansi(&summary.lines()));
    Ok(summary.exit_code)
}

#[tokio::main]
async fn execute(app: App, headless: bool) -> Result<App> {
    if headless {
        run_headless(app).await
    } else {
        run_tui(app).await
    }
}
