//! Inspect tangle test artifacts.
//!
//! # Commands
//!
//! - `summary <report.json>` - Print the outcome of a test run
//! - `show <schedule.json>` - Print the decisions of a recorded schedule
//!
//! # Examples
//!
//! ```bash
//! cargo run -p tangle-tester --bin tangle-trace -- summary out/bank.report.json
//! cargo run -p tangle-tester --bin tangle-trace -- show out/bank.schedule.json --limit 20
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tangle_runtime::{ScheduleStep, ScheduleTrace};
use tangle_tester::TestReport;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tangle-trace")]
#[command(about = "Inspect reports and schedules written by tangle test runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. `debug` or `tangle_tester=trace`
    #[arg(long, default_value = "warn")]
    log: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a test report
    Summary {
        /// Report written next to the schedules (`<name>.report.json`)
        report: PathBuf,
        /// Also print each bug's execution log
        #[arg(long)]
        logs: bool,
    },

    /// Print the decisions of a schedule file
    Show {
        /// Schedule file (`<name>.schedule.json`)
        schedule: PathBuf,
        /// Print at most this many decisions
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("invalid --log filter")?)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Summary { report, logs } => cmd_summary(&report, logs),
        Commands::Show { schedule, limit } => cmd_show(&schedule, limit),
    }
}

/// Print a report and exit non-zero when it recorded bugs.
fn cmd_summary(path: &Path, logs: bool) -> anyhow::Result<()> {
    let report = TestReport::from_file(path)
        .with_context(|| format!("loading report {}", path.display()))?;

    print!("{report}");
    if report.states_covered > 0 {
        println!("... Covered {} machine states", report.states_covered);
    }
    if logs {
        for bug in &report.bugs {
            println!("\n--- iteration {} ---", bug.iteration);
            println!("{}", bug.log);
        }
    }

    if report.passed() {
        Ok(())
    } else {
        anyhow::bail!("{} bug(s) recorded", report.bugs_found())
    }
}

/// Print the decisions of a schedule.
fn cmd_show(path: &Path, limit: Option<usize>) -> anyhow::Result<()> {
    let trace = ScheduleTrace::from_file(path)
        .with_context(|| format!("loading schedule {}", path.display()))?;

    println!(
        "strategy: {} (fair: {}, seed: {})",
        if trace.strategy.is_empty() { "unknown" } else { &trace.strategy },
        trace.fair,
        trace
            .seed
            .map_or_else(|| "none".to_owned(), |seed| seed.to_string())
    );
    println!(
        "decisions: {} ({} scheduling)",
        trace.len(),
        trace.scheduling_steps()
    );

    let shown = limit.unwrap_or(trace.len());
    for (index, step) in trace.steps.iter().take(shown).enumerate() {
        match step {
            ScheduleStep::Operation { id } => println!("{index:>6}  schedule {id}"),
            ScheduleStep::Boolean { value } => println!("{index:>6}  bool     {value}"),
            ScheduleStep::Integer { value } => println!("{index:>6}  int      {value}"),
        }
    }
    if shown < trace.len() {
        println!("... {} more", trace.len() - shown);
    }
    Ok(())
}
