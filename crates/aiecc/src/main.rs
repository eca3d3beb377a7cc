use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use aiecc::{
    run_pipeline, BackendId, CancelToken, DriverConfig, PipelineError, RunOutcome, RunReport,
    TargetArchSelection, TileFailurePolicy, TileStatus,
};
use aiecc_contracts::DEFAULT_WORK_DIR;
use aiecc_toolchain_common::tool_paths::tool_dir_from_env;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "aiecc")]
#[command(about = "Compile a tile-array IR module into per-tile executables and a host interface.", long_about = None)]
struct Cli {
    /// Input IR module.
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendId::CrossCompiler)]
    backend: BackendId,

    /// Trace buffer size recorded for the run.
    #[arg(long, value_name = "BYTES")]
    trace_size: Option<u64>,

    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    /// Directory holding the external tools (default: AIECC_TOOL_DIR, then PATH).
    #[arg(long)]
    tool_dir: Option<PathBuf>,

    /// Runtime-support object for the cross-compiler backend (default: AIECC_RUNTIME_LIB,
    /// then a search for runtime_lib/me_basic.o).
    #[arg(long)]
    runtime_lib: Option<PathBuf>,

    /// Target architecture name, or `auto` to ask the address-resolved module.
    #[arg(long, value_name = "NAME|auto", value_parser = TargetArchSelection::parse, default_value = "aie")]
    target_arch: TargetArchSelection,

    /// Worker threads for per-tile compilation (default: available parallelism).
    #[arg(long)]
    jobs: Option<usize>,

    #[arg(long, value_name = "MS")]
    tool_timeout_ms: Option<u64>,

    /// Cancel the remaining tiles after the first tile failure.
    #[arg(long)]
    fail_fast: bool,

    /// Report failed tiles but still exit 0.
    #[arg(long)]
    allow_tile_failures: bool,

    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    report_out: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.jobs == Some(0) {
        anyhow::bail!("--jobs must be at least 1");
    }

    let mut config = DriverConfig::new(&cli.input);
    config.work_dir = cli.work_dir.clone();
    config.backend = cli.backend;
    config.target_arch = cli.target_arch.clone();
    config.runtime_support = cli.runtime_lib.clone();
    config.tool_dir = cli.tool_dir.clone().or_else(tool_dir_from_env);
    config.tool_timeout = cli.tool_timeout_ms.map(Duration::from_millis);
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    config.trace_size = cli.trace_size;
    config.fail_fast = cli.fail_fast;
    config.tile_failure_policy = if cli.allow_tile_failures {
        TileFailurePolicy::Tolerate
    } else {
        TileFailurePolicy::FailRun
    };

    let outcome = run_pipeline(&config, CancelToken::new());

    if let Some(line) = diagnostic(&outcome) {
        eprintln!("aiecc: {line}");
    }

    let report = RunReport::from_outcome(&outcome);
    let json = report.to_json_pretty().context("serialize run report")?;
    match &cli.report_out {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("write report: {}", path.display()))?;
        }
        None if !cli.quiet => println!("{json}"),
        None => {}
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        log::LevelFilter::Off
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp(None)
        .init();
}

/// One line naming the failing tool and, for tile failures, the tile.
fn diagnostic(outcome: &RunOutcome) -> Option<String> {
    let first_tile_failure = outcome.tiles.iter().find_map(|t| match &t.status {
        TileStatus::Failed { step, error } => Some(format!(
            "tile {} failed at {} ({}): {}",
            t.tile,
            step.as_str(),
            error.tool(),
            first_line(&error.to_string())
        )),
        _ => None,
    });

    let Some(err) = &outcome.error else {
        return first_tile_failure.map(|line| format!("warning: {line}"));
    };
    let line = match (err, first_tile_failure) {
        (PipelineError::TilesFailed { failed, total }, Some(first)) => {
            format!("error[{}]: {first} ({} of {total} tiles failed)", err.code(), failed.len())
        }
        _ => format!("error[{}]: {}", err.code(), first_line(&err.to_string())),
    };
    Some(line)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
