//! TokenSim DST Simulator CLI
//!
//! Run deterministic simulation tests with chaos engineering scenarios.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::Path;
use tokensim_sim::{ChaosScenario, ScenarioRunner, SimReport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tokensim-sim")]
#[command(about = "Run deterministic simulation tests for the tokenomics session orchestrator", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (a name such as reconnect_exhaustion, a DST-00N id, or all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Server ticks allowed per session before a scenario gives up
    #[arg(long, default_value = "20")]
    max_ticks: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the full report to this file; comparison surfaces land next to it
    #[arg(long)]
    export: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if !args.json {
        info!("TokenSim DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ChaosScenario> = if args.scenario == "all" {
        ChaosScenario::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                let names: Vec<_> = ChaosScenario::all().iter().map(|s| s.name()).collect();
                bail!("{}\nAvailable scenarios: {}, all", e, names.join(", "));
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before 1970")?
            .as_nanos() as u64
    } else {
        args.seed
    };

    let export_dir = args
        .export
        .as_deref()
        .map(|path| Path::new(path).parent().unwrap_or(Path::new(".")).to_path_buf());

    let mut report = SimReport::new(base_seed);
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed).with_max_ticks(args.max_ticks);
        if let Some(dir) = &export_dir {
            runner = runner.with_export_dir(dir);
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            report.add(result);
        }
    }

    let total = report.results.len();
    let failed = report.failed().count();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": report.results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
            for result in report.failed() {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if let Some(path) = &args.export {
        report
            .write_to_file(path)
            .with_context(|| format!("writing report to {}", path))?;
        if !args.json {
            info!("Report written to {}", path);
        }
    }

    // Exit with proper code for CI
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
