//! Runs scenario files against a simulated ledger and prints a report for each
//!
//! ```text
//! scenario-runner scenarios/ --config harness.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ledger_testing_framework::config::{HarnessConfig, CONFIG_ENV_VAR};
use ledger_testing_framework::scenarios::{load_scenarios, scenario_files, ScenarioExecutor};
use ledger_testing_framework::{SystemClock, VERSION};

#[derive(Parser, Debug)]
#[clap(version = VERSION, about = "Run ledger scenarios (.yaml, .yml, .feature)")]
struct Args {
    /// Scenario files or directories holding them
    #[clap(required = true)]
    paths: Vec<PathBuf>,

    /// Harness configuration file (YAML or JSON)
    #[clap(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Only run scenarios carrying this tag
    #[clap(long)]
    tag: Option<String>,

    /// Print the execution log of passing scenarios too
    #[clap(long)]
    verbose: bool,

    /// Stop after the first failing scenario
    #[clap(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    // Pools missing from the file are generated so the simulated ledger has
    // every slot funded
    let config = Arc::new(config.with_generated_pools());

    let mut files = Vec::new();
    for path in &args.paths {
        if path.is_dir() {
            files.extend(scenario_files(path)?);
        } else {
            files.push(path.clone());
        }
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    'files: for file in &files {
        let scenarios = load_scenarios(file)?;
        for scenario in scenarios {
            if let Some(tag) = &args.tag {
                if !scenario.tags.contains(tag) {
                    continue;
                }
            }

            // Fresh ledger per scenario; no state leaks between them
            let mut executor = ScenarioExecutor::simulated(config.clone(), Arc::new(SystemClock))
                .with_context(|| format!("Failed to prepare ledger for '{}'", scenario.name))?;
            let report = executor.run(&scenario).await;

            if report.success {
                passed += 1;
                if args.verbose {
                    report.print();
                } else {
                    println!("PASS  {} ({:?})", report.scenario_name, report.duration);
                }
            } else {
                failed += 1;
                report.print();
                if args.fail_fast {
                    break 'files;
                }
            }
        }
    }

    println!(
        "\n{} scenarios: {} passed, {} failed ({} files)",
        passed + failed,
        passed,
        failed,
        files.len()
    );
    Ok(failed == 0)
}
