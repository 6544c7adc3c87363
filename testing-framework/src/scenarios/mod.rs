//! Scenario DSL: YAML documents, Gherkin features and their executor
//!
//! YAML scenarios name each step by `action`; numbers may be integers or
//! strings. Feature files are translated into the same steps through a
//! phrase table, so both formats run through [`ScenarioExecutor`].
//!
//! ## Example Scenario
//!
//! ```yaml
//! name: "Transfer"
//! steps:
//!   - action: load_account
//!     slot: first
//!     more_than_hbars: 10
//!   - action: load_account
//!     slot: second
//!   - action: create_token
//!     initial_supply: 1000
//!     for_pair: true
//!   - action: hold_tokens
//!     account: first
//!     amount: 100
//!   - action: create_transfer
//!     legs:
//!       - { account: first, amount: -10 }
//!       - { account: second, amount: 10 }
//!     signers: [first]
//!   - action: submit_transfer
//!     payer: first
//!   - action: assert_token_balance
//!     account: second
//!     eq: 10
//!   - action: assert_fee_paid
//!     account: first
//! ```

pub mod executor;
pub mod gherkin;
pub mod parser;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub use executor::{ExecutionReport, ScenarioExecutor};
pub use gherkin::parse_feature;
pub use parser::{parse_scenario, Step, TestScenario};

/// Load every scenario in a `.yaml`/`.yml` or `.feature` file
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<TestScenario>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;

    let scenarios = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => vec![parse_scenario(&content)
            .with_context(|| format!("Invalid scenario file: {}", path.display()))?],
        Some("feature") => parse_feature(&content)
            .with_context(|| format!("Invalid feature file: {}", path.display()))?,
        other => bail!(
            "Unsupported scenario extension {:?} for {}",
            other,
            path.display()
        ),
    };

    log::debug!("Loaded {} scenarios from {}", scenarios.len(), path.display());
    Ok(scenarios)
}

/// Scenario files directly inside `dir`, sorted by name
pub fn scenario_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read scenario directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let supported = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("feature")
        );
        if path.is_file() && supported {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
