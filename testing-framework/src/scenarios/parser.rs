//! YAML scenario parser
//!
//! Numbers may be written as integers or as strings (`"1000"`); account
//! positions are slot names (`first`, `second`, `third`, `fourth`, `admin`).
//!
//! ## Example Scenario
//!
//! ```yaml
//! name: "Fixed supply"
//! steps:
//!   - action: load_account
//!     slot: admin
//!     more_than_hbars: 10
//!   - action: create_token
//!     initial_supply: 1000
//!     max_supply: 1000
//!   - action: mint
//!     amount: 1
//!     expect:
//!       status: failure
//!   - action: assert_token
//!     total_supply: 1000
//! ```

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::context::{AccountSlot, ScenarioPhase};

/// Complete test scenario
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TestScenario {
    /// Scenario name
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form tags, e.g. the feature a Gherkin scenario came from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Execution steps
    pub steps: Vec<Step>,
}

/// Test execution step
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load an account from its pool into a slot, optionally checking hbar
    LoadAccount {
        slot: AccountSlot,
        /// Pool overriding the slot's configured position
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        more_than_hbars: Option<u64>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        exact_hbars: Option<u64>,
    },

    /// Load an account and fund it with the context token
    ProvisionAccount {
        slot: AccountSlot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        more_than_hbars: Option<u64>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        exact_hbars: Option<u64>,
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        tokens: u64,
    },

    /// Build an M-of-N threshold key from slot keys
    ThresholdKey {
        threshold: u32,
        accounts: Vec<AccountSlot>,
    },

    /// Create a topic and confirm its memo
    CreateTopic {
        #[serde(default = "default_operator")]
        operator: AccountSlot,
        memo: String,
        /// `threshold`, a slot name, or absent for an open topic
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submit_key: Option<String>,
    },

    /// Publish a message to the context topic
    PublishMessage {
        #[serde(default = "default_operator")]
        operator: AccountSlot,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<OutcomeExpect>,
    },

    /// Open a subscription to the context topic, kept until teardown
    SubscribeTopic,

    /// Wait for the first message of the context topic and compare it
    ExpectMessage {
        message: String,
        /// Overrides the configured subscription timeout
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },

    /// Create a token with the admin as treasury
    CreateToken {
        #[serde(default = "default_token_name")]
        name: String,
        #[serde(default = "default_token_symbol")]
        symbol: String,
        #[serde(default = "default_token_decimals")]
        decimals: u32,
        #[serde(default, deserialize_with = "deserialize_u64_from_string_or_number")]
        initial_supply: u64,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        max_supply: Option<u64>,
        /// Associate the first and second accounts and snapshot the first
        #[serde(default)]
        for_pair: bool,
    },

    /// Compare token metadata
    AssertToken {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        total_supply: Option<u64>,
        #[serde(
            default,
            deserialize_with = "deserialize_option_u64_from_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        max_supply: Option<u64>,
        /// Admin key must be the admin account's key
        #[serde(default)]
        owned_by_admin: bool,
    },

    /// Mint into the treasury
    Mint {
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        amount: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<OutcomeExpect>,
    },

    /// Associate a slot's account with the context token
    Associate { account: AccountSlot },

    /// Guarded disbursement plus exact token balance check
    HoldTokens {
        account: AccountSlot,
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        amount: u64,
    },

    /// Build the pending transfer
    CreateTransfer {
        legs: Vec<TransferLegSpec>,
        /// Slots whose keys sign right away
        #[serde(default)]
        signers: Vec<AccountSlot>,
        /// Wrap in a scheduled transaction
        #[serde(default)]
        schedule: bool,
    },

    /// Add a slot's signature to the pending transfer
    SignTransfer { account: AccountSlot },

    /// Submit the pending transfer
    SubmitTransfer {
        payer: AccountSlot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<OutcomeExpect>,
    },

    /// Sign the submitted scheduled transfer with a slot's key
    SignSchedule {
        account: AccountSlot,
        /// Pays for the signing transaction; defaults to the signer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payer: Option<AccountSlot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<OutcomeExpect>,
    },

    /// Compare a token balance
    AssertTokenBalance {
        account: AccountSlot,
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        eq: u64,
    },

    /// Compare a native balance, in whole hbar
    AssertHbarBalance {
        account: AccountSlot,
        #[serde(flatten)]
        expect: HbarExpect,
    },

    /// Record a native balance for a later fee assertion
    SnapshotHbar { account: AccountSlot },

    /// Native balance must be below its snapshot
    AssertFeePaid { account: AccountSlot },

    /// Let time pass on the executor's clock
    AdvanceTime { seconds: u64 },
}

/// One leg of a transfer; negative amounts debit the account
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct TransferLegSpec {
    pub account: AccountSlot,
    pub amount: i64,
}

/// Expected outcome of an operation
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeExpect {
    pub status: ExpectedStatus,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedStatus {
    Success,
    Failure,
}

impl OutcomeExpect {
    pub fn success() -> Self {
        Self {
            status: ExpectedStatus::Success,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: ExpectedStatus::Failure,
        }
    }
}

/// Expects failure when set to `failure`, success otherwise
pub fn expects_failure(expect: &Option<OutcomeExpect>) -> bool {
    matches!(
        expect,
        Some(OutcomeExpect {
            status: ExpectedStatus::Failure
        })
    )
}

/// Native balance assertion modes
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum HbarExpect {
    /// Strictly greater than
    Gt {
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        gt: u64,
    },
    /// Exact equality
    Eq {
        #[serde(deserialize_with = "deserialize_u64_from_string_or_number")]
        eq: u64,
    },
}

impl Step {
    /// Lifecycle phase a scenario has reached once this step ran
    pub fn phase(&self) -> ScenarioPhase {
        match self {
            Step::LoadAccount { .. }
            | Step::ThresholdKey { .. }
            | Step::CreateTransfer { .. }
            | Step::SignTransfer { .. } => ScenarioPhase::ContextPopulated,
            Step::ProvisionAccount { .. }
            | Step::CreateTopic { .. }
            | Step::PublishMessage { .. }
            | Step::SubscribeTopic
            | Step::CreateToken { .. }
            | Step::Associate { .. }
            | Step::HoldTokens { .. }
            | Step::SubmitTransfer { .. }
            | Step::SignSchedule { .. }
            | Step::SnapshotHbar { .. }
            | Step::AdvanceTime { .. } => ScenarioPhase::FixturesApplied,
            Step::ExpectMessage { .. }
            | Step::AssertToken { .. }
            | Step::Mint { .. }
            | Step::AssertTokenBalance { .. }
            | Step::AssertHbarBalance { .. }
            | Step::AssertFeePaid { .. } => ScenarioPhase::AssertionsRun,
        }
    }

    /// Slots this step reads from the context
    fn required_slots(&self) -> Vec<AccountSlot> {
        match self {
            Step::ThresholdKey { accounts, .. } => accounts.clone(),
            Step::CreateTopic {
                operator,
                submit_key,
                ..
            } => {
                let mut slots = vec![*operator];
                if let Some(slot) = submit_key.as_deref().and_then(AccountSlot::from_word) {
                    slots.push(slot);
                }
                slots
            }
            Step::PublishMessage { operator, .. } => vec![*operator],
            Step::CreateToken { for_pair: true, .. } => {
                vec![AccountSlot::First, AccountSlot::Second]
            }
            Step::Associate { account }
            | Step::HoldTokens { account, .. }
            | Step::SignTransfer { account }
            | Step::AssertTokenBalance { account, .. }
            | Step::AssertHbarBalance { account, .. }
            | Step::SnapshotHbar { account }
            | Step::AssertFeePaid { account } => vec![*account],
            Step::CreateTransfer { legs, signers, .. } => legs
                .iter()
                .map(|leg| leg.account)
                .chain(signers.iter().copied())
                .collect(),
            Step::SubmitTransfer { payer, .. } => vec![*payer],
            Step::SignSchedule { account, payer, .. } => {
                let mut slots = vec![*account];
                slots.extend(payer.iter().copied());
                slots
            }
            _ => Vec::new(),
        }
    }

    /// Slots this step loads into the context
    fn loaded_slots(&self) -> Vec<AccountSlot> {
        match self {
            Step::LoadAccount { slot, .. } => vec![*slot],
            // Both load the admin on demand
            Step::ProvisionAccount { slot, .. } => vec![*slot, AccountSlot::Admin],
            Step::CreateToken { .. } => vec![AccountSlot::Admin],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::LoadAccount { slot, .. } => write!(f, "load {}", slot),
            Step::ProvisionAccount { slot, tokens, .. } => {
                write!(f, "provision {} with {} tokens", slot, tokens)
            }
            Step::ThresholdKey {
                threshold,
                accounts,
            } => write!(f, "{} of {} threshold key", threshold, accounts.len()),
            Step::CreateTopic { memo, .. } => write!(f, "create topic '{}'", memo),
            Step::PublishMessage { message, .. } => write!(f, "publish '{}'", message),
            Step::SubscribeTopic => write!(f, "subscribe to topic"),
            Step::ExpectMessage { message, .. } => write!(f, "expect message '{}'", message),
            Step::CreateToken {
                symbol,
                initial_supply,
                ..
            } => write!(f, "create token {} with {}", symbol, initial_supply),
            Step::AssertToken { .. } => write!(f, "assert token metadata"),
            Step::Mint { amount, expect } => {
                let outcome = if expects_failure(expect) { "fails" } else { "succeeds" };
                write!(f, "mint {} {}", amount, outcome)
            }
            Step::Associate { account } => write!(f, "associate {}", account),
            Step::HoldTokens { account, amount } => write!(f, "{} holds {}", account, amount),
            Step::CreateTransfer { legs, schedule, .. } => {
                let kind = if *schedule { "scheduled " } else { "" };
                write!(f, "create {}transfer with {} legs", kind, legs.len())
            }
            Step::SignTransfer { account } => write!(f, "{} signs transfer", account),
            Step::SubmitTransfer { payer, .. } => write!(f, "{} submits transfer", payer),
            Step::SignSchedule { account, .. } => write!(f, "{} signs schedule", account),
            Step::AssertTokenBalance { account, eq } => {
                write!(f, "assert {} holds {} tokens", account, eq)
            }
            Step::AssertHbarBalance { account, expect } => match expect {
                HbarExpect::Gt { gt } => write!(f, "assert {} has more than {} hbar", account, gt),
                HbarExpect::Eq { eq } => write!(f, "assert {} has {} hbar", account, eq),
            },
            Step::SnapshotHbar { account } => write!(f, "snapshot hbar of {}", account),
            Step::AssertFeePaid { account } => write!(f, "assert {} paid a fee", account),
            Step::AdvanceTime { seconds } => write!(f, "advance time by {}s", seconds),
        }
    }
}

fn default_operator() -> AccountSlot {
    AccountSlot::First
}

fn default_token_name() -> String {
    "Test Token".to_string()
}

fn default_token_symbol() -> String {
    "HTT".to_string()
}

fn default_token_decimals() -> u32 {
    2
}

/// Custom deserializer: accepts u64 as string or number
///
/// This allows YAML to use either format:
/// - `amount: 1000` (number)
/// - `amount: "1000"` (string)
fn deserialize_u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct U64Visitor;

    impl<'de> Visitor<'de> for U64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a u64 as number or string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map_err(|_| de::Error::custom(format!("negative value not allowed: {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value.trim().parse::<u64>().map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

fn deserialize_option_u64_from_string_or_number<'de, D>(
    deserializer: D,
) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_u64_from_string_or_number")] u64);

    let value: Option<Wrapped> = Option::deserialize(deserializer)?;
    Ok(value.map(|Wrapped(v)| v))
}

/// Parse YAML scenario
pub fn parse_scenario(yaml: &str) -> Result<TestScenario> {
    let scenario: TestScenario = serde_yaml::from_str(yaml)
        .map_err(|e| anyhow::anyhow!("Failed to parse YAML scenario: {}", e))?;

    validate_scenario(&scenario)?;

    Ok(scenario)
}

/// Validate scenario structure
///
/// Also rejects steps that read an account slot no earlier step loads, the
/// authoring error that would otherwise surface as a missing context field
/// halfway through a run.
pub fn validate_scenario(scenario: &TestScenario) -> Result<()> {
    anyhow::ensure!(!scenario.name.is_empty(), "Scenario name cannot be empty");
    anyhow::ensure!(
        !scenario.steps.is_empty(),
        "Scenario '{}' must have at least one step",
        scenario.name
    );

    let mut loaded = BTreeSet::new();
    for (idx, step) in scenario.steps.iter().enumerate() {
        let n = idx + 1;
        for slot in step.required_slots() {
            anyhow::ensure!(
                loaded.contains(&slot),
                "Step {} ({}) uses the {} before any step loads it",
                n,
                step,
                slot
            );
        }
        loaded.extend(step.loaded_slots());

        match step {
            Step::LoadAccount {
                more_than_hbars: Some(_),
                exact_hbars: Some(_),
                ..
            }
            | Step::ProvisionAccount {
                more_than_hbars: Some(_),
                exact_hbars: Some(_),
                ..
            } => anyhow::bail!(
                "Step {} ({}) sets both more_than_hbars and exact_hbars",
                n,
                step
            ),
            Step::LoadAccount {
                pool: Some(_),
                index: None,
                ..
            }
            | Step::ProvisionAccount {
                pool: Some(_),
                index: None,
                ..
            } => anyhow::bail!("Step {} ({}) names a pool without an index", n, step),
            Step::ProvisionAccount {
                more_than_hbars: None,
                exact_hbars: None,
                ..
            } => anyhow::bail!(
                "Step {} ({}) needs more_than_hbars or exact_hbars",
                n,
                step
            ),
            Step::CreateTopic {
                submit_key: Some(key),
                ..
            } => anyhow::ensure!(
                key == "threshold" || AccountSlot::from_word(key).is_some(),
                "Step {}: unknown submit key '{}'",
                n,
                key
            ),
            Step::ThresholdKey {
                threshold,
                accounts,
            } => anyhow::ensure!(
                *threshold >= 1 && (*threshold as usize) <= accounts.len(),
                "Step {}: threshold {} is invalid for {} keys",
                n,
                threshold,
                accounts.len()
            ),
            Step::CreateTransfer { legs, .. } => {
                anyhow::ensure!(!legs.is_empty(), "Step {}: transfer has no legs", n);
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_supply_scenario() {
        let yaml = r#"
name: "Fixed supply"
description: "Minting past max supply fails"
steps:
  - action: load_account
    slot: admin
    more_than_hbars: "10"
  - action: create_token
    initial_supply: 1000
    max_supply: "1000"
  - action: mint
    amount: 1
    expect:
      status: failure
  - action: assert_token
    total_supply: 1000
"#;

        let scenario = parse_scenario(yaml).expect("Failed to parse");
        assert_eq!(scenario.steps.len(), 4);
        match &scenario.steps[1] {
            Step::CreateToken {
                symbol,
                decimals,
                max_supply,
                for_pair,
                ..
            } => {
                assert_eq!(symbol, "HTT");
                assert_eq!(*decimals, 2);
                assert_eq!(*max_supply, Some(1000));
                assert!(!for_pair);
            }
            other => panic!("Expected create_token, got {:?}", other),
        }
        assert_eq!(scenario.steps[2].phase(), ScenarioPhase::AssertionsRun);
        assert!(expects_failure(match &scenario.steps[2] {
            Step::Mint { expect, .. } => expect,
            _ => unreachable!(),
        }));
    }

    #[test]
    fn test_parse_hbar_expectations() {
        let yaml = r#"
name: "Hbar"
steps:
  - action: load_account
    slot: first
  - action: assert_hbar_balance
    account: first
    gt: 5
  - action: assert_hbar_balance
    account: first
    eq: "1000"
"#;

        let scenario = parse_scenario(yaml).expect("Failed to parse");
        assert!(matches!(
            scenario.steps[1],
            Step::AssertHbarBalance {
                expect: HbarExpect::Gt { gt: 5 },
                ..
            }
        ));
        assert!(matches!(
            scenario.steps[2],
            Step::AssertHbarBalance {
                expect: HbarExpect::Eq { eq: 1000 },
                ..
            }
        ));
    }

    #[test]
    fn test_parse_transfer_legs() {
        let yaml = r#"
name: "Transfer"
steps:
  - action: load_account
    slot: first
  - action: load_account
    slot: second
    pool: bal_accounts
    index: 0
  - action: create_transfer
    legs:
      - { account: first, amount: -10 }
      - { account: second, amount: 10 }
    signers: [first]
    schedule: true
"#;

        let scenario = parse_scenario(yaml).expect("Failed to parse");
        match &scenario.steps[2] {
            Step::CreateTransfer {
                legs,
                signers,
                schedule,
            } => {
                assert_eq!(legs[0].amount, -10);
                assert_eq!(signers, &vec![AccountSlot::First]);
                assert!(schedule);
            }
            other => panic!("Expected create_transfer, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_slot_used_before_load() {
        let yaml = r#"
name: "Unloaded"
steps:
  - action: load_account
    slot: first
  - action: assert_token_balance
    account: third
    eq: 0
"#;

        let err = parse_scenario(yaml).unwrap_err();
        assert!(err.to_string().contains("before any step loads it"));
    }

    #[test]
    fn test_validation_rejects_bad_steps() {
        let both = r#"
name: "Both"
steps:
  - action: load_account
    slot: first
    more_than_hbars: 1
    exact_hbars: 1
"#;
        assert!(parse_scenario(both).is_err());

        let negative = r#"
name: "Negative"
steps:
  - action: load_account
    slot: admin
  - action: mint
    amount: "-1"
"#;
        assert!(parse_scenario(negative).is_err());

        let empty = "name: \"Empty\"\nsteps: []\n";
        assert!(parse_scenario(empty).is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = r#"
name: "Unknown"
steps:
  - action: mine_block
"#;
        assert!(parse_scenario(yaml)
            .unwrap_err()
            .to_string()
            .contains("Failed to parse YAML scenario"));
    }
}
