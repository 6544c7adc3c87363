//! Scenario execution engine
//!
//! Runs parsed scenarios step by step against a [`LedgerClient`]. Every
//! scenario gets a fresh [`ScenarioContext`]; each step runs under the
//! configured step budget and either completes or fails the scenario with
//! `Failed at step N` context. Subscriptions and pending transfers are torn
//! down whatever the outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledger_testing_framework::scenarios::{parse_scenario, ScenarioExecutor};
//!
//! let scenario = parse_scenario(yaml)?;
//! let mut executor = ScenarioExecutor::simulated(config, clock)?;
//! let report = executor.execute(&scenario).await?;
//!
//! assert!(report.success);
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::Duration;

use super::parser::{expects_failure, HbarExpect, Step, TestScenario};
use crate::assertions::{
    assert_fails, assert_fee_paid, assert_native_balance_eq, assert_native_balance_gt,
    assert_token, assert_token_balance_eq, expect_first_message, token_balance,
    TokenExpectation,
};
use crate::config::{HarnessConfig, PoolIndex};
use crate::context::{AccountSlot, ScenarioContext, ScenarioPhase};
use crate::error::HarnessError;
use crate::fixtures::{FixtureProvisioner, HbarRequirement, SubmitKey, TokenSpec};
use crate::ledger::{Hbar, LedgerClient, SimulatedLedgerBuilder, TokenTransfer};
use crate::orchestrator::{within, Clock, SystemClock};

/// Scenario executor bound to one ledger client
pub struct ScenarioExecutor {
    client: Arc<dyn LedgerClient>,

    config: Arc<HarnessConfig>,

    fixtures: FixtureProvisioner,

    /// Clock for step durations and `advance_time`
    clock: Arc<dyn Clock>,

    /// Execution log
    log: Vec<String>,

    /// Current step number (1-indexed)
    current_step: usize,
}

impl ScenarioExecutor {
    /// Executor over `client`, timed by the system clock
    pub fn new(client: Arc<dyn LedgerClient>, config: Arc<HarnessConfig>) -> Self {
        let fixtures = FixtureProvisioner::new(client.clone(), config.clone());
        Self {
            client,
            config,
            fixtures,
            clock: Arc::new(SystemClock),
            log: Vec::new(),
            current_step: 0,
        }
    }

    /// Executor over a fresh simulated ledger seeded from the config pools
    pub fn simulated(config: Arc<HarnessConfig>, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = SimulatedLedgerBuilder::new()
            .with_clock(clock.clone())
            .with_fee(config.fee())
            .with_config_pools(&config)?
            .build();
        Ok(Self::new(Arc::new(ledger), config).with_clock(clock))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Execute a complete scenario
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step, with step context. Use
    /// [`run`](Self::run) to get a report for failed scenarios too.
    pub async fn execute(&mut self, scenario: &TestScenario) -> Result<ExecutionReport> {
        let (report, error) = self.perform(scenario).await;
        match error {
            None => Ok(report),
            Some(err) => Err(err),
        }
    }

    /// Execute a scenario and report its outcome, passed or failed
    pub async fn run(&mut self, scenario: &TestScenario) -> ExecutionReport {
        self.perform(scenario).await.0
    }

    async fn perform(&mut self, scenario: &TestScenario) -> (ExecutionReport, Option<anyhow::Error>) {
        self.log.clear();
        self.current_step = 0;
        let started_at = Utc::now();
        let start = self.clock.now();

        self.log(format!("Starting scenario: {}", scenario.name));
        if let Some(desc) = &scenario.description {
            self.log(format!("Description: {}", desc));
        }
        log::info!("Running scenario '{}' on {}", scenario.name, self.config.network);

        let mut ctx = ScenarioContext::new(scenario.name.clone());
        let result = self.run_steps(&mut ctx, scenario).await;
        let reached = ctx.phase();
        ctx.teardown();

        let (outcome, error) = match result {
            Ok(()) => {
                ctx.advance(ScenarioPhase::Passed);
                self.log("\n=== Scenario completed successfully ===".to_string());
                log::info!("Scenario '{}' passed", scenario.name);
                (ScenarioPhase::Passed, None)
            }
            Err(err) => {
                ctx.advance(ScenarioPhase::Failed);
                self.log(format!("\n=== Scenario failed: {:#} ===", err));
                log::warn!("Scenario '{}' failed: {:#}", scenario.name, err);
                (ScenarioPhase::Failed, Some(err))
            }
        };

        let success = error.is_none();
        let report = ExecutionReport {
            scenario_name: scenario.name.clone(),
            network: self.config.network.clone(),
            steps_total: scenario.steps.len(),
            steps_executed: if success {
                self.current_step
            } else {
                self.current_step.saturating_sub(1)
            },
            success,
            phase: outcome,
            reached_phase: reached,
            failed_step: (!success).then_some(self.current_step),
            error: error.as_ref().map(|e| format!("{:#}", e)),
            started_at,
            duration: self.clock.now() - start,
            log: self.log.clone(),
        };
        (report, error)
    }

    async fn run_steps(&mut self, ctx: &mut ScenarioContext, scenario: &TestScenario) -> Result<()> {
        let budget = self.config.step_timeout();

        for (idx, step) in scenario.steps.iter().enumerate() {
            self.current_step = idx + 1;
            self.log(format!("\n--- Step {}: {} ---", self.current_step, step));

            let operation = format!("step {} ({})", self.current_step, step);
            within(&operation, budget, self.execute_step(ctx, step))
                .await
                .with_context(|| format!("Failed at step {} ({})", self.current_step, step))?;

            ctx.advance(step.phase());
        }
        Ok(())
    }

    /// Execute a single step
    async fn execute_step(&mut self, ctx: &mut ScenarioContext, step: &Step) -> Result<()> {
        match step {
            Step::LoadAccount {
                slot,
                pool,
                index,
                more_than_hbars,
                exact_hbars,
            } => {
                let location = location(pool, index);
                let account = self.fixtures.load_account(ctx, *slot, location.as_ref())?;
                if let Some(min) = more_than_hbars {
                    let balance = self
                        .fixtures
                        .ensure_min_balance(ctx, *slot, Hbar::from_hbars(*min))
                        .await?;
                    self.log(format!("  ✓ {} ({}) holds {}", slot, account.id, balance));
                }
                if let Some(exact) = exact_hbars {
                    self.fixtures
                        .ensure_exact_balance(ctx, *slot, Hbar::from_hbars(*exact))
                        .await?;
                    self.log(format!("  ✓ {} ({}) holds exactly {} ℏ", slot, account.id, exact));
                }
                self.log(format!("  ✓ {} is {}", slot, account.id));
            }

            Step::ProvisionAccount {
                slot,
                pool,
                index,
                more_than_hbars,
                exact_hbars,
                tokens,
            } => {
                let requirement = match (more_than_hbars, exact_hbars) {
                    (_, Some(exact)) => HbarRequirement::Exactly(Hbar::from_hbars(*exact)),
                    (Some(min), None) => HbarRequirement::MoreThan(Hbar::from_hbars(*min)),
                    (None, None) => bail!("{} has no hbar requirement", slot),
                };
                let location = location(pool, index);
                self.fixtures
                    .provision_account_with_tokens(ctx, *slot, location.as_ref(), requirement, *tokens)
                    .await?;
                self.log(format!("  ✓ {} holds {} tokens", slot, tokens));
            }

            Step::ThresholdKey {
                threshold,
                accounts,
            } => {
                let key = self.fixtures.build_threshold_key(ctx, *threshold, accounts)?;
                self.log(format!(
                    "  ✓ {} of {} threshold key built",
                    key.threshold(),
                    key.keys().len()
                ));
            }

            Step::CreateTopic {
                operator,
                memo,
                submit_key,
            } => {
                let submit_key = match submit_key.as_deref() {
                    None => SubmitKey::None,
                    Some("threshold") => SubmitKey::Threshold,
                    Some(word) => match AccountSlot::from_word(word) {
                        Some(slot) => SubmitKey::Account(slot),
                        None => bail!(HarnessError::Config(format!("unknown submit key '{}'", word))),
                    },
                };
                let topic = self
                    .fixtures
                    .create_topic(ctx, *operator, memo, submit_key)
                    .await?;
                self.log(format!("  ✓ Topic {} created with memo '{}'", topic, memo));
            }

            Step::PublishMessage {
                operator,
                message,
                expect,
            } => {
                let payer = ctx.account(*operator)?.clone();
                let topic = ctx.topic()?;
                let submission = self.client.submit_message(&payer, &topic, message.as_bytes());

                if expects_failure(expect) {
                    let err = assert_fails(&format!("publishing '{}'", message), submission).await?;
                    self.log(format!("  ✓ Publishing rejected: {}", err));
                } else {
                    let receipt = submission.await.with_context(|| {
                        format!("Failed to publish '{}' to topic {}", message, topic)
                    })?;
                    self.log(format!(
                        "  ✓ Published '{}' as message #{}",
                        message,
                        receipt.topic_sequence_number.unwrap_or_default()
                    ));
                }
            }

            Step::SubscribeTopic => {
                let topic = ctx.topic()?;
                let subscription = self
                    .client
                    .subscribe_topic(&topic)
                    .await
                    .with_context(|| format!("Failed to subscribe to topic {}", topic))?;
                ctx.track_subscription(subscription);
                self.log(format!("  ✓ Subscribed to topic {}", topic));
            }

            Step::ExpectMessage {
                message,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.subscription_timeout());
                let topic = ctx.topic()?;
                if ctx.subscription_mut(topic).is_err() {
                    let subscription = self
                        .client
                        .subscribe_topic(&topic)
                        .await
                        .with_context(|| format!("Failed to subscribe to topic {}", topic))?;
                    ctx.track_subscription(subscription);
                }

                let subscription = ctx.subscription_mut(topic)?;
                let received = expect_first_message(subscription, message, timeout).await?;
                self.log(format!(
                    "  ✓ Message #{} at {}: {}",
                    received.sequence_number,
                    received.consensus_timestamp,
                    received.contents_str()
                ));
            }

            Step::CreateToken {
                name,
                symbol,
                decimals,
                initial_supply,
                max_supply,
                for_pair,
            } => {
                let spec = TokenSpec {
                    name: name.clone(),
                    symbol: symbol.clone(),
                    decimals: *decimals,
                    initial_supply: *initial_supply,
                    max_supply: *max_supply,
                };
                if !ctx.has_account(AccountSlot::Admin) {
                    self.fixtures.load_account(ctx, AccountSlot::Admin, None)?;
                }
                let token = if *for_pair {
                    self.fixtures.provision_token_for_pair(ctx, &spec).await?
                } else {
                    self.fixtures.create_token(ctx, &spec).await?
                };
                self.log(format!("  ✓ Token {} ({}) created", token, symbol));
            }

            Step::AssertToken {
                name,
                symbol,
                decimals,
                total_supply,
                max_supply,
                owned_by_admin,
            } => {
                let admin_key = if *owned_by_admin {
                    Some(ctx.account(AccountSlot::Admin)?.public_key())
                } else {
                    None
                };
                let expected = TokenExpectation {
                    name: name.clone(),
                    symbol: symbol.clone(),
                    decimals: *decimals,
                    total_supply: *total_supply,
                    max_supply: *max_supply,
                    admin_key,
                };
                let token = ctx.token()?;
                assert_token(self.client.as_ref(), &token, &expected).await?;
                self.log(format!("  ✓ Token {} matches {:?}", token, expected));
            }

            Step::Mint { amount, expect } => {
                self.execute_mint(ctx, *amount, expects_failure(expect))
                    .await?;
            }

            Step::Associate { account } => {
                self.fixtures.associate(ctx, *account).await?;
                self.log(format!("  ✓ {} associated", account));
            }

            Step::HoldTokens { account, amount } => {
                self.fixtures.hold_tokens(ctx, *account, *amount).await?;
                self.log(format!("  ✓ {} holds {} tokens", account, amount));
            }

            Step::CreateTransfer {
                legs,
                signers,
                schedule,
            } => {
                let token = ctx.token()?;
                let mut transfer = TokenTransfer::new();
                for leg in legs {
                    let account = ctx.account(leg.account)?.id;
                    transfer = transfer.add_token_transfer(token, account, leg.amount);
                }
                for signer in signers {
                    transfer = transfer.sign(&ctx.account(*signer)?.key);
                }
                if *schedule {
                    transfer = transfer.schedule();
                }
                ctx.set_pending_transfer(transfer);
                self.log(format!(
                    "  ✓ Transfer of {} legs built, {} signatures",
                    legs.len(),
                    signers.len()
                ));
            }

            Step::SignTransfer { account } => {
                let key = ctx.account(*account)?.key.clone();
                ctx.pending_transfer_mut()?.add_signature(&key);
                self.log(format!("  ✓ {} signed the transfer", account));
            }

            Step::SubmitTransfer { payer, expect } => {
                let payer_ref = ctx.account(*payer)?.clone();
                let transfer = ctx.take_pending_transfer()?;
                let submission = self.client.submit(&payer_ref, transfer);

                if expects_failure(expect) {
                    let err = assert_fails("transfer submission", submission).await?;
                    self.log(format!("  ✓ Transfer rejected: {}", err));
                } else {
                    let receipt = submission.await.with_context(|| {
                        format!("Transfer submitted by the {} ({}) failed", payer, payer_ref.id)
                    })?;
                    if let Some(schedule) = receipt.schedule_id {
                        ctx.set_schedule(schedule);
                        let state = if receipt.schedule_executed {
                            "executed"
                        } else {
                            "awaiting signatures"
                        };
                        self.log(format!("  ✓ Schedule {} {}", schedule, state));
                    } else {
                        self.log(format!("  ✓ Transfer {} succeeded", receipt.transaction_id));
                    }
                }
            }

            Step::SignSchedule {
                account,
                payer,
                expect,
            } => {
                let schedule = ctx.schedule()?;
                let signer = ctx.account(*account)?.key.clone();
                let payer = ctx.account(payer.unwrap_or(*account))?.clone();
                let signing = self.client.sign_schedule(&payer, &schedule, &signer);

                if expects_failure(expect) {
                    let err = assert_fails("schedule signature", signing).await?;
                    self.log(format!("  ✓ Signature rejected: {}", err));
                } else {
                    let receipt = signing
                        .await
                        .with_context(|| format!("Failed to sign schedule {}", schedule))?;
                    self.log(format!(
                        "  ✓ {} signed schedule {} (executed: {})",
                        account, schedule, receipt.schedule_executed
                    ));
                }
            }

            Step::AssertTokenBalance { account, eq } => {
                let id = ctx.account(*account)?.id;
                let token = ctx.token()?;
                assert_token_balance_eq(self.client.as_ref(), &id, &token, *eq).await?;
                self.log(format!("  ✓ {} holds {} tokens", account, eq));
            }

            Step::AssertHbarBalance { account, expect } => {
                let id = ctx.account(*account)?.id;
                match expect {
                    HbarExpect::Gt { gt } => {
                        assert_native_balance_gt(self.client.as_ref(), &id, Hbar::from_hbars(*gt))
                            .await?;
                        self.log(format!("  ✓ {} holds more than {} ℏ", account, gt));
                    }
                    HbarExpect::Eq { eq } => {
                        assert_native_balance_eq(self.client.as_ref(), &id, Hbar::from_hbars(*eq))
                            .await?;
                        self.log(format!("  ✓ {} holds {} ℏ", account, eq));
                    }
                }
            }

            Step::SnapshotHbar { account } => {
                let balance = self.fixtures.snapshot_native_balance(ctx, *account).await?;
                self.log(format!("  ✓ {} snapshot: {}", account, balance));
            }

            Step::AssertFeePaid { account } => {
                let id = ctx.account(*account)?.id;
                let snapshot = ctx.native_snapshot(*account)?;
                assert_fee_paid(self.client.as_ref(), &id, snapshot).await?;
                self.log(format!("  ✓ {} paid a fee", account));
            }

            Step::AdvanceTime { seconds } => {
                self.clock.sleep(Duration::from_secs(*seconds)).await;
                self.log(format!("  ✓ Time advanced by {}s", seconds));
            }
        }
        Ok(())
    }

    /// Mint into the treasury; on success supply and treasury both grow by
    /// `amount`, on rejection the supply is unchanged
    async fn execute_mint(
        &mut self,
        ctx: &ScenarioContext,
        amount: u64,
        should_fail: bool,
    ) -> Result<()> {
        let admin = ctx.account(AccountSlot::Admin)?.clone();
        let token = ctx.token()?;
        let before = self
            .client
            .token_info(&token)
            .await
            .with_context(|| format!("Failed to query info of token {}", token))?;
        let treasury_before = token_balance(self.client.as_ref(), &before.treasury, &token).await?;

        let mint = self.client.mint_token(&admin, &token, amount);
        let expected_supply = if should_fail {
            let err = assert_fails(&format!("mint of {} units", amount), mint).await?;
            self.log(format!("  ✓ Mint rejected: {}", err));
            before.total_supply
        } else {
            mint.await
                .with_context(|| format!("Failed to mint {} of token {}", amount, token))?;
            let expected_treasury = treasury_before.checked_add(amount).ok_or_else(|| {
                HarnessError::Config(format!("mint of {} overflows the treasury balance", amount))
            })?;
            assert_token_balance_eq(self.client.as_ref(), &before.treasury, &token, expected_treasury)
                .await?;
            self.log(format!("  ✓ Minted {} units", amount));
            before.total_supply.saturating_add(amount)
        };

        let expected = TokenExpectation {
            total_supply: Some(expected_supply),
            ..Default::default()
        };
        assert_token(self.client.as_ref(), &token, &expected).await
    }

    /// Add log entry
    fn log(&mut self, message: String) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", message.trim());
        }
        self.log.push(message);
    }
}

fn location(pool: &Option<String>, index: &Option<usize>) -> Option<PoolIndex> {
    match (pool, index) {
        (Some(pool), Some(index)) => Some(PoolIndex::new(pool.clone(), *index)),
        _ => None,
    }
}

/// Execution report
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Scenario name
    pub scenario_name: String,

    /// Network label from the configuration
    pub network: String,

    pub steps_total: usize,

    /// Number of steps that completed
    pub steps_executed: usize,

    /// Whether execution succeeded
    pub success: bool,

    /// `Passed` or `Failed`
    pub phase: ScenarioPhase,

    /// Last lifecycle phase reached before the outcome
    pub reached_phase: ScenarioPhase,

    /// 1-indexed step that failed
    pub failed_step: Option<usize>,

    /// Failure with its context chain
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    pub duration: Duration,

    /// Execution log
    pub log: Vec<String>,
}

impl ExecutionReport {
    /// Print report to stdout
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  Scenario Execution Report                                 ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Name: {:<50} ║", self.scenario_name);
        println!("║  Network: {:<47} ║", self.network);
        println!(
            "║  Started: {:<47} ║",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!(
            "║  Steps: {:<48} ║",
            format!("{}/{}", self.steps_executed, self.steps_total)
        );
        println!(
            "║  Phase: {:<48} ║",
            format!("{} (reached {})", self.phase, self.reached_phase)
        );
        println!("║  Duration: {:<45} ║", format!("{:?}", self.duration));
        println!(
            "║  Status: {:<47} ║",
            if self.success {
                "SUCCESS ✓"
            } else {
                "FAILED ✗"
            }
        );
        println!("╚════════════════════════════════════════════════════════════╝\n");

        if let Some(error) = &self.error {
            println!("Error: {}\n", error);
        }

        println!("Execution Log:");
        println!("═════════════");
        for entry in &self.log {
            println!("{}", entry);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::orchestrator::PausedClock;
    use crate::scenarios::parser::parse_scenario;

    fn executor() -> ScenarioExecutor {
        let config = Arc::new(HarnessConfig::default().with_generated_pools());
        ScenarioExecutor::simulated(config, Arc::new(SystemClock)).unwrap()
    }

    #[tokio::test]
    async fn test_token_creation_scenario() {
        let yaml = r#"
name: "Create token"
steps:
  - action: load_account
    slot: admin
    more_than_hbars: 10
  - action: create_token
  - action: assert_token
    name: "Test Token"
    symbol: "HTT"
    decimals: 2
    owned_by_admin: true
  - action: mint
    amount: 100
    expect:
      status: success
"#;
        let scenario = parse_scenario(yaml).unwrap();
        let report = executor().execute(&scenario).await.unwrap();

        assert!(report.success);
        assert_eq!(report.steps_executed, 4);
        assert_eq!(report.phase, ScenarioPhase::Passed);
        assert_eq!(report.reached_phase, ScenarioPhase::AssertionsRun);
    }

    #[tokio::test]
    async fn test_failed_step_is_reported() {
        let yaml = r#"
name: "Too rich"
steps:
  - action: load_account
    slot: first
    more_than_hbars: 1000000
"#;
        let scenario = parse_scenario(yaml).unwrap();
        let mut executor = executor();

        let report = executor.run(&scenario).await;
        assert!(!report.success);
        assert_eq!(report.phase, ScenarioPhase::Failed);
        assert_eq!(report.failed_step, Some(1));
        assert_eq!(report.steps_executed, 0);
        assert!(report.error.as_deref().unwrap().contains("Failed at step 1"));

        let err = executor.execute(&scenario).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_advance_time_within_budget() {
        let config = Arc::new(HarnessConfig::default().with_generated_pools());
        let clock = Arc::new(PausedClock::new());
        let mut executor = ScenarioExecutor::simulated(config.clone(), clock).unwrap();

        let yaml = r#"
name: "Wait"
steps:
  - action: advance_time
    seconds: 30
"#;
        let scenario = parse_scenario(yaml).unwrap();
        let report = executor.execute(&scenario).await.unwrap();
        assert!(report.duration >= Duration::from_secs(30));
        assert!(report.duration < config.step_timeout());
    }

    #[tokio::test]
    async fn test_long_wait_with_raised_budget() {
        let config = HarnessConfig {
            step_timeout_secs: 7200,
            ..HarnessConfig::default().with_generated_pools()
        };
        let mut executor =
            ScenarioExecutor::simulated(Arc::new(config), Arc::new(PausedClock::new())).unwrap();

        let yaml = r#"
name: "Long wait"
steps:
  - action: advance_time
    seconds: 3600
"#;
        let scenario = parse_scenario(yaml).unwrap();
        let report = executor.execute(&scenario).await.unwrap();
        assert!(report.duration >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_budget_enforced() {
        let config = HarnessConfig {
            step_timeout_secs: 5,
            ..HarnessConfig::default().with_generated_pools()
        };
        let mut executor =
            ScenarioExecutor::simulated(Arc::new(config), Arc::new(PausedClock::attach())).unwrap();

        let yaml = r#"
name: "Slow"
steps:
  - action: advance_time
    seconds: 60
"#;
        let scenario = parse_scenario(yaml).unwrap();
        let err = executor.execute(&scenario).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_yaml_fixed_supply() {
        let yaml = std::fs::read_to_string("scenarios/fixed_supply_token.yaml")
            .expect("Failed to read fixed_supply_token.yaml");

        let scenario = parse_scenario(&yaml).unwrap();
        let report = executor().execute(&scenario).await.unwrap();

        assert!(report.success);
        println!("\nFixed Supply Scenario:");
        for line in &report.log {
            println!("{}", line);
        }
    }
}
