//! Fixture provisioning
//!
//! Fixtures bring the ledger into the state a scenario's assertions depend
//! on. A precondition that cannot be established fails at once with a
//! [`HarnessError::Precondition`] naming the expected and the actual value;
//! nothing is retried. Disbursements are guarded by the context's
//! idempotency registry so a precondition declared twice transfers once.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::assertions::{native_balance, token_balance};
use crate::config::{HarnessConfig, PoolIndex};
use crate::context::{AccountSlot, ScenarioContext};
use crate::error::HarnessError;
use crate::ledger::{
    AccountRef, Hbar, Key, KeyList, LedgerClient, Status, TokenConfig, TokenId,
    TokenTransfer, TopicConfig, TopicId,
};

/// Guard shared by the "account holds N tokens" preconditions of one token
pub const INITIAL_DEPOSIT_GUARD: &str = "initial-token-deposit";

/// Parameters of a token created by [`FixtureProvisioner::create_token`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub initial_supply: u64,
    /// Fixed supply cap; `None` for an infinite supply
    pub max_supply: Option<u64>,
}

impl TokenSpec {
    /// "Test Token" (HTT) with two decimals, the token every scenario uses
    pub fn test_token(initial_supply: u64) -> Self {
        Self {
            name: "Test Token".to_string(),
            symbol: "HTT".to_string(),
            decimals: 2,
            initial_supply,
            max_supply: None,
        }
    }

    pub fn with_max_supply(mut self, max: u64) -> Self {
        self.max_supply = Some(max);
        self
    }
}

/// Native balance requirement of a loaded account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbarRequirement {
    /// Strictly more than the amount
    MoreThan(Hbar),
    /// Exactly the amount
    Exactly(Hbar),
}

/// Submit key of a topic created by [`FixtureProvisioner::create_topic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKey {
    None,
    /// Key of the account in the slot
    Account(AccountSlot),
    /// Threshold key stored in the context
    Threshold,
}

/// Establishes scenario preconditions against a ledger
#[derive(Clone)]
pub struct FixtureProvisioner {
    client: Arc<dyn LedgerClient>,
    config: Arc<HarnessConfig>,
}

impl FixtureProvisioner {
    pub fn new(client: Arc<dyn LedgerClient>, config: Arc<HarnessConfig>) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &dyn LedgerClient {
        self.client.as_ref()
    }

    /// Load an account from its pool into `slot`
    ///
    /// `location` overrides the slot's configured pool position.
    pub fn load_account(
        &self,
        ctx: &mut ScenarioContext,
        slot: AccountSlot,
        location: Option<&PoolIndex>,
    ) -> Result<AccountRef> {
        let location = match location {
            Some(location) => location,
            None => self.config.slot_location(slot)?,
        };
        let account = self.config.account(&location.pool, location.index)?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "[{}] {} is {}[{}] ({})",
                ctx.name(),
                slot,
                location.pool,
                location.index,
                account.id
            );
        }
        ctx.set_account(slot, account.clone());
        Ok(account)
    }

    /// Require the slot's native balance to meet `requirement`
    pub async fn ensure_hbar(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        requirement: HbarRequirement,
    ) -> Result<Hbar> {
        let account = ctx.account(slot)?;
        let actual = native_balance(self.client(), &account.id).await?;
        let subject = format!("hbar balance of the {} ({})", slot, account.id);

        match requirement {
            HbarRequirement::MoreThan(min) if actual <= min => {
                bail!(HarnessError::precondition(subject, format!("> {}", min), actual))
            }
            HbarRequirement::Exactly(exact) if actual != exact => {
                bail!(HarnessError::precondition(subject, exact, actual))
            }
            _ => Ok(actual),
        }
    }

    /// Require strictly more than `min` hbar
    pub async fn ensure_min_balance(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        min: Hbar,
    ) -> Result<Hbar> {
        self.ensure_hbar(ctx, slot, HbarRequirement::MoreThan(min))
            .await
    }

    /// Require exactly `exact` hbar
    pub async fn ensure_exact_balance(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        exact: Hbar,
    ) -> Result<Hbar> {
        self.ensure_hbar(ctx, slot, HbarRequirement::Exactly(exact))
            .await
    }

    /// Create a token with the admin slot as operator, treasury, admin and
    /// supply key, then confirm its supply with a token query
    pub async fn create_token(&self, ctx: &mut ScenarioContext, spec: &TokenSpec) -> Result<TokenId> {
        let admin = ctx.account(AccountSlot::Admin)?.clone();

        let mut config = TokenConfig::fungible(&spec.name, &spec.symbol, spec.decimals, admin.id)
            .with_initial_supply(spec.initial_supply)
            .with_admin_key(admin.public_key())
            .with_supply_key(admin.public_key());
        if let Some(max) = spec.max_supply {
            config = config.with_max_supply(max);
        }

        let receipt = self
            .client
            .create_token(&admin, config)
            .await
            .with_context(|| format!("Failed to create token {} ({})", spec.name, spec.symbol))?;
        let token = match receipt.token_id {
            Some(token) => token,
            None => bail!(HarnessError::precondition(
                format!("receipt of transaction {}", receipt.transaction_id),
                "a token id",
                "none"
            )),
        };
        ctx.set_token(token);

        let info = self
            .client
            .token_info(&token)
            .await
            .with_context(|| format!("Failed to query info of token {}", token))?;
        if info.total_supply != spec.initial_supply {
            bail!(HarnessError::precondition(
                format!("total supply of token {}", token),
                spec.initial_supply,
                info.total_supply
            ));
        }
        if spec.max_supply.is_some() && info.max_supply != spec.max_supply {
            bail!(HarnessError::precondition(
                format!("max supply of token {}", token),
                format!("{:?}", spec.max_supply),
                format!("{:?}", info.max_supply)
            ));
        }

        log::info!(
            "[{}] created token {} {} ({}) with supply {}",
            ctx.name(),
            token,
            spec.name,
            spec.symbol,
            spec.initial_supply
        );
        Ok(token)
    }

    /// Associate the slot's account with the context token, paid by itself
    ///
    /// The ledger's verdict is final unless the configuration tolerates an
    /// existing association.
    pub async fn associate(&self, ctx: &ScenarioContext, slot: AccountSlot) -> Result<()> {
        self.associate_paid_by(ctx, slot, slot).await
    }

    /// Associate the slot's account with the context token, paid by `payer`
    pub async fn associate_paid_by(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        payer: AccountSlot,
    ) -> Result<()> {
        let account = ctx.account(slot)?;
        let payer = ctx.account(payer)?;
        let token = ctx.token()?;

        match self.client.associate_token(payer, account, &token).await {
            Ok(_) => Ok(()),
            Err(err)
                if self.config.tolerate_existing_association
                    && err.status() == Some(Status::TokenAlreadyAssociatedToAccount) =>
            {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("{} already associated with token {}", account.id, token);
                }
                Ok(())
            }
            Err(err) => Err(err).with_context(|| {
                format!("Failed to associate {} ({}) with token {}", slot, account.id, token)
            }),
        }
    }

    /// Associate only if the account holds no balance entry for the token yet
    pub async fn ensure_associated(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        payer: AccountSlot,
    ) -> Result<()> {
        let account = ctx.account(slot)?;
        let token = ctx.token()?;
        let balance = self
            .client
            .account_balance(&account.id)
            .await
            .with_context(|| format!("Failed to query balance of account {}", account.id))?;
        if balance.token(&token).is_some() {
            return Ok(());
        }
        self.associate_paid_by(ctx, slot, payer).await
    }

    /// Create the test token for the first and second accounts
    ///
    /// Both are associated with it and the first account's native balance is
    /// recorded for a later fee assertion.
    pub async fn provision_token_for_pair(
        &self,
        ctx: &mut ScenarioContext,
        spec: &TokenSpec,
    ) -> Result<TokenId> {
        if !ctx.has_account(AccountSlot::Admin) {
            self.load_account(ctx, AccountSlot::Admin, None)?;
        }
        let token = self.create_token(ctx, spec).await?;
        self.associate(ctx, AccountSlot::First).await?;
        self.associate(ctx, AccountSlot::Second).await?;
        self.snapshot_native_balance(ctx, AccountSlot::First).await?;
        Ok(token)
    }

    /// Transfer `amount` of the context token from the admin to `slot`,
    /// once per `guard`
    ///
    /// Returns whether the transfer ran.
    pub async fn disburse_once(
        &self,
        ctx: &mut ScenarioContext,
        guard: &str,
        slot: AccountSlot,
        amount: u64,
    ) -> Result<bool> {
        let admin = ctx.account(AccountSlot::Admin)?.clone();
        let recipient = ctx.account(slot)?.id;
        let token = ctx.token()?;

        if !ctx.run_once(guard) {
            return Ok(false);
        }

        let amount = i64::try_from(amount)
            .map_err(|_| HarnessError::Config(format!("disbursement of {} is too large", amount)))?;
        let transfer = TokenTransfer::new()
            .add_token_transfer(token, admin.id, -amount)
            .add_token_transfer(token, recipient, amount);
        self.client
            .submit(&admin, transfer)
            .await
            .with_context(|| {
                format!("Initial disbursement of {} HTT to the {} did not succeed", amount, slot)
            })?;

        log::info!(
            "[{}] disbursed {} of token {} to the {} ({})",
            ctx.name(),
            amount,
            token,
            slot,
            recipient
        );
        Ok(true)
    }

    /// Make the slot hold exactly `amount` of the context token
    ///
    /// Every "holds N tokens" precondition of a token shares one guard, so
    /// only the first performs a disbursement; all of them check the balance.
    pub async fn hold_tokens(
        &self,
        ctx: &mut ScenarioContext,
        slot: AccountSlot,
        amount: u64,
    ) -> Result<()> {
        let guard = format!("{}:{}", INITIAL_DEPOSIT_GUARD, ctx.token()?);
        self.disburse_once(ctx, &guard, slot, amount).await?;
        self.ensure_token_balance(ctx, slot, amount).await
    }

    /// Load an account, check its hbar, associate it and fund it with tokens
    ///
    /// The admin pays for the association and the disbursement, so the hbar
    /// requirement still holds when the fixture returns; that balance is
    /// recorded for a later fee assertion. The disbursement is guarded per
    /// slot and token.
    pub async fn provision_account_with_tokens(
        &self,
        ctx: &mut ScenarioContext,
        slot: AccountSlot,
        location: Option<&PoolIndex>,
        hbars: HbarRequirement,
        tokens: u64,
    ) -> Result<()> {
        self.load_account(ctx, slot, location)?;
        if !ctx.has_account(AccountSlot::Admin) {
            self.load_account(ctx, AccountSlot::Admin, None)?;
        }
        let balance = self.ensure_hbar(ctx, slot, hbars).await?;
        self.ensure_associated(ctx, slot, AccountSlot::Admin).await?;

        let guard = format!("{}:{}:{}", INITIAL_DEPOSIT_GUARD, ctx.token()?, slot.name());
        self.disburse_once(ctx, &guard, slot, tokens).await?;
        self.ensure_token_balance(ctx, slot, tokens).await?;
        ctx.record_native_balance(slot, balance);
        Ok(())
    }

    /// Require the slot to hold exactly `expected` of the context token
    pub async fn ensure_token_balance(
        &self,
        ctx: &ScenarioContext,
        slot: AccountSlot,
        expected: u64,
    ) -> Result<()> {
        let account = ctx.account(slot)?;
        let token = ctx.token()?;
        let actual = token_balance(self.client(), &account.id, &token).await?;
        if actual != expected {
            bail!(HarnessError::precondition(
                format!("token {} balance of the {} ({})", token, slot, account.id),
                expected,
                actual
            ));
        }
        Ok(())
    }

    /// Record the slot's current native balance in the context
    pub async fn snapshot_native_balance(
        &self,
        ctx: &mut ScenarioContext,
        slot: AccountSlot,
    ) -> Result<Hbar> {
        let account = ctx.account(slot)?.id;
        let balance = native_balance(self.client(), &account).await?;
        ctx.record_native_balance(slot, balance);
        Ok(balance)
    }

    /// Build an M-of-N key from the slots' public keys and store it
    pub fn build_threshold_key(
        &self,
        ctx: &mut ScenarioContext,
        threshold: u32,
        slots: &[AccountSlot],
    ) -> Result<KeyList> {
        let keys = slots
            .iter()
            .map(|slot| ctx.account(*slot).map(AccountRef::public_key))
            .collect::<Result<Vec<_>, _>>()?;
        let key_list = KeyList::new(keys, threshold).context("Failed to build threshold key")?;
        ctx.set_threshold_key(key_list.clone());
        Ok(key_list)
    }

    /// Create a topic paid for by `operator` and confirm its memo
    pub async fn create_topic(
        &self,
        ctx: &mut ScenarioContext,
        operator: AccountSlot,
        memo: &str,
        submit_key: SubmitKey,
    ) -> Result<TopicId> {
        let payer = ctx.account(operator)?.clone();
        let submit_key: Option<Key> = match submit_key {
            SubmitKey::None => None,
            SubmitKey::Account(slot) => Some(ctx.account(slot)?.public_key().into()),
            SubmitKey::Threshold => Some(ctx.threshold_key()?.clone().into()),
        };
        let config = TopicConfig {
            memo: memo.to_string(),
            submit_key,
        };

        let receipt = self
            .client
            .create_topic(&payer, config)
            .await
            .with_context(|| format!("Failed to create topic with memo '{}'", memo))?;
        let topic = match receipt.topic_id {
            Some(topic) => topic,
            None => bail!(HarnessError::precondition(
                format!("receipt of transaction {}", receipt.transaction_id),
                "a topic id",
                "none"
            )),
        };
        ctx.set_topic(topic);

        let info = self
            .client
            .topic_info(&topic)
            .await
            .with_context(|| format!("Failed to query info of topic {}", topic))?;
        if info.memo != memo {
            bail!(HarnessError::precondition(
                format!("memo of topic {}", topic),
                memo,
                info.memo
            ));
        }

        log::info!("[{}] created topic {} '{}'", ctx.name(), topic, memo);
        Ok(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedgerBuilder;

    fn provisioner(tolerate: bool) -> (FixtureProvisioner, Arc<crate::ledger::SimulatedLedger>) {
        let config = HarnessConfig {
            tolerate_existing_association: tolerate,
            ..Default::default()
        }
        .with_generated_pools();
        let ledger = Arc::new(
            SimulatedLedgerBuilder::new()
                .with_config_pools(&config)
                .unwrap()
                .build(),
        );
        (
            FixtureProvisioner::new(ledger.clone(), Arc::new(config)),
            ledger,
        )
    }

    async fn with_token(fixtures: &FixtureProvisioner, ctx: &mut ScenarioContext) -> TokenId {
        fixtures.load_account(ctx, AccountSlot::First, None).unwrap();
        fixtures.load_account(ctx, AccountSlot::Second, None).unwrap();
        fixtures
            .provision_token_for_pair(ctx, &TokenSpec::test_token(1000))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_min_and_exact_balance() {
        let (fixtures, _) = provisioner(false);
        let mut ctx = ScenarioContext::new("balances");
        fixtures.load_account(&mut ctx, AccountSlot::First, None).unwrap();

        fixtures
            .ensure_min_balance(&ctx, AccountSlot::First, Hbar::from_hbars(10))
            .await
            .unwrap();
        fixtures
            .ensure_exact_balance(&ctx, AccountSlot::First, Hbar::from_hbars(1000))
            .await
            .unwrap();

        let err = fixtures
            .ensure_min_balance(&ctx, AccountSlot::First, Hbar::from_hbars(5000))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_hold_tokens_disburses_once() {
        let (fixtures, ledger) = provisioner(false);
        let mut ctx = ScenarioContext::new("hold");
        let token = with_token(&fixtures, &mut ctx).await;

        fixtures.hold_tokens(&mut ctx, AccountSlot::First, 100).await.unwrap();
        fixtures.hold_tokens(&mut ctx, AccountSlot::Second, 0).await.unwrap();
        fixtures.hold_tokens(&mut ctx, AccountSlot::First, 100).await.unwrap();

        assert_eq!(ledger.counters().executed_transfers, 1);
        let admin = ctx.account(AccountSlot::Admin).unwrap().id;
        assert_eq!(
            ledger.account_balance(&admin).await.unwrap().token(&token),
            Some(900)
        );
    }

    #[tokio::test]
    async fn test_existing_association_follows_config() {
        let (strict, _) = provisioner(false);
        let mut ctx = ScenarioContext::new("strict");
        with_token(&strict, &mut ctx).await;
        assert!(strict.associate(&ctx, AccountSlot::First).await.is_err());
        strict
            .ensure_associated(&ctx, AccountSlot::First, AccountSlot::First)
            .await
            .unwrap();

        let (tolerant, _) = provisioner(true);
        let mut ctx = ScenarioContext::new("tolerant");
        with_token(&tolerant, &mut ctx).await;
        tolerant.associate(&ctx, AccountSlot::First).await.unwrap();
    }

    #[tokio::test]
    async fn test_threshold_key_and_topic() {
        let (fixtures, ledger) = provisioner(false);
        let mut ctx = ScenarioContext::new("topic");
        fixtures.load_account(&mut ctx, AccountSlot::First, None).unwrap();
        fixtures.load_account(&mut ctx, AccountSlot::Second, None).unwrap();

        let key = fixtures
            .build_threshold_key(&mut ctx, 1, &[AccountSlot::First, AccountSlot::Second])
            .unwrap();
        assert_eq!(key.threshold(), 1);
        assert!(fixtures
            .build_threshold_key(&mut ctx, 3, &[AccountSlot::First, AccountSlot::Second])
            .is_err());

        let topic = fixtures
            .create_topic(&mut ctx, AccountSlot::First, "team topic", SubmitKey::Threshold)
            .await
            .unwrap();
        let second = ctx.account(AccountSlot::Second).unwrap().clone();
        ledger.submit_message(&second, &topic, b"hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_token_needs_admin() {
        let (fixtures, _) = provisioner(false);
        let mut ctx = ScenarioContext::new("no admin");
        let err = fixtures
            .create_token(&mut ctx, &TokenSpec::test_token(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::MissingContext { .. })
        ));
    }
}
