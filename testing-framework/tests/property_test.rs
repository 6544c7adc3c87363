#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//! Property tests for fixture guarantees
//!
//! - a "holds N tokens" precondition declared any number of times transfers once
//! - an exact-balance fixture is confirmed by the next balance query

use std::sync::Arc;

use ledger_testing_framework::prelude::*;
use proptest::prelude::*;

fn provisioner() -> (FixtureProvisioner, Arc<SimulatedLedger>) {
    let config = HarnessConfig::default().with_generated_pools();
    let ledger = Arc::new(
        SimulatedLedgerBuilder::new()
            .with_config_pools(&config)
            .unwrap()
            .build(),
    );
    (FixtureProvisioner::new(ledger.clone(), Arc::new(config)), ledger)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: repeated disbursement preconditions run the transfer once
    #[test]
    fn prop_hold_tokens_disburses_once(amount in 0u64..=1000, repeats in 1usize..6) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let (fixtures, ledger) = provisioner();
            let mut ctx = ScenarioContext::new("one-shot");
            fixtures.load_account(&mut ctx, AccountSlot::First, None).unwrap();
            fixtures.load_account(&mut ctx, AccountSlot::Second, None).unwrap();
            fixtures
                .provision_token_for_pair(&mut ctx, &TokenSpec::test_token(1000))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            for _ in 0..repeats {
                fixtures
                    .hold_tokens(&mut ctx, AccountSlot::First, amount)
                    .await
                    .map_err(|e| TestCaseError::fail(format!("{:#}", e)))?;
            }

            prop_assert_eq!(ledger.counters().executed_transfers, 1);
            let token = ctx.token().unwrap();
            let first = ctx.account(AccountSlot::First).unwrap().id;
            prop_assert_eq!(
                token_balance(ledger.as_ref(), &first, &token).await.unwrap(),
                amount
            );
            Ok(())
        })?;
    }

    /// Property: a satisfied exact-balance fixture agrees with the ledger
    #[test]
    fn prop_exact_balance_matches_query(hbars in 0u64..5_000) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let config = HarnessConfig::default().with_generated_pools();
            let account = config.account("accounts", 0).unwrap();
            let ledger = Arc::new(
                SimulatedLedgerBuilder::new()
                    .with_account(account.clone(), Hbar::from_hbars(hbars))
                    .build(),
            );
            let fixtures = FixtureProvisioner::new(ledger.clone(), Arc::new(config));
            let mut ctx = ScenarioContext::new("exact");
            fixtures.load_account(&mut ctx, AccountSlot::First, None).unwrap();

            let confirmed = fixtures
                .ensure_exact_balance(&ctx, AccountSlot::First, Hbar::from_hbars(hbars))
                .await
                .map_err(|e| TestCaseError::fail(format!("{:#}", e)))?;
            let queried = native_balance(ledger.as_ref(), &account.id).await.unwrap();
            prop_assert_eq!(confirmed, queried);

            // Any other amount is a precondition failure
            let off_by_one = fixtures
                .ensure_exact_balance(&ctx, AccountSlot::First, Hbar::from_hbars(hbars + 1))
                .await;
            prop_assert!(off_by_one.is_err());
            Ok(())
        })?;
    }
}
