#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//! Consensus topic scenarios and subscription lifecycle

use std::sync::Arc;

use ledger_testing_framework::prelude::*;

fn config() -> Arc<HarnessConfig> {
    Arc::new(HarnessConfig::default().with_generated_pools())
}

#[tokio::test]
async fn test_simple_topic_feature_passes() {
    for scenario in load_scenarios("scenarios/create_simple_topic.feature").unwrap() {
        let mut executor = ScenarioExecutor::simulated(config(), Arc::new(SystemClock)).unwrap();
        let report = executor.execute(&scenario).await.unwrap();
        assert_eq!(report.phase, ScenarioPhase::Passed);
        assert!(scenario.tags.contains(&"topic".to_string()));
    }
}

#[tokio::test]
async fn test_threshold_topic_rejects_outsider() {
    let scenario = load_scenarios("scenarios/threshold_topic.yaml")
        .unwrap()
        .remove(0);
    let mut executor = ScenarioExecutor::simulated(config(), Arc::new(SystemClock)).unwrap();

    let report = executor.execute(&scenario).await.unwrap();
    assert!(report.log.iter().any(|l| l.contains("Publishing rejected")));
}

#[tokio::test(start_paused = true)]
async fn test_missing_message_times_out() {
    let mut executor =
        ScenarioExecutor::simulated(config(), Arc::new(PausedClock::attach())).unwrap();
    let scenario = parse_scenario(
        r#"
name: "Silent topic"
steps:
  - action: load_account
    slot: first
  - action: create_topic
    memo: "quiet"
  - action: expect_message
    message: "never sent"
    timeout_secs: 30
"#,
    )
    .unwrap();

    let err = executor.execute(&scenario).await.unwrap_err();
    match err.downcast_ref::<HarnessError>() {
        Some(HarnessError::Timeout { timeout, .. }) => {
            assert_eq!(*timeout, Duration::from_secs(30))
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_wrong_message_is_a_mismatch() {
    let mut executor = ScenarioExecutor::simulated(config(), Arc::new(SystemClock)).unwrap();
    let scenario = parse_scenario(
        r#"
name: "Wrong message"
steps:
  - action: load_account
    slot: first
  - action: create_topic
    memo: "taxi"
    submit_key: first
  - action: publish_message
    message: "first"
  - action: expect_message
    message: "second"
"#,
    )
    .unwrap();

    let err = executor.execute(&scenario).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::Mismatch { .. })
    ));
}

#[tokio::test]
async fn test_teardown_cancels_open_subscription() {
    let config = config();
    let ledger = Arc::new(
        SimulatedLedgerBuilder::new()
            .with_config_pools(&config)
            .unwrap()
            .build(),
    );
    let fixtures = FixtureProvisioner::new(ledger.clone(), config);

    let mut ctx = ScenarioContext::new("subscriptions");
    fixtures.load_account(&mut ctx, AccountSlot::First, None).unwrap();
    let topic = fixtures
        .create_topic(&mut ctx, AccountSlot::First, "memo", SubmitKey::None)
        .await
        .unwrap();
    ctx.track_subscription(ledger.subscribe_topic(&topic).await.unwrap());
    ctx.track_subscription(ledger.subscribe_topic(&topic).await.unwrap());
    assert_eq!(ctx.live_subscriptions(), 2);

    ctx.teardown();
    assert_eq!(ctx.live_subscriptions(), 0);
}
