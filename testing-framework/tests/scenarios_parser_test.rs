#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//! Standalone tests for the scenario front-ends
//!
//! Every bundled file must parse; YAML and Gherkin renditions of the same
//! scenario must produce the same steps.

use ledger_testing_framework::context::AccountSlot;
use ledger_testing_framework::scenarios::{
    load_scenarios, parse_feature, parse_scenario, scenario_files, Step,
};

#[test]
fn test_parse_all_scenarios() {
    let files = scenario_files("scenarios").unwrap();
    assert!(files.len() >= 7, "found {} scenario files", files.len());

    for file in files {
        match load_scenarios(&file) {
            Ok(scenarios) => {
                for scenario in scenarios {
                    println!("✓ {}: {} parsed", file.display(), scenario.name);
                }
            }
            Err(e) => panic!("✗ {} failed to parse: {:#}", file.display(), e),
        }
    }
}

#[test]
fn test_yaml_and_feature_agree() {
    let feature = parse_feature(
        r#"
Feature: Fixed supply
  Scenario: Fixed supply
    Given A Hedera account with more than 10 hbar
    When I create a fixed supply token named Test Token (HTT) with 1000 tokens
    Then The total supply of the token is 1000
    And An attempt to mint tokens fails
"#,
    )
    .unwrap()
    .remove(0);

    let yaml = parse_scenario(
        r#"
name: "Fixed supply"
description: "Fixed supply"
steps:
  - action: load_account
    slot: admin
    more_than_hbars: 10
  - action: create_token
    initial_supply: 1000
    max_supply: 1000
  - action: assert_token
    total_supply: 1000
  - action: mint
    amount: 1
    expect:
      status: failure
"#,
    )
    .unwrap();

    assert_eq!(feature.steps, yaml.steps);
}

#[test]
fn test_topic_expectation_subscribes_first() {
    let scenarios = load_scenarios("scenarios/create_simple_topic.feature").unwrap();
    let steps = &scenarios[0].steps;
    let expect_at = steps
        .iter()
        .position(|s| matches!(s, Step::ExpectMessage { .. }))
        .unwrap();
    assert!(matches!(steps[expect_at - 1], Step::SubscribeTopic));
    assert!(matches!(
        steps[0],
        Step::LoadAccount {
            slot: AccountSlot::First,
            more_than_hbars: Some(1),
            ..
        }
    ));
}

#[test]
fn test_unsupported_extension_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.toml");
    std::fs::write(&path, "name = 'x'").unwrap();
    assert!(load_scenarios(&path).is_err());
    assert!(scenario_files(dir.path()).unwrap().is_empty());
}
