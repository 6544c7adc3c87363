//! Gherkin front-end
//!
//! Turns plain feature text into [`TestScenario`] values through a table of
//! step phrases. Each phrase is a regex bound to the keyword it may appear
//! under and a builder producing the equivalent YAML steps, so a feature
//! file and a YAML scenario run through the same executor.
//!
//! ```text
//! Feature: Token service
//!   Scenario: Create a fixed supply token
//!     Given A Hedera account with more than 10 hbar
//!     When I create a fixed supply token named Test Token (HTT) with 1000 tokens
//!     Then The total supply of the token is 1000
//!     And An attempt to mint tokens fails
//! ```
//!
//! `And`/`But` take the keyword of the step before them. Background steps
//! are prepended to every scenario of the feature.

use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::parser::{
    validate_scenario, HbarExpect, OutcomeExpect, Step, TestScenario, TransferLegSpec,
};
use crate::context::AccountSlot;

/// Step keyword after `And`/`But` resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Given,
    When,
    Then,
}

impl Keyword {
    fn parse(word: &str) -> Option<KeywordToken> {
        match word {
            "Given" => Some(KeywordToken::Primary(Keyword::Given)),
            "When" => Some(KeywordToken::Primary(Keyword::When)),
            "Then" => Some(KeywordToken::Primary(Keyword::Then)),
            "And" | "But" | "*" => Some(KeywordToken::Continuation),
            _ => None,
        }
    }
}

enum KeywordToken {
    Primary(Keyword),
    Continuation,
}

type StepBuilder = fn(&Captures) -> Result<Vec<Step>>;

struct Phrase {
    /// Keywords the phrase may appear under; empty means any
    keywords: &'static [Keyword],
    pattern: Regex,
    build: StepBuilder,
}

const ORDINAL: &str = "(first|second|third|fourth)";

fn phrase(keywords: &'static [Keyword], pattern: &str, build: StepBuilder) -> Phrase {
    let pattern = format!("(?i)^{}$", pattern.replace("{ordinal}", ORDINAL));
    Phrase {
        keywords,
        pattern: Regex::new(&pattern).expect("valid step phrase regex"),
        build,
    }
}

lazy_static! {
    static ref PHRASES: Vec<Phrase> = vec![
        // ===== Accounts =====
        phrase(&[Keyword::Given], r"A Hedera account with more than (\d+) hbars?", |c| {
            Ok(vec![load(AccountSlot::Admin, Some(number(c, 1)?), None)])
        }),
        phrase(&[Keyword::Given], r"An? {ordinal} (?:hedera )?account with more than (\d+) hbars?", |c| {
            Ok(vec![load(slot(c, 1)?, Some(number(c, 2)?), None)])
        }),
        phrase(&[Keyword::Given], r"An? {ordinal} (?:hedera )?account", |c| {
            Ok(vec![load(slot(c, 1)?, None, None)])
        }),
        phrase(
            &[Keyword::Given],
            r"An? {ordinal} (?:hedera )?account with more than (\d+) hbars? and (\d+) HTT tokens",
            |c| {
                Ok(vec![Step::ProvisionAccount {
                    slot: slot(c, 1)?,
                    pool: None,
                    index: None,
                    more_than_hbars: Some(number(c, 2)?),
                    exact_hbars: None,
                    tokens: number(c, 3)?,
                }])
            },
        ),
        phrase(
            &[Keyword::Given],
            r"An? {ordinal} (?:hedera )?account with (\d+) hbars? and (\d+) HTT tokens",
            |c| {
                Ok(vec![Step::ProvisionAccount {
                    slot: slot(c, 1)?,
                    pool: None,
                    index: None,
                    more_than_hbars: None,
                    exact_hbars: Some(number(c, 2)?),
                    tokens: number(c, 3)?,
                }])
            },
        ),
        phrase(
            &[Keyword::Given],
            r"A (\d+) of (\d+) threshold key with the first and second account",
            |c| {
                let threshold = number(c, 1)?;
                let total = number(c, 2)?;
                if total != 2 {
                    bail!("a threshold key over the first and second account has 2 keys, not {}", total);
                }
                Ok(vec![Step::ThresholdKey {
                    threshold: u32::try_from(threshold)?,
                    accounts: vec![AccountSlot::First, AccountSlot::Second],
                }])
            },
        ),

        // ===== Tokens =====
        phrase(&[Keyword::Given, Keyword::When], r"I create a token named Test Token \(HTT\)", |_| {
            Ok(vec![create_token(0, None, false)])
        }),
        phrase(
            &[Keyword::Given, Keyword::When],
            r"I create a fixed supply token named Test Token \(HTT\) with (\d+) tokens",
            |c| {
                let supply = number(c, 1)?;
                Ok(vec![create_token(supply, Some(supply), false)])
            },
        ),
        phrase(&[Keyword::Given], r"A token named Test Token \(HTT\) with (\d+) tokens", |c| {
            Ok(vec![create_token(number(c, 1)?, None, true)])
        }),
        phrase(&[Keyword::Then], r#"The token has the name "([^"]*)""#, |c| {
            Ok(vec![assert_token(|t| {
                if let Step::AssertToken { name, .. } = t {
                    *name = Some(text(c, 1));
                }
            })])
        }),
        phrase(&[Keyword::Then], r#"The token has the symbol "([^"]*)""#, |c| {
            Ok(vec![assert_token(|t| {
                if let Step::AssertToken { symbol, .. } = t {
                    *symbol = Some(text(c, 1));
                }
            })])
        }),
        phrase(&[Keyword::Then], r"The token has (\d+) decimals", |c| {
            let value = u32::try_from(number(c, 1)?)?;
            Ok(vec![assert_token(|t| {
                if let Step::AssertToken { decimals, .. } = t {
                    *decimals = Some(value);
                }
            })])
        }),
        phrase(&[Keyword::Then], r"The token is owned by the account", |_| {
            Ok(vec![assert_token(|t| {
                if let Step::AssertToken { owned_by_admin, .. } = t {
                    *owned_by_admin = true;
                }
            })])
        }),
        phrase(&[Keyword::Then], r"The total supply of the token is (\d+)", |c| {
            let value = number(c, 1)?;
            Ok(vec![assert_token(|t| {
                if let Step::AssertToken { total_supply, .. } = t {
                    *total_supply = Some(value);
                }
            })])
        }),
        phrase(&[], r"An attempt to mint (\d+) additional tokens succeeds", |c| {
            Ok(vec![Step::Mint {
                amount: number(c, 1)?,
                expect: Some(OutcomeExpect::success()),
            }])
        }),
        phrase(&[], r"An attempt to mint tokens fails", |_| {
            Ok(vec![Step::Mint {
                amount: 1,
                expect: Some(OutcomeExpect::failure()),
            }])
        }),

        // ===== Balances =====
        phrase(&[Keyword::Given], r"The {ordinal} account holds (\d+) HTT tokens", |c| {
            Ok(vec![Step::HoldTokens {
                account: slot(c, 1)?,
                amount: number(c, 2)?,
            }])
        }),
        phrase(&[Keyword::Then], r"The {ordinal} account holds (\d+) HTT tokens", |c| {
            Ok(vec![Step::AssertTokenBalance {
                account: slot(c, 1)?,
                eq: number(c, 2)?,
            }])
        }),
        phrase(&[Keyword::Then], r"The {ordinal} account has more than (\d+) hbars?", |c| {
            Ok(vec![Step::AssertHbarBalance {
                account: slot(c, 1)?,
                expect: HbarExpect::Gt { gt: number(c, 2)? },
            }])
        }),
        phrase(&[Keyword::Then], r"The {ordinal} account has paid for the transaction fee", |c| {
            Ok(vec![Step::AssertFeePaid { account: slot(c, 1)? }])
        }),

        // ===== Transfers =====
        phrase(
            &[Keyword::When],
            r"The {ordinal} account creates a transaction to transfer (\d+) HTT tokens to the {ordinal} account",
            |c| {
                let from = slot(c, 1)?;
                let amount = signed(c, 2)?;
                Ok(vec![Step::CreateTransfer {
                    legs: vec![
                        TransferLegSpec { account: from, amount: -amount },
                        TransferLegSpec { account: slot(c, 3)?, amount },
                    ],
                    signers: vec![from],
                    schedule: false,
                }])
            },
        ),
        phrase(
            &[Keyword::When],
            r"A transaction is created to transfer (\d+) HTT tokens out of the first and second account and (\d+) HTT tokens into the third account and (\d+) HTT tokens into the fourth account",
            |c| {
                let out = signed(c, 1)?;
                Ok(vec![Step::CreateTransfer {
                    legs: vec![
                        TransferLegSpec { account: AccountSlot::First, amount: -out },
                        TransferLegSpec { account: AccountSlot::Second, amount: -out },
                        TransferLegSpec { account: AccountSlot::Third, amount: signed(c, 2)? },
                        TransferLegSpec { account: AccountSlot::Fourth, amount: signed(c, 3)? },
                    ],
                    signers: vec![AccountSlot::Second, AccountSlot::First],
                    schedule: true,
                }])
            },
        ),
        phrase(&[Keyword::When], r"The {ordinal} account submits the transaction", |c| {
            Ok(vec![Step::SubmitTransfer {
                payer: slot(c, 1)?,
                expect: None,
            }])
        }),
        phrase(&[Keyword::When], r"The {ordinal} account signs the scheduled transaction", |c| {
            Ok(vec![Step::SignSchedule {
                account: slot(c, 1)?,
                payer: None,
                expect: None,
            }])
        }),

        // ===== Topics =====
        phrase(
            &[Keyword::When],
            r#"A topic is created with the memo "([^"]*)" with the {ordinal} account as the submit key"#,
            |c| {
                Ok(vec![Step::CreateTopic {
                    operator: AccountSlot::First,
                    memo: text(c, 1),
                    submit_key: Some(slot(c, 2)?.name().to_string()),
                }])
            },
        ),
        phrase(
            &[Keyword::When],
            r#"A topic is created with the memo "([^"]*)" with the threshold key as the submit key"#,
            |c| {
                Ok(vec![Step::CreateTopic {
                    operator: AccountSlot::First,
                    memo: text(c, 1),
                    submit_key: Some("threshold".to_string()),
                }])
            },
        ),
        phrase(&[Keyword::When], r#"The message "([^"]*)" is published to the topic"#, |c| {
            Ok(vec![Step::PublishMessage {
                operator: AccountSlot::First,
                message: text(c, 1),
                expect: None,
            }])
        }),
        phrase(
            &[Keyword::Then],
            r#"The message "([^"]*)" is received by the topic(?: and can be printed to the console)?"#,
            |c| {
                Ok(vec![
                    Step::SubscribeTopic,
                    Step::ExpectMessage {
                        message: text(c, 1),
                        timeout_secs: None,
                    },
                ])
            },
        ),
    ];
}

fn load(slot: AccountSlot, more_than: Option<u64>, exact: Option<u64>) -> Step {
    Step::LoadAccount {
        slot,
        pool: None,
        index: None,
        more_than_hbars: more_than,
        exact_hbars: exact,
    }
}

fn create_token(initial_supply: u64, max_supply: Option<u64>, for_pair: bool) -> Step {
    Step::CreateToken {
        name: "Test Token".to_string(),
        symbol: "HTT".to_string(),
        decimals: 2,
        initial_supply,
        max_supply,
        for_pair,
    }
}

fn assert_token(fill: impl FnOnce(&mut Step)) -> Step {
    let mut step = Step::AssertToken {
        name: None,
        symbol: None,
        decimals: None,
        total_supply: None,
        max_supply: None,
        owned_by_admin: false,
    };
    fill(&mut step);
    step
}

fn text(caps: &Captures, idx: usize) -> String {
    caps.get(idx).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn number(caps: &Captures, idx: usize) -> Result<u64> {
    let raw = caps
        .get(idx)
        .ok_or_else(|| anyhow!("missing capture {}", idx))?
        .as_str();
    raw.parse::<u64>()
        .with_context(|| format!("'{}' is not a valid amount", raw))
}

fn signed(caps: &Captures, idx: usize) -> Result<i64> {
    Ok(i64::try_from(number(caps, idx)?)?)
}

fn slot(caps: &Captures, idx: usize) -> Result<AccountSlot> {
    let word = caps
        .get(idx)
        .ok_or_else(|| anyhow!("missing capture {}", idx))?
        .as_str();
    AccountSlot::from_word(word).ok_or_else(|| anyhow!("unknown account '{}'", word))
}

/// Translate one step phrase into executor steps
pub fn translate_step(keyword: Keyword, text: &str) -> Result<Vec<Step>> {
    let text = text.trim();
    for phrase in PHRASES.iter() {
        if !phrase.keywords.is_empty() && !phrase.keywords.contains(&keyword) {
            continue;
        }
        if let Some(caps) = phrase.pattern.captures(text) {
            return (phrase.build)(&caps);
        }
    }
    bail!("no step definition matches {:?} '{}'", keyword, text)
}

struct ScenarioDraft {
    name: String,
    tags: Vec<String>,
    description: Vec<String>,
    steps: Vec<Step>,
}

impl ScenarioDraft {
    fn finish(self, feature: &str, background: &[Step]) -> Result<TestScenario> {
        let mut steps = background.to_vec();
        steps.extend(self.steps);

        let description = if self.description.is_empty() {
            (!feature.is_empty()).then(|| feature.to_string())
        } else {
            Some(self.description.join(" "))
        };
        let scenario = TestScenario {
            name: self.name,
            description,
            tags: self.tags,
            steps,
        };
        validate_scenario(&scenario)
            .with_context(|| format!("Invalid scenario '{}'", scenario.name))?;
        Ok(scenario)
    }
}

enum Section {
    Preamble,
    Background,
    Scenario(ScenarioDraft),
}

/// Parse a feature file into its scenarios
pub fn parse_feature(text: &str) -> Result<Vec<TestScenario>> {
    let mut feature = String::new();
    let mut feature_tags: Vec<String> = Vec::new();
    let mut pending_tags: Vec<String> = Vec::new();
    let mut background: Vec<Step> = Vec::new();
    let mut section = Section::Preamble;
    let mut last_keyword: Option<Keyword> = None;
    let mut scenarios = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('@') {
            pending_tags.extend(
                line.split_whitespace()
                    .map(|tag| tag.trim_start_matches('@').to_string()),
            );
            continue;
        }

        if let Some(name) = line.strip_prefix("Feature:") {
            if !feature.is_empty() {
                bail!("line {}: a file holds a single Feature", line_no);
            }
            feature = name.trim().to_string();
            feature_tags = std::mem::take(&mut pending_tags);
            continue;
        }

        if line.starts_with("Background:") {
            if !matches!(section, Section::Preamble) {
                bail!("line {}: Background must precede every Scenario", line_no);
            }
            section = Section::Background;
            last_keyword = None;
            continue;
        }

        if line.starts_with("Scenario Outline:") || line.starts_with("Scenario Template:") {
            bail!("line {}: scenario outlines are not supported", line_no);
        }

        let header = line
            .strip_prefix("Scenario:")
            .or_else(|| line.strip_prefix("Example:"));
        if let Some(name) = header {
            if let Section::Scenario(draft) = std::mem::replace(&mut section, Section::Preamble) {
                scenarios.push(draft.finish(&feature, &background)?);
            }
            let mut tags = feature_tags.clone();
            tags.append(&mut pending_tags);
            section = Section::Scenario(ScenarioDraft {
                name: name.trim().to_string(),
                tags,
                description: Vec::new(),
                steps: Vec::new(),
            });
            last_keyword = None;
            continue;
        }

        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let Some(token) = Keyword::parse(word) else {
            // Free text under a header
            match &mut section {
                Section::Scenario(draft) if draft.steps.is_empty() => {
                    draft.description.push(line.to_string())
                }
                Section::Preamble => {}
                _ => bail!("line {}: expected a step, found '{}'", line_no, line),
            }
            continue;
        };

        let keyword = match token {
            KeywordToken::Primary(keyword) => keyword,
            KeywordToken::Continuation => last_keyword
                .ok_or_else(|| anyhow!("line {}: '{}' has no preceding step", line_no, word))?,
        };
        last_keyword = Some(keyword);

        let steps = translate_step(keyword, rest).with_context(|| format!("line {}", line_no))?;
        match &mut section {
            Section::Background => background.extend(steps),
            Section::Scenario(draft) => draft.steps.extend(steps),
            Section::Preamble => bail!("line {}: step outside of a Scenario", line_no),
        }
    }

    if let Section::Scenario(draft) = section {
        scenarios.push(draft.finish(&feature, &background)?);
    }
    if scenarios.is_empty() {
        bail!("feature '{}' has no scenarios", feature);
    }

    log::debug!(
        "Parsed feature '{}' into {} scenarios",
        feature,
        scenarios.len()
    );
    Ok(scenarios)
}
