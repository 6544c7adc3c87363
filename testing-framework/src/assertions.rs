//! Ledger state assertions
//!
//! Each helper queries the ledger once and compares the answer with an
//! expectation. Comparisons are exact: balances are integral units, so there
//! is no tolerance. Failures are [`HarnessError`] values carrying both the
//! expected and the actual value, wrapped in `anyhow` with query context.

use anyhow::{bail, Context, Result};
use std::future::Future;
use tokio::time::Duration;

use crate::error::HarnessError;
use crate::ledger::{
    AccountId, Hbar, Key, LedgerClient, LedgerError, PublicKey, TokenId, TopicId, TopicMessage,
    TopicSubscription,
};

/// Current native balance of `account`
pub async fn native_balance<C>(client: &C, account: &AccountId) -> Result<Hbar>
where
    C: LedgerClient + ?Sized,
{
    let balance = client
        .account_balance(account)
        .await
        .with_context(|| format!("Failed to query balance of account {}", account))?;
    Ok(balance.hbars)
}

/// Current balance of `token` held by `account`
///
/// # Errors
///
/// Fails when the account is not associated with the token; an
/// unassociated account has no balance to compare.
pub async fn token_balance<C>(client: &C, account: &AccountId, token: &TokenId) -> Result<u64>
where
    C: LedgerClient + ?Sized,
{
    let balance = client
        .account_balance(account)
        .await
        .with_context(|| format!("Failed to query balance of account {}", account))?;

    match balance.token(token) {
        Some(amount) => Ok(amount),
        None => bail!(HarnessError::mismatch(
            format!("token {} balance of account {}", token, account),
            "an associated account",
            "no balance for the token",
        )),
    }
}

/// Assert that `account` holds strictly more than `min` hbar
///
/// # Example
///
/// ```rust,ignore
/// assert_native_balance_gt(client.as_ref(), &alice.id, Hbar::from_hbars(10)).await?;
/// ```
pub async fn assert_native_balance_gt<C>(client: &C, account: &AccountId, min: Hbar) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let actual = native_balance(client, account).await?;
    if actual <= min {
        bail!(HarnessError::mismatch(
            format!("hbar balance of account {}", account),
            format!("> {}", min),
            actual,
        ));
    }
    Ok(())
}

/// Assert that `account` holds exactly `expected` hbar
pub async fn assert_native_balance_eq<C>(
    client: &C,
    account: &AccountId,
    expected: Hbar,
) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let actual = native_balance(client, account).await?;
    if actual != expected {
        bail!(HarnessError::mismatch(
            format!("hbar balance of account {}", account),
            expected,
            actual,
        ));
    }
    Ok(())
}

/// Assert that `account` holds exactly `expected` units of `token`
pub async fn assert_token_balance_eq<C>(
    client: &C,
    account: &AccountId,
    token: &TokenId,
    expected: u64,
) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let actual = token_balance(client, account, token).await?;
    if actual != expected {
        bail!(HarnessError::mismatch(
            format!("token {} balance of account {}", token, account),
            expected,
            actual,
        ));
    }
    Ok(())
}

/// Assert that the payer's native balance dropped below `snapshot`
///
/// Holds after any transaction the account paid for, even when the token
/// legs it moved cancel out.
pub async fn assert_fee_paid<C>(client: &C, payer: &AccountId, snapshot: Hbar) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let actual = native_balance(client, payer).await?;
    if actual >= snapshot {
        bail!(HarnessError::mismatch(
            format!("hbar balance of payer {}", payer),
            format!("< {} (fee paid)", snapshot),
            actual,
        ));
    }
    Ok(())
}

/// Token metadata to compare; `None` fields are not checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenExpectation {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u32>,
    pub total_supply: Option<u64>,
    pub max_supply: Option<u64>,
    /// Single key expected as the token's admin key
    pub admin_key: Option<PublicKey>,
}

/// Assert every populated field of `expected` against a fresh token query
pub async fn assert_token<C>(client: &C, token: &TokenId, expected: &TokenExpectation) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let info = client
        .token_info(token)
        .await
        .with_context(|| format!("Failed to query info of token {}", token))?;

    let subject = |field: &str| format!("{} of token {}", field, token);

    if let Some(name) = &expected.name {
        if &info.name != name {
            bail!(HarnessError::mismatch(subject("name"), name, &info.name));
        }
    }
    if let Some(symbol) = &expected.symbol {
        if &info.symbol != symbol {
            bail!(HarnessError::mismatch(subject("symbol"), symbol, &info.symbol));
        }
    }
    if let Some(decimals) = expected.decimals {
        if info.decimals != decimals {
            bail!(HarnessError::mismatch(subject("decimals"), decimals, info.decimals));
        }
    }
    if let Some(total) = expected.total_supply {
        if info.total_supply != total {
            bail!(HarnessError::mismatch(
                subject("total supply"),
                total,
                info.total_supply
            ));
        }
    }
    if let Some(max) = expected.max_supply {
        if info.max_supply != Some(max) {
            let actual = info
                .max_supply
                .map(|m| m.to_string())
                .unwrap_or_else(|| "infinite".to_string());
            bail!(HarnessError::mismatch(subject("max supply"), max, actual));
        }
    }
    if let Some(admin) = expected.admin_key {
        if info.admin_key != Some(Key::Single(admin)) {
            let actual = match &info.admin_key {
                Some(Key::Single(pk)) => pk.to_string(),
                Some(Key::Threshold(list)) => format!("threshold key of {}", list.keys().len()),
                None => "no admin key".to_string(),
            };
            bail!(HarnessError::mismatch(subject("admin key"), admin, actual));
        }
    }
    Ok(())
}

/// Assert that `topic` carries `memo`
pub async fn assert_topic_memo<C>(client: &C, topic: &TopicId, memo: &str) -> Result<()>
where
    C: LedgerClient + ?Sized,
{
    let info = client
        .topic_info(topic)
        .await
        .with_context(|| format!("Failed to query info of topic {}", topic))?;
    if info.memo != memo {
        bail!(HarnessError::mismatch(
            format!("memo of topic {}", topic),
            memo,
            info.memo
        ));
    }
    Ok(())
}

/// Run `operation` and require the ledger to reject it
///
/// Returns the rejection. An accepted operation is the failure here.
/// `Unavailable` is a network error, not a rejection, and is propagated.
///
/// # Example
///
/// ```rust,ignore
/// let err = assert_fails("mint of 1 unit", client.mint_token(&admin, &token, 1)).await?;
/// assert_eq!(err.status(), Some(Status::TokenMaxSupplyReached));
/// ```
pub async fn assert_fails<T, F>(operation: &str, fut: F) -> Result<LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match fut.await {
        Ok(_) => bail!(HarnessError::UnexpectedSuccess {
            operation: operation.to_string(),
        }),
        Err(err @ LedgerError::Unavailable(_)) => {
            Err(anyhow::Error::new(err).context(format!("{} could not run", operation)))
        }
        Err(err) => {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("{} rejected as expected: {}", operation, err);
            }
            Ok(err)
        }
    }
}

/// Wait for the next message on `subscription` and compare its contents
///
/// The subscription is cancelled before returning, whatever the outcome.
pub async fn expect_first_message(
    subscription: &mut TopicSubscription,
    expected: &str,
    timeout: Duration,
) -> Result<TopicMessage> {
    let topic = subscription.topic();
    let received = subscription.next_message_within(timeout).await;
    subscription.cancel();

    let message = match received {
        Ok(Some(message)) => message,
        Ok(None) => bail!(HarnessError::Timeout {
            operation: format!("first message on topic {}", topic),
            timeout,
        }),
        Err(err) => {
            return Err(err).with_context(|| format!("Subscription to topic {} failed", topic))
        }
    };

    let contents = message.contents_str();
    if contents != expected {
        bail!(HarnessError::mismatch(
            format!("first message on topic {}", topic),
            expected,
            contents
        ));
    }
    log::info!(
        "Received message #{} on topic {}: {}",
        message.sequence_number,
        topic,
        contents
    );
    Ok(message)
}
