//! Cancellable topic message subscription
//!
//! A subscription owns the receiving end of a message channel and, when the
//! client feeds it from a background listener, that listener's task handle.
//! Dropping or cancelling the subscription aborts the listener, so no callback
//! can outlive the scenario that opened it.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use super::error::LedgerError;
use super::types::{TopicId, TopicMessage};

/// Item delivered by a subscription: a message or a stream error
pub type SubscriptionItem = Result<TopicMessage, LedgerError>;

/// Live subscription to a topic's message stream
pub struct TopicSubscription {
    topic: TopicId,
    receiver: mpsc::UnboundedReceiver<SubscriptionItem>,
    listener: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl TopicSubscription {
    /// Wrap a receiver and the optional task feeding it
    pub fn new(
        topic: TopicId,
        receiver: mpsc::UnboundedReceiver<SubscriptionItem>,
        listener: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            topic,
            receiver,
            listener,
            cancelled: false,
        }
    }

    /// Topic this subscription listens to
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Wait for the next message
    ///
    /// # Errors
    ///
    /// Returns the stream's error if one was delivered, or
    /// [`LedgerError::SubscriptionClosed`] once the stream ends or the
    /// subscription was cancelled.
    pub async fn next_message(&mut self) -> Result<TopicMessage, LedgerError> {
        if self.cancelled {
            return Err(LedgerError::SubscriptionClosed(self.topic));
        }
        match self.receiver.recv().await {
            Some(item) => item,
            None => Err(LedgerError::SubscriptionClosed(self.topic)),
        }
    }

    /// Wait for the next message for at most `within`
    ///
    /// `Ok(None)` means the deadline passed with nothing delivered.
    pub async fn next_message_within(
        &mut self,
        within: Duration,
    ) -> Result<Option<TopicMessage>, LedgerError> {
        match time::timeout(within, self.next_message()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Stop the listener and close the stream
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.receiver.close();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Cancelled subscription to topic {}", self.topic);
        }
    }

    /// Whether [`cancel`](Self::cancel) has run
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Yields items until the stream ends or the subscription is cancelled
impl Stream for TopicSubscription {
    type Item = SubscriptionItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("topic", &self.topic)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
