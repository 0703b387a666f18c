//! Per-bot FIFO queue feeding long-poll `getUpdates` responses.
//!
//! Mirrors the `asyncio.Queue` + `wait_for(timeout)` long-poll pattern from
//! the original bot gateway: wait up to `timeout` for the first envelope,
//! then drain whatever else is already queued, non-blockingly, up to the
//! caller's `limit`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// An envelope queued for a bot, paired with the `update_id` it is handed
/// out under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update<T> {
    pub update_id: u64,
    pub message: T,
}

struct BotQueue<T> {
    envelopes: VecDeque<T>,
    notify: Arc<Notify>,
}

impl<T> Default for BotQueue<T> {
    fn default() -> Self {
        Self {
            envelopes: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Error returned by mailbox operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("bot not registered")]
    BotNotRegistered,
}

/// FIFO queues keyed by bot token.
///
/// Exactly one long-poller per bot is the expected usage; fairness across
/// racing pollers on the same token is not guaranteed.
pub struct BotMailbox<T> {
    queues: Mutex<HashMap<String, BotQueue<T>>>,
}

impl<T> Default for BotMailbox<T> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send> BotMailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly register a bot's queue so `getUpdates` won't reject it as
    /// unregistered even before its first message.
    pub async fn register(&self, token: &str) {
        self.queues.lock().await.entry(token.to_string()).or_default();
    }

    /// Append an envelope to a bot's queue, waking any waiting long-poller.
    pub async fn enqueue(&self, token: &str, envelope: T) {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(token.to_string()).or_default();
        queue.envelopes.push_back(envelope);
        queue.notify.notify_one();
    }

    /// Long-poll for updates.
    ///
    /// Waits up to `timeout` for the first envelope if the queue is empty,
    /// then drains non-blockingly up to `limit - 1` more. `last_update_id`
    /// is the previous counter value; returns the envelopes paired with
    /// their assigned `update_id`s plus the new counter value to persist.
    pub async fn get_updates(
        &self,
        token: &str,
        timeout: Duration,
        limit: usize,
        last_update_id: u64,
    ) -> Result<(Vec<Update<T>>, u64), MailboxError> {
        let limit = limit.clamp(1, 100);

        loop {
            let (notify, has_items) = {
                let mut queues = self.queues.lock().await;
                let queue = queues.get_mut(token).ok_or(MailboxError::BotNotRegistered)?;
                (queue.notify.clone(), !queue.envelopes.is_empty())
            };

            if has_items || timeout.is_zero() {
                break;
            }
            if tokio::time::timeout(timeout, notify.notified()).await.is_err() {
                break;
            }
        }

        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(token).ok_or(MailboxError::BotNotRegistered)?;

        let mut drained = Vec::new();
        while drained.len() < limit {
            match queue.envelopes.pop_front() {
                Some(envelope) => drained.push(envelope),
                None => break,
            }
        }

        let updates = drained
            .into_iter()
            .enumerate()
            .map(|(i, message)| Update {
                update_id: last_update_id + i as u64,
                message,
            })
            .collect::<Vec<_>>();

        let new_last_update_id = last_update_id + updates.len() as u64;
        Ok((updates, new_last_update_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_updates_on_empty_queue_with_zero_timeout_returns_empty() {
        let mailbox: BotMailbox<String> = BotMailbox::new();
        mailbox.register("bot").await;

        let (updates, new_id) = mailbox
            .get_updates("bot", Duration::ZERO, 100, 5)
            .await
            .unwrap();
        assert!(updates.is_empty());
        assert_eq!(new_id, 5);
    }

    #[tokio::test]
    async fn unknown_token_errors() {
        let mailbox: BotMailbox<String> = BotMailbox::new();
        let result = mailbox.get_updates("ghost", Duration::ZERO, 100, 0).await;
        assert_eq!(result.unwrap_err(), MailboxError::BotNotRegistered);
    }

    #[tokio::test]
    async fn enqueue_then_drain_assigns_increasing_update_ids() {
        let mailbox: BotMailbox<String> = BotMailbox::new();
        mailbox.register("bot").await;
        mailbox.enqueue("bot", "hello".into()).await;
        mailbox.enqueue("bot", "world".into()).await;

        let (updates, new_id) = mailbox
            .get_updates("bot", Duration::ZERO, 100, 10)
            .await
            .unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 10);
        assert_eq!(updates[1].update_id, 11);
        assert_eq!(new_id, 12);
    }

    #[tokio::test]
    async fn limit_clamps_drain_size() {
        let mailbox: BotMailbox<String> = BotMailbox::new();
        mailbox.register("bot").await;
        for i in 0..5 {
            mailbox.enqueue("bot", format!("msg{}", i)).await;
        }

        let (updates, _) = mailbox.get_updates("bot", Duration::ZERO, 3, 0).await.unwrap();
        assert_eq!(updates.len(), 3);

        let (remaining, _) = mailbox.get_updates("bot", Duration::ZERO, 100, 3).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_wakes_as_soon_as_a_message_arrives() {
        use std::sync::Arc;

        let mailbox: Arc<BotMailbox<String>> = Arc::new(BotMailbox::new());
        mailbox.register("bot").await;

        let poller = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.get_updates("bot", Duration::from_secs(30), 100, 0).await })
        };

        tokio::task::yield_now().await;
        mailbox.enqueue("bot", "hi".into()).await;

        let (updates, _) = poller.await.unwrap().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].message, "hi");
    }
}
