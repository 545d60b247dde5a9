//! Multi-subscriber fan-out with a one-shot terminal notification.
//!
//! Every subscriber owns an unbounded queue, so publishing never blocks the
//! task that produces items and never drops one. Completion happens once:
//! each live subscriber sees the optional [`FramingError`] and then the end
//! of its stream, and anyone subscribing afterwards sees the same ending
//! immediately.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::FramingError;

type Item<T> = Result<T, FramingError>;

struct Shared<T> {
    subscribers: Vec<mpsc::UnboundedSender<Item<T>>>,
    /// `Some` once completed; the inner value is the terminal error, if any.
    terminal: Option<Option<FramingError>>,
}

pub(crate) struct Broadcast<T> {
    shared: Mutex<Shared<T>>,
}

impl<T: Clone> Broadcast<T> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                subscribers: Vec::new(),
                terminal: None,
            }),
        }
    }

    /// Attach a new subscriber. It sees only items published from now on.
    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self
            .shared
            .lock();
        let shared = &mut *guard;

        match &shared.terminal {
            Some(error) => {
                if let Some(error) = error {
                    let _ = tx.send(Err(error.clone()));
                }
            }
            None => shared
                .subscribers
                .push(tx),
        }

        Subscription { rx }
    }

    /// Deliver `item` to every current subscriber, in publish order.
    ///
    /// Subscribers whose `Subscription` was dropped are pruned here. Items
    /// published after completion go nowhere.
    pub(crate) fn publish(&self, item: T) {
        let mut shared = self
            .shared
            .lock();
        if shared
            .terminal
            .is_some()
        {
            return;
        }
        shared
            .subscribers
            .retain(|tx| {
                tx.send(Ok(item.clone()))
                    .is_ok()
            });
    }

    /// End every subscription. Returns `false` if already completed.
    pub(crate) fn complete(&self, error: Option<FramingError>) -> bool {
        let subscribers = {
            let mut shared = self
                .shared
                .lock();
            if shared
                .terminal
                .is_some()
            {
                return false;
            }
            shared.terminal = Some(error.clone());
            std::mem::take(&mut shared.subscribers)
        };

        if let Some(error) = error {
            for tx in &subscribers {
                let _ = tx.send(Err(error.clone()));
            }
        }
        // Dropping the senders ends each stream after its queued items.
        true
    }
}

/// Receiving end of a connection's `messages()`, `events()` or a listener's
/// `connections()`.
///
/// Yields `Some(Ok(item))` for each item, at most one `Some(Err(_))` when the
/// source died of a protocol violation, then `None` forever. Dropping the
/// subscription unsubscribes; the source is not affected.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Item<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next item. `None` means the source has completed.
    pub async fn recv(&mut self) -> Option<Result<T, FramingError>> {
        self.rx
            .recv()
            .await
    }

    /// Take the next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<Result<T, FramingError>> {
        self.rx
            .try_recv()
            .ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, FramingError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn framing(message: &str) -> FramingError {
        FramingError {
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_item_in_order() {
        let broadcast = Broadcast::new();
        let mut a = broadcast.subscribe();
        let mut b = broadcast.subscribe();

        for i in 0..100 {
            broadcast.publish(i);
        }
        broadcast.complete(None);

        for sub in [&mut a, &mut b] {
            let mut seen = Vec::new();
            while let Some(item) = sub
                .recv()
                .await
            {
                seen.push(item.unwrap());
            }
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let broadcast = Broadcast::new();
        broadcast.publish("early");
        let mut sub = broadcast.subscribe();
        broadcast.publish("late");
        broadcast.complete(None);

        assert_eq!(sub.recv().await, Some(Ok("late")));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_complete_runs_once() {
        let broadcast = Broadcast::<u32>::new();
        let mut sub = broadcast.subscribe();

        assert!(broadcast.complete(Some(framing("bad header"))));
        assert!(!broadcast.complete(None));
        assert!(!broadcast.complete(Some(framing("again"))));

        assert_eq!(sub.recv().await, Some(Err(framing("bad header"))));
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_clean_completion() {
        let broadcast = Broadcast::<u32>::new();
        broadcast.complete(None);

        let mut sub = broadcast.subscribe();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_error_completion() {
        let broadcast = Broadcast::<u32>::new();
        broadcast.complete(Some(framing("truncated message")));

        let mut sub = broadcast.subscribe();
        assert_eq!(sub.recv().await, Some(Err(framing("truncated message"))));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_publish_after_completion_is_ignored() {
        let broadcast = Broadcast::new();
        let mut sub = broadcast.subscribe();
        broadcast.complete(None);
        broadcast.publish(1);

        assert_eq!(sub.recv().await, None);
    }

    fn subscriber_count<T: Clone>(broadcast: &Broadcast<T>) -> usize {
        broadcast
            .shared
            .lock()
            .subscribers
            .len()
    }

    #[test]
    fn test_dropped_subscription_is_pruned_on_publish() {
        let broadcast = Broadcast::<u32>::new();
        let a = broadcast.subscribe();
        let _b = broadcast.subscribe();
        assert_eq!(subscriber_count(&broadcast), 2);

        drop(a);
        broadcast.publish(7);
        assert_eq!(subscriber_count(&broadcast), 1);
    }

    #[test]
    fn test_try_recv() {
        let broadcast = Broadcast::new();
        let mut sub = broadcast.subscribe();
        assert_eq!(sub.try_recv(), None);
        broadcast.publish(3);
        assert_eq!(sub.try_recv(), Some(Ok(3)));
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let broadcast = Broadcast::new();
        let sub = broadcast.subscribe();
        broadcast.publish(1);
        broadcast.publish(2);
        broadcast.complete(None);

        let items: Vec<_> = sub
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![1, 2]);
    }
}
