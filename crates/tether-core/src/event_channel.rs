//! Startup-safe publish/subscribe.
//!
//! Events fired while nobody is listening are queued and flushed, in fire
//! order, to the next subscriber before it can observe anything newer.
//! Subscribers that attach while another one is live only see events fired
//! after they attached.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

struct ChannelState<T> {
    queue: VecDeque<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    disposed: bool,
}

pub struct EventChannel<T> {
    state: Arc<Mutex<ChannelState<T>>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                queue: VecDeque::new(),
                subscribers: Vec::new(),
                disposed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fire(&self, event: T) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.subscribers.retain(|tx| !tx.is_closed());
        if state.subscribers.is_empty() {
            state.queue.push_back(event);
            return;
        }
        let Some((last, rest)) = state.subscribers.split_last() else {
            return;
        };
        for tx in rest {
            let _ = tx.send(event.clone());
        }
        let _ = last.send(event);
    }

    /// Attaches a subscriber. If no other subscriber is live, everything queued
    /// so far is delivered to this one first.
    pub fn subscribe(&self) -> EventSubscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.disposed {
            state.subscribers.retain(|tx| !tx.is_closed());
            if state.subscribers.is_empty() {
                let flushed = state.queue.len();
                for event in state.queue.drain(..) {
                    let _ = tx.send(event);
                }
                if flushed > 0 {
                    tracing::debug!(flushed, "flushed buffered events to first subscriber");
                }
            }
            state.subscribers.push(tx);
        }
        EventSubscription { rx }
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Drops queued events and closes every subscription. Later fires are ignored.
    pub fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        state.queue.clear();
        state.subscribers.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

/// Receiving half of one subscription. Dropping it unsubscribes.
pub struct EventSubscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> EventSubscription<T> {
    /// Waits for the next event; `None` once the channel is disposed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything already delivered to this subscription, without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl<T> Stream for EventSubscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_before_first_subscriber_flush_in_order() {
        let channel = EventChannel::new();
        channel.fire("a");
        channel.fire("b");
        channel.fire("c");
        assert_eq!(channel.pending(), 3);

        let mut first = channel.subscribe();
        channel.fire("d");

        assert_eq!(first.drain(), vec!["a", "b", "c", "d"]);
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn later_subscriber_never_sees_flushed_events() {
        let channel = EventChannel::new();
        channel.fire(1);
        channel.fire(2);
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();
        channel.fire(3);

        assert_eq!(first.drain(), vec![1, 2, 3]);
        assert_eq!(second.drain(), vec![3]);
    }

    #[test]
    fn buffering_resumes_when_all_subscribers_leave() {
        let channel = EventChannel::new();
        let first = channel.subscribe();
        drop(first);
        channel.fire("queued");
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.pending(), 1);

        let mut next = channel.subscribe();
        assert_eq!(next.drain(), vec!["queued"]);
    }

    #[tokio::test]
    async fn dispose_closes_subscriptions_and_ignores_fires() {
        let channel = EventChannel::new();
        channel.fire(1);
        let mut sub = channel.subscribe();
        channel.dispose();
        channel.fire(2);

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
        assert!(channel.is_disposed());
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn stream_interface_yields_fire_order() {
        use futures::StreamExt;

        let channel = EventChannel::new();
        let sub = channel.subscribe();
        for i in 0..5 {
            channel.fire(i);
        }
        channel.dispose();
        let seen: Vec<i32> = sub.collect().await;
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
