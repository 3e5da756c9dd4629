use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::ports::BoxFuture;
use crate::ports::signal::{ChangeSignal, FeedChange};

/// In-process fan-out of change signals to watch sessions.
///
/// Every subscriber owns a bounded buffer. [`PubSub::publish`] waits for
/// room in each buffer; [`PubSub::publish_no_wait`] drops the message for
/// subscribers whose buffer is full.
pub struct PubSub<T> {
    buffer: usize,
    next_id: AtomicU64,
    state: RwLock<HubState<T>>,
}

struct HubState<T> {
    closed: bool,
    subscribers: HashMap<u64, mpsc::Sender<T>>,
}

pub type ChangeNotifier = PubSub<FeedChange>;

impl<T: Clone + Send + 'static> PubSub<T> {
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: buffer.max(1),
            next_id: AtomicU64::new(0),
            state: RwLock::new(HubState {
                closed: false,
                subscribers: HashMap::new(),
            }),
        })
    }

    /// Registers a new receiver. After [`close`](Self::close) the returned
    /// receiver is already terminated.
    pub fn subscribe(self: &Arc<Self>) -> HubSubscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        let mut state = self.write_state();
        if !state.closed {
            state.subscribers.insert(id, sender);
        }
        HubSubscription {
            id,
            receiver,
            hub: Arc::clone(self),
        }
    }

    pub async fn publish(&self, message: T) {
        for sender in self.senders() {
            // A closed receiver means the session is going away.
            let _ = sender.send(message.clone()).await;
        }
    }

    /// Returns how many subscribers received the message.
    pub fn publish_no_wait(&self, message: T) -> usize {
        let mut delivered = 0;
        for sender in self.senders() {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("notifier buffer full, message skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn close(&self) {
        let mut state = self.write_state();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.read_state().subscribers.len()
    }

    fn senders(&self) -> Vec<mpsc::Sender<T>> {
        let state = self.read_state();
        state.subscribers.values().cloned().collect()
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.write_state();
        state.subscribers.remove(&id);
    }

    // Every write leaves the hub state valid, so poisoning is ignored.
    fn read_state(&self) -> RwLockReadGuard<'_, HubState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, HubState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving half of a hub subscription; unsubscribes on drop.
pub struct HubSubscription<T: Clone + Send + 'static> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    hub: Arc<PubSub<T>>,
}

impl<T: Clone + Send + 'static> HubSubscription<T> {
    /// `None` once the hub is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T: Clone + Send + 'static> Drop for HubSubscription<T> {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

impl ChangeSignal for PubSub<FeedChange> {
    fn signal(&self, change: &FeedChange) -> BoxFuture<'_, ()> {
        let change = change.clone();
        Box::pin(async move {
            if change.wakes_watchers() {
                self.publish(change).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let hub = PubSub::<u32>::new(4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.publish(7).await;

        assert_eq!(first.recv().await, Some(7));
        assert_eq!(second.recv().await, Some(7));
    }

    #[tokio::test]
    async fn no_wait_publish_skips_full_buffers() {
        let hub = PubSub::<u32>::new(1);
        let mut session = hub.subscribe();

        assert_eq!(hub.publish_no_wait(1), 1);
        assert_eq!(hub.publish_no_wait(2), 0);
        assert_eq!(session.recv().await, Some(1));
    }

    #[tokio::test]
    async fn drop_unsubscribes_and_close_terminates() {
        let hub = PubSub::<u32>::new(1);
        let dropped = hub.subscribe();
        let mut kept = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(hub.subscriber_count(), 1);

        hub.close();
        assert_eq!(kept.recv().await, None);
        let mut late = hub.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn acts_as_change_signal() {
        let hub = ChangeNotifier::new(2);
        let mut session = hub.subscribe();
        let change = FeedChange::feed_events(Uuid::new_v4(), "p1");

        hub.signal(&change).await;

        assert_eq!(session.recv().await, Some(change));
    }

    #[tokio::test]
    async fn cache_only_changes_do_not_wake_sessions() {
        let hub = ChangeNotifier::new(2);
        let mut session = hub.subscribe();

        hub.signal(&FeedChange::saved(Uuid::new_v4(), "p1")).await;

        assert!(session.try_recv().is_none());
    }

    #[tokio::test]
    async fn keeps_working_after_a_panicking_lock_holder() {
        let hub = PubSub::<u32>::new(2);
        let mut session = hub.subscribe();

        let poisoner = hub.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap_or_else(PoisonError::into_inner);
            panic!("holder panicked");
        })
        .join();
        assert!(joined.is_err());
        assert!(hub.state.is_poisoned());

        assert_eq!(hub.publish_no_wait(3), 1);
        assert_eq!(session.recv().await, Some(3));
        let late = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);
        drop(late);
        hub.close();
        assert_eq!(hub.subscriber_count(), 0);
    }
}
