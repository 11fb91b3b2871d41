//! Broadcast Hub
//!
//! Owns the set of attached observers and fans every [`StreamEvent`] out to
//! all of them. Each observer has its own bounded queue; a closed or full
//! queue detaches that observer without affecting the rest, so a stalled
//! observer can never block the pump or other jobs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::core::StreamEvent;

/// Identifies one attached observer
pub type ObserverId = u64;

/// Receiving half handed to an observer's transport
pub type ObserverFeed = mpsc::Receiver<Arc<StreamEvent>>;

/// Destination for stream events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver `event`; delivery problems are the sink's own concern
    async fn emit(&self, event: StreamEvent);
}

/// Observer registry and fan-out
pub struct Hub {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<Arc<StreamEvent>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Hub {
    /// Create a hub whose observers buffer up to `buffer` events each
    pub fn new(buffer: usize) -> Self {
        Hub {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new observer
    ///
    /// Delivery starts with the next broadcast; past events are not replayed.
    pub async fn attach(&self) -> (ObserverId, ObserverFeed) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let count = {
            let mut observers = self.observers.lock().await;
            observers.insert(id, tx);
            observers.len()
        };
        tracing::info!("Observer {} attached ({} total)", id, count);
        (id, rx)
    }

    /// Remove an observer; returns whether it was attached
    pub async fn detach(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().await.remove(&id).is_some();
        if removed {
            tracing::info!("Observer {} detached", id);
        }
        removed
    }

    /// Deliver `event` to every observer
    ///
    /// Returns the number of observers that accepted it.
    pub async fn broadcast(&self, event: StreamEvent) -> usize {
        let event = Arc::new(event);
        let mut observers = self.observers.lock().await;

        let mut failed = Vec::new();
        for (id, tx) in observers.iter() {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Observer {} is not keeping up, detaching", id);
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => failed.push(*id),
            }
        }
        for id in &failed {
            observers.remove(id);
            tracing::debug!("Observer {} dropped after failed delivery", id);
        }

        observers.len()
    }

    /// Number of attached observers
    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }

    /// Drop every observer; their feeds end once drained
    pub async fn shutdown(&self) {
        let mut observers = self.observers.lock().await;
        let count = observers.len();
        observers.clear();
        tracing::info!("Hub shut down, dropped {} observers", count);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new(1024)
    }
}

#[async_trait]
impl EventSink for Hub {
    async fn emit(&self, event: StreamEvent) {
        self.broadcast(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_every_observer_receives_each_event() {
        let hub = Hub::new(16);
        let (_, mut a) = hub.attach().await;
        let (_, mut b) = hub.attach().await;

        let delivered = hub.broadcast(StreamEvent::stdout(Uuid::nil(), "one")).await;
        assert_eq!(delivered, 2);

        assert_eq!(a.recv().await.unwrap().data, "one");
        assert_eq!(b.recv().await.unwrap().data, "one");
    }

    #[tokio::test]
    async fn test_no_replay_for_late_observers() {
        let hub = Hub::new(16);
        let (_, mut early) = hub.attach().await;
        hub.broadcast(StreamEvent::stdout(Uuid::nil(), "before")).await;

        let (_, mut late) = hub.attach().await;
        hub.broadcast(StreamEvent::stdout(Uuid::nil(), "after")).await;

        assert_eq!(early.recv().await.unwrap().data, "before");
        assert_eq!(early.recv().await.unwrap().data, "after");
        assert_eq!(late.recv().await.unwrap().data, "after");
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_observer_is_pruned_others_still_served() {
        let hub = Hub::new(16);
        let (_, gone) = hub.attach().await;
        let (_, mut kept) = hub.attach().await;
        drop(gone);

        let delivered = hub.broadcast(StreamEvent::execution_start(Uuid::nil())).await;
        assert_eq!(delivered, 1);
        assert_eq!(hub.observer_count().await, 1);
        assert_eq!(kept.recv().await.unwrap().kind, EventKind::ExecutionStart);
    }

    #[tokio::test]
    async fn test_full_observer_is_detached() {
        let hub = Hub::new(1);
        let (_, _stalled) = hub.attach().await;
        let (_, mut reader) = hub.attach().await;

        hub.broadcast(StreamEvent::stdout(Uuid::nil(), "1")).await;
        assert_eq!(reader.recv().await.unwrap().data, "1");
        hub.broadcast(StreamEvent::stdout(Uuid::nil(), "2")).await;

        assert_eq!(hub.observer_count().await, 1);
        assert_eq!(reader.recv().await.unwrap().data, "2");
    }

    #[tokio::test]
    async fn test_detach_and_shutdown() {
        let hub = Hub::new(4);
        let (id, _feed) = hub.attach().await;
        let (_, mut other) = hub.attach().await;

        assert!(hub.detach(id).await);
        assert!(!hub.detach(id).await);
        assert_eq!(hub.observer_count().await, 1);

        hub.shutdown().await;
        assert_eq!(hub.observer_count().await, 0);
        assert!(other.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_hub_as_event_sink() {
        let hub = Arc::new(Hub::new(4));
        let (_, mut feed) = hub.attach().await;
        let sink: Arc<dyn EventSink> = hub.clone();

        sink.emit(StreamEvent::test_start(Uuid::nil())).await;
        assert_eq!(feed.recv().await.unwrap().kind, EventKind::TestStart);
    }
}
