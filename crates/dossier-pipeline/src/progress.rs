use dossier_core::ProgressEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Bounded fan-out bus for progress events. Each subscriber owns a ring
/// buffer: when it fills, the oldest non-critical event is dropped and
/// counted, so a slow subscriber can never back up the pipeline. Stage
/// transitions and completions are never dropped.
pub struct ProgressBus {
    capacity: usize,
    subscribers: Mutex<Vec<SubscriberSlot>>,
    dropped_total: Arc<AtomicU64>,
}

struct SubscriberSlot {
    queue: Arc<Mutex<VecDeque<ProgressEvent>>>,
    notify: Arc<Notify>,
    closed: Arc<Mutex<bool>>,
}

/// Receiving half handed to one subscriber.
pub struct ProgressSubscription {
    queue: Arc<Mutex<VecDeque<ProgressEvent>>>,
    notify: Arc<Notify>,
    closed: Arc<Mutex<bool>>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a subscriber; `snapshot` is delivered first so late
    /// joiners always see the current status.
    pub fn subscribe(&self, snapshot: ProgressEvent) -> ProgressSubscription {
        self.subscribe_with(vec![snapshot])
    }

    /// Register a subscriber pre-loaded with catch-up events. A terminal
    /// event in the backlog closes the stream once consumed, so joining
    /// after completion still yields a finite stream.
    pub fn subscribe_with(&self, backlog: Vec<ProgressEvent>) -> ProgressSubscription {
        let queue = Arc::new(Mutex::new(VecDeque::from(backlog)));
        let notify = Arc::new(Notify::new());
        let closed = Arc::new(Mutex::new(false));
        self.subscribers.lock().push(SubscriberSlot {
            queue: Arc::clone(&queue),
            notify: Arc::clone(&notify),
            closed: Arc::clone(&closed),
        });
        ProgressSubscription {
            queue,
            notify,
            closed,
        }
    }

    /// Total events dropped across all subscribers since start.
    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn publish(&self, event: ProgressEvent) {
        let terminal = matches!(event, ProgressEvent::Completion { .. });
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|slot| !*slot.closed.lock());

        for slot in subscribers.iter() {
            let mut queue = slot.queue.lock();
            if queue.len() >= self.capacity {
                // evict the oldest droppable event; critical events stay
                if let Some(pos) = queue.iter().position(|e| !e.is_critical()) {
                    queue.remove(pos);
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    trace!("dropped oldest non-critical progress event");
                } else if !event.is_critical() {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            queue.push_back(event.clone());
            slot.notify.notify_one();
        }

        if terminal {
            for slot in subscribers.iter() {
                slot.notify.notify_one();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|slot| !*slot.closed.lock());
        subscribers.len()
    }
}

impl ProgressSubscription {
    /// Append a terminal event unless one is already queued. Used when a
    /// subscriber registers concurrently with completion and might have
    /// missed the published terminal event.
    pub fn ensure_terminal(&self, event: ProgressEvent) {
        let mut queue = self.queue.lock();
        if !queue
            .iter()
            .any(|e| matches!(e, ProgressEvent::Completion { .. }))
        {
            queue.push_back(event);
            self.notify.notify_one();
        }
    }

    /// Next event; waits until one arrives. Returns None after the
    /// stream's terminal event has been consumed and the queue is empty.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(event) = queue.pop_front() {
                    if matches!(event, ProgressEvent::Completion { .. }) {
                        *self.closed.lock() = true;
                    }
                    return Some(event);
                }
                if *self.closed.lock() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        let mut queue = self.queue.lock();
        let event = queue.pop_front();
        if let Some(ProgressEvent::Completion { .. }) = &event {
            *self.closed.lock() = true;
        }
        event
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        *self.closed.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dossier_core::InvestigationStatus;
    use uuid::Uuid;

    fn status_event(id: Uuid) -> ProgressEvent {
        ProgressEvent::StatusUpdate {
            investigation_id: id,
            timestamp: Utc::now(),
            status: InvestigationStatus::Fetching,
            progress_percentage: 10.0,
            queries_executed: 1,
            queries_total: 10,
            entities_found: 0,
            dropped_events: 0,
        }
    }

    fn completion_event(id: Uuid) -> ProgressEvent {
        ProgressEvent::Completion {
            investigation_id: id,
            timestamp: Utc::now(),
            status: InvestigationStatus::Completed,
            partial: false,
        }
    }

    #[tokio::test]
    async fn test_snapshot_delivered_first() {
        let bus = ProgressBus::new(8);
        let id = Uuid::new_v4();
        let mut sub = bus.subscribe(status_event(id));

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::StatusUpdate { .. }));
    }

    #[tokio::test]
    async fn test_stream_ends_after_completion() {
        let bus = ProgressBus::new(8);
        let id = Uuid::new_v4();
        let mut sub = bus.subscribe(status_event(id));
        bus.publish(completion_event(id));

        assert!(sub.recv().await.is_some()); // snapshot
        let terminal = sub.recv().await.unwrap();
        assert!(matches!(terminal, ProgressEvent::Completion { .. }));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_non_critical() {
        let bus = ProgressBus::new(4);
        let id = Uuid::new_v4();
        let mut sub = bus.subscribe(status_event(id));

        for _ in 0..10 {
            bus.publish(status_event(id));
        }
        bus.publish(completion_event(id));

        assert!(bus.dropped() > 0);

        // the critical completion survived the overflow
        let mut saw_completion = false;
        while let Some(event) = sub.try_recv() {
            if matches!(event, ProgressEvent::Completion { .. }) {
                saw_completion = true;
            }
        }
        assert!(saw_completion);
    }

    #[tokio::test]
    async fn test_dropped_subscription_detaches() {
        let bus = ProgressBus::new(8);
        let id = Uuid::new_v4();
        let sub = bus.subscribe(status_event(id));
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        bus.publish(status_event(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_events() {
        let bus = ProgressBus::new(8);
        let id = Uuid::new_v4();
        let mut a = bus.subscribe(status_event(id));
        let mut b = bus.subscribe(status_event(id));
        bus.publish(completion_event(id));

        let drain = |sub: &mut ProgressSubscription| {
            let mut count = 0;
            while sub.try_recv().is_some() {
                count += 1;
            }
            count
        };
        assert_eq!(drain(&mut a), 2);
        assert_eq!(drain(&mut b), 2);
    }
}
