//! Generic deduplicating, multicast task graph.
//!
//! A [`TaskRegistry`] maps a cache/dedup key to at most one [`TaskNode`].
//! Multiple callers can subscribe to the same key and each gets its own
//! [`SubscriptionId`] and event stream; the underlying work runs once.
//! Priority is the max over all current subscribers, so a late, high
//! priority subscriber can accelerate work already in flight. When the
//! last subscriber unsubscribes, the registry drops the task entirely;
//! callers are expected to treat that as a signal to cancel whatever
//! produces the task's events.
//!
//! Late subscribers are replayed just enough state to catch up, not the
//! full event history: the last `Progress` event and the last `Preview`
//! (or, if the task already finished, just its terminal `Completed`
//! event). Joining after a preview has already fired doesn't mean missing
//! it, but joining after ten previews doesn't mean replaying all ten.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::mpsc;

use crate::request::Priority;

pub type SubscriptionId = u64;

/// One event in a task's lifecycle. `Completed` is terminal: a task stops
/// accepting further events once it has published one.
#[derive(Debug, Clone)]
pub enum TaskEvent<V, E> {
    Progress { completed: u64, total: u64 },
    Preview(V),
    Completed(Result<V, E>),
}

impl<V, E> TaskEvent<V, E> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Completed(_))
    }
}

struct Subscriber<V, E> {
    priority: Priority,
    sender: mpsc::UnboundedSender<TaskEvent<V, E>>,
}

/// A single node in the task graph: the fan-out point for one in-flight
/// (or just-finished) unit of work. Retains only the three slots a late
/// subscriber needs to catch up, not a growing event log.
pub struct TaskNode<V, E> {
    subscribers: HashMap<SubscriptionId, Subscriber<V, E>>,
    last_progress: Option<TaskEvent<V, E>>,
    last_preview: Option<TaskEvent<V, E>>,
    completed: Option<TaskEvent<V, E>>,
}

impl<V, E> Default for TaskNode<V, E> {
    fn default() -> Self {
        Self { subscribers: HashMap::new(), last_progress: None, last_preview: None, completed: None }
    }
}

impl<V: Clone, E: Clone> TaskNode<V, E> {
    fn subscribe(&mut self, id: SubscriptionId, priority: Priority) -> mpsc::UnboundedReceiver<TaskEvent<V, E>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(completed) = &self.completed {
            let _ = tx.send(completed.clone());
        } else {
            if let Some(progress) = &self.last_progress {
                let _ = tx.send(progress.clone());
            }
            if let Some(preview) = &self.last_preview {
                let _ = tx.send(preview.clone());
            }
        }
        self.subscribers.insert(id, Subscriber { priority, sender: tx });
        rx
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn set_priority(&mut self, id: SubscriptionId, priority: Priority) {
        if let Some(sub) = self.subscribers.get_mut(&id) {
            sub.priority = priority;
        }
    }

    /// The aggregated priority this task should run at: the max over every
    /// current subscriber, or `Normal` if (transiently) subscriberless.
    fn priority(&self) -> Priority {
        self.subscribers.values().map(|s| s.priority).max().unwrap_or_default()
    }

    /// Broadcast an event to all current subscribers and retain it as the
    /// relevant catch-up slot, unless the task already finished. Dead
    /// subscriber channels are left for the next `unsubscribe` call to
    /// reap; a send failure here doesn't otherwise affect delivery to live
    /// subscribers.
    fn publish(&mut self, event: TaskEvent<V, E>) {
        if self.completed.is_some() {
            return;
        }
        for sub in self.subscribers.values() {
            let _ = sub.sender.send(event.clone());
        }
        match &event {
            TaskEvent::Progress { .. } => self.last_progress = Some(event),
            TaskEvent::Preview(_) => self.last_preview = Some(event),
            TaskEvent::Completed(_) => self.completed = Some(event),
        }
    }
}

/// Outcome of a [`TaskRegistry::subscribe`] call.
pub struct SubscribeOutcome<V, E> {
    /// `true` the first time a key is subscribed to; the caller should
    /// spawn the underlying work exactly when this is `true`.
    pub is_new: bool,
    pub subscription_id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<TaskEvent<V, E>>,
    pub priority: Priority,
}

/// A registry of task nodes keyed by `K` (a cache or dedup key). Owned by
/// the single-threaded pipeline actor, so no internal synchronization.
pub struct TaskRegistry<K, V, E> {
    tasks: HashMap<K, TaskNode<V, E>>,
    next_id: SubscriptionId,
}

impl<K, V, E> Default for TaskRegistry<K, V, E> {
    fn default() -> Self {
        Self { tasks: HashMap::new(), next_id: 0 }
    }
}

impl<K: Eq + Hash + Clone, V: Clone, E: Clone> TaskRegistry<K, V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Subscribe to the task for `key`, creating it if absent.
    pub fn subscribe(&mut self, key: K, priority: Priority) -> SubscribeOutcome<V, E> {
        let id = self.next_subscription_id();
        let is_new = !self.tasks.contains_key(&key);
        let node = self.tasks.entry(key).or_default();
        let receiver = node.subscribe(id, priority);
        let priority = node.priority();
        SubscribeOutcome { is_new, subscription_id: id, receiver, priority }
    }

    /// Unsubscribe `id` from `key`'s task. Returns `true` if the task had
    /// no remaining subscribers and was removed; the caller should cancel
    /// whatever work was producing its events.
    pub fn unsubscribe(&mut self, key: &K, id: SubscriptionId) -> bool {
        let Some(node) = self.tasks.get_mut(key) else { return false };
        node.unsubscribe(id);
        if node.is_empty() {
            self.tasks.remove(key);
            true
        } else {
            false
        }
    }

    pub fn set_priority(&mut self, key: &K, id: SubscriptionId, priority: Priority) {
        if let Some(node) = self.tasks.get_mut(key) {
            node.set_priority(id, priority);
        }
    }

    pub fn priority(&self, key: &K) -> Option<Priority> {
        self.tasks.get(key).map(|n| n.priority())
    }

    pub fn publish(&mut self, key: &K, event: TaskEvent<V, E>) {
        if let Some(node) = self.tasks.get_mut(key) {
            node.publish(event);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscriber_reuses_task() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let first = reg.subscribe("k", Priority::Normal);
        let second = reg.subscribe("k", Priority::Normal);
        assert!(first.is_new);
        assert!(!second.is_new);
    }

    #[test]
    fn priority_is_max_of_subscribers() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let _a = reg.subscribe("k", Priority::Low);
        let b = reg.subscribe("k", Priority::VeryHigh);
        assert_eq!(b.priority, Priority::VeryHigh);
        reg.unsubscribe("k", b.subscription_id);
        assert_eq!(reg.priority(&"k"), Some(Priority::Low));
    }

    #[test]
    fn last_unsubscribe_disposes_task() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let a = reg.subscribe("k", Priority::Normal);
        assert!(!reg.unsubscribe(&"k", a.subscription_id.wrapping_add(999))); // bogus id, no-op
        assert!(reg.unsubscribe(&"k", a.subscription_id));
        assert!(!reg.contains(&"k"));
    }

    #[tokio::test]
    async fn late_subscriber_replays_only_last_progress_and_preview() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let _first = reg.subscribe("k", Priority::Normal);
        reg.publish(&"k", TaskEvent::Preview(1));
        reg.publish(&"k", TaskEvent::Progress { completed: 1, total: 4 });
        reg.publish(&"k", TaskEvent::Preview(2));
        reg.publish(&"k", TaskEvent::Progress { completed: 2, total: 4 });

        let mut second = reg.subscribe("k", Priority::Normal);
        // Replay order is progress-then-preview regardless of publish
        // order, since only the last of each kind is retained.
        let ev1 = second.receiver.recv().await.unwrap();
        let ev2 = second.receiver.recv().await.unwrap();
        assert!(matches!(ev1, TaskEvent::Progress { completed: 2, total: 4 }));
        assert!(matches!(ev2, TaskEvent::Preview(2)));
        assert!(second.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_after_completion_only_sees_the_terminal_event() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let _first = reg.subscribe("k", Priority::Normal);
        reg.publish(&"k", TaskEvent::Preview(1));
        reg.publish(&"k", TaskEvent::Progress { completed: 1, total: 1 });
        reg.publish(&"k", TaskEvent::Completed(Ok(99)));

        let mut second = reg.subscribe("k", Priority::Normal);
        let ev = second.receiver.recv().await.unwrap();
        assert!(matches!(ev, TaskEvent::Completed(Ok(99))));
        assert!(second.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn completed_event_is_terminal() {
        let mut reg: TaskRegistry<&str, i32, String> = TaskRegistry::new();
        let mut sub = reg.subscribe("k", Priority::Normal);
        reg.publish(&"k", TaskEvent::Completed(Ok(42)));
        reg.publish(&"k", TaskEvent::Preview(0)); // should be dropped, task finished
        let ev = sub.receiver.recv().await.unwrap();
        assert!(matches!(ev, TaskEvent::Completed(Ok(42))));
        assert!(sub.receiver.try_recv().is_err());
    }
}
