//! Event queues + link table (component C6): per-event-name bounded
//! queues, a name → consumer link table for startup collision detection,
//! and the disconnect/server-disconnect queues (spec.md §3, §4.5).
//!
//! Conceptually grounded on `neutronium::messagebus::Bus`, a name-indexed
//! registry of queues shared between producer and consumer sides; that
//! registry is specialized here (no ECS topic indirection, no generational
//! indexer) to a plain `HashMap<String, Queue<T>>` built on demand, which
//! is what spec.md §4.4 calls for ("creating the queue on demand").

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use conduit_support::EventError;

use crate::connection::Connection;
use crate::event::Event;

/// A decoded event alongside the connection it arrived on.
pub struct EventRecord {
    pub connection: Arc<Connection>,
    pub event: Event,
}

pub struct DisconnectRecord {
    pub connection: Arc<Connection>,
}

pub struct ServerDisconnectRecord {
    pub server_id: usize,
}

/// A single bounded FIFO queue. `push` fails (dropping the newest item)
/// once `cap` is reached, per spec.md §4.4's "Per-name queue cap"
/// (at-most-once delivery, never silently re-ordered).
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    cap: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(cap: usize) -> Self {
        BoundedQueue { items: Mutex::new(VecDeque::new()), cap }
    }

    /// Returns `true` if the item was enqueued, `false` if the queue was
    /// full and the item was dropped.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if items.len() >= self.cap {
            return false;
        }
        items.push_back(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().expect("queue lock poisoned").is_empty()
    }

    pub fn drain_all(&self) -> Vec<T> {
        self.items.lock().expect("queue lock poisoned").drain(..).collect()
    }
}

/// Registry of per-name event queues, created on demand.
///
/// spec.md §5: "The listener's `queues` map and `links` map are *only*
/// mutated during startup and shutdown ... During the loop, only per-queue
/// internal locks are taken." The registry itself therefore uses a plain
/// `Mutex<HashMap<..>>` taken briefly only to find-or-insert a queue's
/// `Arc`; all steady-state traffic goes through that `Arc`'s own lock.
pub struct QueueRegistry {
    queues: Mutex<HashMap<String, Arc<BoundedQueue<EventRecord>>>>,
    cap: usize,
}

impl QueueRegistry {
    pub fn new(cap: usize) -> Self {
        QueueRegistry { queues: Mutex::new(HashMap::new()), cap }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<BoundedQueue<EventRecord>> {
        let mut queues = self.queues.lock().expect("queue registry lock poisoned");
        queues.entry(name.to_string()).or_insert_with(|| Arc::new(BoundedQueue::new(self.cap))).clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoundedQueue<EventRecord>>> {
        self.queues.lock().expect("queue registry lock poisoned").get(name).cloned()
    }

    /// Names of every queue currently registered, for the `on_event`
    /// catch-all's "scan all queues whose name is not in the link table"
    /// (spec.md §4.5).
    pub fn names(&self) -> Vec<String> {
        self.queues.lock().expect("queue registry lock poisoned").keys().cloned().collect()
    }
}

/// Maps an event name to the consumer bound to it; built once at
/// `listener.run()` and read-only for the lifetime of the run (spec.md
/// §4.5, §5, §8 invariant 9).
#[derive(Default)]
pub struct LinkTable {
    links: HashMap<String, usize>,
    catch_all: Option<usize>,
    on_disconnect: Option<usize>,
    on_server_disconnect: Option<usize>,
}

impl LinkTable {
    pub fn new() -> Self {
        LinkTable::default()
    }

    pub fn bind(&mut self, name: &str, consumer_id: usize) -> Result<(), EventError> {
        if self.links.contains_key(name) {
            return Err(EventError::EventCollision);
        }
        self.links.insert(name.to_string(), consumer_id);
        Ok(())
    }

    pub fn bind_catch_all(&mut self, consumer_id: usize) -> Result<(), EventError> {
        if self.catch_all.is_some() {
            return Err(EventError::EventCollision);
        }
        self.catch_all = Some(consumer_id);
        Ok(())
    }

    pub fn bind_on_disconnect(&mut self, consumer_id: usize) -> Result<(), EventError> {
        if self.on_disconnect.is_some() {
            return Err(EventError::EventCollision);
        }
        self.on_disconnect = Some(consumer_id);
        Ok(())
    }

    pub fn bind_on_server_disconnect(&mut self, consumer_id: usize) -> Result<(), EventError> {
        if self.on_server_disconnect.is_some() {
            return Err(EventError::EventCollision);
        }
        self.on_server_disconnect = Some(consumer_id);
        Ok(())
    }

    pub fn owner_of(&self, name: &str) -> Option<usize> {
        self.links.get(name).copied()
    }

    pub fn is_linked(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    pub fn catch_all(&self) -> Option<usize> {
        self.catch_all
    }

    pub fn on_disconnect(&self) -> Option<usize> {
        self.on_disconnect
    }

    pub fn on_server_disconnect(&self) -> Option<usize> {
        self.on_server_disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_drops_past_cap() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.drain_all(), vec![1, 2]);
    }

    #[test]
    fn link_table_detects_collision() {
        let mut links = LinkTable::new();
        links.bind("hello", 1).unwrap();
        assert!(matches!(links.bind("hello", 2), Err(EventError::EventCollision)));
    }

    #[test]
    fn link_table_detects_catch_all_collision() {
        let mut links = LinkTable::new();
        links.bind_catch_all(1).unwrap();
        assert!(matches!(links.bind_catch_all(2), Err(EventError::EventCollision)));
    }

    #[test]
    fn registry_creates_queue_on_demand_and_reuses_it() {
        let registry: QueueRegistry = QueueRegistry::new(10);
        assert!(registry.get("x").is_none());
        let first = registry.get_or_create("x");
        let second = registry.get_or_create("x");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec!["x".to_string()]);
    }
}
