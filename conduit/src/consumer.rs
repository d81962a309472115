//! `EventConsumer` (component C7): a worker thread bound to a subset of
//! event names on a listener (spec.md §3, §4.5).
//!
//! The wake mechanism is the textbook `Mutex<bool> + Condvar` flag pattern
//! (spec.md §5: "Consumer↔listener wake is a textbook (mutex + wake-flag +
//! condvar) pattern"); no async runtime is reached for, matching every
//! threading primitive used in the teacher's own codebase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use conduit_support::{logging, EventError, Result};

use crate::connection::Connection;
use crate::event::Event;
use crate::listener::EventListener;
use crate::slot::{Slot1, Slot2};

static NEXT_CONSUMER_ID: AtomicUsize = AtomicUsize::new(1);

/// Wake descriptor a producer (the listener's read loop) sets and a
/// consumer thread waits on (spec.md §3: "descriptor `{mutex, condvar,
/// wake flag}`").
pub struct ConsumerDescriptor {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl ConsumerDescriptor {
    fn new() -> Self {
        ConsumerDescriptor { flag: Mutex::new(false), condvar: Condvar::new() }
    }

    pub fn notify(&self) {
        let mut flag = self.flag.lock().expect("consumer descriptor lock poisoned");
        *flag = true;
        self.condvar.notify_one();
    }

    /// Waits up to `timeout` for a wake, clearing the flag under the lock
    /// on the way out regardless of whether the wait timed out (spec.md
    /// §4.5: "consumer wakes and clears flag under the lock").
    fn wait(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock().expect("consumer descriptor lock poisoned");
        if !*flag {
            let (guard, _timeout_result) =
                self.condvar.wait_timeout(flag, timeout).expect("consumer descriptor lock poisoned");
            flag = guard;
        }
        let woke = *flag;
        *flag = false;
        woke
    }
}

pub struct EventConsumer {
    id: usize,
    listener: Arc<EventListener>,
    slots: Mutex<HashMap<String, Slot2<Connection, Event>>>,
    on_event: Slot2<Connection, Event>,
    on_disconnect: Slot1<Connection>,
    on_server_disconnect: Slot1<usize>,
    descriptor: Arc<ConsumerDescriptor>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    log: logging::Logger,
}

impl EventConsumer {
    pub fn new(listener: Arc<EventListener>) -> Arc<Self> {
        let log = listener.child_logger();
        let consumer = Arc::new(EventConsumer {
            id: NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed),
            listener: listener.clone(),
            slots: Mutex::new(HashMap::new()),
            on_event: Slot2::empty(),
            on_disconnect: Slot1::empty(),
            on_server_disconnect: Slot1::empty(),
            descriptor: Arc::new(ConsumerDescriptor::new()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
            log,
        });
        listener.attach_consumer(consumer.clone());
        consumer
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn descriptor(&self) -> Arc<ConsumerDescriptor> {
        self.descriptor.clone()
    }

    pub(crate) fn bound_names(&self) -> Vec<String> {
        self.slots.lock().expect("consumer slots lock poisoned").keys().cloned().collect()
    }

    pub(crate) fn wants_catch_all(&self) -> bool {
        self.on_event.is_set()
    }

    pub(crate) fn wants_on_disconnect(&self) -> bool {
        self.on_disconnect.is_set()
    }

    pub(crate) fn wants_on_server_disconnect(&self) -> bool {
        self.on_server_disconnect.is_set()
    }

    /// Binds `name` to `handler`, run on this consumer's worker thread
    /// whenever an event of that name is enqueued (spec.md §3, §6).
    pub fn bind<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Connection, &Event) + Send + Sync + 'static,
    {
        let slot = Slot2::empty();
        slot.set(handler);
        self.slots.lock().expect("consumer slots lock poisoned").insert(name.into(), slot);
    }

    pub fn on_event<F: Fn(&Connection, &Event) + Send + Sync + 'static>(&self, handler: F) {
        self.on_event.set(handler);
    }

    pub fn on_disconnect<F: Fn(&Connection) + Send + Sync + 'static>(&self, handler: F) {
        self.on_disconnect.set(handler);
    }

    pub fn on_server_disconnect<F: Fn(&usize) + Send + Sync + 'static>(&self, handler: F) {
        self.on_server_disconnect.set(handler);
    }

    /// Spawns the worker thread (spec.md §4.5). Fails with *ConsumerRunning*
    /// if already running.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EventError::ConsumerRunning.into());
        }

        let this = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("conduit-consumer-{}", self.id))
            .spawn(move || this.worker_loop())
            .expect("failed to spawn consumer thread");

        *self.thread.lock().expect("consumer thread lock poisoned") = Some(handle);
        Ok(())
    }

    fn worker_loop(self: Arc<Self>) {
        const POLL_INTERVAL: Duration = Duration::from_millis(200);

        while self.running.load(Ordering::Acquire) {
            self.descriptor.wait(POLL_INTERVAL);
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.drain_once();
        }
        // Final drain so events enqueued right before shutdown are not lost.
        self.drain_once();
    }

    fn drain_once(&self) {
        let queues = self.listener.queues();

        for (name, slot) in self.slots.lock().expect("consumer slots lock poisoned").iter() {
            if let Some(q) = queues.get(name) {
                for rec in q.drain_all() {
                    slot.call(&rec.connection, &rec.event);
                }
            }
        }

        if self.on_event.is_set() {
            if let Some(links) = self.listener.link_table_snapshot() {
                for name in queues.names() {
                    if links.is_linked(&name) {
                        continue;
                    }
                    if let Some(q) = queues.get(&name) {
                        for rec in q.drain_all() {
                            self.on_event.call(&rec.connection, &rec.event);
                        }
                    }
                }
            }
        }

        if self.on_disconnect.is_set() && self.owns_on_disconnect() {
            for rec in self.listener.disconnect_queue().drain_all() {
                self.on_disconnect.call(&rec.connection);
            }
        }

        if self.on_server_disconnect.is_set() && self.owns_on_server_disconnect() {
            for rec in self.listener.server_disconnect_queue().drain_all() {
                self.on_server_disconnect.call(&rec.server_id);
            }
        }
    }

    fn owns_on_disconnect(&self) -> bool {
        self.listener.link_table_snapshot().map(|l| l.on_disconnect() == Some(self.id)).unwrap_or(false)
    }

    fn owns_on_server_disconnect(&self) -> bool {
        self.listener.link_table_snapshot().map(|l| l.on_server_disconnect() == Some(self.id)).unwrap_or(false)
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn join(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.descriptor.notify();
        if let Some(handle) = self.thread.lock().expect("consumer thread lock poisoned").take() {
            let _ = handle.join();
        }
        logging::debug!(self.log, "consumer joined"; "consumer_id" => self.id);
    }
}
