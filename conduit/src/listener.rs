//! `EventListener` (component C5): the event loop. Poll → accept/read/close
//! → enqueue events/lifecycle notifications (spec.md §3, §4.4).
//!
//! Structurally grounded on `neutronium::net::endpoint::Endpoint`'s
//! register/poll/accept/read cycle, generalized from its fixed
//! single-listener/channel-table design to the token-indexed `Slab`
//! registry `flux-network::tcp::connector::ConnectionManager` uses for an
//! arbitrary number of attached listening sockets and connections
//! (SPEC_FULL.md §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use mio::Token;
use slab::Slab;

use conduit_support::{logging, Error, EventError, Result};

use crate::connection::{Connection, DisconnectSink};
use crate::consumer::EventConsumer;
use crate::poller::{MioPoller, Poller};
use crate::queue::{DisconnectRecord, EventRecord, LinkTable, QueueRegistry, ServerDisconnectRecord};
use crate::server::{ServerDisconnectSink, TcpServer};
use crate::slot::Slot1;

/// Configuration for an `EventListener` (SPEC_FULL.md §4.0c: no CLI/env-var
/// surface, a plain config struct the embedding application fills in).
#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    pub max_queue: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig { max_queue: 1000 }
    }
}

static NEXT_ACCEPTED_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_LISTENER_ID: AtomicUsize = AtomicUsize::new(1);

enum RegistryEntry {
    Server { server: Arc<TcpServer>, mio_listener: mio::net::TcpListener },
    Connection { connection: Arc<Connection>, owned: bool, server_id: Option<usize> },
}

struct Registry {
    slab: Slab<RegistryEntry>,
}

pub struct EventListener {
    id: usize,
    config: ListenerConfig,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,

    registry: Mutex<Registry>,
    poller: Mutex<Option<MioPoller>>,

    queues: Arc<QueueRegistry>,
    disconnect_queue: Arc<crate::queue::BoundedQueue<DisconnectRecord>>,
    server_disconnect_queue: Arc<crate::queue::BoundedQueue<ServerDisconnectRecord>>,

    consumers: Mutex<Vec<Arc<EventConsumer>>>,
    link_table: Mutex<Option<Arc<LinkTable>>>,
    descriptors: Mutex<HashMap<usize, Arc<crate::consumer::ConsumerDescriptor>>>,

    on_connect: Slot1<Connection>,
    log: logging::Logger,
}

impl DisconnectSink for EventListener {
    fn notify_disconnect(&self, connection_id: usize) {
        // The connection has already run its own shutdown(); route it
        // through the same close path `close_connection` uses so the
        // disconnect is still observed as a `Disconnected` event (spec.md
        // §5, "Disconnect-from-user-thread").
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        let key = registry.slab.iter().find_map(|(key, entry)| match entry {
            RegistryEntry::Connection { connection, .. } if connection.id() == connection_id => Some(key),
            _ => None,
        });
        let found = match key {
            Some(key) => match registry.slab.remove(key) {
                RegistryEntry::Connection { connection, .. } => Some(connection),
                RegistryEntry::Server { .. } => None,
            },
            None => None,
        };
        drop(registry);

        if let Some(connection) = found {
            self.finish_close(connection);
        }
    }
}

impl ServerDisconnectSink for EventListener {
    /// Closes the listening socket and every connection it accepted, then
    /// synthesizes the `ServerDisconnected` record (spec.md §4.4 "Close
    /// paths", §8 invariant, "Server close": the next `send` on any of those
    /// connections must fail *SendFailed*).
    fn notify_server_disconnect(&self, server_id: usize) {
        let to_close = {
            let mut registry = self.registry.lock().expect("listener registry lock poisoned");

            let server_key = registry.slab.iter().find_map(|(key, entry)| match entry {
                RegistryEntry::Server { server, .. } if server.id() == server_id => Some(key),
                _ => None,
            });
            if let Some(key) = server_key {
                if let RegistryEntry::Server { mut mio_listener, .. } = registry.slab.remove(key) {
                    if let Some(poller) = self.poller.lock().expect("listener poller lock poisoned").as_mut() {
                        let _ = poller.deregister(&mut mio_listener);
                    }
                }
            }

            let mut closing = Vec::new();
            registry.slab.retain(|_, entry| match entry {
                RegistryEntry::Connection { connection, server_id: sid, .. } if *sid == Some(server_id) => {
                    closing.push(connection.clone());
                    false
                }
                _ => true,
            });
            closing
        };

        for connection in &to_close {
            connection.disconnect();
        }

        if !self.server_disconnect_queue.push(ServerDisconnectRecord { server_id }) {
            logging::warn!(self.log, "server disconnect queue full, dropping notification");
        }
        if let Some(lt) = self.link_table_snapshot() {
            if let Some(owner_id) = lt.on_server_disconnect() {
                if let Some(desc) = self.descriptors.lock().expect("listener descriptors lock poisoned").get(&owner_id) {
                    desc.notify();
                }
            }
        }
    }
}

impl EventListener {
    pub fn new(config: ListenerConfig) -> Arc<Self> {
        Arc::new(EventListener {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
            registry: Mutex::new(Registry { slab: Slab::new() }),
            poller: Mutex::new(None),
            queues: Arc::new(QueueRegistry::new(config.max_queue)),
            disconnect_queue: Arc::new(crate::queue::BoundedQueue::new(config.max_queue)),
            server_disconnect_queue: Arc::new(crate::queue::BoundedQueue::new(config.max_queue)),
            consumers: Mutex::new(Vec::new()),
            link_table: Mutex::new(None),
            descriptors: Mutex::new(HashMap::new()),
            on_connect: Slot1::empty(),
            log: logging::init().new(logging::o!("component" => "listener")),
        })
    }

    pub(crate) fn child_logger(&self) -> logging::Logger {
        self.log.new(logging::o!())
    }

    pub fn on_connect<F: Fn(&Connection) + Send + Sync + 'static>(&self, handler: F) {
        self.on_connect.set(handler);
    }

    /// Attaches an externally-owned `TcpServer`, taking over its listening
    /// socket for polling (spec.md §3, §4.4). Fails with *ListenerRunning*
    /// once `run()` has started (attachment only happens before the poll
    /// loop is built) and with *AlreadyListened* if the server is already
    /// attached to a (possibly different) listener.
    pub fn attach_server(self: &Arc<Self>, server: Arc<TcpServer>) -> Result<()> {
        if self.is_running() {
            return Err(Error::Event(EventError::ListenerRunning));
        }
        if server.attached_listener_id().is_some() {
            return Err(Error::Event(EventError::AlreadyListened));
        }

        let sink: Arc<dyn ServerDisconnectSink> = self.clone();
        server.set_owner(self.id, sink);

        let std_listener = server.take_mio_listener().map_err(conduit_support::NetworkError::ListenFailed)?;
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        registry.slab.insert(RegistryEntry::Server { server, mio_listener: std_listener });
        Ok(())
    }

    /// Detaches `server`, failing with *ListenerRunning* while this listener
    /// is running and *WrongParentListener* if `server` belongs to a
    /// different listener (or none at all).
    pub fn detach_server(&self, server: &Arc<TcpServer>) -> Result<()> {
        if self.is_running() {
            return Err(Error::Event(EventError::ListenerRunning));
        }
        if server.attached_listener_id() != Some(self.id) {
            return Err(Error::Event(EventError::WrongParentListener));
        }

        server.clear_owner();
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        registry.slab.retain(|_, entry| match entry {
            RegistryEntry::Server { server: s, .. } => !Arc::ptr_eq(s, server),
            RegistryEntry::Connection { .. } => true,
        });
        Ok(())
    }

    /// Attaches an externally-owned client `Connection` (from a
    /// `TcpClient`) so its traffic is read and dispatched by this listener.
    /// Same *ListenerRunning*/*AlreadyListened* guards as `attach_server`.
    pub fn attach_connection(self: &Arc<Self>, connection: Arc<Connection>) -> Result<()> {
        if self.is_running() {
            return Err(Error::Event(EventError::ListenerRunning));
        }
        if connection.attached_listener_id().is_some() {
            return Err(Error::Event(EventError::AlreadyListened));
        }

        let sink: Arc<dyn DisconnectSink> = self.clone();
        connection.set_owner(self.id, sink);
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        registry.slab.insert(RegistryEntry::Connection { connection: connection.clone(), owned: false, server_id: None });
        Ok(())
    }

    /// Same *ListenerRunning*/*WrongParentListener* guards as `detach_server`.
    pub fn detach_connection(&self, connection: &Arc<Connection>) -> Result<()> {
        if self.is_running() {
            return Err(Error::Event(EventError::ListenerRunning));
        }
        if connection.attached_listener_id() != Some(self.id) {
            return Err(Error::Event(EventError::WrongParentListener));
        }

        connection.clear_owner();
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        registry.slab.retain(|_, entry| match entry {
            RegistryEntry::Connection { connection: c, .. } => !Arc::ptr_eq(c, connection),
            RegistryEntry::Server { .. } => true,
        });
        Ok(())
    }

    pub(crate) fn attach_consumer(&self, consumer: Arc<EventConsumer>) {
        self.consumers.lock().expect("listener consumers lock poisoned").push(consumer);
    }

    pub(crate) fn queues(&self) -> &Arc<QueueRegistry> {
        &self.queues
    }

    pub(crate) fn disconnect_queue(&self) -> &Arc<crate::queue::BoundedQueue<DisconnectRecord>> {
        &self.disconnect_queue
    }

    pub(crate) fn server_disconnect_queue(&self) -> &Arc<crate::queue::BoundedQueue<ServerDisconnectRecord>> {
        &self.server_disconnect_queue
    }

    pub(crate) fn link_table_snapshot(&self) -> Option<Arc<LinkTable>> {
        self.link_table.lock().expect("listener link table lock poisoned").clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Builds the link table from every attached consumer, checking for
    /// collisions (spec.md §8 invariant 9), then spawns the poll loop
    /// thread.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Event(EventError::ListenerRunning));
        }

        let mut link_table = LinkTable::new();
        let mut descriptors = HashMap::new();
        let consumers = self.consumers.lock().expect("listener consumers lock poisoned").clone();

        for consumer in &consumers {
            descriptors.insert(consumer.id(), consumer.descriptor());
            for name in consumer.bound_names() {
                if let Err(e) = link_table.bind(&name, consumer.id()) {
                    self.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
            if consumer.wants_catch_all() {
                if let Err(e) = link_table.bind_catch_all(consumer.id()) {
                    self.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
            if consumer.wants_on_disconnect() {
                if let Err(e) = link_table.bind_on_disconnect(consumer.id()) {
                    self.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
            if consumer.wants_on_server_disconnect() {
                if let Err(e) = link_table.bind_on_server_disconnect(consumer.id()) {
                    self.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
        }

        *self.link_table.lock().expect("listener link table lock poisoned") = Some(Arc::new(link_table));
        *self.descriptors.lock().expect("listener descriptors lock poisoned") = descriptors;

        let mut poller = MioPoller::new()?;
        {
            let mut registry = self.registry.lock().expect("listener registry lock poisoned");
            for (key, entry) in registry.slab.iter_mut() {
                match entry {
                    RegistryEntry::Server { mio_listener, .. } => {
                        poller.register(mio_listener, Token(key), true, false)?;
                    }
                    RegistryEntry::Connection { connection, .. } => {
                        connection.register_with(&mut poller, Token(key))?;
                    }
                }
            }
        }
        *self.poller.lock().expect("listener poller lock poisoned") = Some(poller);

        let this = self.clone();
        let handle = std::thread::Builder::new()
            .name("conduit-listener".to_string())
            .spawn(move || this.poll_loop())
            .expect("failed to spawn listener thread");
        *self.thread.lock().expect("listener thread lock poisoned") = Some(handle);
        Ok(())
    }

    fn poll_loop(self: Arc<Self>) {
        const POLL_TIMEOUT: Duration = Duration::from_millis(100);

        while self.running.load(Ordering::Acquire) {
            let events = {
                let mut poller_guard = self.poller.lock().expect("listener poller lock poisoned");
                let poller = match poller_guard.as_mut() {
                    Some(p) => p,
                    None => break,
                };
                match poller.poll(Some(POLL_TIMEOUT)) {
                    Ok(events) => events,
                    Err(e) => {
                        logging::warn!(self.log, "poll error"; "error" => %e);
                        continue;
                    }
                }
            };

            for (token, readable, _writable) in events {
                self.handle_token(token, readable);
            }
        }

        self.shutdown_connections();
    }

    fn handle_token(&self, token: Token, readable: bool) {
        if !readable {
            return;
        }

        let kind = {
            let registry = self.registry.lock().expect("listener registry lock poisoned");
            match registry.slab.get(token.0) {
                Some(RegistryEntry::Server { .. }) => TokenKind::Server,
                Some(RegistryEntry::Connection { connection, .. }) => TokenKind::Connection(connection.clone()),
                None => return, // stale token: connection already detached/closed
            }
        };

        match kind {
            TokenKind::Server => self.accept_loop(token),
            TokenKind::Connection(connection) => self.read_connection(token, &connection),
        }
    }

    /// Repeat `accept()` until *WouldBlock* (spec.md §4.4, "Accept loop").
    fn accept_loop(&self, server_token: Token) {
        loop {
            let (accepted, server_id) = {
                let mut registry = self.registry.lock().expect("listener registry lock poisoned");
                match registry.slab.get_mut(server_token.0) {
                    Some(RegistryEntry::Server { mio_listener, server }) => (mio_listener.accept(), server.id()),
                    _ => return,
                }
            };

            let (stream, _addr) = match accepted {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    logging::warn!(self.log, "accept failed"; "error" => %e);
                    return;
                }
            };

            let conn_id = NEXT_ACCEPTED_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let connection = Arc::new(Connection::new(conn_id, stream, self.child_logger()));

            let mut registry = self.registry.lock().expect("listener registry lock poisoned");
            let key = registry.slab.insert(RegistryEntry::Connection {
                connection: connection.clone(),
                owned: true,
                server_id: Some(server_id),
            });
            drop(registry);

            let mut poller_guard = self.poller.lock().expect("listener poller lock poisoned");
            let register_result = poller_guard
                .as_mut()
                .map(|poller| connection.register_with(poller, Token(key)))
                .unwrap_or(Ok(()));
            drop(poller_guard);

            if let Err(e) = register_result {
                logging::warn!(self.log, "failed to register accepted connection"; "error" => %e);
                let mut registry = self.registry.lock().expect("listener registry lock poisoned");
                registry.slab.remove(key);
                continue;
            }

            // Exceptions thrown by the slot are caught and logged but do
            // not break the loop (spec.md §4.4).
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.on_connect.call(&connection);
            }));
            if outcome.is_err() {
                logging::warn!(self.log, "on_connect callback panicked");
            }
        }
    }

    /// Repeat `recv()` until *WouldBlock* or peer-close (spec.md §4.4,
    /// "Read loop").
    fn read_connection(&self, token: Token, connection: &Arc<Connection>) {
        let (events, peer_closed) = match connection.read_ready() {
            Ok(result) => result,
            Err(e) => {
                logging::warn!(self.log, "recv failed"; "error" => %e);
                self.close_connection(token, connection);
                return;
            }
        };

        for event in events {
            let name = event.name.clone();
            let queue = self.queues.get_or_create(&name);
            if !queue.push(EventRecord { connection: connection.clone(), event }) {
                logging::warn!(self.log, "queue full, dropping event"; "event" => %name);
                continue;
            }
            self.notify_owner(&name);
        }

        if peer_closed {
            self.close_connection(token, connection);
        }
    }

    fn notify_owner(&self, name: &str) {
        let link_table = self.link_table.lock().expect("listener link table lock poisoned").clone();
        let owner = link_table.as_ref().and_then(|lt| lt.owner_of(name).or_else(|| lt.catch_all()));
        if let Some(owner_id) = owner {
            if let Some(desc) = self.descriptors.lock().expect("listener descriptors lock poisoned").get(&owner_id) {
                desc.notify();
            }
        }
    }

    fn close_connection(&self, token: Token, connection: &Arc<Connection>) {
        // `disconnect()` may itself reach `notify_disconnect` (if this
        // connection was attached via `attach_connection` and so carries a
        // listener owner), which already removes the registry entry and
        // runs the close side effects; `try_remove` tolerates that instead
        // of panicking on a key that's already gone.
        connection.disconnect();

        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        let already_closed = registry.slab.try_remove(token.0).is_none();
        drop(registry);

        if !already_closed {
            self.finish_close(connection.clone());
        }
    }

    /// Enqueues the `DisconnectRecord` and wakes the consumer bound to
    /// `on_disconnect`, if any (spec.md §4.4, "Close paths"). Shared by
    /// `close_connection` (poll-loop close) and `notify_disconnect`
    /// (user-thread close), both of which have already removed the
    /// connection from the registry by the time they call this.
    fn finish_close(&self, connection: Arc<Connection>) {
        if !self.disconnect_queue.push(DisconnectRecord { connection }) {
            logging::warn!(self.log, "disconnect queue full, dropping notification");
            return;
        }
        if let Some(lt) = self.link_table_snapshot() {
            if let Some(owner_id) = lt.on_disconnect() {
                if let Some(desc) = self.descriptors.lock().expect("listener descriptors lock poisoned").get(&owner_id) {
                    desc.notify();
                }
            }
        }
    }

    fn shutdown_connections(&self) {
        let mut registry = self.registry.lock().expect("listener registry lock poisoned");
        let keys: Vec<usize> = registry.slab.iter().map(|(k, _)| k).collect();
        for key in keys {
            if let Some(RegistryEntry::Connection { connection, owned, .. }) = registry.slab.get(key) {
                if *owned {
                    connection.disconnect();
                }
            }
        }
        registry.slab.clear();
    }

    /// Stops the loop thread, disconnects every internally-owned
    /// connection, then joins every attached consumer (spec.md §4.4,
    /// "Shutdown").
    pub fn join(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.thread.lock().expect("listener thread lock poisoned").take() {
            let _ = handle.join();
        }
        for consumer in self.consumers.lock().expect("listener consumers lock poisoned").iter() {
            consumer.join();
        }
        *self.poller.lock().expect("listener poller lock poisoned") = None;
        *self.link_table.lock().expect("listener link table lock poisoned") = None;
        logging::debug!(self.log, "listener joined");
    }
}

enum TokenKind {
    Server,
    Connection(Arc<Connection>),
}
