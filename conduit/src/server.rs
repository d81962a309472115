//! `TCPServer`: a listening socket a user binds and attaches to an
//! [`crate::listener::EventListener`] (spec.md §3, "Server").

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::TcpListener;

use conduit_support::{NetworkError, Result};

use crate::address::SocketAddress;

static NEXT_SERVER_ID: AtomicUsize = AtomicUsize::new(1);

/// Non-owning handle to the listener a `TcpServer` is attached to, used to
/// propagate a user-thread `disconnect()` into the listener's poll loop
/// (spec.md §8 invariant, "Server close"), mirroring
/// `crate::connection::DisconnectSink`.
pub trait ServerDisconnectSink: Send + Sync {
    fn notify_server_disconnect(&self, server_id: usize);
}

pub struct TcpServer {
    id: usize,
    pub(crate) addr: SocketAddress,
    pub(crate) listener: Mutex<Option<TcpListener>>,
    owner: Mutex<Option<(usize, Arc<dyn ServerDisconnectSink>)>>,
    closed: AtomicBool,
}

impl TcpServer {
    /// Binds a new listening socket. The server is not accepting
    /// connections until it is attached to a running `EventListener`
    /// (spec.md §4.4, "attach").
    pub fn bind(addr: SocketAddress) -> Result<Self> {
        let listener = TcpListener::bind(addr.as_std()).map_err(NetworkError::BindFailed)?;
        // Re-read the bound address: callers may pass port 0 to request an
        // OS-assigned ephemeral port.
        let bound_addr = listener.local_addr().map_err(NetworkError::BindFailed)?.into();
        Ok(TcpServer {
            id: NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed),
            addr: bound_addr,
            listener: Mutex::new(Some(listener)),
            owner: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddress {
        self.addr
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_owner(&self, listener_id: usize, owner: Arc<dyn ServerDisconnectSink>) {
        *self.owner.lock().expect("server owner lock poisoned") = Some((listener_id, owner));
    }

    pub(crate) fn clear_owner(&self) {
        self.owner.lock().expect("server owner lock poisoned").take();
    }

    /// The id of the `EventListener` this server is currently attached to,
    /// if any (spec.md §4.4, "attach"/"detach" ownership checks).
    pub(crate) fn attached_listener_id(&self) -> Option<usize> {
        self.owner.lock().expect("server owner lock poisoned").as_ref().map(|(id, _)| *id)
    }

    /// Idempotent close, mirroring `Connection::disconnect` (spec.md §3,
    /// §8 invariant 8). Once attached, the listening socket itself lives in
    /// the owning listener's registry, so closing it and synthesizing the
    /// `ServerDisconnected` record is delegated to that listener.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listener.lock().expect("server listener lock poisoned").take();

        let owner = self.owner.lock().expect("server owner lock poisoned").clone();
        if let Some((_, owner)) = owner {
            owner.notify_server_disconnect(self.id);
        }
    }

    pub(crate) fn take_mio_listener(&self) -> io::Result<TcpListener> {
        self.listener
            .lock()
            .expect("server listener lock poisoned")
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "server already attached or closed"))
    }
}
