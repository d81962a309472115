//! Poller (component C4): a thin wrapper around `mio::Poll`, the
//! OS-level readiness multiplexer (spec.md §4.3).
//!
//! Structurally grounded on `neutronium::net::endpoint::Endpoint`'s
//! register/poll loop, but using the modern `mio::{Poll, Interest, Token}`
//! API (`mio` 0.8+; the teacher's own `mio::Ready`/`mio::PollOpt` surface
//! no longer exists on crates.io) the way `flux-network`'s
//! `tcp::connector::ConnectionManager` uses it in the reference pack.
//!
//! Only the `mio`-backed implementation ships; the trait exists purely as
//! an extension point named in SPEC_FULL.md, not because a second backend
//! is implemented here.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use conduit_support::{EventError, Result};

/// Readiness multiplexer seam. `conduit` ships exactly one implementor
/// (`MioPoller`); kept as a trait so an alternate backend (epoll/kqueue
/// directly, IOCP) could be dropped in without touching the listener.
pub trait Poller {
    fn register(&mut self, source: &mut dyn Source, token: Token, readable: bool, writable: bool) -> Result<()>;
    fn reregister(&mut self, source: &mut dyn Source, token: Token, readable: bool, writable: bool) -> Result<()>;
    fn deregister(&mut self, source: &mut dyn Source) -> Result<()>;
    /// Blocks until readiness events are available or `timeout` elapses,
    /// returning each token along with whether it was readable/writable.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(Token, bool, bool)>>;
}

pub struct MioPoller {
    poll: Poll,
    events: Events,
}

impl MioPoller {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(EventError::PollerCreate)?;
        Ok(MioPoller { poll, events: Events::with_capacity(1024) })
    }

    #[inline]
    fn interest(readable: bool, writable: bool) -> Interest {
        match (readable, writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => Interest::READABLE,
        }
    }
}

impl Poller for MioPoller {
    fn register(&mut self, source: &mut dyn Source, token: Token, readable: bool, writable: bool) -> Result<()> {
        self.poll
            .registry()
            .register(source, token, Self::interest(readable, writable))
            .map_err(EventError::PollerAdd)?;
        Ok(())
    }

    fn reregister(&mut self, source: &mut dyn Source, token: Token, readable: bool, writable: bool) -> Result<()> {
        self.poll
            .registry()
            .reregister(source, token, Self::interest(readable, writable))
            .map_err(EventError::PollerAdd)?;
        Ok(())
    }

    fn deregister(&mut self, source: &mut dyn Source) -> Result<()> {
        // Deregistration failures are not fatal to the caller: the fd is
        // being torn down regardless.
        let _ = self.poll.registry().deregister(source);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(Token, bool, bool)>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(self
                .events
                .iter()
                .map(|ev| (ev.token(), ev.is_readable(), ev.is_writable()))
                .collect()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
