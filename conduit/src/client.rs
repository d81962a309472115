//! `TCPClient`: a user-owned outbound connection (spec.md §3, §6).
//!
//! Grounded on `flux-network::tcp::connector`'s connect-with-timeout style,
//! adapted to a blocking `connect_timeout` (simpler than a manual
//! non-blocking-connect-then-poll-writable loop, and std's own primitive
//! for exactly this) followed by a switch to non-blocking mode before the
//! connection is ever registered with a poller.

use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;

use conduit_support::{logging, NetworkError, Result};

use crate::address::SocketAddress;
use crate::connection::Connection;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub struct TcpClient {
    connection: Arc<Connection>,
}

impl TcpClient {
    /// Connects to `addr`, failing with *TimedOut* if the TCP handshake
    /// does not complete within `timeout` (spec.md §3: "Lifecycle: created
    /// by user (client)...").
    pub fn connect(addr: SocketAddress, timeout: Duration) -> Result<Self> {
        let std_stream = StdTcpStream::connect_timeout(&addr.as_std(), timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                NetworkError::TimedOut
            } else {
                NetworkError::ConnectFailed(e)
            }
        })?;
        std_stream.set_nonblocking(true).map_err(NetworkError::CantSetNonblocking)?;

        let stream = TcpStream::from_std(std_stream);
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id, stream, logging::discard()));

        Ok(TcpClient { connection })
    }

    #[inline]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    #[inline]
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }
}
