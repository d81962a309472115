//! `SocketAddress`: a thin, validating wrapper around `std::net::SocketAddr`
//! (spec.md §6 external interfaces).

use std::net::{SocketAddr, ToSocketAddrs};

use conduit_support::NetworkError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SocketAddress(SocketAddr);

impl SocketAddress {
    /// Parses `host:port`, resolving `host` if it isn't already a literal
    /// IP address.
    pub fn resolve(spec: &str) -> Result<Self, NetworkError> {
        spec.to_socket_addrs()
            .map_err(|_| NetworkError::CantRetrieveHost)?
            .next()
            .map(SocketAddress)
            .ok_or(NetworkError::InvalidSocketAddress)
    }

    #[inline]
    pub fn as_std(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        SocketAddress(addr)
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
