//! `Connection` (component C3): owns a socket, a receive ring, a send
//! mutex, and a user-data slot (spec.md §3).
//!
//! Grounded on `neutronium::net::channel::Channel`, stripped of the
//! encryption/handshake/sequence-number machinery (no-goal: conduit does
//! not encrypt or authenticate traffic) but keeping its overall shape: a
//! struct owning an optional `mio::net::TcpStream`, a small state enum, and
//! a logger child of the owning component's logger.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use mio::Token;

use conduit_support::{logging, Error, NetworkError, Result};

use crate::event::Event;
use crate::poller::Poller;
use crate::ring::{DecodeOutcome, RingBuffer, DEFAULT_CAPACITY};
use crate::userdata::UserData;

const RECV_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// Non-owning handle to the listener a Connection belongs to, used only to
/// enqueue a disconnect event when the user closes the connection from
/// their own thread (spec.md §5, "Disconnect-from-user-thread"). Cleared on
/// listener teardown so a lingering `Arc<Connection>` can never reach a
/// freed listener.
pub trait DisconnectSink: Send + Sync {
    fn notify_disconnect(&self, connection_id: usize);
}

pub struct Connection {
    id: usize,
    stream: Mutex<Option<TcpStream>>,
    state: AtomicBool, // true => Connected
    closed: AtomicBool,
    send_lock: Mutex<()>,
    ring: Mutex<RingBuffer>,
    user_data: Mutex<UserData>,
    owner: Mutex<Option<(usize, Arc<dyn DisconnectSink>)>>,
    log: logging::Logger,
}

impl Connection {
    pub fn new(id: usize, stream: TcpStream, log: logging::Logger) -> Self {
        Connection {
            id,
            stream: Mutex::new(Some(stream)),
            state: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            send_lock: Mutex::new(()),
            ring: Mutex::new(RingBuffer::new(DEFAULT_CAPACITY)),
            user_data: Mutex::new(UserData::None),
            owner: Mutex::new(None),
            log,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Closed
        } else if self.state.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Unconnected
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn set_owner(&self, listener_id: usize, owner: Arc<dyn DisconnectSink>) {
        *self.owner.lock().expect("connection owner lock poisoned") = Some((listener_id, owner));
    }

    pub(crate) fn clear_owner(&self) {
        self.owner.lock().expect("connection owner lock poisoned").take();
    }

    /// The id of the `EventListener` this connection is currently attached
    /// to, if any (spec.md §4.4, "attach"/"detach" ownership checks).
    pub(crate) fn attached_listener_id(&self) -> Option<usize> {
        self.owner.lock().expect("connection owner lock poisoned").as_ref().map(|(id, _)| *id)
    }

    /// Registers this connection's stream on `poller` under `token`. Only
    /// ever called right after construction or attachment, before the
    /// stream can have been taken by `disconnect()`.
    pub(crate) fn register_with(&self, poller: &mut dyn Poller, token: Token) -> Result<()> {
        let mut guard = self.stream.lock().expect("connection stream lock poisoned");
        let stream = guard.as_mut().expect("register_with called on a connection without a live stream");
        poller.register(stream, token, true, false)
    }

    /// `send(Event)`: codec → buffered write under the send mutex
    /// (spec.md §3 control flow). Fails with *Disconnected* if the
    /// connection has already been closed (invariant 8, spec.md §8).
    pub fn send(&self, event: &Event) -> Result<()> {
        let _guard = self.send_lock.lock().expect("connection send lock poisoned");

        if !self.is_connected() {
            return Err(Error::Network(NetworkError::SendFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ))));
        }

        let frame = encode_frame(&event.name, event.packet.as_bytes());

        let mut guard = self.stream.lock().expect("connection stream lock poisoned");
        let stream = guard.as_mut().ok_or(Error::Network(NetworkError::EmptySend))?;
        stream
            .write_all(&frame)
            .map_err(|e| Error::Network(NetworkError::SendFailed(e)))?;

        logging::trace!(self.log, "sent frame"; "connection_id" => self.id, "event" => %event.name, "bytes" => frame.len());
        Ok(())
    }

    /// Repeat `recv()` until *WouldBlock* or peer-close, feeding every
    /// chunk into the ring and draining complete frames (spec.md §4.4,
    /// "Read loop"). Returns the decoded events and whether the peer
    /// closed the connection.
    pub fn read_ready(&self) -> io::Result<(Vec<Event>, bool)> {
        let mut events = Vec::new();
        let mut peer_closed = false;
        let mut buf = [0u8; RECV_CHUNK];

        let mut stream_guard = self.stream.lock().expect("connection stream lock poisoned");
        let stream = match stream_guard.as_mut() {
            Some(s) => s,
            None => return Ok((events, true)),
        };

        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    let mut ring = self.ring.lock().expect("connection ring lock poisoned");
                    if !ring.put(&buf[..n]) {
                        logging::warn!(self.log, "ring overflow, dropping connection";
                            "connection_id" => self.id, "chunk_len" => n);
                        peer_closed = true;
                        break;
                    }
                    loop {
                        match ring.try_decode() {
                            DecodeOutcome::Incomplete => break,
                            DecodeOutcome::Corrupt => {
                                logging::warn!(self.log, "dropped corrupt frame"; "connection_id" => self.id);
                            }
                            DecodeOutcome::Event(ev) => events.push(ev),
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok((events, peer_closed))
    }

    /// Idempotent disconnect (spec.md §3, "disconnect is idempotent and
    /// safe after destruction of listener"; invariant 8, spec.md §8).
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return; // already closed
        }
        self.state.store(false, Ordering::Release);

        if let Some(stream) = self.stream.lock().expect("connection stream lock poisoned").take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let owner = self.owner.lock().expect("connection owner lock poisoned").clone();
        if let Some((_, owner)) = owner {
            owner.notify_disconnect(self.id);
        }

        logging::debug!(self.log, "connection disconnected"; "connection_id" => self.id);
    }

    pub fn set_user_data(&self, value: UserData) -> Result<()> {
        let mut ud = self.user_data.lock().expect("user data lock poisoned");
        match &value {
            UserData::None => {
                *ud = UserData::None;
                Ok(())
            }
            UserData::I8(v) => ud.set_i8(*v).map_err(Error::UserData),
            UserData::I32(v) => ud.set_i32(*v).map_err(Error::UserData),
            UserData::I64(v) => ud.set_i64(*v).map_err(Error::UserData),
            UserData::F32(v) => ud.set_f32(*v).map_err(Error::UserData),
            UserData::F64(v) => ud.set_f64(*v).map_err(Error::UserData),
            UserData::Ptr(v) => ud.set_ptr(*v).map_err(Error::UserData),
            UserData::Str(v) => ud.set_str(v.clone()).map_err(Error::UserData),
        }
    }

    pub fn get_user_data(&self) -> UserData {
        self.user_data.lock().expect("user data lock poisoned").clone()
    }

    pub fn release_user_data(&self) {
        self.user_data.lock().expect("user data lock poisoned").release();
    }
}

/// Encodes a frame as `len:u16-be ‖ name ‖ '\0' ‖ packet-bytes`
/// (spec.md §6, wire format).
fn encode_frame(name: &str, packet_bytes: &[u8]) -> Vec<u8> {
    let body_len = name.len() + 1 + packet_bytes.len();
    let len = 2 + body_len;
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&(len as u16).to_be_bytes());
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);
    frame.extend_from_slice(packet_bytes);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_frame_matches_wire_format() {
        let f = encode_frame("hi", &[1, 2, 3]);
        // len = 2 (header) + 2 (name) + 1 (NUL) + 3 (body) = 8
        assert_eq!(&f[..2], &8u16.to_be_bytes());
        assert_eq!(&f[2..4], b"hi");
        assert_eq!(f[4], 0);
        assert_eq!(&f[5..], &[1, 2, 3]);
    }
}
