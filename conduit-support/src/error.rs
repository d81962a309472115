//! Error taxonomy shared by the whole workspace.
//!
//! Follows the teacher's own networking error idiom (see
//! `t51core/src/net/result.rs` in the reference pack): plain enums with a
//! `From<io::Error>` arm, no `thiserror`/`anyhow`.

use std::fmt;
use std::io;

/// Wire tag, reused here only so `PacketError::TypeExpected` can name the
/// tag it wanted. The canonical definition lives in `conduit::codec`; this
/// is a bare copy-free representation to avoid a dependency cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TagKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Object,
    ArrayInt8,
    ArrayInt16,
    ArrayInt32,
    ArrayInt64,
    ArrayUInt8,
    ArrayUInt16,
    ArrayUInt32,
    ArrayUInt64,
    ArrayFloat32,
    ArrayFloat64,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors surfaced by socket setup, connect, and send operations.
#[derive(Debug)]
pub enum NetworkError {
    InvalidSocketAddress,
    CantRetrieveHost,
    ConnectFailed(io::Error),
    TimedOut,
    BindFailed(io::Error),
    ListenFailed(io::Error),
    CantSetNonblocking(io::Error),
    SendFailed(io::Error),
    EmptySend,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidSocketAddress => write!(f, "invalid socket address"),
            NetworkError::CantRetrieveHost => write!(f, "could not resolve host"),
            NetworkError::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            NetworkError::TimedOut => write!(f, "operation timed out"),
            NetworkError::BindFailed(e) => write!(f, "bind failed: {}", e),
            NetworkError::ListenFailed(e) => write!(f, "listen failed: {}", e),
            NetworkError::CantSetNonblocking(e) => write!(f, "could not set non-blocking: {}", e),
            NetworkError::SendFailed(e) => write!(f, "send failed: {}", e),
            NetworkError::EmptySend => write!(f, "attempted to send an empty event"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Errors surfaced by the packet codec.
#[derive(Debug)]
pub enum PacketError {
    /// The next tag on the wire did not match the tag the caller asked to read.
    TypeExpected(TagKind),
    EmptyObject,
    WrongSizedObject { expected: u8, found: u8 },
    ArrayTooBig(usize),
    ObjectTooLarge(usize),
    UnknownTag(u8),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TypeExpected(tag) => write!(f, "{}Expected", tag),
            PacketError::EmptyObject => write!(f, "object must contain at least one item"),
            PacketError::WrongSizedObject { expected, found } => {
                write!(f, "expected object of size {}, found {}", expected, found)
            }
            PacketError::ArrayTooBig(len) => write!(f, "array of {} elements exceeds 65535", len),
            PacketError::ObjectTooLarge(len) => write!(f, "object of {} items exceeds 255", len),
            PacketError::UnknownTag(tag) => write!(f, "unknown tag byte 0x{:02x}", tag),
        }
    }
}

impl std::error::Error for PacketError {}

/// Errors surfaced by the tagged user-data slot on `Connection`.
#[derive(Debug)]
pub enum UserDataError {
    UserDataWrongTypeAsked,
    UserDataWrongTypeGiven,
}

impl fmt::Display for UserDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserDataError::UserDataWrongTypeAsked => write!(f, "user data wrong type asked"),
            UserDataError::UserDataWrongTypeGiven => write!(f, "user data wrong type given"),
        }
    }
}

impl std::error::Error for UserDataError {}

/// Errors surfaced by the listener/consumer lifecycle.
#[derive(Debug)]
pub enum EventError {
    ListenerRunning,
    ConsumerRunning,
    EventCollision,
    AlreadyListened,
    WrongParentListener,
    PollerCreate(io::Error),
    PollerAdd(io::Error),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::ListenerRunning => write!(f, "listener is already running"),
            EventError::ConsumerRunning => write!(f, "consumer is already running"),
            EventError::EventCollision => write!(f, "two slots are bound to the same event"),
            EventError::AlreadyListened => write!(f, "already attached to a different listener"),
            EventError::WrongParentListener => write!(f, "detach attempted from the wrong listener"),
            EventError::PollerCreate(e) => write!(f, "could not create poller: {}", e),
            EventError::PollerAdd(e) => write!(f, "could not register fd with poller: {}", e),
        }
    }
}

impl std::error::Error for EventError {}

/// The single error type returned by every public, user-thread-facing
/// `conduit` operation (`attach`, `run`, `connect`, typed `read<T>`, ...).
///
/// Mirrors the root/leaf shape of the original C++ implementation's
/// `SedNL::Exception` hierarchy (`Exception` root, `TypeException` /
/// `NetworkException` / `PacketException` leaves) without reaching for a
/// macro-derived error crate the teacher's stack never uses for this kind
/// of plain domain error.
#[derive(Debug)]
pub enum Error {
    Network(NetworkError),
    Packet(PacketError),
    UserData(UserDataError),
    Event(EventError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(e) => fmt::Display::fmt(e, f),
            Error::Packet(e) => fmt::Display::fmt(e, f),
            Error::UserData(e) => fmt::Display::fmt(e, f),
            Error::Event(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => Some(e),
            Error::Packet(e) => Some(e),
            Error::UserData(e) => Some(e),
            Error::Event(e) => Some(e),
        }
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::Network(e)
    }
}

impl From<PacketError> for Error {
    fn from(e: PacketError) -> Self {
        Error::Packet(e)
    }
}

impl From<UserDataError> for Error {
    fn from(e: UserDataError) -> Self {
        Error::UserData(e)
    }
}

impl From<EventError> for Error {
    fn from(e: EventError) -> Self {
        Error::Event(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
