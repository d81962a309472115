//! `conduit`: an embeddable, event-oriented TCP messaging library.
//!
//! Sockets are polled on a dedicated listener thread; decoded events are
//! handed off to a small pool of consumer worker threads bound to event
//! names. See the module docs on [`listener::EventListener`] and
//! [`consumer::EventConsumer`] for the event loop and worker-thread
//! contracts, and [`codec::Packet`] for the wire format.

pub mod address;
pub mod client;
pub mod codec;
pub mod connection;
pub mod consumer;
pub mod event;
pub mod listener;
pub mod poller;
pub mod queue;
pub mod ring;
pub mod server;
pub mod slot;
pub mod userdata;

pub use address::SocketAddress;
pub use client::TcpClient;
pub use codec::{is_valid, Packet, PacketReader, Tag};
pub use connection::{Connection, ConnectionState};
pub use consumer::EventConsumer;
pub use event::{make_event, make_packet, DeserializeObject, Event, SerializeObject};
pub use listener::{EventListener, ListenerConfig};
pub use server::TcpServer;
pub use userdata::UserData;

pub use conduit_support::{Error, EventError, NetworkError, PacketError, Result, UserDataError};
