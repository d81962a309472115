//! `Event`: a named payload sent reliably and in order over a connection
//! (spec.md §3).

use crate::codec::Packet;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub packet: Packet,
}

impl Event {
    #[inline]
    pub fn new(name: impl Into<String>, packet: Packet) -> Self {
        Event { name: name.into(), packet }
    }
}

/// `make_packet(args…)`: the spec's variadic packet constructor, expressed
/// as an ordinary generic function taking a builder closure (no
/// struct-to-packet derive macro is in scope — see SPEC_FULL.md §4.1).
pub fn make_packet<F: FnOnce(&mut Packet)>(build: F) -> Packet {
    let mut packet = Packet::new();
    build(&mut packet);
    packet
}

/// `make_event(name, args…)`: same idea as [`make_packet`], wrapped with a
/// name into an [`Event`].
pub fn make_event<F: FnOnce(&mut Packet)>(name: impl Into<String>, build: F) -> Event {
    Event::new(name, make_packet(build))
}

/// Hook pair for the object-serialization helper named in spec.md §6
/// ("object serialization helper with pre/post-serialize hooks").
/// Implementors write themselves into a packet and read themselves back,
/// with an opportunity to run side effects immediately before/after.
pub trait SerializeObject {
    fn before_serialize(&mut self) {}
    fn write_object(&self, packet: &mut Packet) -> Result<(), conduit_support::PacketError>;
}

pub trait DeserializeObject: Sized {
    fn read_object(reader: &mut crate::codec::PacketReader<'_>) -> Result<Self, conduit_support::PacketError>;
    fn after_deserialize(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_event_builds_expected_packet() {
        let ev = make_event("hello", |p| {
            p.write_str("world");
            p.write(42i32);
        });
        assert_eq!(ev.name, "hello");
        let mut r = crate::codec::PacketReader::new(&ev.packet);
        assert_eq!(r.read_str().unwrap(), "world");
        assert_eq!(r.read::<i32>().unwrap(), 42);
    }
}
