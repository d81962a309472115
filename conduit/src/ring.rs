//! Ring buffer + frame decoder (component C2): a fixed-capacity byte ring
//! owned by a `Connection`, used to accumulate socket bytes until a
//! complete frame can be sliced out.
//!
//! Grounded on `neutronium::net::buffer::Buffer`, which already wraps
//! `slice_deque::SliceDeque<u8>` for a double-mapped, always-contiguous byte
//! queue. That teacher buffer grows to fill a soft cap via `ingress`/
//! `egress` loops; here it is generalized into the fixed-capacity,
//! all-or-nothing `put` spec.md §3/§4.2 ask for, since this ring is fed by
//! the listener handing over already-read chunks rather than reading the
//! socket itself.

use slice_deque::SliceDeque;

use crate::event::Event;

/// Default ring capacity: large enough to hold the largest frame this
/// implementation accepts without a resize (spec.md §3: "capacity must
/// accommodate the largest frame an implementation will accept (>= 64 KiB
/// recommended)").
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

pub struct RingBuffer {
    data: SliceDeque<u8>,
    capacity: usize,
}

impl RingBuffer {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let mut data = SliceDeque::new();
        data.reserve(capacity);
        RingBuffer { data, capacity }
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `put(bytes)`: atomic append. If `used + |bytes| > capacity` returns
    /// `false` and leaves the ring unchanged; else copies and returns
    /// `true` (spec.md §4.2, invariant 5 in spec.md §8).
    #[inline]
    pub fn put(&mut self, bytes: &[u8]) -> bool {
        if self.data.len() + bytes.len() > self.capacity {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    #[inline]
    fn consume(&mut self, count: usize) {
        unsafe { self.data.move_head(count as isize) };
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// `try_decode() -> Option<Event> | Corrupt` (spec.md §4.2).
    pub fn try_decode(&mut self) -> DecodeOutcome {
        let data = self.as_slice();
        if data.len() < 2 {
            return DecodeOutcome::Incomplete;
        }
        let len = u16::from_be_bytes([data[0], data[1]]) as usize;

        // A frame can never be shorter than its own 2-byte length prefix
        // plus the mandatory NUL terminator for the (possibly empty) name.
        if len < 3 {
            // Can't possibly contain a NUL; this is definitely corrupt.
            // Consume at least the 2-byte header we already parsed so the
            // decoder always makes forward progress.
            let drop_len = len.max(2);
            if data.len() < drop_len {
                return DecodeOutcome::Incomplete;
            }
            self.consume(drop_len);
            return DecodeOutcome::Corrupt;
        }

        if data.len() < len {
            return DecodeOutcome::Incomplete;
        }

        let body = &data[2..len];
        match body.iter().position(|&b| b == 0) {
            None => {
                // No NUL within the frame: corrupt, but still a complete
                // frame on the wire. Advance past it and report.
                self.consume(len);
                DecodeOutcome::Corrupt
            }
            Some(nul_idx) => {
                let name_bytes = &body[..nul_idx];
                let packet_bytes = body[nul_idx + 1..].to_vec();
                let name = String::from_utf8_lossy(name_bytes).into_owned();
                self.consume(len);

                if name.is_empty() {
                    // spec.md §3: "empty name is disallowed on decode".
                    DecodeOutcome::Corrupt
                } else {
                    DecodeOutcome::Event(Event::new(name, crate::codec::Packet::from_bytes(packet_bytes)))
                }
            }
        }
    }
}

#[derive(Debug)]
pub enum DecodeOutcome {
    /// Not enough bytes buffered yet for a complete frame.
    Incomplete,
    /// A complete frame was consumed but failed to parse into a valid
    /// Event (no NUL terminator, or an empty name); logged and dropped by
    /// the caller.
    Corrupt,
    Event(Event),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = 2 + name.len() + 1 + body.len();
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn put_fails_without_mutating_when_over_capacity() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.put(&[1, 2, 3, 4]));
        assert_eq!(ring.used(), 4);
        assert!(!ring.put(&[5]));
        assert_eq!(ring.used(), 4);
    }

    #[test]
    fn decode_smallest_legal_frame_is_corrupt_due_to_empty_name() {
        let mut ring = RingBuffer::new(DEFAULT_CAPACITY);
        assert!(ring.put(&[0x00, 0x03, 0x00]));
        assert!(matches!(ring.try_decode(), DecodeOutcome::Corrupt));
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn decode_incomplete_then_complete() {
        let mut ring = RingBuffer::new(DEFAULT_CAPACITY);
        let f = frame("hello", &[1, 2, 3]);
        ring.put(&f[..2]);
        assert!(matches!(ring.try_decode(), DecodeOutcome::Incomplete));
        ring.put(&f[2..]);
        match ring.try_decode() {
            DecodeOutcome::Event(ev) => {
                assert_eq!(ev.name, "hello");
                assert_eq!(ev.packet.as_bytes(), &[1, 2, 3]);
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn decode_feeding_in_small_chunks_matches_single_chunk() {
        let f = frame("n", &[9, 9]);
        let mut whole = RingBuffer::new(DEFAULT_CAPACITY);
        whole.put(&f);
        let whole_event = match whole.try_decode() {
            DecodeOutcome::Event(ev) => ev,
            other => panic!("{:?}", other),
        };

        let mut chunked = RingBuffer::new(DEFAULT_CAPACITY);
        for byte in &f {
            chunked.put(std::slice::from_ref(byte));
        }
        let chunked_event = match chunked.try_decode() {
            DecodeOutcome::Event(ev) => ev,
            other => panic!("{:?}", other),
        };

        assert_eq!(whole_event, chunked_event);
    }

    #[test]
    fn no_nul_is_corrupt_and_advances() {
        let mut ring = RingBuffer::new(DEFAULT_CAPACITY);
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u16.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]); // no NUL anywhere
        ring.put(&buf);
        assert!(matches!(ring.try_decode(), DecodeOutcome::Corrupt));
        assert_eq!(ring.used(), 0);
    }
}
