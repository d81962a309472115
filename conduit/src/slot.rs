//! Type-erased, optionally-empty callback slots used by `EventConsumer`
//! and `EventListener` (spec.md §3, "Consumer" / "Listener" field lists:
//! `on_connect`, `on_event`, `on_disconnect`, `on_server_disconnect`, and
//! per-name bound slots).
//!
//! A bound closure captures whatever receiver the caller wants invoked
//! (often `self` behind an `Arc`); the caller is responsible for making
//! sure that receiver outlives the slot, same as any `Fn` closure in safe
//! Rust — there is no unsafe lifetime-erasure trick here, just `Arc` and a
//! mutex so the slot can be set once up front and called repeatedly from
//! the worker thread.

use std::sync::{Arc, Mutex};

/// A slot taking a single argument by reference (`on_connect`,
/// `on_disconnect`, per-name bound handlers collapse the connection
/// argument here too via [`Slot2`]).
pub struct Slot1<A: ?Sized> {
    f: Mutex<Option<Arc<dyn Fn(&A) + Send + Sync>>>,
}

impl<A: ?Sized> Slot1<A> {
    pub fn empty() -> Self {
        Slot1 { f: Mutex::new(None) }
    }

    pub fn set<F: Fn(&A) + Send + Sync + 'static>(&self, f: F) {
        *self.f.lock().expect("slot lock poisoned") = Some(Arc::new(f));
    }

    pub fn is_set(&self) -> bool {
        self.f.lock().expect("slot lock poisoned").is_some()
    }

    /// Invokes the slot if set; no-op otherwise. Panics from the callback
    /// are not caught here — callers that must never let a panic take down
    /// the worker thread wrap this in `catch_unwind` (spec.md §4.4:
    /// "Exceptions thrown by the slot are caught and logged").
    pub fn call(&self, a: &A) {
        let f = self.f.lock().expect("slot lock poisoned").clone();
        if let Some(f) = f {
            f(a);
        }
    }
}

impl<A: ?Sized> Default for Slot1<A> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A slot taking two arguments by reference (bound event handlers,
/// catch-all `on_event`: `(&Connection, &Event)`).
pub struct Slot2<A: ?Sized, B: ?Sized> {
    f: Mutex<Option<Arc<dyn Fn(&A, &B) + Send + Sync>>>,
}

impl<A: ?Sized, B: ?Sized> Slot2<A, B> {
    pub fn empty() -> Self {
        Slot2 { f: Mutex::new(None) }
    }

    pub fn set<F: Fn(&A, &B) + Send + Sync + 'static>(&self, f: F) {
        *self.f.lock().expect("slot lock poisoned") = Some(Arc::new(f));
    }

    pub fn is_set(&self) -> bool {
        self.f.lock().expect("slot lock poisoned").is_some()
    }

    pub fn call(&self, a: &A, b: &B) {
        let f = self.f.lock().expect("slot lock poisoned").clone();
        if let Some(f) = f {
            f(a, b);
        }
    }
}

impl<A: ?Sized, B: ?Sized> Default for Slot2<A, B> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_slot_call_is_noop() {
        let slot: Slot1<i32> = Slot1::empty();
        assert!(!slot.is_set());
        slot.call(&42); // must not panic
    }

    #[test]
    fn set_slot_is_invoked() {
        let slot: Slot1<i32> = Slot1::empty();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        slot.set(move |v: &i32| seen2.store(*v as usize, Ordering::SeqCst));
        assert!(slot.is_set());
        slot.call(&7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn two_arg_slot_receives_both() {
        let slot: Slot2<i32, i32> = Slot2::empty();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        slot.set(move |a: &i32, b: &i32| seen2.store((*a + *b) as usize, Ordering::SeqCst));
        slot.call(&3, &4);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
