//! Audio context inserts.
//!
//! An `AudioContext` holds a registry of processing inserts that get
//! a shot at every buffer that passes through the context. Two
//! contracts hold for every insert:
//!
//! - its callbacks are interlocked: they never run concurrently with
//!   themselves (different inserts may run concurrently);
//! - `finalize` is the last call the insert ever receives.
//!
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

// Poisoning means a panic in some callback; the registry itself is
// still consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A processing insert. Implementations are driven by the context.
pub trait AudioInsert: Send {
    /// Process one buffer of interleaved samples in place.
    fn process(&mut self, buffer: &mut [f32]) -> io::Result<()>;

    /// Called exactly once, after which no other call is made.
    fn finalize(&mut self) {}
}

struct InsertInner {
    insert:    Box<dyn AudioInsert>,
    finalized: bool,
}

struct Slot {
    handle: u64,
    // One lock per insert: this is the interlock.
    state:  Arc<Mutex<InsertInner>>,
}

/// An audio processing context.
#[derive(Default)]
pub struct AudioContext {
    slots:       Mutex<Vec<Slot>>,
    next_handle: Mutex<u64>,
}

impl AudioContext {
    pub fn new() -> AudioContext {
        AudioContext::default()
    }

    /// Register an insert. Returns a handle for `unregister_insert`.
    pub fn register_insert(&self, insert: Box<dyn AudioInsert>) -> u64 {
        let mut next = lock(&self.next_handle);
        *next += 1;
        let handle = *next;
        drop(next);

        lock(&self.slots).push(Slot {
            handle,
            state: Arc::new(Mutex::new(InsertInner {
                insert,
                finalized: false,
            })),
        });
        handle
    }

    pub fn insert_count(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Run all inserts over a buffer, in registration order.
    pub fn process(&self, buffer: &mut [f32]) -> io::Result<()> {
        // Snapshot the registry so the lock is not held during the
        // callbacks.
        let states: Vec<Arc<Mutex<InsertInner>>> =
            lock(&self.slots).iter().map(|s| s.state.clone()).collect();
        for state in states {
            let mut inner = lock(&state);
            // Unregistered between the snapshot and here; finalize was
            // its last call, so it doesn't get this buffer anymore.
            if inner.finalized {
                continue;
            }
            inner.insert.process(buffer)?;
        }
        Ok(())
    }

    /// Unregister an insert. Its `finalize` runs before this returns,
    /// and after any callback that was already in flight.
    pub fn unregister_insert(&self, handle: u64) -> io::Result<()> {
        let mut slots = lock(&self.slots);
        let pos = match slots.iter().position(|s| s.handle == handle) {
            Some(pos) => pos,
            None => return Err(ioerr!(NotFound, "no audio insert with handle {}", handle)),
        };
        let slot = slots.remove(pos);
        drop(slots);

        let mut inner = lock(&slot.state);
        if !inner.finalized {
            inner.finalized = true;
            inner.insert.finalize();
        }
        Ok(())
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        for slot in slots.drain(..) {
            let mut inner = lock(&slot.state);
            if !inner.finalized {
                inner.finalized = true;
                inner.insert.finalize();
            }
        }
    }
}
