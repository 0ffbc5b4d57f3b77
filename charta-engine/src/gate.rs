//! Repaint gate: suspend/resume around a mutation batch.
//!
//! While suspended, refresh requests only mark elements dirty; `resume`
//! drains the dirty set into a single coalesced repaint. Both toggles are
//! idempotent. Counters are atomics so the hot path never takes the lock
//! unless an id has to be recorded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// The suspend/resume pair around a batch.
#[derive(Debug, Default)]
pub struct RenderGate {
    suspended: AtomicBool,
    dirty: Mutex<HashSet<String>>,
    full_repaint_pending: AtomicBool,
    repaints: AtomicU64,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend repainting. A no-op when already suspended.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    /// Resume repainting: performs one coalesced repaint covering every
    /// element marked dirty while suspended, and returns how many were
    /// flushed. A no-op (returning 0) when not suspended.
    pub fn resume(&self) -> usize {
        if !self.suspended.swap(false, Ordering::SeqCst) {
            return 0;
        }
        let mut dirty = self.dirty.lock().expect("render gate dirty set poisoned");
        let full = self.full_repaint_pending.swap(false, Ordering::SeqCst);
        let flushed = dirty.len();
        if full || flushed > 0 {
            self.repaints.fetch_add(1, Ordering::Relaxed);
        }
        dirty.clear();
        flushed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Request a repaint of one element. Deferred while suspended,
    /// immediate otherwise.
    pub fn request_refresh(&self, id: &str) {
        if self.is_suspended() {
            self.dirty
                .lock()
                .expect("render gate dirty set poisoned")
                .insert(id.to_string());
        } else {
            self.repaints.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Request a full repaint.
    pub fn request_full_refresh(&self) {
        if self.is_suspended() {
            self.full_repaint_pending.store(true, Ordering::SeqCst);
        } else {
            self.repaints.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of elements currently marked dirty.
    pub fn dirty_len(&self) -> usize {
        self.dirty
            .lock()
            .expect("render gate dirty set poisoned")
            .len()
    }

    /// Total repaints performed (immediate + coalesced).
    pub fn repaint_count(&self) -> u64 {
        self.repaints.load(Ordering::Relaxed)
    }
}
