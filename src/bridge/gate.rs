//! Single-slot admission gate
//!
//! At most one inference may be in flight. Admission never waits: a caller
//! either gets the slot or is told the server is busy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Non-blocking mutual exclusion over the inference slot
#[derive(Debug, Clone, Default)]
pub struct SingleSlotGate {
    occupied: Arc<AtomicBool>,
}

impl SingleSlotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. Returns `None` immediately if it is taken.
    pub fn try_enter(&self) -> Option<SlotPermit> {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotPermit {
                occupied: Arc::clone(&self.occupied),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}

/// Ownership of the inference slot. Dropping it releases the slot, on every
/// exit path including unwinding.
#[derive(Debug)]
pub struct SlotPermit {
    occupied: Arc<AtomicBool>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.occupied.store(false, Ordering::Release);
    }
}
