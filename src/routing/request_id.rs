use std::sync::atomic::{AtomicU64, Ordering};

/// Per-router call identifiers: a random 128-bit seed XOR a sequence number.
#[derive(Debug)]
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    /// Allocate the next call id.
    pub(crate) fn next_id(&self) -> (u64, uuid::Uuid) {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        (seq, uuid::Uuid::from_u128(self.seed ^ u128::from(seq)))
    }
}
