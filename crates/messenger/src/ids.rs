//! Correlation id minting.
//!
//! Each generator draws a random 64-bit origin once and then counts. Two
//! nodes never need to agree on anything for their ids to stay distinct.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use invokerpc::CorrelationId;

#[derive(Debug)]
pub struct IdGenerator {
    origin: u64,
    next: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::with_origin(rand::random())
    }

    pub fn with_origin(origin: u64) -> Self {
        Self { origin, next: AtomicU64::new(1) }
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Returns an id never returned before by this generator.
    pub fn next(&self) -> CorrelationId {
        CorrelationId::new(self.origin, self.next.fetch_add(1, Ordering::Relaxed))
    }
}
