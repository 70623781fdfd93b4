//! Deterministic short order ids.
//!
//! Ids are the first eight hex characters of BLAKE3(seed ‖ counter). The same
//! seed reproduces the same id sequence, so a re-run with identical inputs
//! emits byte-identical order results.

/// Monotonic order-id generator seeded per run.
#[derive(Debug, Clone)]
pub struct OrderIdGen {
    seed: u64,
    next: u64,
}

impl OrderIdGen {
    pub fn new(seed: u64) -> Self {
        Self { seed, next: 0 }
    }

    /// Produce the next 8-hex-char order id.
    pub fn next_id(&mut self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&self.next.to_le_bytes());
        self.next += 1;
        let hash = hasher.finalize();
        hash.as_bytes()[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
