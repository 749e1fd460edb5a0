use crate::store::client::MAX_BATCH_KEYS;
use std::mem;

/// Sealed group of orphaned primary keys, at most [`MAX_BATCH_KEYS`] long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanBatch {
    id: u64,
    keys: Vec<String>,
}

impl OrphanBatch {
    pub fn new(id: u64, keys: Vec<String>) -> Self {
        debug_assert!(keys.len() <= MAX_BATCH_KEYS, "batch exceeds backend limit");
        Self { id, keys }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}

/// Groups eligible keys into fixed-size batches.
#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    current: Vec<String>,
    next_id: u64,
}

impl BatchAccumulator {
    /// `capacity` is clamped to `1..=MAX_BATCH_KEYS`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BATCH_KEYS);
        Self {
            capacity,
            current: Vec::with_capacity(capacity),
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys waiting in the unsealed batch.
    pub fn pending(&self) -> usize {
        self.current.len()
    }

    /// Number of batches sealed so far.
    pub fn sealed(&self) -> u64 {
        self.next_id - 1
    }

    /// Appends a key, returning the sealed batch once it reaches capacity.
    pub fn push(&mut self, key: String) -> Option<OrphanBatch> {
        self.current.push(key);
        if self.current.len() >= self.capacity {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Seals whatever is left; `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<OrphanBatch> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    fn seal(&mut self) -> OrphanBatch {
        let keys = mem::replace(&mut self.current, Vec::with_capacity(self.capacity));
        let batch = OrphanBatch::new(self.next_id, keys);
        self.next_id += 1;
        batch
    }
}
