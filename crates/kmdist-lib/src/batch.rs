//! Fixed-capacity batches of merged records
//!
//! The merge producer fills one [`Batch`] per worker, round-robin. A batch
//! is a flat arena: keys, presence counts and the per-bank abundance
//! vectors live in parallel vectors, with the abundance vectors packed at
//! a stride of `nb_banks`. Nothing reallocates after construction; reset
//! is an O(1) length-zeroing.
//!
//! At the round boundary the orchestrator copies each batch's valid prefix
//! into the owning worker's private [`BatchSnapshot`] and resets the
//! batch, so the next merge phase can start writing immediately while the
//! worker folds the snapshot.

use crate::kmer::KmerKey;

/// One merged record, borrowed from a batch or snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRecord<'a, K: KmerKey> {
    /// The distinct k-mer
    pub key: K,
    /// Per-dataset abundances, slot i for dataset i (0 if absent)
    pub abundances: &'a [u32],
    /// Number of datasets with a non-zero abundance
    pub presence: u32,
}

/// Fixed-capacity buffer of merged records, owned by the producer side
pub struct Batch<K: KmerKey> {
    keys: Vec<K>,
    abundances: Vec<u32>,
    presences: Vec<u32>,
    len: usize,
    capacity: usize,
    nb_banks: usize,
}

impl<K: KmerKey> Batch<K> {
    /// Allocate a batch for `capacity` records over `nb_banks` datasets
    pub fn new(capacity: usize, nb_banks: usize) -> Self {
        Self {
            keys: vec![K::ZERO; capacity],
            abundances: vec![0; capacity * nb_banks],
            presences: vec![0; capacity],
            len: 0,
            capacity,
            nb_banks,
        }
    }

    /// Records currently stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no record has been pushed since the last reset
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once `capacity` records are stored
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Copy one merged record into the next free slot
    ///
    /// The abundance vector is copied, not moved: the producer reuses its
    /// vector for the next group.
    ///
    /// # Panics
    /// If the batch is full or `abundances.len() != nb_banks`.
    pub fn push(&mut self, key: K, abundances: &[u32], presence: u32) {
        assert!(self.len < self.capacity, "batch overflow");
        assert_eq!(abundances.len(), self.nb_banks);

        let slot = self.len;
        self.keys[slot] = key;
        self.presences[slot] = presence;
        let start = slot * self.nb_banks;
        self.abundances[start..start + self.nb_banks].copy_from_slice(abundances);
        self.len += 1;
    }

    /// Copy the valid prefix into `snapshot` and reset this batch
    pub fn drain_into(&mut self, snapshot: &mut BatchSnapshot<K>) {
        snapshot.copy_from(
            &self.keys[..self.len],
            &self.abundances[..self.len * self.nb_banks],
            &self.presences[..self.len],
        );
        self.len = 0;
    }

    /// Drop all records without copying them anywhere
    pub fn reset(&mut self) {
        self.len = 0;
    }
}

/// Worker-private copy of one batch's contents for a round
///
/// Allocated once per worker and overwritten each round; the vectors only
/// grow on the first rounds and are reused afterwards.
#[derive(Debug)]
pub struct BatchSnapshot<K: KmerKey> {
    keys: Vec<K>,
    abundances: Vec<u32>,
    presences: Vec<u32>,
    len: usize,
    nb_banks: usize,
}

impl<K: KmerKey> BatchSnapshot<K> {
    /// Create an empty snapshot for `nb_banks` datasets
    pub fn new(nb_banks: usize) -> Self {
        Self {
            keys: Vec::new(),
            abundances: Vec::new(),
            presences: Vec::new(),
            len: 0,
            nb_banks,
        }
    }

    fn copy_from(&mut self, keys: &[K], abundances: &[u32], presences: &[u32]) {
        self.keys.clear();
        self.keys.extend_from_slice(keys);
        self.abundances.clear();
        self.abundances.extend_from_slice(abundances);
        self.presences.clear();
        self.presences.extend_from_slice(presences);
        self.len = keys.len();
    }

    /// Records held by this snapshot
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the last round handed this worker nothing
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The record at `index`
    pub fn record(&self, index: usize) -> MergedRecord<'_, K> {
        let start = index * self.nb_banks;
        MergedRecord {
            key: self.keys[index],
            abundances: &self.abundances[start..start + self.nb_banks],
            presence: self.presences[index],
        }
    }

    /// Iterate the records in key order
    pub fn iter(&self) -> impl Iterator<Item = MergedRecord<'_, K>> {
        (0..self.len).map(move |i| self.record(i))
    }
}
