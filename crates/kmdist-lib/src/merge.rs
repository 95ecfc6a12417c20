//! N-way merge of sorted per-dataset count streams
//!
//! [`MergeEngine`] scans N sorted streams in lockstep and emits one record
//! per distinct k-mer, carrying the per-dataset abundance vector and the
//! number of datasets that contain the k-mer. Emission is in strictly
//! ascending key order.
//!
//! ## Lazy requeue
//!
//! The engine keeps a min-heap of `(key, bank)` pairs, but the stream that
//! supplied the last consumed record (the "current best") is held outside
//! the heap. After advancing it, if its new key still equals the open
//! group's key the abundance is accumulated with no heap traffic at all;
//! only when the key changes does the stream go back into the heap. Runs
//! of equal keys therefore cost one comparison each instead of a
//! push/pop pair.
//!
//! ## Batching
//!
//! Closed groups are copied round-robin into the W worker batches. When
//! the last batch fills, [`MergeEngine::run`] returns
//! [`MergeState::AllBatchesFull`] with the open group's state intact; the
//! orchestrator snapshots and resets the batches, then calls `run` again.
//! The final partial group is flushed when every stream is exhausted.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::batch::Batch;
use crate::error::MergeError;
use crate::kmer::KmerKey;
use crate::stream::{BankStream, CountSource};

/// Execution state of the merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// More input remains and batch space is available
    Running,
    /// Every worker batch is full; a dispatch round is required
    AllBatchesFull,
    /// All streams drained and the final group closed (terminal)
    Exhausted,
}

/// N-way merge engine producing unique-key records into worker batches
pub struct MergeEngine<K: KmerKey, S: CountSource<K>> {
    streams: Vec<BankStream<K, S>>,
    /// Streams whose current key is not yet confirmed part of the open
    /// group; Reverse turns the max-heap into a min-heap
    heap: BinaryHeap<Reverse<(K, u16)>>,
    /// The stream whose record was consumed last (lazy-requeue slot)
    best: usize,

    group_key: K,
    abundances: Vec<u32>,
    presence: u32,
    group_open: bool,

    batches: Vec<Batch<K>>,
    active_batch: usize,
    state: MergeState,

    nb_distinct_kmers: u64,
    nb_shared_distinct_kmers: u64,
    forward_singletons: bool,

    /// Source records consumed, updated only by the producer; safe for a
    /// progress reporter to read concurrently
    processed: Arc<AtomicU64>,
}

impl<K: KmerKey, S: CountSource<K>> MergeEngine<K, S> {
    /// Create an engine over the given streams and prime it
    ///
    /// `num_batches` is the worker count W; each batch holds
    /// `batch_capacity` records. Streams must be indexed consistently with
    /// their `bank_id`.
    pub fn new(
        mut streams: Vec<BankStream<K, S>>,
        num_batches: usize,
        batch_capacity: usize,
        forward_singletons: bool,
    ) -> Result<Self, MergeError> {
        let nb_banks = streams.len();

        // Prime every stream and queue the non-empty ones
        let mut heap = BinaryHeap::with_capacity(nb_banks);
        for (bank, stream) in streams.iter_mut().enumerate() {
            if stream.advance()? {
                heap.push(Reverse((stream.key(), bank as u16)));
            }
        }

        let batches = (0..num_batches)
            .map(|_| Batch::new(batch_capacity, nb_banks))
            .collect();

        let mut engine = Self {
            streams,
            heap,
            best: 0,
            group_key: K::ZERO,
            abundances: vec![0; nb_banks],
            presence: 0,
            group_open: false,
            batches,
            active_batch: 0,
            state: MergeState::Running,
            nb_distinct_kmers: 0,
            nb_shared_distinct_kmers: 0,
            forward_singletons,
            processed: Arc::new(AtomicU64::new(0)),
        };

        // Open the first group from the global minimum; an empty heap
        // means zero records across all streams.
        match engine.heap.pop() {
            Some(Reverse((_, bank))) => {
                engine.best = bank as usize;
                engine.open_group(bank as usize);
            }
            None => engine.state = MergeState::Exhausted,
        }
        Ok(engine)
    }

    /// Handle to the synchronized progress counter (records consumed)
    pub fn progress(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.processed)
    }

    /// Distinct k-mers emitted so far
    pub fn nb_distinct_kmers(&self) -> u64 {
        self.nb_distinct_kmers
    }

    /// Distinct k-mers present in more than one dataset
    pub fn nb_shared_distinct_kmers(&self) -> u64 {
        self.nb_shared_distinct_kmers
    }

    /// Current execution state
    pub fn state(&self) -> MergeState {
        self.state
    }

    /// The worker batches, for snapshot-and-reset at the round boundary
    pub fn batches_mut(&mut self) -> &mut [Batch<K>] {
        &mut self.batches
    }

    /// Seed the group state from the current record of `bank`
    fn open_group(&mut self, bank: usize) {
        self.group_key = self.streams[bank].key();
        self.abundances.fill(0);
        self.abundances[self.streams[bank].bank_id() as usize] = self.streams[bank].abundance();
        self.presence = 1;
        self.group_open = true;
    }

    /// Fold the current record of `bank` into the open group
    fn accumulate(&mut self, bank: usize) {
        let slot = self.streams[bank].bank_id() as usize;
        self.abundances[slot] += self.streams[bank].abundance();
        self.presence += 1;
    }

    /// Emit the open group; returns true when the last batch just filled
    fn close_group(&mut self) -> bool {
        self.nb_distinct_kmers += 1;
        if self.presence > 1 {
            self.nb_shared_distinct_kmers += 1;
        }
        self.processed
            .fetch_add(self.presence as u64, Ordering::Relaxed);

        // Singletons are counted above regardless; forwarding them to the
        // workers is a configuration decision.
        if self.presence > 1 || self.forward_singletons {
            self.batches[self.active_batch].push(self.group_key, &self.abundances, self.presence);
            if self.batches[self.active_batch].is_full() {
                self.active_batch += 1;
                if self.active_batch == self.batches.len() {
                    return true;
                }
            }
        }
        self.group_open = false;
        false
    }

    /// Reset batch fill state for the next merging phase
    ///
    /// Called by the orchestrator after snapshotting; `Batch::drain_into`
    /// already zeroes the per-batch lengths, this only rewinds the
    /// round-robin cursor and leaves `AllBatchesFull`.
    pub fn reset_batches(&mut self) {
        self.active_batch = 0;
        if self.state == MergeState::AllBatchesFull {
            self.state = MergeState::Running;
        }
    }

    /// Run the merge until all batches are full or input is exhausted
    ///
    /// Resumable: after `AllBatchesFull`, snapshot the batches, call
    /// [`MergeEngine::reset_batches`], and call `run` again. Returns the
    /// new state.
    pub fn run(&mut self) -> Result<MergeState, MergeError> {
        if self.state == MergeState::Exhausted {
            return Ok(MergeState::Exhausted);
        }
        debug_assert!(
            self.state == MergeState::Running,
            "run() called without reset_batches() after a full round"
        );

        loop {
            // Advance the stream whose record was consumed last
            if !self.streams[self.best].advance()? {
                match self.heap.pop() {
                    None => {
                        // Everything drained: flush the final group
                        if self.group_open {
                            self.close_group();
                        }
                        self.state = MergeState::Exhausted;
                        debug!(
                            distinct = self.nb_distinct_kmers,
                            shared = self.nb_shared_distinct_kmers,
                            "merge exhausted"
                        );
                        return Ok(MergeState::Exhausted);
                    }
                    Some(Reverse((_, bank))) => self.best = bank as usize,
                }
            }

            if self.streams[self.best].key() == self.group_key {
                self.accumulate(self.best);
                continue;
            }

            // Key changed: requeue and take the global minimum
            self.heap
                .push(Reverse((self.streams[self.best].key(), self.best as u16)));
            let Reverse((min_key, bank)) = self
                .heap
                .pop()
                .expect("heap holds at least the entry just pushed");
            self.best = bank as usize;

            if min_key == self.group_key {
                // Another stream still sits on the group's key
                self.accumulate(self.best);
                continue;
            }

            // The group is complete: emit it and open the next one
            let all_full = self.close_group();
            self.open_group(self.best);
            if all_full {
                self.state = MergeState::AllBatchesFull;
                return Ok(MergeState::AllBatchesFull);
            }
        }
    }
}
