//! Parallel fold workers
//!
//! Each worker owns one accumulator and one snapshot slot. Per round the
//! orchestrator copies a batch into the snapshot, then all workers fold
//! their snapshots in parallel while the producer fills the next batches.
//! Workers never share mutable state; their accumulators are combined
//! once, after the last round.

use crate::accumulator::Accumulator;
use crate::batch::BatchSnapshot;
use crate::error::MergeError;
use crate::kmer::KmerKey;

/// One fold worker: an accumulator plus its private round input
pub struct Worker<K: KmerKey, A: Accumulator<K>> {
    /// The worker's statistics state
    pub accumulator: A,
    /// Round input, overwritten at each dispatch
    pub input: BatchSnapshot<K>,
}

impl<K: KmerKey, A: Accumulator<K>> Worker<K, A> {
    /// Create a worker over `nb_banks` datasets
    pub fn new(accumulator: A, nb_banks: usize) -> Self {
        Self {
            accumulator,
            input: BatchSnapshot::new(nb_banks),
        }
    }

    /// Fold every record of the current snapshot into the accumulator
    pub fn fold_input(&mut self) -> Result<(), MergeError> {
        for i in 0..self.input.len() {
            let record = self.input.record(i);
            self.accumulator
                .fold(record.key, record.abundances, record.presence)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::DistanceStats;
    use crate::batch::Batch;

    #[test]
    fn test_fold_snapshot() {
        let mut worker: Worker<u64, DistanceStats> =
            Worker::new(DistanceStats::new(2, true, false, 0, u32::MAX), 2);

        let mut batch = Batch::new(4, 2);
        batch.push(1, &[5, 1], 2);
        batch.push(2, &[0, 4], 1);
        batch.drain_into(&mut worker.input);

        worker.fold_input().unwrap();

        assert_eq!(worker.accumulator.distinct_kmers(0), 1);
        assert_eq!(worker.accumulator.distinct_kmers(1), 2);
        assert_eq!(worker.accumulator.shared_distinct(0, 1), 1);
        assert_eq!(worker.accumulator.total_kmers(1), 5);
    }

    #[test]
    fn test_empty_input_is_noop() {
        let mut worker: Worker<u64, DistanceStats> =
            Worker::new(DistanceStats::new(2, true, false, 0, u32::MAX), 2);
        worker.fold_input().unwrap();
        assert_eq!(worker.accumulator.distinct_kmers(0), 0);
    }
}
