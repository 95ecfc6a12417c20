//! Partition orchestration
//!
//! [`PartitionMerger`] owns the merge engine and the worker pool and
//! drives them through synchronized double-buffered rounds:
//!
//! 1. the engine fills the W batches (`Merging`),
//! 2. each batch is snapshotted into its worker and reset (`Dispatching`,
//!    a brief exclusive phase with no concurrent mutation),
//! 3. the workers fold the snapshots *while* the engine produces the next
//!    batches; one `rayon::join` per round is the barrier.
//!
//! Production of round k+1 therefore overlaps consumption of round k, and
//! peak in-flight merged records stay bounded by W × batch capacity. When
//! the engine is exhausted, the final partial batches are drained with one
//! last fold round, the workers' accumulators are combined, and the
//! partition result is persisted followed by the completion marker.
//!
//! Any stream or accumulator error aborts the whole partition: nothing is
//! persisted and no marker is written, so downstream waiters observe the
//! failure as absence.

use std::sync::atomic::Ordering;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::accumulator::{Accumulator, DistanceStats};
use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::kmer::KmerKey;
use crate::layout::PartitionLayout;
use crate::merge::{MergeEngine, MergeState};
use crate::result::PartitionResult;
use crate::stream::{BankStream, CountSource, MmapSource};
use crate::worker::Worker;

/// Drives one partition merge to completion
pub struct PartitionMerger<K: KmerKey, S: CountSource<K>, A: Accumulator<K>> {
    partition_id: usize,
    engine: MergeEngine<K, S>,
    workers: Vec<Worker<K, A>>,
    num_workers: usize,
    progress_total: u64,
}

impl<K: KmerKey, S: CountSource<K>, A: Accumulator<K>> PartitionMerger<K, S, A> {
    /// Create a merger over already-opened streams
    ///
    /// `make_accumulator` builds one fresh accumulator per worker.
    /// `progress_total` is the expected number of source records, used
    /// only for progress reporting (0 disables the estimate).
    pub fn new(
        config: &MergeConfig,
        streams: Vec<BankStream<K, S>>,
        make_accumulator: impl Fn() -> A,
        progress_total: u64,
    ) -> Result<Self, MergeError> {
        config.validate()?;
        if streams.len() != config.nb_banks() {
            return Err(MergeError::config(format!(
                "expected {} streams, got {}",
                config.nb_banks(),
                streams.len()
            )));
        }

        let num_workers = config.effective_workers();
        let nb_banks = config.nb_banks();

        let engine = MergeEngine::new(
            streams,
            num_workers,
            config.batch_capacity,
            config.forward_singletons,
        )?;
        let workers = (0..num_workers)
            .map(|_| Worker::new(make_accumulator(), nb_banks))
            .collect();

        Ok(Self {
            partition_id: config.partition_id,
            engine,
            workers,
            num_workers,
            progress_total,
        })
    }

    /// Run the round loop and combine the workers' accumulators
    ///
    /// Installs a rayon pool sized to the worker count; the merge producer
    /// and the W folds of a round share it.
    pub fn run(mut self) -> Result<PartitionResult<A>, MergeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers + 1)
            .build()
            .map_err(|e| MergeError::config(format!("failed to create thread pool: {e}")))?;

        pool.install(|| self.run_rounds())?;

        // Combine the per-worker states; order does not matter
        let mut workers = self.workers.into_iter();
        let mut combined = workers
            .next()
            .expect("worker count validated to be >= 1")
            .accumulator;
        for worker in workers {
            combined.merge_from(&worker.accumulator);
        }

        info!(
            "Partition {}: {} distinct kmers, {} shared",
            self.partition_id,
            self.engine.nb_distinct_kmers(),
            self.engine.nb_shared_distinct_kmers()
        );

        Ok(PartitionResult {
            partition_id: self.partition_id,
            nb_distinct_kmers: self.engine.nb_distinct_kmers(),
            nb_shared_distinct_kmers: self.engine.nb_shared_distinct_kmers(),
            stats: combined,
        })
    }

    fn run_rounds(&mut self) -> Result<(), MergeError> {
        let engine = &mut self.engine;
        let workers = &mut self.workers;
        let progress = engine.progress();
        let progress_total = self.progress_total;

        // Round 0: produce the first batches with nothing to fold yet
        let mut state = engine.run()?;
        let mut round = 0u64;

        loop {
            // Dispatch: snapshot each batch into its worker, then reset.
            // Nothing else runs here, so producer and consumers never see
            // the same batch slot.
            for (worker, batch) in workers.iter_mut().zip(engine.batches_mut()) {
                batch.drain_into(&mut worker.input);
            }
            engine.reset_batches();

            round += 1;
            debug!(
                round,
                processed = progress.load(Ordering::Relaxed),
                total = progress_total,
                "dispatching round"
            );

            if state == MergeState::Exhausted {
                // Drain: fold the final snapshots, no more production
                workers
                    .par_iter_mut()
                    .try_for_each(|worker| worker.fold_input())?;
                return Ok(());
            }

            // Overlap production of the next round with consumption of
            // this one; the join is the round barrier.
            let (merge_state, fold_result) = rayon::join(
                || engine.run(),
                || {
                    workers
                        .par_iter_mut()
                        .try_for_each(|worker| worker.fold_input())
                },
            );
            fold_result?;
            state = merge_state?;
        }
    }
}

/// Merge one partition from count files on disk and persist the result
///
/// Opens the per-dataset streams under `layout`, runs the merge, writes
/// `stats/part_<p>.bin` and finally the completion marker. On any error
/// neither file is written.
pub fn merge_partition_files<K: KmerKey>(
    config: &MergeConfig,
    layout: &PartitionLayout,
) -> Result<PartitionResult<DistanceStats>, MergeError> {
    config.validate()?;
    config.print();

    let mut streams = Vec::with_capacity(config.nb_banks());
    let mut total_records = 0u64;
    for (bank, dataset) in config.dataset_ids.iter().enumerate() {
        let path = layout.count_stream_path(dataset, config.partition_id);
        let source = MmapSource::<K>::open(&path, bank)?;
        total_records += source.num_records() as u64;
        streams.push(BankStream::new(
            source,
            bank as u16,
            config.kmer_size,
            config.min_shannon_index,
        ));
    }

    // The counting stage's per-partition totals are only a progress hint;
    // fall back to the actual stream sizes when absent.
    let progress_total = layout
        .partition_record_count(&config.dataset_ids, config.partition_id)
        .unwrap_or(total_records);
    info!(
        "Merging partition {} over {} banks ({} records)",
        config.partition_id,
        config.nb_banks(),
        progress_total
    );

    let merger = PartitionMerger::new(
        config,
        streams,
        || {
            DistanceStats::new(
                config.nb_banks(),
                config.compute_simple_distances,
                config.compute_complex_distances,
                config.min_abundance,
                config.max_abundance,
            )
        },
        progress_total,
    )?;

    let result = merger.run()?;

    result.save(layout.stats_path(config.partition_id))?;
    layout.write_completion_marker(config.partition_id)?;
    info!("Partition {} complete", config.partition_id);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::VecSource;

    fn config(nb_banks: usize, workers: usize, batch_capacity: usize) -> MergeConfig {
        MergeConfig {
            dataset_ids: (0..nb_banks).map(|i| format!("bank{}", i)).collect(),
            num_workers: workers,
            batch_capacity,
            forward_singletons: true,
            ..MergeConfig::default()
        }
    }

    fn run_merge(
        inputs: Vec<Vec<(u64, u32)>>,
        workers: usize,
        batch_capacity: usize,
    ) -> PartitionResult<DistanceStats> {
        let cfg = config(inputs.len(), workers, batch_capacity);
        let streams = inputs
            .into_iter()
            .enumerate()
            .map(|(bank, records)| {
                BankStream::new(VecSource::new(records), bank as u16, cfg.kmer_size, 0.0)
            })
            .collect();
        let merger = PartitionMerger::new(
            &cfg,
            streams,
            || DistanceStats::new(cfg.nb_banks(), true, false, 0, u32::MAX),
            0,
        )
        .unwrap();
        merger.run().unwrap()
    }

    #[test]
    fn test_small_merge_counters() {
        let result = run_merge(
            vec![vec![(1, 5), (3, 2)], vec![(1, 1), (2, 4)]],
            2,
            4,
        );
        assert_eq!(result.nb_distinct_kmers, 3);
        assert_eq!(result.nb_shared_distinct_kmers, 1);
        assert_eq!(result.stats.shared_distinct(0, 1), 1);
        assert_eq!(result.stats.total_kmers(0), 7);
        assert_eq!(result.stats.total_kmers(1), 5);
    }

    #[test]
    fn test_result_invariant_under_batching() {
        // Same input, different worker counts and batch capacities, must
        // combine to the same statistics
        let inputs = || {
            vec![
                (0..50u64).map(|k| (k * 3, (k % 7 + 1) as u32)).collect(),
                (0..50u64).map(|k| (k * 2, (k % 5 + 1) as u32)).collect(),
                (0..50u64).map(|k| (k * 5, (k % 3 + 1) as u32)).collect(),
            ]
        };

        let baseline = run_merge(inputs(), 1, 1024);
        for (workers, capacity) in [(1usize, 1usize), (2, 3), (4, 8), (3, 1000)] {
            let result = run_merge(inputs(), workers, capacity);
            assert_eq!(
                result.stats, baseline.stats,
                "stats differ for W={} capacity={}",
                workers, capacity
            );
            assert_eq!(result.nb_distinct_kmers, baseline.nb_distinct_kmers);
            assert_eq!(
                result.nb_shared_distinct_kmers,
                baseline.nb_shared_distinct_kmers
            );
        }
    }

    #[test]
    fn test_empty_partition() {
        let result = run_merge(vec![vec![], vec![]], 2, 8);
        assert_eq!(result.nb_distinct_kmers, 0);
        assert_eq!(result.nb_shared_distinct_kmers, 0);
        assert_eq!(result.stats.distinct_kmers(0), 0);
    }

    #[test]
    fn test_stream_count_mismatch_is_config_error() {
        let cfg = config(3, 1, 8);
        let streams = vec![BankStream::new(
            VecSource::<u64>::new(vec![]),
            0,
            cfg.kmer_size,
            0.0,
        )];
        let result = PartitionMerger::new(
            &cfg,
            streams,
            || DistanceStats::new(3, true, false, 0, u32::MAX),
            0,
        );
        assert!(matches!(result, Err(MergeError::Config(_))));
    }
}
