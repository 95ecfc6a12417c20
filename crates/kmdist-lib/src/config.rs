//! Merge configuration
//!
//! Parameters for one partition merge: dataset list, k-mer size, worker
//! pool sizing, batching, and the filters applied to merged records.
//! Validated before any stream is opened.

use crate::constants::{
    is_valid_k, DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_ABUNDANCE, DEFAULT_MIN_ABUNDANCE, MAX_K, MIN_K,
};
use crate::error::MergeError;

/// Configuration parameters for merging one partition
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Partition to merge (one invocation handles exactly one partition)
    pub partition_id: usize,

    /// Ordered dataset identifiers; position i owns slot i of every
    /// abundance vector
    pub dataset_ids: Vec<String>,

    /// K-mer length (odd, between 3 and 63)
    pub kmer_size: usize,

    /// Number of worker accumulators (0 = all available cores)
    pub num_workers: usize,

    /// Merged records per worker batch
    pub batch_capacity: usize,

    /// Per-bank abundance range [min, max]; entries outside the range are
    /// invisible to the statistics but still counted by the engine's
    /// distinct/shared counters
    pub min_abundance: u32,
    /// Upper abundance bound (inclusive)
    pub max_abundance: u32,

    /// Compute the simple abundance-based distances (Bray-Curtis family)
    pub compute_simple_distances: bool,

    /// Compute the complex distances (Chord/dot-product family)
    pub compute_complex_distances: bool,

    /// Forward presence-1 records to the workers. Distinct/shared counters
    /// include singletons regardless of this knob.
    pub forward_singletons: bool,

    /// Minimum Shannon index of a k-mer's base composition, in [0, 2];
    /// keys below the threshold never enter the merge
    pub min_shannon_index: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            partition_id: 0,
            dataset_ids: Vec::new(),
            kmer_size: 31,
            num_workers: 0,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            min_abundance: DEFAULT_MIN_ABUNDANCE,
            max_abundance: DEFAULT_MAX_ABUNDANCE,
            compute_simple_distances: true,
            compute_complex_distances: false,
            forward_singletons: false,
            min_shannon_index: 0.0,
        }
    }
}

impl MergeConfig {
    /// Create a configuration for the given datasets and k-mer size
    pub fn new(dataset_ids: Vec<String>, kmer_size: usize) -> Result<Self, MergeError> {
        let config = Self {
            dataset_ids,
            kmer_size,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of datasets being compared
    pub fn nb_banks(&self) -> usize {
        self.dataset_ids.len()
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), MergeError> {
        if self.dataset_ids.is_empty() {
            return Err(MergeError::config("dataset id list is empty"));
        }
        if self.dataset_ids.len() > u16::MAX as usize {
            return Err(MergeError::config(format!(
                "too many datasets: {} (max {})",
                self.dataset_ids.len(),
                u16::MAX
            )));
        }
        if !is_valid_k(self.kmer_size) {
            return Err(MergeError::config(format!(
                "kmer_size must be odd and in [{}, {}], got {}",
                MIN_K, MAX_K, self.kmer_size
            )));
        }
        if self.batch_capacity == 0 {
            return Err(MergeError::config("batch_capacity must be > 0"));
        }
        if self.min_abundance > self.max_abundance {
            return Err(MergeError::config(format!(
                "abundance range is empty: min {} > max {}",
                self.min_abundance, self.max_abundance
            )));
        }
        if !(0.0..=2.0).contains(&self.min_shannon_index) {
            return Err(MergeError::config(format!(
                "min_shannon_index must be in [0.0, 2.0], got {}",
                self.min_shannon_index
            )));
        }
        Ok(())
    }

    /// Effective worker count (resolves 0 to the available parallelism)
    pub fn effective_workers(&self) -> usize {
        if self.num_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_workers
        }
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Merge Configuration:");
        tracing::info!("  partition_id = {}", self.partition_id);
        tracing::info!("  nb_banks = {}", self.nb_banks());
        tracing::info!("  kmer_size = {}", self.kmer_size);
        if self.num_workers == 0 {
            tracing::info!("  num_workers = all available cores");
        } else {
            tracing::info!("  num_workers = {}", self.num_workers);
        }
        tracing::debug!("  batch_capacity = {}", self.batch_capacity);
        tracing::debug!(
            "  abundance range = [{}, {}]",
            self.min_abundance,
            self.max_abundance
        );
        tracing::info!("  simple distances = {}", self.compute_simple_distances);
        tracing::info!("  complex distances = {}", self.compute_complex_distances);
        tracing::debug!("  forward_singletons = {}", self.forward_singletons);
        tracing::debug!("  min_shannon_index = {}", self.min_shannon_index);
    }
}
