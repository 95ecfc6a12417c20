// kmdist: k-mer based dataset similarity, merge stage
//
// Merges the sorted per-dataset k-mer count streams of one partition into
// a single stream of distinct k-mers annotated with per-dataset abundance
// vectors, and folds that stream into the pairwise statistics used to
// estimate similarity between datasets.

#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod accumulator;
pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod kmer;
pub mod layout;
pub mod merge;
pub mod orchestrator;
pub mod result;
pub mod stream;
pub mod worker;

// Re-export common types at crate root
pub use accumulator::{Accumulator, DistanceStats, StatsSink};
pub use config::MergeConfig;
pub use error::MergeError;
pub use kmer::KmerKey;
pub use layout::PartitionLayout;
pub use merge::{MergeEngine, MergeState};
pub use orchestrator::{merge_partition_files, PartitionMerger};
pub use result::PartitionResult;
pub use stream::{BankStream, CountSource, MmapSource, VecSource};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
