//! On-disk layout shared with the counting stage
//!
//! All stages of a run share one working directory:
//!
//! ```text
//! <dir>/datasetIds                           ordered dataset-id list
//! <dir>/solid/<dataset>/part_<p>.bin         sorted count stream, one per partition
//! <dir>/kmercount_per_partition/<dataset>.txt   per-partition record counts
//! <dir>/stats/part_<p>.bin                   persisted partition result
//! <dir>/merge_synchro/<p>.ok                 completion marker
//! ```
//!
//! The completion marker is the only cross-process synchronization
//! primitive: a waiting process polls for its existence and never reads
//! its content. It is written strictly after the result file.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::MergeError;

/// Path scheme for one run directory
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    base: PathBuf,
}

impl PartitionLayout {
    /// Create a layout rooted at `base`
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// The run directory
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The ordered dataset-id list file
    pub fn dataset_ids_path(&self) -> PathBuf {
        self.base.join("datasetIds")
    }

    /// Count stream for one dataset/partition
    pub fn count_stream_path(&self, dataset: &str, partition_id: usize) -> PathBuf {
        self.base
            .join("solid")
            .join(dataset)
            .join(format!("part_{}.bin", partition_id))
    }

    /// Per-partition record counts for one dataset
    pub fn kmer_count_path(&self, dataset: &str) -> PathBuf {
        self.base
            .join("kmercount_per_partition")
            .join(format!("{}.txt", dataset))
    }

    /// Persisted result for one partition
    pub fn stats_path(&self, partition_id: usize) -> PathBuf {
        self.base
            .join("stats")
            .join(format!("part_{}.bin", partition_id))
    }

    /// Completion marker for one partition
    pub fn marker_path(&self, partition_id: usize) -> PathBuf {
        self.base
            .join("merge_synchro")
            .join(format!("{}.ok", partition_id))
    }

    /// Read the ordered dataset-id list
    ///
    /// Blank lines are skipped; order defines the abundance-vector slot of
    /// each dataset. An empty list is a configuration error.
    pub fn read_dataset_ids(&self) -> Result<Vec<String>, MergeError> {
        let path = self.dataset_ids_path();
        let file = File::open(&path).map_err(|e| {
            MergeError::config(format!("cannot open dataset id list {:?}: {}", path, e))
        })?;

        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            ids.push(line.to_string());
        }

        if ids.is_empty() {
            return Err(MergeError::config(format!(
                "dataset id list {:?} is empty",
                path
            )));
        }
        Ok(ids)
    }

    /// Total record count for one partition, summed over datasets
    ///
    /// Reads line `partition_id` of each dataset's per-partition count
    /// file. Used only to size the progress reporter; returns `None` when
    /// any file is missing or short, and the caller falls back to the
    /// stream sizes.
    pub fn partition_record_count(&self, dataset_ids: &[String], partition_id: usize) -> Option<u64> {
        let mut total = 0u64;
        for dataset in dataset_ids {
            let file = File::open(self.kmer_count_path(dataset)).ok()?;
            let line = BufReader::new(file)
                .lines()
                .filter_map(|l| l.ok())
                .filter(|l| !l.trim().is_empty())
                .nth(partition_id)?;
            total += line.trim().parse::<u64>().ok()?;
        }
        Some(total)
    }

    /// Write the completion marker for a partition
    ///
    /// Must be called only after the result file is durably written; the
    /// marker's existence tells waiting processes the partition is done.
    pub fn write_completion_marker(&self, partition_id: usize) -> Result<(), MergeError> {
        let path = self.marker_path(partition_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&path)?;
        Ok(())
    }
}
