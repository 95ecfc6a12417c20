//! Persisted partition result
//!
//! The combined accumulator state of one partition plus its two scalar
//! counters, written as a small binary file the downstream combiner reads
//! back. Format: an 8-byte magic, a format version, the partition header
//! fields, then the accumulator's own serialized block.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::accumulator::{DistanceStats, StatsSink};

/// Magic bytes for the partition result file
const MAGIC: &[u8; 8] = b"KMDPART1";

/// File format version: (major, minor)
const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Final output of one partition merge
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionResult<A> {
    /// The partition this result covers
    pub partition_id: usize,
    /// Total distinct k-mers observed across all datasets
    pub nb_distinct_kmers: u64,
    /// Distinct k-mers present in more than one dataset
    pub nb_shared_distinct_kmers: u64,
    /// Combined accumulator state of all workers
    pub stats: A,
}

impl<A: StatsSink> PartitionResult<A> {
    /// Write the result to `writer`
    pub fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.0.to_le_bytes())?;
        writer.write_all(&FORMAT_VERSION.1.to_le_bytes())?;
        writer.write_all(&(self.partition_id as u64).to_le_bytes())?;
        writer.write_all(&self.nb_distinct_kmers.to_le_bytes())?;
        writer.write_all(&self.nb_shared_distinct_kmers.to_le_bytes())?;
        self.stats.write_to(writer)?;
        Ok(())
    }

    /// Persist the result to a file
    ///
    /// The parent directory is created if missing. The file appears only
    /// on success; a failed merge leaves nothing behind.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

impl PartitionResult<DistanceStats> {
    /// Read a result back, for the downstream combiner and for tests
    pub fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid magic for partition result file",
            ));
        }

        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let major = u32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let _minor = u32::from_le_bytes(word);
        if major != FORMAT_VERSION.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported partition result version {}", major),
            ));
        }

        let mut long = [0u8; 8];
        reader.read_exact(&mut long)?;
        let partition_id = u64::from_le_bytes(long) as usize;
        reader.read_exact(&mut long)?;
        let nb_distinct_kmers = u64::from_le_bytes(long);
        reader.read_exact(&mut long)?;
        let nb_shared_distinct_kmers = u64::from_le_bytes(long);

        let stats = DistanceStats::read_from(reader)?;
        Ok(Self {
            partition_id,
            nb_distinct_kmers,
            nb_shared_distinct_kmers,
            stats,
        })
    }

    /// Load a result file written by [`PartitionResult::save`]
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_roundtrip() {
        let mut stats = DistanceStats::new(2, true, false, 0, u32::MAX);
        Accumulator::<u64>::fold(&mut stats, 1, &[5, 1], 2).unwrap();

        let result = PartitionResult {
            partition_id: 7,
            nb_distinct_kmers: 3,
            nb_shared_distinct_kmers: 1,
            stats,
        };

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats").join("part_7.bin");
        result.save(&path).unwrap();

        let loaded = PartitionResult::load(&path).unwrap();
        assert_eq!(loaded, result);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let buf = vec![0u8; 64];
        assert!(PartitionResult::read_from(&mut buf.as_slice()).is_err());
    }
}
