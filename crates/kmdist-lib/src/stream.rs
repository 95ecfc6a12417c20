//! Per-dataset sorted count streams
//!
//! The upstream counting stage leaves, for every dataset and every
//! partition, a file of `(k-mer, abundance)` records sorted by k-mer with
//! at most one record per k-mer. [`BankStream`] is the cursor the merge
//! engine advances over one such stream; the record source behind it is a
//! trait so tests can feed in-memory vectors.
//!
//! On-disk record layout is packed little-endian: the k-mer code at its
//! storage width (8 or 16 bytes, see [`crate::kmer::KmerKey`]) followed by
//! a `u32` abundance. Files are memory-mapped and scanned as fixed-width
//! slices; a file length that is not a multiple of the record width means
//! the stream was truncated mid-record and the whole partition is aborted.

use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

use memmap2::Mmap;

use crate::error::MergeError;
use crate::kmer::{shannon_index, KmerKey};

/// Source of sorted `(key, abundance)` records for one dataset/partition
pub trait CountSource<K: KmerKey>: Send {
    /// Read the next record, or `None` when the source is exhausted
    fn next_record(&mut self) -> Result<Option<(K, u32)>, MergeError>;
}

/// Memory-mapped file source reading packed records
#[derive(Debug)]
pub struct MmapSource<K: KmerKey> {
    // None for a zero-length file (mapping an empty file is an error)
    mmap: Option<Mmap>,
    offset: usize,
    bank: usize,
    _key: PhantomData<K>,
}

impl<K: KmerKey> MmapSource<K> {
    /// Record width in bytes: key storage plus u32 abundance
    pub const RECORD_BYTES: usize = K::WIDTH_BYTES + 4;

    /// Open a partition count file
    ///
    /// Fails with [`MergeError::StreamCorrupt`] if the file length is not a
    /// whole number of records. `bank` is only used for error reporting.
    pub fn open(path: impl AsRef<Path>, bank: usize) -> Result<Self, MergeError> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len() as usize;

        if len % Self::RECORD_BYTES != 0 {
            return Err(MergeError::StreamCorrupt {
                bank,
                detail: format!(
                    "file length {} is not a multiple of the {}-byte record width",
                    len,
                    Self::RECORD_BYTES
                ),
            });
        }

        let mmap = if len == 0 {
            None
        } else {
            // Safety: the counting stage has finished writing this file
            // before the merge starts; nothing mutates it while mapped.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            mmap,
            offset: 0,
            bank,
            _key: PhantomData,
        })
    }

    /// Number of records in the file
    pub fn num_records(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len() / Self::RECORD_BYTES)
    }
}

impl<K: KmerKey> CountSource<K> for MmapSource<K> {
    fn next_record(&mut self) -> Result<Option<(K, u32)>, MergeError> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(None);
        };
        if self.offset == mmap.len() {
            return Ok(None);
        }
        let record = &mmap[self.offset..self.offset + Self::RECORD_BYTES];
        let key = K::read_le(&record[..K::WIDTH_BYTES]);
        let abundance_bytes: [u8; 4] = record[K::WIDTH_BYTES..]
            .try_into()
            .map_err(|_| MergeError::StreamCorrupt {
                bank: self.bank,
                detail: "short abundance field".into(),
            })?;
        let abundance = u32::from_le_bytes(abundance_bytes);
        self.offset += Self::RECORD_BYTES;
        Ok(Some((key, abundance)))
    }
}

/// In-memory source, used by tests and by callers that already hold the
/// partition's records
pub struct VecSource<K: KmerKey> {
    records: std::vec::IntoIter<(K, u32)>,
}

impl<K: KmerKey> VecSource<K> {
    /// Wrap a vector of records (must already be sorted by key)
    pub fn new(records: Vec<(K, u32)>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl<K: KmerKey> CountSource<K> for VecSource<K> {
    fn next_record(&mut self) -> Result<Option<(K, u32)>, MergeError> {
        Ok(self.records.next())
    }
}

/// Cursor over one dataset's sorted count stream
///
/// `key()` and `abundance()` are valid only after a successful
/// [`BankStream::advance`] and before exhaustion. Records whose key fails
/// the minimum-entropy filter are skipped here and never reach the merge.
pub struct BankStream<K: KmerKey, S: CountSource<K>> {
    source: S,
    bank_id: u16,
    current: Option<(K, u32)>,
    kmer_size: usize,
    min_shannon_index: f64,
}

impl<K: KmerKey, S: CountSource<K>> BankStream<K, S> {
    /// Create a stream for dataset `bank_id`
    pub fn new(source: S, bank_id: u16, kmer_size: usize, min_shannon_index: f64) -> Self {
        Self {
            source,
            bank_id,
            current: None,
            kmer_size,
            min_shannon_index,
        }
    }

    /// Move to the next record; returns `false` when the stream is exhausted
    pub fn advance(&mut self) -> Result<bool, MergeError> {
        loop {
            match self.source.next_record()? {
                Some((key, abundance)) => {
                    if self.min_shannon_index > 0.0
                        && shannon_index(key, self.kmer_size) < self.min_shannon_index
                    {
                        continue;
                    }
                    self.current = Some((key, abundance));
                    return Ok(true);
                }
                None => {
                    self.current = None;
                    return Ok(false);
                }
            }
        }
    }

    /// Current k-mer key
    ///
    /// # Panics
    /// If called before the first `advance()` or after exhaustion.
    pub fn key(&self) -> K {
        self.current.map(|(k, _)| k).expect("stream not positioned")
    }

    /// Current abundance
    ///
    /// # Panics
    /// If called before the first `advance()` or after exhaustion.
    pub fn abundance(&self) -> u32 {
        self.current.map(|(_, a)| a).expect("stream not positioned")
    }

    /// Index of the dataset this stream reads
    pub fn bank_id(&self) -> u16 {
        self.bank_id
    }
}

/// Write packed records to a writer, the inverse of [`MmapSource`]
///
/// Exists mainly for the counting-stage contract and for tests that
/// materialize partition files.
pub fn write_records<K: KmerKey, W: std::io::Write>(
    writer: &mut W,
    records: &[(K, u32)],
) -> std::io::Result<()> {
    let mut buf = vec![0u8; K::WIDTH_BYTES + 4];
    for &(key, abundance) in records {
        key.write_le(&mut buf[..K::WIDTH_BYTES]);
        buf[K::WIDTH_BYTES..].copy_from_slice(&abundance.to_le_bytes());
        writer.write_all(&buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_vec_source_stream() {
        let source = VecSource::new(vec![(5u64, 2), (9, 7)]);
        let mut stream = BankStream::new(source, 3, 21, 0.0);

        assert!(stream.advance().unwrap());
        assert_eq!(stream.key(), 5);
        assert_eq!(stream.abundance(), 2);
        assert_eq!(stream.bank_id(), 3);

        assert!(stream.advance().unwrap());
        assert_eq!(stream.key(), 9);
        assert_eq!(stream.abundance(), 7);

        assert!(!stream.advance().unwrap());
    }

    #[test]
    fn test_mmap_source_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part_0.bin");

        let records: Vec<(u64, u32)> = vec![(1, 10), (4, 20), (1000, 3)];
        let mut file = File::create(&path).unwrap();
        write_records(&mut file, &records).unwrap();
        file.flush().unwrap();

        let mut source = MmapSource::<u64>::open(&path, 0).unwrap();
        assert_eq!(source.num_records(), 3);

        let mut read_back = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            read_back.push(record);
        }
        assert_eq!(read_back, records);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part_0.bin");

        let mut file = File::create(&path).unwrap();
        // 7 bytes: less than one 12-byte record
        file.write_all(&[0u8; 7]).unwrap();
        file.flush().unwrap();

        let err = MmapSource::<u64>::open(&path, 2).unwrap_err();
        assert!(matches!(err, MergeError::StreamCorrupt { bank: 2, .. }));
    }

    #[test]
    fn test_shannon_filter_skips_records() {
        // Key 0 is a homopolymer (entropy 0); a key cycling through all
        // four bases over the full 21 positions is near-maximal
        let mut mixed: u64 = 0;
        for i in 0..21 {
            mixed |= ((i % 4) as u64) << (2 * i);
        }
        let source = VecSource::new(vec![(0u64, 5), (mixed, 2)]);
        let mut stream = BankStream::new(source, 0, 21, 1.0);

        assert!(stream.advance().unwrap());
        assert_eq!(stream.key(), mixed);
        assert!(!stream.advance().unwrap());
    }

    #[test]
    fn test_empty_file_is_empty_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part_0.bin");
        File::create(&path).unwrap();

        let mut source = MmapSource::<u64>::open(&path, 0).unwrap();
        assert_eq!(source.num_records(), 0);
        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn test_u128_record_width() {
        assert_eq!(MmapSource::<u64>::RECORD_BYTES, 12);
        assert_eq!(MmapSource::<u128>::RECORD_BYTES, 20);
    }
}
