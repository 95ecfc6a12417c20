//! Similarity statistics accumulators
//!
//! A worker folds merged records into an [`Accumulator`]. Combination
//! across workers must be associative and commutative: batches are
//! assigned round-robin, so no accumulator may depend on which records it
//! saw or in what order.
//!
//! [`DistanceStats`] is the concrete accumulator: per-bank totals plus the
//! pairwise matrices that the downstream stage turns into distances
//! (Jaccard-style shared-distinct counts, directional shared abundances,
//! the Bray-Curtis min-sum numerator, and the Chord dot-product numerator
//! for the complex distances).

use std::io::{self, Read, Write};

use crate::error::MergeError;
use crate::kmer::KmerKey;

/// Magic bytes for the serialized statistics block
const STATS_MAGIC: &[u8; 8] = b"KMDSTAT1";

/// Serialization contract for combined statistics
///
/// Separate from [`Accumulator`] so the persisted partition result does
/// not depend on the key type.
pub trait StatsSink {
    /// Serialize the state for the partition result
    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()>;
}

/// Per-worker statistics state folding merged records
pub trait Accumulator<K: KmerKey>: StatsSink + Send {
    /// Fold one merged record into the state
    fn fold(&mut self, key: K, abundances: &[u32], presence: u32) -> Result<(), MergeError>;

    /// Combine another accumulator's state into this one
    ///
    /// Must be associative and commutative over the records folded.
    fn merge_from(&mut self, other: &Self);
}

/// Pairwise similarity statistics over `nb_banks` datasets
///
/// All counters are plain sums, so [`Accumulator::merge_from`] is
/// element-wise addition and trivially associative/commutative. Pairwise
/// matrices are stored flat, row-major, `nb_banks × nb_banks`.
#[derive(Debug, Clone)]
pub struct DistanceStats {
    nb_banks: usize,
    compute_simple: bool,
    compute_complex: bool,
    min_abundance: u32,
    max_abundance: u32,

    /// Distinct k-mers seen per bank (within the abundance range)
    nb_distinct_kmers_per_bank: Vec<u64>,
    /// Summed abundance per bank (within the abundance range)
    nb_kmers_per_bank: Vec<u64>,

    /// [i][j]: distinct k-mers present in both i and j (i < j filled,
    /// mirrored on read-out)
    matrix_nb_distinct_shared: Vec<u64>,
    /// [i][j]: summed abundance of bank i over k-mers shared with bank j
    /// (directional)
    matrix_nb_shared: Vec<u64>,
    /// [i][j]: Σ min(a_i, a_j) over shared k-mers (Bray-Curtis numerator,
    /// only filled when simple distances are on)
    matrix_braycurtis: Vec<u64>,
    /// [i][j]: Σ a_i · a_j over shared k-mers (Chord/dot-product numerator,
    /// only filled when complex distances are on)
    matrix_chord: Vec<f64>,

    /// Scratch list of banks present in the current record; not part of
    /// the combined state
    present: Vec<usize>,
}

impl DistanceStats {
    /// Create an empty accumulator
    pub fn new(
        nb_banks: usize,
        compute_simple: bool,
        compute_complex: bool,
        min_abundance: u32,
        max_abundance: u32,
    ) -> Self {
        let cells = nb_banks * nb_banks;
        Self {
            nb_banks,
            compute_simple,
            compute_complex,
            min_abundance,
            max_abundance,
            nb_distinct_kmers_per_bank: vec![0; nb_banks],
            nb_kmers_per_bank: vec![0; nb_banks],
            matrix_nb_distinct_shared: vec![0; cells],
            matrix_nb_shared: vec![0; cells],
            matrix_braycurtis: vec![0; cells],
            matrix_chord: vec![0.0; cells],
            present: Vec::with_capacity(nb_banks),
        }
    }

    /// Number of datasets covered
    pub fn nb_banks(&self) -> usize {
        self.nb_banks
    }

    #[inline]
    fn cell(&self, i: usize, j: usize) -> usize {
        i * self.nb_banks + j
    }

    /// Distinct k-mer count for one bank
    pub fn distinct_kmers(&self, bank: usize) -> u64 {
        self.nb_distinct_kmers_per_bank[bank]
    }

    /// Summed abundance for one bank
    pub fn total_kmers(&self, bank: usize) -> u64 {
        self.nb_kmers_per_bank[bank]
    }

    /// Distinct k-mers shared between two banks (symmetric)
    pub fn shared_distinct(&self, i: usize, j: usize) -> u64 {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        self.matrix_nb_distinct_shared[self.cell(a, b)]
    }

    /// Abundance of bank `i` over k-mers shared with bank `j` (directional)
    pub fn shared_abundance(&self, i: usize, j: usize) -> u64 {
        self.matrix_nb_shared[self.cell(i, j)]
    }

    /// Bray-Curtis numerator Σ min(a_i, a_j) (symmetric)
    pub fn braycurtis_numerator(&self, i: usize, j: usize) -> u64 {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        self.matrix_braycurtis[self.cell(a, b)]
    }

    /// Chord numerator Σ a_i · a_j (symmetric)
    pub fn chord_numerator(&self, i: usize, j: usize) -> f64 {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        self.matrix_chord[self.cell(a, b)]
    }

    /// Deserialize a statistics block written by [`Accumulator::write_to`]
    pub fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != STATS_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid magic for statistics block",
            ));
        }

        let nb_banks = read_u64(reader)? as usize;
        let flags = read_u64(reader)?;
        let min_abundance = read_u64(reader)? as u32;
        let max_abundance = read_u64(reader)? as u32;

        let mut stats = Self::new(
            nb_banks,
            flags & 1 != 0,
            flags & 2 != 0,
            min_abundance,
            max_abundance,
        );
        read_u64_vec(reader, &mut stats.nb_distinct_kmers_per_bank)?;
        read_u64_vec(reader, &mut stats.nb_kmers_per_bank)?;
        read_u64_vec(reader, &mut stats.matrix_nb_distinct_shared)?;
        read_u64_vec(reader, &mut stats.matrix_nb_shared)?;
        read_u64_vec(reader, &mut stats.matrix_braycurtis)?;
        for cell in stats.matrix_chord.iter_mut() {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            *cell = f64::from_bits(u64::from_le_bytes(bytes));
        }
        Ok(stats)
    }
}

impl<K: KmerKey> Accumulator<K> for DistanceStats {
    fn fold(&mut self, _key: K, abundances: &[u32], _presence: u32) -> Result<(), MergeError> {
        debug_assert_eq!(abundances.len(), self.nb_banks);

        // Banks outside the abundance range are invisible to the
        // statistics (the engine's scalar counters never get here).
        self.present.clear();
        for (bank, &abundance) in abundances.iter().enumerate() {
            if abundance == 0 || abundance < self.min_abundance || abundance > self.max_abundance {
                continue;
            }
            self.present.push(bank);
            self.nb_distinct_kmers_per_bank[bank] += 1;
            self.nb_kmers_per_bank[bank] = self.nb_kmers_per_bank[bank]
                .checked_add(abundance as u64)
                .ok_or_else(|| {
                    MergeError::Accumulator(format!("abundance counter overflow for bank {}", bank))
                })?;
        }

        for idx_a in 0..self.present.len() {
            let i = self.present[idx_a];
            let a_i = abundances[i] as u64;
            for idx_b in idx_a + 1..self.present.len() {
                let j = self.present[idx_b];
                let a_j = abundances[j] as u64;

                let upper = self.cell(i, j);
                self.matrix_nb_distinct_shared[upper] += 1;
                self.matrix_nb_shared[upper] += a_i;
                let lower = self.cell(j, i);
                self.matrix_nb_shared[lower] += a_j;

                if self.compute_simple {
                    self.matrix_braycurtis[upper] += a_i.min(a_j);
                }
                if self.compute_complex {
                    self.matrix_chord[upper] += a_i as f64 * a_j as f64;
                }
            }
        }
        Ok(())
    }

    fn merge_from(&mut self, other: &Self) {
        assert_eq!(self.nb_banks, other.nb_banks);

        for (a, b) in self
            .nb_distinct_kmers_per_bank
            .iter_mut()
            .zip(&other.nb_distinct_kmers_per_bank)
        {
            *a += b;
        }
        for (a, b) in self.nb_kmers_per_bank.iter_mut().zip(&other.nb_kmers_per_bank) {
            *a += b;
        }
        for (a, b) in self
            .matrix_nb_distinct_shared
            .iter_mut()
            .zip(&other.matrix_nb_distinct_shared)
        {
            *a += b;
        }
        for (a, b) in self.matrix_nb_shared.iter_mut().zip(&other.matrix_nb_shared) {
            *a += b;
        }
        for (a, b) in self.matrix_braycurtis.iter_mut().zip(&other.matrix_braycurtis) {
            *a += b;
        }
        for (a, b) in self.matrix_chord.iter_mut().zip(&other.matrix_chord) {
            *a += b;
        }
    }
}

impl StatsSink for DistanceStats {
    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(STATS_MAGIC)?;
        write_u64(writer, self.nb_banks as u64)?;
        let flags = (self.compute_simple as u64) | ((self.compute_complex as u64) << 1);
        write_u64(writer, flags)?;
        write_u64(writer, self.min_abundance as u64)?;
        write_u64(writer, self.max_abundance as u64)?;

        write_u64_slice(writer, &self.nb_distinct_kmers_per_bank)?;
        write_u64_slice(writer, &self.nb_kmers_per_bank)?;
        write_u64_slice(writer, &self.matrix_nb_distinct_shared)?;
        write_u64_slice(writer, &self.matrix_nb_shared)?;
        write_u64_slice(writer, &self.matrix_braycurtis)?;
        for &cell in &self.matrix_chord {
            writer.write_all(&cell.to_bits().to_le_bytes())?;
        }
        Ok(())
    }
}

// Scratch state is excluded: two accumulators are equal when their
// combined statistics are, regardless of the last record folded.
impl PartialEq for DistanceStats {
    fn eq(&self, other: &Self) -> bool {
        self.nb_banks == other.nb_banks
            && self.compute_simple == other.compute_simple
            && self.compute_complex == other.compute_complex
            && self.min_abundance == other.min_abundance
            && self.max_abundance == other.max_abundance
            && self.nb_distinct_kmers_per_bank == other.nb_distinct_kmers_per_bank
            && self.nb_kmers_per_bank == other.nb_kmers_per_bank
            && self.matrix_nb_distinct_shared == other.matrix_nb_distinct_shared
            && self.matrix_nb_shared == other.matrix_nb_shared
            && self.matrix_braycurtis == other.matrix_braycurtis
            && self.matrix_chord == other.matrix_chord
    }
}

fn write_u64(writer: &mut dyn Write, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_u64_slice(writer: &mut dyn Write, values: &[u64]) -> io::Result<()> {
    for &value in values {
        write_u64(writer, value)?;
    }
    Ok(())
}

fn read_u64(reader: &mut dyn Read) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_u64_vec(reader: &mut dyn Read, out: &mut [u64]) -> io::Result<()> {
    for value in out.iter_mut() {
        *value = read_u64(reader)?;
    }
    Ok(())
}
