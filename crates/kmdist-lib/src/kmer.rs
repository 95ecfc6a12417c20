//! K-mer key representation
//!
//! The merge engine is generic over a [`KmerKey`]: a fixed-width, totally
//! ordered, 2-bit packed k-mer code. Storage is selected from the k-mer
//! size (u64 for k ≤ 31, u128 for k ≤ 63); the upstream counting stage
//! wrote keys with the same width, so the two stages agree byte for byte.
//!
//! Keys are compared as plain integers. The encoding of bases into 2-bit
//! codes is owned by the counting stage; this crate only needs the total
//! order, the fixed little-endian byte layout, and per-base access for the
//! Shannon entropy filter.

use std::fmt::Debug;
use std::hash::Hash;

/// A fixed-width packed k-mer code
///
/// Implemented for `u64` (k ≤ 31) and `u128` (k ≤ 63). Comparison is the
/// integer order; equality means "same k-mer".
pub trait KmerKey: Copy + Ord + Eq + Hash + Debug + Send + Sync + 'static {
    /// Width of the on-disk encoding in bytes
    const WIDTH_BYTES: usize;

    /// The all-zero key (used to seed reusable group state)
    const ZERO: Self;

    /// Decode a key from little-endian bytes; `buf` must hold `WIDTH_BYTES`
    fn read_le(buf: &[u8]) -> Self;

    /// Encode the key as little-endian bytes into `buf`
    fn write_le(&self, buf: &mut [u8]);

    /// The 2-bit code of base `i` (0 = lowest-order base)
    fn base_at(&self, i: usize) -> u8;
}

impl KmerKey for u64 {
    const WIDTH_BYTES: usize = 8;
    const ZERO: Self = 0;

    #[inline]
    fn read_le(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        u64::from_le_bytes(bytes)
    }

    #[inline]
    fn write_le(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn base_at(&self, i: usize) -> u8 {
        ((self >> (2 * i)) & 0b11) as u8
    }
}

impl KmerKey for u128 {
    const WIDTH_BYTES: usize = 16;
    const ZERO: Self = 0;

    #[inline]
    fn read_le(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&buf[..16]);
        u128::from_le_bytes(bytes)
    }

    #[inline]
    fn write_le(&self, buf: &mut [u8]) {
        buf[..16].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn base_at(&self, i: usize) -> u8 {
        ((self >> (2 * i)) & 0b11) as u8
    }
}

/// Shannon entropy of the base composition of a k-mer, in bits per base
///
/// Ranges over [0.0, 2.0] for the 4-letter DNA alphabet: 0.0 for a
/// homopolymer, 2.0 for a uniform base distribution. Low-complexity k-mers
/// (poly-A runs and the like) score low and can be filtered out before the
/// merge with a minimum-entropy threshold.
pub fn shannon_index<K: KmerKey>(key: K, k: usize) -> f64 {
    let mut freqs = [0u32; 4];
    for i in 0..k {
        freqs[key.base_at(i) as usize] += 1;
    }

    let mut index = 0.0f64;
    for &count in &freqs {
        if count > 0 {
            let p = count as f64 / k as f64;
            index -= p * p.log2();
        }
    }
    index
}

/// Dispatch a block of code on the storage type for a runtime k-mer size
///
/// ```
/// # use kmdist_lib::dispatch_kmer_storage;
/// let k = 21;
/// let width = dispatch_kmer_storage!(k, K => {
///     <K as kmdist_lib::KmerKey>::WIDTH_BYTES
/// });
/// assert_eq!(width, 8);
/// ```
#[macro_export]
macro_rules! dispatch_kmer_storage {
    ($k:expr, $K:ident => $body:expr) => {
        if $k <= $crate::constants::MAX_K_U64 {
            type $K = u64;
            $body
        } else {
            type $K = u128;
            $body
        }
    };
}
