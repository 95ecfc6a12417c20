//! Constants for the merge stage
//!
//! This module defines compile-time constants used throughout the library:
//! valid k-mer sizes, default batching parameters and abundance bounds.

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Number of merged records a worker batch holds before it is handed off
pub const DEFAULT_BATCH_CAPACITY: usize = 1000;

/// Default lower abundance bound (no filtering)
pub const DEFAULT_MIN_ABUNDANCE: u32 = 0;

/// Default upper abundance bound (no filtering)
pub const DEFAULT_MAX_ABUNDANCE: u32 = 999_999_999;

/// Maximum k-mer size supported (u128 storage, 2 bits per base)
pub const MAX_K: usize = 63;

/// Minimum k-mer size supported
pub const MIN_K: usize = 3;

/// Largest k-mer size that fits in u64 storage
pub const MAX_K_U64: usize = 31;

/// Check if a k-mer size is valid (odd, within storage bounds)
#[inline]
pub const fn is_valid_k(k: usize) -> bool {
    k >= MIN_K && k <= MAX_K && k % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_k() {
        assert!(is_valid_k(3));
        assert!(is_valid_k(21));
        assert!(is_valid_k(31));
        assert!(is_valid_k(63));

        // even
        assert!(!is_valid_k(4));
        assert!(!is_valid_k(32));

        // out of range
        assert!(!is_valid_k(1));
        assert!(!is_valid_k(65));
    }
}
