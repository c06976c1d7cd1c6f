//! Hash function for generated-artifact deduplication.
//!
//! The [`BlobStore`](crate::compiler::BlobStore) hashes every blob produced by the backend, and
//! most blobs are machine code. Hashing the full content of large blobs would make interning
//! linear in the code size, so large inputs are sampled instead:
//!
//! - inputs of up to [`SMALL_BLOB_THRESHOLD`] bytes hash every byte
//! - larger inputs hash bytes 6 and 7, where generated method headers keep their register save
//!   mask, followed by [`SAMPLE_COUNT`]` - 2` positions picked by a linear congruential sequence
//!
//! Two different blobs may therefore share a hash. The store compares bytes on every hash match,
//! so a collision costs a comparison and never merges unequal content.

/// Inputs at or below this size hash every byte.
pub const SMALL_BLOB_THRESHOLD: usize = 16;

/// Number of byte positions hashed for large inputs, including the fixed window.
pub const SAMPLE_COUNT: usize = 16;

const FNV_OFFSET: u64 = 0x811c_9dc5;
const FNV_PRIME: u64 = 16_777_619;

/// Computes the deduplication hash of a blob.
///
/// Constant time for inputs larger than [`SMALL_BLOB_THRESHOLD`].
///
/// # Arguments
///
/// * `data` - The blob content to hash
///
/// # Returns
///
/// A 64-bit hash; equal inputs always hash equally.
#[must_use]
pub fn hash_blob(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;

    if data.len() <= SMALL_BLOB_THRESHOLD {
        for &byte in data {
            hash = hash.wrapping_mul(FNV_PRIME) ^ u64::from(byte);
        }
    } else {
        for &byte in &data[6..8] {
            hash = hash.wrapping_mul(FNV_PRIME) ^ u64::from(byte);
        }
        for i in 2..SAMPLE_COUNT {
            let position = sample_position(i, data.len());
            hash = hash.wrapping_mul(FNV_PRIME) ^ u64::from(data[position]);
        }
    }

    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    hash
}

/// Returns the `i`-th sampled byte position for a blob of `len` bytes.
fn sample_position(i: usize, len: usize) -> usize {
    let r = (i as u64)
        .wrapping_mul(1_103_515_245)
        .wrapping_add(12_345);
    (r % len as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let data = vec![0xAB; 300];
        assert_eq!(hash_blob(&data), hash_blob(&data.clone()));
        assert_eq!(hash_blob(&[]), hash_blob(&[]));
    }

    #[test]
    fn test_small_blobs_hash_every_byte() {
        let a = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        for position in 0..a.len() {
            let mut b = a;
            b[position] ^= 0xFF;
            assert_ne!(hash_blob(&a), hash_blob(&b), "byte {position} ignored");
        }
    }

    #[test]
    fn test_large_blobs_hash_the_header_window() {
        let a = vec![0u8; 64];
        let mut b = a.clone();
        b[6] = 0x40;
        let mut c = a.clone();
        c[7] = 0x01;
        assert_ne!(hash_blob(&a), hash_blob(&b));
        assert_ne!(hash_blob(&a), hash_blob(&c));
    }

    #[test]
    fn test_sample_positions_for_len_100() {
        // 1103515245 and 12345 are both 45 mod 100
        let positions: Vec<usize> = (2..SAMPLE_COUNT).map(|i| sample_position(i, 100)).collect();
        assert_eq!(
            positions,
            vec![35, 80, 25, 70, 15, 60, 5, 50, 95, 40, 85, 30, 75, 20]
        );
    }

    #[test]
    fn test_large_blobs_ignore_unsampled_bytes() {
        let a = vec![0x11u8; 100];
        let mut b = a.clone();
        // position 1 is neither in the header window nor sampled for a 100 byte input
        b[1] = 0x99;
        assert_eq!(hash_blob(&a), hash_blob(&b));

        let mut c = a.clone();
        c[35] = 0x99;
        assert_ne!(hash_blob(&a), hash_blob(&c));
    }
}
