//! Prime capacity ladder for the slot table.
//!
//! The table size is always a prime number so that double hashing with any
//! nonzero step visits every slot exactly once (`gcd(step, size) == 1`).
//! The primes are chosen just below each power of two, so the capacity
//! roughly doubles with each rung.

/// Capacity ladder. Ascending, one prime just below each power of two up to
/// the 32-bit range.
pub(crate) const PRIMES: [u32; 30] = [
    7,
    13,
    31,
    61,
    127,
    251,
    509,
    1021,
    2039,
    4093,
    8191,
    16381,
    32749,
    65521,
    131_071,
    262_139,
    524_287,
    1_048_573,
    2_097_143,
    4_194_301,
    8_388_593,
    16_777_213,
    33_554_393,
    67_108_859,
    134_217_689,
    268_435_399,
    536_870_909,
    1_073_741_789,
    2_147_483_647,
    4_294_967_291,
];

/// Minimum slot-table capacity. The initial table uses the smallest ladder
/// prime that is at least this large.
pub(crate) const MIN_CAPACITY: u32 = 64;

/// Index of the smallest ladder prime `>= n`.
///
/// Binary search over [`PRIMES`]. `n` must not exceed the largest ladder
/// prime; the store never asks for more (the entry count is bounded well
/// below the 32-bit range before allocation fails).
pub(crate) fn higher_prime_index(n: u32) -> usize {
    let mut low: usize = 0;
    let mut high: usize = PRIMES.len();
    while low != high {
        let mid = low + (high - low) / 2;
        if n > PRIMES[mid] {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

// ============================================================================
//  Tests
// ============================================================================
