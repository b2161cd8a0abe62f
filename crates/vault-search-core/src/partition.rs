//! Deterministic chunk → partition routing.
//!
//! A chunk's partition is `|djb2(id)| mod n`, where `djb2` is the
//! `hash = (hash << 5) - hash + code_unit` rolling hash over the UTF-16 code
//! units of the id, accumulated with 32-bit wraparound and starting at 0.
//! Existing partition files depend on this arithmetic bit for bit.

/// 32-bit rolling string hash (multiply by 31, add code unit).
///
/// # Example
///
/// ```rust
/// use vault_search_core::partition::djb2_hash;
///
/// assert_eq!(djb2_hash("abc"), 96354);
/// ```
pub fn djb2_hash(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in s.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    hash
}

/// Partition index for `id` in a store with `num_partitions` shards.
///
/// Returns 0 when `num_partitions` is 0 so callers never divide by zero.
pub fn partition_for(id: &str, num_partitions: usize) -> usize {
    if num_partitions == 0 {
        return 0;
    }
    (djb2_hash(id).unsigned_abs() as usize) % num_partitions
}
