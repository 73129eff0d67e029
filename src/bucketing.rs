//! Consistent hashing of identifiers into bounded buckets.
//!
//! Every percentage gate and weighted variant split goes through [`normalized_number`], so a given
//! `(identifier, group_id)` pair lands in the same bucket on every call, in every process and
//! across SDKs for other languages.
use std::io::Cursor;

use murmur3::murmur3_32;

/// Normalizer used by percentage gates.
pub const ONE_HUNDRED: u32 = 100;

/// Seed for weighted variant selection. Percentage gates and legacy variant hashing use `0`.
pub const VARIANT_NORMALIZATION_SEED: u32 = 86_028_157;

/// MurmurHash3 x86-32 of `"{group_id}:{identifier}"` with the given seed.
pub fn hash32(identifier: &str, group_id: &str, seed: u32) -> u32 {
    let input = format!("{group_id}:{identifier}");
    // Reading from an in-memory cursor cannot fail.
    murmur3_32(&mut Cursor::new(input.as_bytes()), seed).unwrap_or(0)
}

/// Map `identifier` within `group_id` to an integer in `[1, normalizer]`.
///
/// A `normalizer` of zero is treated as one.
pub fn normalized_number(identifier: &str, group_id: &str, normalizer: u32) -> u32 {
    normalized_number_with_seed(identifier, group_id, normalizer, 0)
}

/// [`normalized_number`] hashed with `seed`.
pub fn normalized_number_with_seed(
    identifier: &str,
    group_id: &str,
    normalizer: u32,
    seed: u32,
) -> u32 {
    (hash32(identifier, group_id, seed) % normalizer.max(1)) + 1
}

/// Percentage gate: `0` always excludes, `100` and above always include.
pub fn is_within_percentage(identifier: &str, group_id: &str, percentage: u32) -> bool {
    percentage > 0 && normalized_number(identifier, group_id, ONE_HUNDRED) <= percentage
}

/// Parse a percentage parameter. Anything that is not a plain non-negative integer is `0`.
pub fn parse_percentage(value: Option<&str>) -> u32 {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
