use crate::EMBEDDING_DIMENSION;

// Changing either constant changes every fallback vector; cached analyzer
// vectors are unaffected because they are never derived from these.
const HASH_BASE: u64 = 31;
const HASH_MODULUS: u64 = 1_000_000_007;

/// Deterministic encoding from the text's character codes.
///
/// A polynomial rolling hash is first folded over the whole text (so every
/// character influences every position), then advanced once per output
/// position with the code at `i mod len`. Each value is `(hash mod 1000) / 999`.
/// Never fails: empty text still yields a full vector.
pub fn fallback_values(text: &str) -> Vec<f32> {
    let codes: Vec<u64> = text.chars().map(|c| c as u64).collect();

    let mut hash = codes
        .iter()
        .fold(17u64, |acc, code| (acc * HASH_BASE + code) % HASH_MODULUS);

    (0..EMBEDDING_DIMENSION)
        .map(|idx| {
            let code = if codes.is_empty() {
                0
            } else {
                codes[idx % codes.len()]
            };
            hash = (hash * HASH_BASE + code + idx as u64) % HASH_MODULUS;
            (hash % 1000) as f32 / 999.0
        })
        .collect()
}
