//! Content signatures for cacheable objects.
//!
//! A signature is a seeded 64-bit xxHash of an object's defining bytes. The
//! end-of-fingerprint marker is the seed, so two families of objects built
//! from identical bytes (say, a matrix and an array holding the same values)
//! still land on different keys when their producers use different markers.
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Marker for signatures that do not belong to a dedicated family.
pub const EOF_MARKER: u64 = 0;

/// Signature value meaning "unsigned": never recycled, never produced here.
pub const NO_SIGNATURE: u64 = 0;

/// Stand-in for a hash that happened to come out as [`NO_SIGNATURE`].
const ZERO_SUBSTITUTE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Computes the signature of `bytes` within the family `eof_marker`.
///
/// Deterministic across calls and threads. Not suitable where an adversary
/// picks the bytes.
pub fn generate_signature(bytes: &[u8], eof_marker: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(eof_marker);
    hasher.write(bytes);
    non_zero(hasher.finish())
}

/// Computes the signature of an object derived from other signed objects.
///
/// `bytes` are the parameters of the derivation and `inputs` the signatures
/// of its operands, in order. Returns [`NO_SIGNATURE`] when any input is
/// unsigned, because the result then cannot be recognised later either.
pub fn derive_signature(bytes: &[u8], inputs: &[u64], eof_marker: u64) -> u64 {
    if inputs.contains(&NO_SIGNATURE) {
        return NO_SIGNATURE;
    }

    let mut hasher = XxHash64::with_seed(eof_marker);
    hasher.write(bytes);
    for input in inputs {
        hasher.write_u64(*input);
    }

    non_zero(hasher.finish())
}

#[inline]
fn non_zero(hash: u64) -> u64 {
    if hash == NO_SIGNATURE {
        ZERO_SUBSTITUTE
    } else {
        hash
    }
}
