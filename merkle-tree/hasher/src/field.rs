//! Helpers for moving between 32 byte big-endian values and BN254 scalars.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

use crate::Hash;

/// Reduces a big-endian value modulo the BN254 scalar field order.
pub fn reduce_be(bytes: &[u8]) -> Hash {
    let element = Fr::from_be_bytes_mod_order(bytes);
    to_hash(&element)
}

/// Left-pads a big-endian integer into a 32 byte word.
pub fn u64_to_word(value: u64) -> Hash {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn to_hash(element: &Fr) -> Hash {
    let be = element.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - be.len()..].copy_from_slice(&be);
    out
}
