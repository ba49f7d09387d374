use std::sync::OnceLock;

use crate::{errors::HasherError, field, keccak::Keccak, Hash, Hasher};

/// Seed of the empty leaf: `keccak256("tornado") mod p`.
const ZERO_VALUE_SEED: &[u8] = b"tornado";

static ZERO_VALUE: OnceLock<Hash> = OnceLock::new();

#[derive(Clone, Copy, Debug)]
pub struct Poseidon;

impl Hasher for Poseidon {
    fn hash(val: &[u8]) -> Result<Hash, HasherError> {
        Self::hashv(&[val])
    }

    fn hashv(vals: &[&[u8]]) -> Result<Hash, HasherError> {
        use ark_bn254::Fr;
        use light_poseidon::{Poseidon, PoseidonBytesHasher};

        let mut hasher = Poseidon::<Fr>::new_circom(vals.len())?;
        let res = hasher.hash_bytes_be(vals)?;

        Ok(res)
    }

    fn zero_value() -> Hash {
        *ZERO_VALUE.get_or_init(|| {
            // Keccak over a constant input cannot fail.
            let digest = Keccak::hash(ZERO_VALUE_SEED).unwrap_or_default();
            field::reduce_be(&digest)
        })
    }
}
