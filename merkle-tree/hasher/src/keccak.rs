use crate::{errors::HasherError, Hash, Hasher};

#[derive(Clone, Copy, Debug)]
pub struct Keccak;

impl Hasher for Keccak {
    fn hash(val: &[u8]) -> Result<Hash, HasherError> {
        Self::hashv(&[val])
    }

    fn hashv(vals: &[&[u8]]) -> Result<Hash, HasherError> {
        use sha3::{Digest, Keccak256};

        let mut hasher = Keccak256::default();
        for val in vals {
            hasher.update(val);
        }
        Ok(hasher.finalize().into())
    }

    fn zero_value() -> Hash {
        [0u8; 32]
    }
}
