use crate::{errors::HasherError, Hash, Hasher};

pub const MAX_HEIGHT: usize = 32;

/// Roots of empty subtrees, `zero_bytes[i]` being the root of an empty
/// subtree of height `i`.
pub type ZeroBytes = Vec<Hash>;

pub fn zero_bytes<H: Hasher>(height: usize) -> Result<ZeroBytes, HasherError> {
    if height > MAX_HEIGHT {
        return Err(HasherError::IntegerOverflow);
    }
    let mut zeros = Vec::with_capacity(height + 1);
    let mut current = H::zero_value();
    zeros.push(current);
    for _ in 0..height {
        current = H::hashv(&[&current, &current])?;
        zeros.push(current);
    }
    Ok(zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Keccak, Poseidon};

    #[test]
    fn test_zero_bytes_chain() {
        let zeros = zero_bytes::<Keccak>(4).unwrap();
        assert_eq!(zeros.len(), 5);
        assert_eq!(zeros[0], [0u8; 32]);
        for i in 0..4 {
            assert_eq!(zeros[i + 1], Keccak::hashv(&[&zeros[i], &zeros[i]]).unwrap());
        }
    }

    #[test]
    fn test_poseidon_zero_bytes_start_from_zero_value() {
        let zeros = zero_bytes::<Poseidon>(2).unwrap();
        assert_eq!(zeros[0], Poseidon::zero_value());
    }

    #[test]
    fn test_height_limit() {
        assert!(zero_bytes::<Keccak>(MAX_HEIGHT + 1).is_err());
    }
}
