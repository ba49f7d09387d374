use arborist_hasher::errors::HasherError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MerkleTreeError {
    #[error("Merkle tree is full, cannot append more leaves (capacity {capacity})")]
    TreeFull { capacity: u64 },
    #[error("Snapshot height {found} does not match tree height {expected}")]
    HeightMismatch { expected: usize, found: usize },
    #[error("Snapshot has {found} subtrees, expected {expected}")]
    InvalidSubtrees { expected: usize, found: usize },
    #[error("Insertion index {next_index} is not aligned to a subtree of height {subtree_height}")]
    UnalignedSubtree {
        next_index: u64,
        subtree_height: usize,
    },
    #[error("Hasher error: {0}")]
    Hasher(String),
}

impl From<HasherError> for MerkleTreeError {
    fn from(e: HasherError) -> Self {
        MerkleTreeError::Hasher(e.to_string())
    }
}
