use std::marker::PhantomData;

use arborist_hasher::{zero_bytes::zero_bytes, Hash, Hasher};
use serde::{Deserialize, Serialize};

use crate::errors::MerkleTreeError;

/// Serializable state of an [`IncrementalMerkleTree`]. Only the frontier is
/// kept, which is enough to continue appending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub height: usize,
    pub next_index: u64,
    pub root: Hash,
    pub subtrees: Vec<Hash>,
}

/// Append-only Merkle tree which stores the rightmost node of every level
/// instead of the full tree.
#[derive(Clone, Debug)]
pub struct IncrementalMerkleTree<H: Hasher, const HEIGHT: usize> {
    subtrees: Vec<Hash>,
    zero_bytes: Vec<Hash>,
    next_index: u64,
    root: Hash,
    _hasher: PhantomData<H>,
}

impl<H, const HEIGHT: usize> IncrementalMerkleTree<H, HEIGHT>
where
    H: Hasher,
{
    pub fn new_empty() -> Result<Self, MerkleTreeError> {
        let zero_bytes = zero_bytes::<H>(HEIGHT)?;
        Ok(Self {
            subtrees: zero_bytes[..HEIGHT].to_vec(),
            root: zero_bytes[HEIGHT],
            zero_bytes,
            next_index: 0,
            _hasher: PhantomData,
        })
    }

    pub fn from_snapshot(snapshot: TreeSnapshot) -> Result<Self, MerkleTreeError> {
        if snapshot.height != HEIGHT {
            return Err(MerkleTreeError::HeightMismatch {
                expected: HEIGHT,
                found: snapshot.height,
            });
        }
        if snapshot.subtrees.len() != HEIGHT {
            return Err(MerkleTreeError::InvalidSubtrees {
                expected: HEIGHT,
                found: snapshot.subtrees.len(),
            });
        }
        if snapshot.next_index > Self::capacity() {
            return Err(MerkleTreeError::TreeFull {
                capacity: Self::capacity(),
            });
        }
        Ok(Self {
            subtrees: snapshot.subtrees,
            zero_bytes: zero_bytes::<H>(HEIGHT)?,
            next_index: snapshot.next_index,
            root: snapshot.root,
            _hasher: PhantomData,
        })
    }

    pub fn capacity() -> u64 {
        1u64 << HEIGHT
    }

    pub fn append(&mut self, leaf: Hash) -> Result<(), MerkleTreeError> {
        if self.next_index >= Self::capacity() {
            return Err(MerkleTreeError::TreeFull {
                capacity: Self::capacity(),
            });
        }

        let mut current_index = self.next_index;
        let mut current_level_hash = leaf;

        for (subtree, zero_byte) in self.subtrees.iter_mut().zip(self.zero_bytes.iter()) {
            let (left, right) = if current_index.is_multiple_of(2) {
                *subtree = current_level_hash;
                (current_level_hash, *zero_byte)
            } else {
                (*subtree, current_level_hash)
            };
            current_level_hash = H::hashv(&[&left, &right])?;
            current_index /= 2;
        }
        self.root = current_level_hash;
        self.next_index += 1;

        Ok(())
    }

    /// Appends `leaves` in order. Either all leaves are appended or, if the
    /// tree lacks room for all of them, none are.
    pub fn bulk_insert(&mut self, leaves: &[Hash]) -> Result<(), MerkleTreeError> {
        if self.next_index + leaves.len() as u64 > Self::capacity() {
            return Err(MerkleTreeError::TreeFull {
                capacity: Self::capacity(),
            });
        }
        for leaf in leaves {
            self.append(*leaf)?;
        }
        Ok(())
    }

    /// Siblings on the path from the subtree of height `subtree_height`
    /// starting at the insertion point up to the root.
    pub fn subtree_path(&self, subtree_height: usize) -> Result<Vec<Hash>, MerkleTreeError> {
        if subtree_height > HEIGHT
            || !self.next_index.is_multiple_of(1u64 << subtree_height)
        {
            return Err(MerkleTreeError::UnalignedSubtree {
                next_index: self.next_index,
                subtree_height,
            });
        }
        let path = (subtree_height..HEIGHT)
            .map(|level| {
                if (self.next_index >> level) & 1 == 1 {
                    self.subtrees[level]
                } else {
                    self.zero_bytes[level]
                }
            })
            .collect();
        Ok(path)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            height: HEIGHT,
            next_index: self.next_index,
            root: self.root,
            subtrees: self.subtrees.clone(),
        }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn subtrees(&self) -> &[Hash] {
        &self.subtrees
    }

    pub fn height(&self) -> usize {
        HEIGHT
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn zero_bytes(&self) -> &[Hash] {
        &self.zero_bytes
    }
}
