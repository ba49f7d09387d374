pub mod errors;
pub mod merkle_tree;

pub use errors::MerkleTreeError;
pub use merkle_tree::{IncrementalMerkleTree, TreeSnapshot};
