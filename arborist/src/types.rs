use std::fmt;

use alloy::{
    primitives::{keccak256, Address, B256, U256},
    sol_types::SolValue,
};
use arborist_hasher::{errors::HasherError, field::u64_to_word, Hash, Hasher, Poseidon};
use serde::{Deserialize, Serialize};

/// The two queues a registry drains independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Deposits,
    Withdrawals,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Deposits, QueueKind::Withdrawals];
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Deposits => write!(f, "deposits"),
            QueueKind::Withdrawals => write!(f, "withdrawals"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryVersion {
    /// Registry the pending leaves were originally registered in. Only
    /// present while migrating.
    Legacy,
    Current,
}

impl fmt::Display for RegistryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryVersion::Legacy => write!(f, "legacy"),
            RegistryVersion::Current => write!(f, "current"),
        }
    }
}

/// A source event as found on the ledger, before the registry index is
/// attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub origin: Address,
    pub value: B256,
    pub block: u64,
}

impl ResolvedEvent {
    pub fn derived_hash(&self) -> B256 {
        derived_hash(self.origin, self.value, self.block)
    }

    pub fn with_index(self, index: u64) -> CommitmentRecord {
        CommitmentRecord {
            origin: self.origin,
            value: self.value,
            block: self.block,
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub origin: Address,
    pub value: B256,
    pub block: u64,
    pub index: u64,
}

impl CommitmentRecord {
    /// Hash the registry stores for this record:
    /// `keccak256(abi.encode(origin, value, uint256(block)))`.
    pub fn derived_hash(&self) -> B256 {
        derived_hash(self.origin, self.value, self.block)
    }

    /// Leaf inserted into the tree: `poseidon(origin, value, block)`.
    pub fn leaf_hash(&self) -> Result<Hash, HasherError> {
        Poseidon::hashv(&[
            self.origin.into_word().as_slice(),
            self.value.as_slice(),
            &u64_to_word(self.block),
        ])
    }
}

pub fn derived_hash(origin: Address, value: B256, block: u64) -> B256 {
    keccak256((origin, value, U256::from(block)).abi_encode())
}

/// Opaque hash stored at `index` in a registry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredLeaf {
    pub index: u64,
    pub hash: B256,
}

/// Arguments of a batch tree update, as submitted to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionArgs {
    #[serde(with = "hex::serde")]
    pub args_hash: Hash,
    #[serde(with = "hex::serde")]
    pub old_root: Hash,
    #[serde(with = "hex::serde")]
    pub new_root: Hash,
    pub path_indices: u32,
    pub leaves: Vec<CommitmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProof {
    #[serde(with = "hex::serde")]
    pub proof: Vec<u8>,
    pub args: SubmissionArgs,
}

/// One chunk of records together with the roots around it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub queue: QueueKind,
    pub start_index: u64,
    pub records: Vec<CommitmentRecord>,
    pub old_root: Hash,
    pub new_root: Hash,
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};

    use super::*;

    #[test]
    fn test_derived_hash_matches_abi_encoding() {
        let origin = address!("0x12D66f87A04A9E220743712cE6d9bB1B5616B8Fc");
        let value = b256!("0x0000000000000000000000000000000000000000000000000000000000000005");
        let mut encoded = Vec::with_capacity(96);
        encoded.extend_from_slice(origin.into_word().as_slice());
        encoded.extend_from_slice(value.as_slice());
        encoded.extend_from_slice(&u64_to_word(42));
        assert_eq!(derived_hash(origin, value, 42), keccak256(&encoded));
    }

    #[test]
    fn test_record_and_event_share_derived_hash() {
        let event = ResolvedEvent {
            origin: Address::repeat_byte(1),
            value: B256::repeat_byte(0),
            block: 7,
        };
        let record = event.with_index(3);
        assert_eq!(record.derived_hash(), event.derived_hash());
        assert_eq!(record.index, 3);
    }

    #[test]
    fn test_leaf_hash_depends_on_block() {
        let mut record = CommitmentRecord {
            origin: Address::repeat_byte(1),
            value: B256::with_last_byte(9),
            block: 10,
            index: 0,
        };
        let first = record.leaf_hash().unwrap();
        record.block = 11;
        assert_ne!(first, record.leaf_hash().unwrap());
    }
}
