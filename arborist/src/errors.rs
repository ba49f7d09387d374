use std::path::PathBuf;

use alloy::primitives::B256;
use arborist_hasher::errors::HasherError;
use arborist_merkle_tree::MerkleTreeError;
use thiserror::Error;

use crate::types::{QueueKind, RegistryVersion};

#[derive(Error, Debug)]
pub enum ArboristError {
    #[error("No event matching {hash} found in blocks [{from_block}, {to_block}) after {windows} windows")]
    NotFound {
        hash: B256,
        from_block: u64,
        to_block: u64,
        windows: u64,
    },

    #[error("Hash {hash} matches more than one event (blocks {first_block} and {second_block})")]
    AmbiguousMatch {
        hash: B256,
        first_block: u64,
        second_block: u64,
    },

    #[error("Integrity error in {queue} at index {index}: {reason}")]
    Integrity {
        queue: QueueKind,
        index: u64,
        reason: String,
    },

    #[error("Root mismatch in {queue}: local {local}, remote {remote}")]
    RootMismatch {
        queue: QueueKind,
        local: String,
        remote: String,
    },

    #[error("Count mismatch in {queue}: {reason}")]
    CountMismatch { queue: QueueKind, reason: String },

    #[error("Queue {queue} is not chunk aligned: processed {processed}, chunk size {chunk_size}")]
    UnalignedQueue {
        queue: QueueKind,
        processed: u64,
        chunk_size: u64,
    },

    #[error("Registry version {0} is not configured")]
    MissingRegistry(RegistryVersion),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Proof generation error: {0}")]
    ProofGeneration(#[from] ProverError),

    #[error("Submission of {queue} batch at {start_index} failed: {error}")]
    Submission {
        queue: QueueKind,
        start_index: u64,
        error: ProviderError,
    },

    #[error("Proof cache error: {0}")]
    ProofCache(#[from] ProofCacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Hasher error: {0}")]
    Hasher(#[from] HasherError),

    #[error("Merkle tree error: {0}")]
    MerkleTree(#[from] MerkleTreeError),

    #[error("Snapshot error for {path:?}: {error}")]
    Snapshot { path: PathBuf, error: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Call {call} reverted: {message}")]
    Reverted { call: String, message: String },

    #[error("Invalid response for {field}: {error}")]
    InvalidResponse { field: &'static str, error: String },
}

impl ProviderError {
    /// Transport failures and timeouts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_) | ProviderError::Timeout(_))
    }

    pub fn invalid_response<E: std::fmt::Display>(field: &'static str, error: E) -> Self {
        Self::InvalidResponse {
            field,
            error: error.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProverError {
    #[error("Prover server error: {0}")]
    ProverServerError(String),

    #[error("Invalid prover inputs: {0}")]
    InvalidInput(String),

    #[error("Proof generation failed after {attempts} attempts: {error}")]
    MaxRetriesExceeded { attempts: u32, error: String },
}

#[derive(Error, Debug)]
pub enum ProofCacheError {
    #[error("Failed to access proof cache at {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Malformed proof cache entry at line {line}: {error}")]
    Malformed { line: usize, error: String },

    #[error("Failed to serialize proof cache entry: {0}")]
    Serialize(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid address: {field} - {error}")]
    InvalidAddress { field: &'static str, error: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ArboristError {
    pub fn integrity(queue: QueueKind, index: u64, reason: impl Into<String>) -> Self {
        Self::Integrity {
            queue,
            index,
            reason: reason.into(),
        }
    }

    pub fn count_mismatch(queue: QueueKind, reason: impl Into<String>) -> Self {
        Self::CountMismatch {
            queue,
            reason: reason.into(),
        }
    }

    pub fn root_mismatch(queue: QueueKind, local: &[u8; 32], remote: &[u8; 32]) -> Self {
        Self::RootMismatch {
            queue,
            local: hex::encode(local),
            remote: hex::encode(remote),
        }
    }
}
