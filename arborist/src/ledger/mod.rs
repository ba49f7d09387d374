use std::fmt::Debug;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use crate::errors::ProviderError;

pub mod events;
pub mod evm;

pub use evm::EvmLedger;

/// Log filter with inclusive block bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub addresses: Vec<Address>,
    pub event_signature: B256,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
}

/// Read-only access to the ledger's historical logs.
#[async_trait]
pub trait LedgerRpc: Send + Sync + Debug + 'static {
    async fn block_number(&self) -> Result<u64, ProviderError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<LedgerLog>, ProviderError>;
}
