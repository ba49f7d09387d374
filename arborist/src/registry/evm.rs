use std::{fmt, marker::PhantomData};

use alloy::{
    contract::Error as ContractError,
    primitives::{Address, Bytes, FixedBytes, B256, U256},
    providers::Provider,
    rpc::types::Filter,
    sol,
    sol_types::SolEvent,
    transports::{RpcError, Transport},
};
use arborist_hasher::Hash;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{find_array_length, RegistryContract};
use crate::{
    errors::ProviderError,
    ledger::evm::provider_error,
    types::{BatchProof, CommitmentRecord, QueueKind},
};

/// Batch size the deployed registry accepts in one tree update.
pub const CHUNK_SIZE: usize = 256;

sol! {
    #[sol(rpc)]
    contract TornadoTrees {
        struct TreeLeaf {
            bytes32 hash;
            address instance;
            uint32 block;
        }

        event DepositData(address instance, bytes32 indexed hash, uint256 block, uint256 index);
        event WithdrawalData(address instance, bytes32 indexed hash, uint256 block, uint256 index);

        function lastProcessedDepositLeaf() external view returns (uint256);
        function lastProcessedWithdrawalLeaf() external view returns (uint256);
        function depositsLength() external view returns (uint256);
        function withdrawalsLength() external view returns (uint256);
        function depositsV1Length() external view returns (uint256);
        function withdrawalsV1Length() external view returns (uint256);
        function deposits(uint256 index) external view returns (bytes32);
        function withdrawals(uint256 index) external view returns (bytes32);
        function depositRoot() external view returns (bytes32);
        function withdrawalRoot() external view returns (bytes32);

        function updateDepositTree(
            bytes calldata _proof,
            bytes32 _argsHash,
            bytes32 _currentRoot,
            bytes32 _newRoot,
            uint32 _pathIndices,
            TreeLeaf[256] calldata _events
        ) external;

        function updateWithdrawalTree(
            bytes calldata _proof,
            bytes32 _argsHash,
            bytes32 _currentRoot,
            bytes32 _newRoot,
            uint32 _pathIndices,
            TreeLeaf[256] calldata _events
        ) external;
    }

    #[sol(rpc)]
    contract TornadoTreesV1 {
        struct TreeLeaf {
            bytes32 hash;
            address instance;
            uint32 block;
        }

        function lastProcessedDepositLeaf() external view returns (uint256);
        function lastProcessedWithdrawalLeaf() external view returns (uint256);
        function deposits(uint256 index) external view returns (bytes32);
        function withdrawals(uint256 index) external view returns (bytes32);
        function depositRoot() external view returns (bytes32);
        function withdrawalRoot() external view returns (bytes32);

        function updateRoots(TreeLeaf[] calldata _deposits, TreeLeaf[] calldata _withdrawals) external;
    }
}

fn to_u64(value: U256, field: &'static str) -> Result<u64, ProviderError> {
    u64::try_from(value).map_err(|e| ProviderError::invalid_response(field, e))
}

fn to_u32_block(record: &CommitmentRecord) -> Result<u32, ProviderError> {
    u32::try_from(record.block)
        .map_err(|e| ProviderError::invalid_response("block", format!("{}: {}", record.block, e)))
}

fn call_error(call: &str, error: ContractError) -> ProviderError {
    match error {
        ContractError::TransportError(e) => match provider_error(e) {
            ProviderError::Reverted { message, .. } => ProviderError::Reverted {
                call: call.to_string(),
                message,
            },
            other => other,
        },
        other => ProviderError::Reverted {
            call: call.to_string(),
            message: other.to_string(),
        },
    }
}

fn is_revert(error: &ContractError) -> bool {
    matches!(error, ContractError::TransportError(RpcError::ErrorResp(_)))
}

/// Current registry: proven batch updates, leaves below the cutover are
/// read from the legacy registry.
pub struct EvmRegistry<T, P> {
    contract: TornadoTrees::TornadoTreesInstance<T, P>,
    provider: P,
    /// First block to search for the registry's data events.
    from_block: u64,
    _transport: PhantomData<fn() -> T>,
}

impl<T, P> EvmRegistry<T, P>
where
    T: Transport + Clone,
    P: Provider<T> + Clone,
{
    pub fn new(address: Address, provider: P, from_block: u64) -> Self {
        Self {
            contract: TornadoTrees::new(address, provider.clone()),
            provider,
            from_block,
            _transport: PhantomData,
        }
    }
}

impl<T, P> fmt::Debug for EvmRegistry<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmRegistry")
            .field("from_block", &self.from_block)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, P> RegistryContract for EvmRegistry<T, P>
where
    T: Transport + Clone,
    P: Provider<T> + Clone + 'static,
{
    async fn processed_count(&self, queue: QueueKind) -> Result<u64, ProviderError> {
        let value = match queue {
            QueueKind::Deposits => self
                .contract
                .lastProcessedDepositLeaf()
                .call()
                .await
                .map(|r| r._0),
            QueueKind::Withdrawals => self
                .contract
                .lastProcessedWithdrawalLeaf()
                .call()
                .await
                .map(|r| r._0),
        }
        .map_err(|e| call_error("lastProcessedLeaf", e))?;
        to_u64(value, "lastProcessedLeaf")
    }

    async fn registered_count(&self, queue: QueueKind) -> Result<u64, ProviderError> {
        let value = match queue {
            QueueKind::Deposits => self.contract.depositsLength().call().await.map(|r| r._0),
            QueueKind::Withdrawals => self.contract.withdrawalsLength().call().await.map(|r| r._0),
        }
        .map_err(|e| call_error("queueLength", e))?;
        to_u64(value, "queueLength")
    }

    async fn leaf_at(&self, queue: QueueKind, index: u64) -> Result<B256, ProviderError> {
        let index = U256::from(index);
        match queue {
            QueueKind::Deposits => self.contract.deposits(index).call().await.map(|r| r._0),
            QueueKind::Withdrawals => self.contract.withdrawals(index).call().await.map(|r| r._0),
        }
        .map_err(|e| call_error("leaf", e))
    }

    async fn root(&self, queue: QueueKind) -> Result<Hash, ProviderError> {
        let root = match queue {
            QueueKind::Deposits => self.contract.depositRoot().call().await.map(|r| r._0),
            QueueKind::Withdrawals => self.contract.withdrawalRoot().call().await.map(|r| r._0),
        }
        .map_err(|e| call_error("root", e))?;
        Ok(root.0)
    }

    async fn cutover_length(&self, queue: QueueKind) -> Result<Option<u64>, ProviderError> {
        let value = match queue {
            QueueKind::Deposits => self.contract.depositsV1Length().call().await.map(|r| r._0),
            QueueKind::Withdrawals => self
                .contract
                .withdrawalsV1Length()
                .call()
                .await
                .map(|r| r._0),
        }
        .map_err(|e| call_error("v1Length", e))?;
        Ok(Some(to_u64(value, "v1Length")?))
    }

    async fn data_records(
        &self,
        queue: QueueKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CommitmentRecord>, ProviderError> {
        let signature = match queue {
            QueueKind::Deposits => TornadoTrees::DepositData::SIGNATURE_HASH,
            QueueKind::Withdrawals => TornadoTrees::WithdrawalData::SIGNATURE_HASH,
        };
        let filter = Filter::new()
            .address(*self.contract.address())
            .event_signature(signature)
            .from_block(self.from_block);
        let logs = self.provider.get_logs(&filter).await.map_err(provider_error)?;

        let mut records = Vec::new();
        for log in logs {
            // Both data events share one layout.
            let event = TornadoTrees::DepositData::decode_raw_log(
                log.topics().iter().copied(),
                &log.data().data,
                false,
            )
            .map_err(|e| ProviderError::invalid_response("DataEvent", e))?;
            let index = to_u64(event.index, "index")?;
            if index < start || index >= end {
                continue;
            }
            records.push(CommitmentRecord {
                origin: event.instance,
                value: event.hash,
                block: to_u64(event.block, "block")?,
                index,
            });
        }
        debug!(
            "Found {} {} data events for [{}, {})",
            records.len(),
            queue,
            start,
            end
        );
        Ok(records)
    }

    async fn apply_batch(&self, queue: QueueKind, proof: &BatchProof) -> Result<(), ProviderError> {
        let args = &proof.args;
        let leaves = args
            .leaves
            .iter()
            .map(|record| {
                Ok(TornadoTrees::TreeLeaf {
                    hash: record.value,
                    instance: record.origin,
                    block: to_u32_block(record)?,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        let leaves: [TornadoTrees::TreeLeaf; CHUNK_SIZE] =
            leaves.try_into().map_err(|leaves: Vec<_>| {
                ProviderError::invalid_response(
                    "events",
                    format!("expected {} leaves, got {}", CHUNK_SIZE, leaves.len()),
                )
            })?;

        let proof_bytes = Bytes::from(proof.proof.clone());
        let args_hash = FixedBytes::from(args.args_hash);
        let old_root = FixedBytes::from(args.old_root);
        let new_root = FixedBytes::from(args.new_root);

        let sent = match queue {
            QueueKind::Deposits => {
                self.contract
                    .updateDepositTree(
                        proof_bytes,
                        args_hash,
                        old_root,
                        new_root,
                        args.path_indices,
                        leaves,
                    )
                    .send()
                    .await
            }
            QueueKind::Withdrawals => {
                self.contract
                    .updateWithdrawalTree(
                        proof_bytes,
                        args_hash,
                        old_root,
                        new_root,
                        args.path_indices,
                        leaves,
                    )
                    .send()
                    .await
            }
        };
        let pending_tx = sent.map_err(|e| call_error("updateTree", e))?;
        let tx_hash = *pending_tx.tx_hash();
        info!("{} tree update sent: {}", queue, tx_hash);

        let receipt = pending_tx.get_receipt().await.map_err(|e| {
            ProviderError::Transport(format!("Failed to get receipt for {}: {}", tx_hash, e))
        })?;
        if !receipt.status() {
            return Err(ProviderError::Reverted {
                call: "updateTree".to_string(),
                message: format!("transaction {} reverted", tx_hash),
            });
        }
        Ok(())
    }

    async fn apply_unproven(
        &self,
        _queue: QueueKind,
        _records: &[CommitmentRecord],
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Reverted {
            call: "updateRoots".to_string(),
            message: "current registry only accepts proven updates".to_string(),
        })
    }
}

/// Legacy registry: leaves live in public arrays without a length getter,
/// processing is unproven.
pub struct EvmLegacyRegistry<T, P> {
    contract: TornadoTreesV1::TornadoTreesV1Instance<T, P>,
    /// Starting hint and step of the array length search.
    length_search: (u64, u64),
    _transport: PhantomData<fn() -> T>,
}

impl<T, P> EvmLegacyRegistry<T, P>
where
    T: Transport + Clone,
    P: Provider<T>,
{
    pub fn new(address: Address, provider: P, length_search: (u64, u64)) -> Self {
        Self {
            contract: TornadoTreesV1::new(address, provider),
            length_search,
            _transport: PhantomData,
        }
    }
}

impl<T, P> fmt::Debug for EvmLegacyRegistry<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmLegacyRegistry")
            .field("length_search", &self.length_search)
            .finish_non_exhaustive()
    }
}

impl<T, P> EvmLegacyRegistry<T, P>
where
    T: Transport + Clone,
    P: Provider<T>,
{
    async fn leaf_exists(&self, queue: QueueKind, index: u64) -> Result<bool, ProviderError> {
        let index = U256::from(index);
        let result = match queue {
            QueueKind::Deposits => self.contract.deposits(index).call().await.map(|_| ()),
            QueueKind::Withdrawals => self.contract.withdrawals(index).call().await.map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if is_revert(&e) => Ok(false),
            Err(e) => Err(call_error("leaf", e)),
        }
    }
}

#[async_trait]
impl<T, P> RegistryContract for EvmLegacyRegistry<T, P>
where
    T: Transport + Clone,
    P: Provider<T> + 'static,
{
    async fn processed_count(&self, queue: QueueKind) -> Result<u64, ProviderError> {
        let value = match queue {
            QueueKind::Deposits => self
                .contract
                .lastProcessedDepositLeaf()
                .call()
                .await
                .map(|r| r._0),
            QueueKind::Withdrawals => self
                .contract
                .lastProcessedWithdrawalLeaf()
                .call()
                .await
                .map(|r| r._0),
        }
        .map_err(|e| call_error("lastProcessedLeaf", e))?;
        to_u64(value, "lastProcessedLeaf")
    }

    async fn registered_count(&self, queue: QueueKind) -> Result<u64, ProviderError> {
        let (from, step) = self.length_search;
        let length = find_array_length(|index| self.leaf_exists(queue, index), from, step).await?;
        debug!("Legacy {} array length: {}", queue, length);
        Ok(length)
    }

    async fn leaf_at(&self, queue: QueueKind, index: u64) -> Result<B256, ProviderError> {
        let index = U256::from(index);
        match queue {
            QueueKind::Deposits => self.contract.deposits(index).call().await.map(|r| r._0),
            QueueKind::Withdrawals => self.contract.withdrawals(index).call().await.map(|r| r._0),
        }
        .map_err(|e| call_error("leaf", e))
    }

    async fn root(&self, queue: QueueKind) -> Result<Hash, ProviderError> {
        let root = match queue {
            QueueKind::Deposits => self.contract.depositRoot().call().await.map(|r| r._0),
            QueueKind::Withdrawals => self.contract.withdrawalRoot().call().await.map(|r| r._0),
        }
        .map_err(|e| call_error("root", e))?;
        Ok(root.0)
    }

    async fn cutover_length(&self, _queue: QueueKind) -> Result<Option<u64>, ProviderError> {
        Ok(None)
    }

    async fn data_records(
        &self,
        _queue: QueueKind,
        _start: u64,
        _end: u64,
    ) -> Result<Vec<CommitmentRecord>, ProviderError> {
        Ok(Vec::new())
    }

    async fn apply_batch(&self, _queue: QueueKind, _proof: &BatchProof) -> Result<(), ProviderError> {
        Err(ProviderError::Reverted {
            call: "updateDepositTree".to_string(),
            message: "legacy registry does not accept proven updates".to_string(),
        })
    }

    async fn apply_unproven(
        &self,
        queue: QueueKind,
        records: &[CommitmentRecord],
    ) -> Result<(), ProviderError> {
        let leaves = records
            .iter()
            .map(|record| {
                Ok(TornadoTreesV1::TreeLeaf {
                    hash: record.value,
                    instance: record.origin,
                    block: to_u32_block(record)?,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        let (deposits, withdrawals) = match queue {
            QueueKind::Deposits => (leaves, Vec::new()),
            QueueKind::Withdrawals => (Vec::new(), leaves),
        };

        let pending_tx = self
            .contract
            .updateRoots(deposits, withdrawals)
            .send()
            .await
            .map_err(|e| call_error("updateRoots", e))?;
        let tx_hash = *pending_tx.tx_hash();
        info!("Legacy {} alignment sent: {}", queue, tx_hash);

        let receipt = pending_tx.get_receipt().await.map_err(|e| {
            ProviderError::Transport(format!("Failed to get receipt for {}: {}", tx_hash, e))
        })?;
        if !receipt.status() {
            return Err(ProviderError::Reverted {
                call: "updateRoots".to_string(),
                message: format!("transaction {} reverted", tx_hash),
            });
        }
        Ok(())
    }
}
