//! Events emitted by the source contracts whose hashes end up in the
//! registry.

use alloy::{
    primitives::{Address, B256, U256},
    sol,
    sol_types::SolEvent,
};

use super::LedgerLog;
use crate::{errors::ProviderError, types::QueueKind, types::ResolvedEvent};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    event Deposit(bytes32 indexed commitment, uint32 leafIndex, uint256 timestamp);

    #[derive(Debug, PartialEq, Eq)]
    event Withdrawal(address to, bytes32 nullifierHash, address indexed relayer, uint256 fee);
}

/// Signature hash of the source event that feeds `queue`.
pub fn event_signature(queue: QueueKind) -> B256 {
    match queue {
        QueueKind::Deposits => Deposit::SIGNATURE_HASH,
        QueueKind::Withdrawals => Withdrawal::SIGNATURE_HASH,
    }
}

/// Extracts origin, value and block from a source log.
pub fn decode_source_event(queue: QueueKind, log: &LedgerLog) -> Result<ResolvedEvent, ProviderError> {
    let value = match queue {
        QueueKind::Deposits => {
            Deposit::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                .map_err(|e| ProviderError::invalid_response("Deposit", e))?
                .commitment
        }
        QueueKind::Withdrawals => {
            Withdrawal::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                .map_err(|e| ProviderError::invalid_response("Withdrawal", e))?
                .nullifierHash
        }
    };
    Ok(ResolvedEvent {
        origin: log.address,
        value,
        block: log.block_number,
    })
}

/// Builds the log a source contract emits for `value`. Used to replay
/// history in tests and tooling.
pub fn encode_source_event(queue: QueueKind, origin: Address, value: B256, block: u64) -> LedgerLog {
    let data = match queue {
        QueueKind::Deposits => Deposit {
            commitment: value,
            leafIndex: 0,
            timestamp: U256::from(block),
        }
        .encode_log_data(),
        QueueKind::Withdrawals => Withdrawal {
            to: origin,
            nullifierHash: value,
            relayer: Address::ZERO,
            fee: U256::ZERO,
        }
        .encode_log_data(),
    };
    LedgerLog {
        address: origin,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number: block,
    }
}
