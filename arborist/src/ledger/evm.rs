use std::{fmt, marker::PhantomData};

use alloy::{
    providers::Provider,
    rpc::types::Filter,
    transports::{RpcError, Transport, TransportError},
};
use async_trait::async_trait;

use super::{LedgerLog, LedgerRpc, LogQuery};
use crate::errors::ProviderError;

/// [`LedgerRpc`] backed by an alloy provider.
pub struct EvmLedger<T, P> {
    provider: P,
    _transport: PhantomData<fn() -> T>,
}

impl<T, P> EvmLedger<T, P>
where
    T: Transport + Clone,
    P: Provider<T>,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            _transport: PhantomData,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<T, P> fmt::Debug for EvmLedger<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmLedger").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, P> LedgerRpc for EvmLedger<T, P>
where
    T: Transport + Clone,
    P: Provider<T> + 'static,
{
    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.provider
            .get_block_number()
            .await
            .map_err(provider_error)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<LedgerLog>, ProviderError> {
        let filter = Filter::new()
            .address(query.addresses.clone())
            .event_signature(query.event_signature)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(provider_error)?;

        logs.into_iter()
            .map(|log| {
                let block_number = log.block_number.ok_or_else(|| {
                    ProviderError::invalid_response("block_number", "pending log")
                })?;
                Ok(LedgerLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.clone(),
                    block_number,
                })
            })
            .collect()
    }
}

/// Maps a transport error onto [`ProviderError`]. Error responses from the
/// node are not retryable, everything else is.
pub fn provider_error(error: TransportError) -> ProviderError {
    match error {
        RpcError::ErrorResp(payload) => ProviderError::Reverted {
            call: "rpc".to_string(),
            message: payload.to_string(),
        },
        RpcError::DeserError { err, text } => {
            ProviderError::invalid_response("rpc", format!("{}: {}", err, text))
        }
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("timed out") {
                ProviderError::Timeout(message)
            } else {
                ProviderError::Transport(message)
            }
        }
    }
}
