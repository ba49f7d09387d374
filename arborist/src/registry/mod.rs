use std::{fmt::Debug, future::Future, sync::Arc};

use alloy::primitives::B256;
use arborist_hasher::Hash;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    errors::{ArboristError, ProviderError},
    types::{BatchProof, CommitmentRecord, QueueKind, RegisteredLeaf, RegistryVersion},
    utils::{retry, RetryConfig},
};

pub mod evm;

pub use evm::{EvmLegacyRegistry, EvmRegistry};

/// One deployed version of the registry contract.
#[async_trait]
pub trait RegistryContract: Send + Sync + Debug + 'static {
    /// Number of leaves already inserted into the on-chain tree.
    async fn processed_count(&self, queue: QueueKind) -> Result<u64, ProviderError>;

    /// Number of leaves ever registered, processed or not.
    async fn registered_count(&self, queue: QueueKind) -> Result<u64, ProviderError>;

    async fn leaf_at(&self, queue: QueueKind, index: u64) -> Result<B256, ProviderError>;

    async fn root(&self, queue: QueueKind) -> Result<Hash, ProviderError>;

    /// Length of the legacy queue frozen when this registry took over, if
    /// this registry replaced an older one.
    async fn cutover_length(&self, queue: QueueKind) -> Result<Option<u64>, ProviderError>;

    /// Records this registry announced through its own data events for
    /// indices in `[start, end)`.
    async fn data_records(
        &self,
        queue: QueueKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CommitmentRecord>, ProviderError>;

    /// Proven tree update. Never retried.
    async fn apply_batch(&self, queue: QueueKind, proof: &BatchProof) -> Result<(), ProviderError>;

    /// Unproven processing of `records`, only offered by legacy registries.
    async fn apply_unproven(
        &self,
        queue: QueueKind,
        records: &[CommitmentRecord],
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub queue: QueueKind,
    pub version: RegistryVersion,
    pub processed: u64,
    pub registered: u64,
    pub pending: u64,
    pub root: Hash,
    pub cutover: Option<u64>,
}

/// Read access to the current registry and, while migrating, the legacy one.
/// Every read is retried according to `retry`.
#[derive(Debug)]
pub struct RegistryReader {
    current: Arc<dyn RegistryContract>,
    legacy: Option<Arc<dyn RegistryContract>>,
    retry: RetryConfig,
    cutover: [OnceCell<Option<u64>>; 2],
}

impl RegistryReader {
    pub fn new(
        current: Arc<dyn RegistryContract>,
        legacy: Option<Arc<dyn RegistryContract>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            current,
            legacy,
            retry,
            cutover: [OnceCell::new(), OnceCell::new()],
        }
    }

    pub fn contract(&self, version: RegistryVersion) -> Result<&Arc<dyn RegistryContract>, ArboristError> {
        match version {
            RegistryVersion::Current => Ok(&self.current),
            RegistryVersion::Legacy => self
                .legacy
                .as_ref()
                .ok_or(ArboristError::MissingRegistry(RegistryVersion::Legacy)),
        }
    }

    pub fn is_migrating(&self) -> bool {
        self.legacy.is_some()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub async fn processed_count(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
    ) -> Result<u64, ArboristError> {
        let contract = self.contract(version)?;
        Ok(retry(&self.retry, "processed_count", || contract.processed_count(queue)).await?)
    }

    pub async fn registered_count(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
    ) -> Result<u64, ArboristError> {
        let contract = self.contract(version)?;
        Ok(retry(&self.retry, "registered_count", || contract.registered_count(queue)).await?)
    }

    /// Registered leaves not yet inserted into the tree.
    pub async fn pending_length(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
    ) -> Result<u64, ArboristError> {
        let processed = self.processed_count(version, queue).await?;
        let registered = self.registered_count(version, queue).await?;
        registered.checked_sub(processed).ok_or_else(|| {
            ArboristError::count_mismatch(
                queue,
                format!("{version} registry processed {processed} of {registered} registered leaves"),
            )
        })
    }

    pub async fn root(&self, version: RegistryVersion, queue: QueueKind) -> Result<Hash, ArboristError> {
        let contract = self.contract(version)?;
        Ok(retry(&self.retry, "root", || contract.root(queue)).await?)
    }

    /// Cutover length of the current registry. Read once per queue, it is
    /// fixed at deployment.
    pub async fn cutover_length(&self, queue: QueueKind) -> Result<Option<u64>, ArboristError> {
        let cell = &self.cutover[queue_slot(queue)];
        let cutover = cell
            .get_or_try_init(|| async {
                retry(&self.retry, "cutover_length", || self.current.cutover_length(queue)).await
            })
            .await?;
        Ok(*cutover)
    }

    /// Stored hash at `index`. For the current registry, indices below the
    /// cutover live in the legacy registry.
    pub async fn leaf_at(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
        index: u64,
    ) -> Result<RegisteredLeaf, ArboristError> {
        let version = match (version, self.cutover_length(queue).await?) {
            (RegistryVersion::Current, Some(cutover)) if index < cutover => {
                debug!("Routing {} leaf {} below cutover {} to legacy registry", queue, index, cutover);
                RegistryVersion::Legacy
            }
            (version, _) => version,
        };
        let contract = self.contract(version)?;
        let hash = retry(&self.retry, "leaf_at", || contract.leaf_at(queue, index)).await?;
        Ok(RegisteredLeaf { index, hash })
    }

    pub async fn data_records(
        &self,
        queue: QueueKind,
        start: u64,
        end: u64,
    ) -> Result<Vec<CommitmentRecord>, ArboristError> {
        Ok(retry(&self.retry, "data_records", || {
            self.current.data_records(queue, start, end)
        })
        .await?)
    }

    pub async fn status(
        &self,
        version: RegistryVersion,
        queue: QueueKind,
    ) -> Result<QueueStatus, ArboristError> {
        let processed = self.processed_count(version, queue).await?;
        let registered = self.registered_count(version, queue).await?;
        let root = self.root(version, queue).await?;
        let cutover = match version {
            RegistryVersion::Current => self.cutover_length(queue).await?,
            RegistryVersion::Legacy => None,
        };
        Ok(QueueStatus {
            queue,
            version,
            processed,
            registered,
            pending: registered.saturating_sub(processed),
            root,
            cutover,
        })
    }
}

fn queue_slot(queue: QueueKind) -> usize {
    match queue {
        QueueKind::Deposits => 0,
        QueueKind::Withdrawals => 1,
    }
}

/// Finds the length of an on-chain array that has no length getter.
/// `exists(i)` reports whether index `i` can be read. The search probes
/// `from`, `from + step`, `from + 3 * step`, ... doubling the step until an
/// index is missing, then bisects.
pub async fn find_array_length<F, Fut>(exists: F, from: u64, step: u64) -> Result<u64, ProviderError>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    let mut step = step.max(1);
    let (mut low, mut high) = if exists(from).await? {
        let mut low = from + 1;
        let mut high = from + step;
        while exists(high).await? {
            low = high + 1;
            step = step.saturating_mul(2);
            high = high.saturating_add(step);
        }
        (low.min(high), high)
    } else {
        (0, from)
    };

    // `high` is known to be missing, everything below `low` exists.
    while low < high {
        let mid = low + (high - low) / 2;
        if exists(mid).await? {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    Ok(low)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    async fn search(length: u64, from: u64, step: u64) -> u64 {
        find_array_length(|i| async move { Ok(i < length) }, from, step)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_array_length() {
        for length in [0, 1, 2, 99, 100, 101, 255, 256, 1000, 12345] {
            for (from, step) in [(0, 1), (0, 100), (50, 10), (500, 500), (20000, 7)] {
                assert_eq!(
                    search(length, from, step).await,
                    length,
                    "length {} from {} step {}",
                    length,
                    from,
                    step
                );
            }
        }
    }

    #[tokio::test]
    async fn test_find_array_length_uses_few_probes() {
        let probes = AtomicU32::new(0);
        let length = 1_000_000;
        let found = find_array_length(
            |i| {
                probes.fetch_add(1, Ordering::SeqCst);
                async move { Ok(i < length) }
            },
            0,
            500,
        )
        .await
        .unwrap();
        assert_eq!(found, length);
        assert!(probes.load(Ordering::SeqCst) < 64);
    }

    #[tokio::test]
    async fn test_find_array_length_propagates_errors() {
        let result = find_array_length(
            |_| async { Err(ProviderError::Transport("down".to_string())) },
            0,
            10,
        )
        .await;
        assert!(result.is_err());
    }
}
