pub mod assembler;
pub mod cli;
pub mod config;
pub mod controller;
pub mod errors;
pub mod ledger;
pub mod mirror;
pub mod proof_cache;
pub mod prover;
pub mod registry;
pub mod scanner;
pub mod telemetry;
pub mod types;
pub mod utils;

use std::sync::Arc;

use alloy::{providers::Provider, transports::Transport};
pub use config::ArboristConfig;
pub use controller::{AlignmentReport, ControllerState, MigrationController, MigrationReport};
pub use errors::ArboristError;
use errors::ConfigError;
use ledger::LedgerRpc;
use proof_cache::{FileProofStore, ProofCache};
use prover::{BatchProver, HttpProver};
use registry::{EvmLegacyRegistry, EvmRegistry, QueueStatus, RegistryContract, RegistryReader};
use tracing::info;
use types::{QueueKind, RegistryVersion};
use utils::root_prefix;

/// Reader over the deployed registries configured in `config`. The deployed
/// registry only takes batches of `registry::evm::CHUNK_SIZE` leaves.
pub fn evm_registry_reader<T, P>(
    config: &ArboristConfig,
    provider: P,
) -> Result<RegistryReader, ConfigError>
where
    T: Transport + Clone,
    P: Provider<T> + Clone + 'static,
{
    config.require_chunk_size(registry::evm::CHUNK_SIZE as u64)?;
    let current: Arc<dyn RegistryContract> = Arc::new(EvmRegistry::<T, P>::new(
        config.registry.current,
        provider.clone(),
        config.registry.current_from_block,
    ));
    let legacy = config.registry.legacy.map(|address| {
        Arc::new(EvmLegacyRegistry::<T, P>::new(
            address,
            provider,
            config.registry.legacy_length_search,
        )) as Arc<dyn RegistryContract>
    });
    Ok(RegistryReader::new(current, legacy, config.retry))
}

pub fn http_prover(config: &ArboristConfig) -> HttpProver {
    HttpProver::new(
        config.external_services.prover_url.clone(),
        config.prover_polling_interval,
        config.prover_max_wait_time,
        config.max_proof_retries,
        config.external_services.prover_api_key.clone(),
    )
}

fn controller<L: LedgerRpc>(
    config: Arc<ArboristConfig>,
    reader: Arc<RegistryReader>,
    ledger: Arc<L>,
    prover: Arc<dyn BatchProver>,
) -> Result<MigrationController<L>, ArboristError> {
    let cache = ProofCache::open(Box::new(FileProofStore::new(&config.cache_path)))?;
    Ok(MigrationController::new(config, reader, ledger, prover, cache))
}

pub async fn run_migrate<L: LedgerRpc>(
    config: Arc<ArboristConfig>,
    reader: Arc<RegistryReader>,
    ledger: Arc<L>,
    prover: Arc<dyn BatchProver>,
) -> Result<MigrationReport, ArboristError> {
    info!(
        "Starting migration of registry {} (chunk size {})",
        config.registry.current, config.chunk_size
    );
    let mut controller = controller(config, reader, ledger, prover)?;
    controller.run().await
}

pub async fn run_align<L: LedgerRpc>(
    config: Arc<ArboristConfig>,
    reader: Arc<RegistryReader>,
    ledger: Arc<L>,
    prover: Arc<dyn BatchProver>,
) -> Result<Vec<AlignmentReport>, ArboristError> {
    let mut controller = controller(config, reader, ledger, prover)?;
    controller.align_legacy().await
}

pub async fn run_status(reader: &RegistryReader) -> Result<Vec<QueueStatus>, ArboristError> {
    let mut versions = vec![RegistryVersion::Current];
    if reader.is_migrating() {
        versions.push(RegistryVersion::Legacy);
    }

    let mut statuses = Vec::new();
    for version in versions {
        for queue in QueueKind::ALL {
            let status = reader.status(version, queue).await?;
            info!(
                "{} {}: processed {}, registered {}, pending {}, root {}, cutover {:?}",
                version,
                queue,
                status.processed,
                status.registered,
                status.pending,
                root_prefix(&status.root),
                status.cutover
            );
            statuses.push(status);
        }
    }
    Ok(statuses)
}
