use std::{path::PathBuf, str::FromStr, time::Duration};

use alloy::primitives::Address;

use crate::{
    cli::{MigrateArgs, StatusArgs},
    errors::ConfigError,
    mirror::LocalTreeMirror,
    scanner::ScanConfig,
    types::QueueKind,
    utils::RetryConfig,
};

#[derive(Debug, Clone)]
pub struct ExternalServicesConfig {
    pub rpc_url: String,
    pub prover_url: String,
    pub prover_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub current: Address,
    pub legacy: Option<Address>,
    /// First block holding data events of the current registry.
    pub current_from_block: u64,
    /// Starting index and step for locating the end of the legacy arrays.
    pub legacy_length_search: (u64, u64),
}

/// Source contracts feeding each queue and where their history starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcesConfig {
    pub deposit_instances: Vec<Address>,
    pub withdrawal_instances: Vec<Address>,
    pub deposit_from_block: u64,
    pub withdrawal_from_block: u64,
}

impl SourcesConfig {
    pub fn instances(&self, queue: QueueKind) -> &[Address] {
        match queue {
            QueueKind::Deposits => &self.deposit_instances,
            QueueKind::Withdrawals => &self.withdrawal_instances,
        }
    }

    pub fn from_block(&self, queue: QueueKind) -> u64 {
        match queue {
            QueueKind::Deposits => self.deposit_from_block,
            QueueKind::Withdrawals => self.withdrawal_from_block,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArboristConfig {
    pub external_services: ExternalServicesConfig,
    pub registry: RegistryConfig,
    pub sources: SourcesConfig,
    pub scan: ScanConfig,
    pub retry: RetryConfig,
    pub chunk_size: u64,
    pub cache_path: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    pub prover_polling_interval: Duration,
    pub prover_max_wait_time: Duration,
    pub max_proof_retries: u32,
    pub private_key: Option<String>,
}

impl ArboristConfig {
    pub fn new_for_migrate(args: &MigrateArgs) -> Result<Self, ConfigError> {
        let config = Self {
            external_services: ExternalServicesConfig {
                rpc_url: args.rpc_url.clone(),
                prover_url: args.prover_url.clone(),
                prover_api_key: args.prover_api_key.clone(),
            },
            registry: RegistryConfig {
                current: parse_address("registry", &args.registry)?,
                legacy: args
                    .legacy_registry
                    .as_deref()
                    .map(|address| parse_address("legacy_registry", address))
                    .transpose()?,
                current_from_block: args.registry_from_block,
                legacy_length_search: (args.legacy_length_from, args.legacy_length_step),
            },
            sources: SourcesConfig {
                deposit_instances: parse_addresses("deposit_instances", &args.deposit_instances)?,
                withdrawal_instances: parse_addresses(
                    "withdrawal_instances",
                    &args.withdrawal_instances,
                )?,
                deposit_from_block: args.deposit_from_block,
                withdrawal_from_block: args.withdrawal_from_block,
            },
            scan: ScanConfig {
                step: args.scan_step,
                max_windows: args.scan_max_windows,
            },
            retry: RetryConfig {
                max_retries: args.max_retries,
                retry_delay: Duration::from_millis(args.retry_delay),
                timeout: Duration::from_millis(args.retry_timeout),
            },
            chunk_size: args.chunk_size,
            cache_path: PathBuf::from(&args.cache_path),
            snapshot_dir: args.snapshot_dir.as_ref().map(PathBuf::from),
            prover_polling_interval: Duration::from_millis(args.prover_polling_interval),
            prover_max_wait_time: Duration::from_secs(args.prover_max_wait_time),
            max_proof_retries: args.max_proof_retries,
            private_key: args.private_key.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn new_for_status(args: &StatusArgs) -> Result<Self, ConfigError> {
        Ok(Self {
            external_services: ExternalServicesConfig {
                rpc_url: args.rpc_url.clone(),
                prover_url: String::new(),
                prover_api_key: None,
            },
            registry: RegistryConfig {
                current: parse_address("registry", &args.registry)?,
                legacy: args
                    .legacy_registry
                    .as_deref()
                    .map(|address| parse_address("legacy_registry", address))
                    .transpose()?,
                current_from_block: 0,
                legacy_length_search: (args.legacy_length_from, args.legacy_length_step),
            },
            sources: SourcesConfig::default(),
            scan: ScanConfig::default(),
            retry: RetryConfig::default(),
            chunk_size: 256,
            cache_path: PathBuf::new(),
            snapshot_dir: None,
            prover_polling_interval: Duration::from_secs(1),
            prover_max_wait_time: Duration::from_secs(600),
            max_proof_retries: 0,
            private_key: None,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || !self.chunk_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: format!("{} is not a power of two", self.chunk_size),
            });
        }
        let capacity = LocalTreeMirror::capacity();
        if self.chunk_size > capacity {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: format!("{} exceeds tree capacity {}", self.chunk_size, capacity),
            });
        }
        if self.scan.step == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_step",
                reason: "must be positive".to_string(),
            });
        }
        if self.scan.max_windows == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_max_windows",
                reason: "must be positive".to_string(),
            });
        }
        for queue in QueueKind::ALL {
            if self.sources.instances(queue).is_empty() {
                return Err(ConfigError::MissingField {
                    field: match queue {
                        QueueKind::Deposits => "deposit_instances",
                        QueueKind::Withdrawals => "withdrawal_instances",
                    },
                });
            }
        }
        Ok(())
    }

    /// Fails unless batches are exactly `accepted` leaves, the size the
    /// target registry takes in one update.
    pub fn require_chunk_size(&self, accepted: u64) -> Result<(), ConfigError> {
        if self.chunk_size != accepted {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: format!("registry accepts batches of {}, got {}", accepted, self.chunk_size),
            });
        }
        Ok(())
    }

    /// Height of the subtree one batch fills.
    pub fn chunk_height(&self) -> usize {
        self.chunk_size.trailing_zeros() as usize
    }

    pub fn private_key(&self) -> Result<&str, ConfigError> {
        self.private_key
            .as_deref()
            .ok_or(ConfigError::MissingField {
                field: "private_key",
            })
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|e| ConfigError::InvalidAddress {
        field,
        error: e.to_string(),
    })
}

/// Parses a list of addresses, dropping duplicates while keeping order.
fn parse_addresses(field: &'static str, values: &[String]) -> Result<Vec<Address>, ConfigError> {
    let mut addresses: Vec<Address> = Vec::with_capacity(values.len());
    for value in values.iter().filter(|value| !value.trim().is_empty()) {
        let address = parse_address(field, value)?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}
