use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory for hourly rotated log files. Empty to log to stdout only.
    #[arg(long, env = "ARBORIST_LOG_DIR", default_value = "logs", global = true)]
    pub log_dir: String,

    /// Write file logs as JSON lines.
    #[arg(long, env = "ARBORIST_LOG_JSON", global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drain both queues of the current registry in proven batches.
    Migrate(MigrateArgs),
    /// Process just enough legacy leaves, unproven, to make both legacy
    /// queues chunk aligned.
    Align(MigrateArgs),
    /// Print counters and roots of every configured registry.
    Status(StatusArgs),
}

#[derive(Parser, Clone, Debug)]
pub struct MigrateArgs {
    #[arg(long, env = "ARBORIST_RPC_URL")]
    pub rpc_url: String,

    #[arg(long, env = "ARBORIST_PROVER_URL", default_value = "http://localhost:3001")]
    pub prover_url: String,

    #[arg(long, env = "ARBORIST_PROVER_API_KEY")]
    pub prover_api_key: Option<String>,

    #[arg(long, env = "ARBORIST_PRIVATE_KEY")]
    pub private_key: Option<String>,

    #[arg(long, env = "ARBORIST_REGISTRY")]
    pub registry: String,

    #[arg(long, env = "ARBORIST_LEGACY_REGISTRY")]
    pub legacy_registry: Option<String>,

    /// First block to search for the current registry's data events.
    #[arg(long, env = "ARBORIST_REGISTRY_FROM_BLOCK", default_value = "0")]
    pub registry_from_block: u64,

    #[arg(long, env = "ARBORIST_LEGACY_LENGTH_FROM", default_value = "0")]
    pub legacy_length_from: u64,

    #[arg(long, env = "ARBORIST_LEGACY_LENGTH_STEP", default_value = "100")]
    pub legacy_length_step: u64,

    #[arg(long, env = "ARBORIST_DEPOSIT_INSTANCES", value_delimiter = ',')]
    pub deposit_instances: Vec<String>,

    #[arg(long, env = "ARBORIST_WITHDRAWAL_INSTANCES", value_delimiter = ',')]
    pub withdrawal_instances: Vec<String>,

    #[arg(long, env = "ARBORIST_DEPOSIT_FROM_BLOCK", default_value = "0")]
    pub deposit_from_block: u64,

    #[arg(long, env = "ARBORIST_WITHDRAWAL_FROM_BLOCK", default_value = "0")]
    pub withdrawal_from_block: u64,

    #[arg(long, env = "ARBORIST_SCAN_STEP", default_value = "500")]
    pub scan_step: u64,

    #[arg(long, env = "ARBORIST_SCAN_MAX_WINDOWS", default_value = "100000")]
    pub scan_max_windows: u64,

    #[arg(long, env = "ARBORIST_CHUNK_SIZE", default_value = "256")]
    pub chunk_size: u64,

    #[arg(long, env = "ARBORIST_CACHE_PATH", default_value = "proof_cache.jsonl")]
    pub cache_path: String,

    #[arg(long, env = "ARBORIST_SNAPSHOT_DIR")]
    pub snapshot_dir: Option<String>,

    #[arg(long, env = "ARBORIST_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    #[arg(long, env = "ARBORIST_RETRY_DELAY", default_value = "1000")]
    pub retry_delay: u64,

    #[arg(long, env = "ARBORIST_RETRY_TIMEOUT", default_value = "30000")]
    pub retry_timeout: u64,

    #[arg(long, env = "ARBORIST_PROVER_POLLING_INTERVAL", default_value = "1000")]
    pub prover_polling_interval: u64,

    #[arg(long, env = "ARBORIST_PROVER_MAX_WAIT_TIME", default_value = "600")]
    pub prover_max_wait_time: u64,

    #[arg(long, env = "ARBORIST_MAX_PROOF_RETRIES", default_value = "3")]
    pub max_proof_retries: u32,
}

#[derive(Parser, Clone, Debug)]
pub struct StatusArgs {
    #[arg(long, env = "ARBORIST_RPC_URL")]
    pub rpc_url: String,

    #[arg(long, env = "ARBORIST_REGISTRY")]
    pub registry: String,

    #[arg(long, env = "ARBORIST_LEGACY_REGISTRY")]
    pub legacy_registry: Option<String>,

    #[arg(long, env = "ARBORIST_LEGACY_LENGTH_FROM", default_value = "0")]
    pub legacy_length_from: u64,

    #[arg(long, env = "ARBORIST_LEGACY_LENGTH_STEP", default_value = "100")]
    pub legacy_length_step: u64,
}
