use std::sync::Arc;

use alloy::{
    network::EthereumWallet,
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use anyhow::Context;
use arborist::{
    cli::{Cli, Commands, MigrateArgs},
    evm_registry_reader, http_prover,
    ledger::EvmLedger,
    run_align, run_migrate, run_status,
    telemetry::{setup_telemetry, TelemetryConfig},
    ArboristConfig,
};
use clap::Parser;
use tracing::{error, info};

type HttpTransport = Http<Client>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_telemetry(&TelemetryConfig::from(&cli));

    let result = match cli.command {
        Commands::Migrate(args) => migrate(&args, false).await,
        Commands::Align(args) => migrate(&args, true).await,
        Commands::Status(args) => {
            let config = ArboristConfig::new_for_status(&args)?;
            let provider = ProviderBuilder::new().on_http(
                config
                    .external_services
                    .rpc_url
                    .parse()
                    .context("Invalid RPC URL")?,
            );
            let reader = evm_registry_reader::<HttpTransport, _>(&config, provider)?;
            run_status(&reader).await.map(|_| ()).map_err(Into::into)
        }
    };

    if let Err(e) = &result {
        error!("arborist failed: {:#}", e);
    }
    result
}

async fn migrate(args: &MigrateArgs, align_only: bool) -> anyhow::Result<()> {
    let config = Arc::new(ArboristConfig::new_for_migrate(args)?);
    let signer: PrivateKeySigner = config
        .private_key()?
        .parse()
        .context("Invalid private key")?;
    info!("Submitting from {}", signer.address());

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(
            config
                .external_services
                .rpc_url
                .parse()
                .context("Invalid RPC URL")?,
        );
    let reader = Arc::new(evm_registry_reader::<HttpTransport, _>(
        &config,
        provider.clone(),
    )?);
    let ledger = Arc::new(EvmLedger::<HttpTransport, _>::new(provider));
    let prover = Arc::new(http_prover(&config));

    if align_only {
        for report in run_align(config, reader, ledger, prover).await? {
            info!("Legacy {} aligned, {} leaves uploaded", report.queue, report.uploaded);
        }
        return Ok(());
    }

    let report = run_migrate(config, reader, ledger, prover).await?;
    for queue in &report.queues {
        info!(
            "{}: {} batches, {} leaves, {} proofs generated, {} cache hits, {} remaining",
            queue.queue,
            queue.batches,
            queue.leaves_processed,
            queue.proofs_generated,
            queue.cache_hits,
            queue.remaining
        );
    }
    Ok(())
}
