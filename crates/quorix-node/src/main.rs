//! Quorix Node Binary
//!
//! Runs consensus rounds against the synthetic measurement source and
//! prints every decision as JSON on stdout.

mod config;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quorix_common::VERSION;
use quorix_ledger::{
    ConsensusRound, MemoryAuditSink, OracleConfig, ResourceOracle, RoundRequest, SyntheticSource,
    TemporalLockManager,
};

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Quorix node v{}", VERSION);

    let config = NodeConfig::load()?;
    info!(?config, "Loaded configuration");

    let locks = Arc::new(TemporalLockManager::new());
    for request in config.lock_requests()? {
        let receipt = locks.apply(&request)?;
        info!(shard = receipt.shard_idx, unlock_at = %receipt.unlock_at, "Lock applied");
    }

    let source = Arc::new(SyntheticSource::new());
    let oracle = Arc::new(ResourceOracle::new(OracleConfig::default()).with_source(source.clone()));
    let audit = Arc::new(MemoryAuditSink::new());

    let mut round = ConsensusRound::new(config.round_config(), oracle.clone(), source)?
        .with_lock_manager(locks)
        .with_audit_sink(audit.clone());
    round.init_node_keys(&config.signing_method, &config.shard_indices)?;

    for n in 1..=config.rounds {
        let request = RoundRequest::new(config.shard_indices.clone(), config.kind.clone())
            .with_quick_verify(config.quick_verify)
            .with_repetitions(config.repetitions);

        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            warn!("Received shutdown signal");
        };

        match round.start_round_with_cancel(request, shutdown).await {
            Ok(decision) => {
                info!(round = n, achieved = decision.achieved, "Round complete");
                println!("{}", serde_json::to_string_pretty(&decision)?);
            }
            Err(e) => {
                error!(round = n, error = %e, "Round failed");
                return Err(e.into());
            }
        }
    }

    info!(
        offers = oracle.ledger_len(),
        audit_events = audit.len(),
        "Quorix node finished"
    );
    Ok(())
}
