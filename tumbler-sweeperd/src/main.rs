//! tumbler-sweeperd
//!
//! Sweep daemon for the mixing service.
//!
//! Architecture:
//! 1. Scan the recovery ledger for sweep-eligible hop records
//! 2. Query each address's balance via the ledger node
//! 3. Move residual funds to the recovery destination
//! 4. Mark records swept only after confirmation

mod config;
mod ledger;

use std::{sync::Arc, time::Duration};

use tracing::info;
use tumbler_common::{AeadCipher, Address, RecordStore};
use tumbler_core::{RecoveryLedger, SessionRepo, SweepConfig, SweepScheduler};

use crate::config::SweeperdConfig;
use crate::ledger::HttpLedger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tumbler_sweeperd=info,tumbler_core=info".into()),
        )
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SweeperdConfig::from_env()?;

    info!("Starting tumbler-sweeperd");
    info!("Ledger endpoint: {}", config.ledger_url);
    info!("Recovery destination: {}", config.recovery_destination);

    let store = RecordStore::persistent(format!("{}/records", config.data_dir));
    let sessions = SessionRepo::new(store.clone());
    let recovery =
        RecoveryLedger::new(store, sessions).with_stall_threshold(config.stall_threshold_secs);

    let ledger = Arc::new(HttpLedger::new(config.ledger_url.clone()));
    let cipher = Arc::new(AeadCipher::new(&config.cipher_key));

    let sweep_config = SweepConfig {
        network_fee: config.network_fee,
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        max_attempts: config.max_attempts,
        ..SweepConfig::new(Address::new(config.recovery_destination.clone()))
    };
    let scheduler = SweepScheduler::new(recovery, ledger, cipher, sweep_config);

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down sweeper...");

    scheduler_handle.abort();

    Ok(())
}
