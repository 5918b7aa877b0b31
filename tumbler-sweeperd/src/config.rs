//! Sweeper daemon configuration.

use anyhow::{Context, Result};
use std::env;

/// Daemon configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct SweeperdConfig {
    /// Ledger node HTTP endpoint.
    pub ledger_url: String,
    /// Address reclaimed funds are sent to.
    pub recovery_destination: String,
    /// Directory holding the sled databases.
    pub data_dir: String,
    /// AES-256 key for hop-secret decryption, hex-encoded.
    pub cipher_key: [u8; 32],
    /// Network fee withheld per sweep transfer, in smallest units.
    pub network_fee: u64,
    /// Seconds between sweep scans.
    pub poll_interval_secs: u64,
    /// Stall threshold for Executing sessions, in seconds.
    pub stall_threshold_secs: u64,
    /// Maximum ledger attempts per record and scan.
    pub max_attempts: u32,
}

impl SweeperdConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let ledger_url =
            env::var("TUMBLER_LEDGER_URL").context("TUMBLER_LEDGER_URL must be set")?;

        let recovery_destination = env::var("TUMBLER_RECOVERY_DESTINATION")
            .context("TUMBLER_RECOVERY_DESTINATION must be set")?;

        let data_dir = env::var("TUMBLER_DATA_DIR").unwrap_or_else(|_| "data".to_string());

        let key_hex =
            env::var("TUMBLER_CIPHER_KEY").context("TUMBLER_CIPHER_KEY must be set")?;
        let key_bytes = hex::decode(key_hex.trim())
            .context("TUMBLER_CIPHER_KEY must be hex")?;
        let cipher_key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("TUMBLER_CIPHER_KEY must decode to 32 bytes"))?;

        let network_fee: u64 = env::var("TUMBLER_NETWORK_FEE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);

        let poll_interval_secs: u64 = env::var("TUMBLER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let stall_threshold_secs: u64 = env::var("TUMBLER_STALL_THRESHOLD_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);

        let max_attempts: u32 = env::var("TUMBLER_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            ledger_url,
            recovery_destination,
            data_dir,
            cipher_key,
            network_fee,
            poll_interval_secs,
            stall_threshold_secs,
            max_attempts,
        })
    }
}
