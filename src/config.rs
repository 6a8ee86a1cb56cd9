//! Configuration management for the Conduit relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub fees: FeeConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub events: EventsConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex-encoded private key
    pub private_key_env: String,
    /// Alert threshold for the signing account's native balance
    pub min_balance_eth: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    /// Buffer percentage applied on top of the estimated gas limit
    pub gas_limit_buffer_percent: u64,
    /// Multiplier (in percent, e.g. 125 = +25%) applied when boosting fees
    pub boost_percent: u64,
    /// Hard cap on max_fee_per_gas; estimates above it are not sendable
    pub max_fee_per_gas_gwei: u64,
    /// Default priority fee when the node reports none, in gwei
    pub default_priority_fee_gwei: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Upper bound on blocks scanned per polling round
    pub max_block_range: u64,
}

/// One registered contract: name is the lookup key, ABI is loaded from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub name: String,
    pub address: String,
    pub abi_path: String,
}

impl Settings {
    /// Load settings from the configured TOML file
    pub fn load() -> Result<Self> {
        let config_path = env::var("CONDUIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from a TOML string with `${VAR}` substitution applied
    pub fn from_toml(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&substituted).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.fees.boost_percent <= 100 {
            anyhow::bail!("fees.boost_percent must be above 100 to escalate fees");
        }

        let mut seen = std::collections::HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(&contract.name) {
                anyhow::bail!("Duplicate contract name: {}", contract.name);
            }
            if contract.address.is_empty() {
                anyhow::bail!("Contract {} has no address", contract.name);
            }
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR_RE: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
