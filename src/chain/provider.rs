//! Chain provider with multi-RPC support and automatic failover

use crate::chain::{ChainReader, Submitter};
use crate::config::ChainConfig;
use crate::error::{DispatchError, DispatchResult, SubmitFailure};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// EIP-1559 fee fields as read from the network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Priority fee used when the node reports none
    default_priority_fee: U256,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &ChainConfig, default_priority_fee_gwei: u64) -> DispatchResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DispatchError::Config(format!(
                "No valid RPC providers for chain {}",
                config.name
            )));
        }

        Ok(Self {
            config: config.clone(),
            http_providers,
            current_provider: AtomicUsize::new(0),
            default_priority_fee: U256::from(default_priority_fee_gwei)
                * U256::from(1_000_000_000u64),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        crate::metrics::record_rpc_failover();
        warn!("Chain {} failover to provider {}", self.config.name, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> DispatchResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.name, e
                    );
                    self.failover();
                }
            }
        }

        Err(DispatchError::Rpc("All providers failed".to_string()))
    }

    /// Get logs for a filter, with failover
    pub async fn get_logs(&self, filter: &Filter) -> DispatchResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(DispatchError::Rpc(
            "All providers failed to get logs".to_string(),
        ))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.name, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }
}

#[async_trait]
impl ChainReader for ChainProvider {
    async fn get_nonce(&self, address: Address) -> DispatchResult<u64> {
        let nonce = self
            .http()
            .get_transaction_count(address, None)
            .await
            .map_err(|e| DispatchError::Rpc(e.to_string()))?;

        Ok(nonce.as_u64())
    }

    async fn get_balance(&self, address: Address) -> DispatchResult<U256> {
        self.http()
            .get_balance(address, None)
            .await
            .map_err(|e| DispatchError::Rpc(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DispatchResult<Option<U256>> {
        match self.http().estimate_gas(tx, None).await {
            Ok(gas) => Ok(Some(gas)),
            Err(e) => {
                let msg = e.to_string();
                // A revert means "do not submit", not a transport problem
                if msg.contains("revert") || msg.contains("execution reverted") {
                    debug!("Gas estimation reverted: {}", msg);
                    Ok(None)
                } else {
                    Err(DispatchError::GasEstimation(msg))
                }
            }
        }
    }

    async fn fee_estimate(&self) -> DispatchResult<FeeEstimate> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| DispatchError::GasEstimation(e.to_string()))?
            .ok_or_else(|| DispatchError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| DispatchError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = self.default_priority_fee;

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        debug!(
            "Fee estimate for chain {}: max_fee {} priority {}",
            self.config.name, max_fee, priority_fee
        );

        Ok(FeeEstimate {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee,
        })
    }

    async fn call(&self, tx: &TypedTransaction) -> DispatchResult<Bytes> {
        self.http()
            .call(tx, None)
            .await
            .map_err(|e| DispatchError::Rpc(e.to_string()))
    }
}

#[async_trait]
impl Submitter for ChainProvider {
    async fn submit(&self, raw: Bytes) -> Result<H256, SubmitFailure> {
        let result = timeout(SUBMIT_TIMEOUT, self.http().send_raw_transaction(raw)).await;

        match result {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => {
                let msg = e.to_string();
                if msg.contains("nonce too low")
                    || msg.contains("underpriced")
                    || msg.contains("insufficient funds")
                    || msg.contains("already known")
                {
                    Err(SubmitFailure::Rejected(msg))
                } else {
                    Err(SubmitFailure::Network(msg))
                }
            }
            Err(_) => Err(SubmitFailure::Network(format!(
                "submission timed out after {:?}",
                SUBMIT_TIMEOUT
            ))),
        }
    }
}
