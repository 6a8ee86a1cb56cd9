//! Chain module - RPC access and the top-level chain context
//!
//! This module provides:
//! - The collaborator seams the dispatcher depends on ([`ChainReader`],
//!   [`Submitter`])
//! - Multi-RPC provider management with automatic failover
//! - [`ChainContext`]: read-only wiring of provider, registry, account,
//!   dispatcher and event watcher

pub mod provider;

pub use provider::{ChainProvider, FeeEstimate};

use crate::config::Settings;
use crate::contract::ContractRegistry;
use crate::error::{DispatchResult, SubmitFailure};
use crate::events::EventWatcher;
use crate::tx::{
    Account, ChainFeePolicy, Dispatcher, FeeResolver, NonceLedger, TransactionBuilder,
};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::info;

/// Read-side chain access the dispatcher and fee resolver depend on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current on-chain transaction count for an address
    async fn get_nonce(&self, address: Address) -> DispatchResult<u64>;

    /// Native balance of an address
    async fn get_balance(&self, address: Address) -> DispatchResult<U256>;

    /// Gas required by a transaction. `Ok(None)` means estimation determined
    /// the call would revert under current state: not an error, just not
    /// sendable.
    async fn estimate_gas(&self, tx: &TypedTransaction) -> DispatchResult<Option<U256>>;

    /// Current EIP-1559 fee estimate
    async fn fee_estimate(&self) -> DispatchResult<FeeEstimate>;

    /// Execute a read-only call and return the raw output
    async fn call(&self, tx: &TypedTransaction) -> DispatchResult<Bytes>;
}

/// Write-side chain access: hand a signed transaction to the network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Broadcast a raw signed transaction, returning its hash
    async fn submit(&self, raw: Bytes) -> Result<H256, SubmitFailure>;
}

/// Top-level wiring for one chain.
///
/// Holds the transaction-handling capability ([`Dispatcher`]) and the
/// event-handling capability ([`EventWatcher`]) as separate values; neither
/// knows about the other. Everything here is read-only after construction.
pub struct ChainContext {
    provider: Arc<ChainProvider>,
    registry: Arc<ContractRegistry>,
    dispatcher: Arc<Dispatcher>,
    watcher: Option<Arc<EventWatcher>>,
}

impl ChainContext {
    /// Build the full context from settings.
    ///
    /// Reads the account's on-chain nonce once to seed the ledger, the same
    /// way every later `reset_nonce` does.
    pub async fn new(settings: &Settings) -> DispatchResult<Self> {
        let provider = Arc::new(ChainProvider::new(
            &settings.chain,
            settings.fees.default_priority_fee_gwei,
        )?);

        let registry = Arc::new(ContractRegistry::from_configs(&settings.contracts)?);
        info!(
            "Contract registry built with {} entries",
            registry.names().len()
        );

        let account = Account::from_env(&settings.wallet, settings.chain.chain_id)?;
        info!("Signing account: {:?}", account.address());

        let initial_nonce = provider.get_nonce(account.address()).await?;
        let ledger = NonceLedger::new(account.address(), initial_nonce);
        info!("Nonce ledger seeded at {}", initial_nonce);

        let policy = Arc::new(ChainFeePolicy::new(provider.clone()));
        let builder = TransactionBuilder::new(policy);
        let resolver = FeeResolver::new(settings.fees.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            provider.clone(),
            provider.clone(),
            registry.clone(),
            builder,
            resolver,
            Arc::new(account),
            ledger,
            settings.chain.chain_id,
        ));

        let watcher = if settings.events.enabled {
            Some(Arc::new(EventWatcher::new(
                settings.events.clone(),
                provider.clone(),
                registry.clone(),
            )))
        } else {
            None
        };

        Ok(Self {
            provider,
            registry,
            dispatcher,
            watcher,
        })
    }

    /// Transaction dispatcher for this chain
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Event watcher, when enabled in config
    pub fn watcher(&self) -> Option<Arc<EventWatcher>> {
        self.watcher.clone()
    }

    /// Underlying RPC provider
    pub fn provider(&self) -> Arc<ChainProvider> {
        self.provider.clone()
    }

    /// Contract registry
    pub fn registry(&self) -> Arc<ContractRegistry> {
        self.registry.clone()
    }
}
