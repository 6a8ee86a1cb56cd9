//! Gas-limit sizing and fee resolution for unsent transactions

use crate::chain::ChainReader;
use crate::config::FeeConfig;
use crate::error::DispatchResult;
use crate::tx::UnsentTransaction;

use ethers::types::{Address, U256};
use tracing::{debug, warn};

const GWEI: u64 = 1_000_000_000;

/// Decides whether a transaction is currently sendable and fills in its
/// gas-limit and fee fields.
///
/// "Not sendable" is a verdict, not an error: estimation reverted or fees
/// exceed the configured cap, so the caller gets the sentinel zero hash and
/// no nonce is consumed.
pub struct FeeResolver {
    config: FeeConfig,
}

impl FeeResolver {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Escalation factor applied on resends, in percent
    pub fn boost_percent(&self) -> u64 {
        self.config.boost_percent
    }

    /// Size the gas limit and fill fee fields in place.
    ///
    /// `boost` escalates beyond the transaction's previously recorded fee
    /// fields; `resend` keeps the already-stamped nonce in the estimation
    /// descriptor instead of treating the transaction as new. Returns
    /// `Ok(false)` when the transaction should not be submitted.
    pub async fn resolve(
        &self,
        reader: &dyn ChainReader,
        tx: &mut UnsentTransaction,
        from: Address,
        chain_id: u64,
        boost: bool,
        resend: bool,
        gas_limit_multiplier: f64,
    ) -> DispatchResult<bool> {
        // A fresh transaction must not carry a nonce into estimation; a
        // resend keeps the one it was stamped with.
        let mut estimate_tx = tx.clone();
        if !resend {
            estimate_tx.nonce = None;
        }

        let estimated = match reader
            .estimate_gas(&estimate_tx.to_typed(from, chain_id))
            .await?
        {
            Some(gas) => gas,
            None => {
                debug!("Transaction to {:?} would revert; not sendable", tx.to);
                return Ok(false);
            }
        };

        let multiplier_hundredths = (gas_limit_multiplier * 100.0).round() as u64;
        let scaled = estimated * U256::from(multiplier_hundredths) / U256::from(100);
        let gas_limit = scaled * (100 + self.config.gas_limit_buffer_percent) / 100;

        let estimate = reader.fee_estimate().await?;
        let mut max_fee = estimate.max_fee_per_gas;
        let mut priority = estimate.max_priority_fee_per_gas;

        if boost {
            // Replacement transactions must strictly outbid the recorded
            // fees or the node drops them as underpriced.
            if let Some(prev) = tx.max_fee_per_gas {
                max_fee = max_fee.max(prev * self.config.boost_percent / 100);
            }
            if let Some(prev) = tx.max_priority_fee_per_gas {
                priority = priority.max(prev * self.config.boost_percent / 100);
            }
        }

        let cap = U256::from(self.config.max_fee_per_gas_gwei) * U256::from(GWEI);
        if max_fee > cap {
            warn!(
                "Fee estimate {} exceeds cap {}; transaction to {:?} not sendable",
                max_fee, cap, tx.to
            );
            return Ok(false);
        }

        tx.gas_limit = Some(gas_limit);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);

        debug!(
            "Resolved tx to {:?}: gas_limit {} max_fee {} priority {}",
            tx.to, gas_limit, max_fee, priority
        );

        Ok(true)
    }
}
