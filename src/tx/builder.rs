//! Unsent transaction descriptor and builder

use crate::chain::{ChainReader, FeeEstimate};
use crate::error::DispatchResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use std::sync::Arc;
use tracing::debug;

/// A transaction that has been assembled but not yet broadcast.
///
/// Created with fee fields unset, filled in by the fee resolver, stamped with
/// a nonce by the dispatcher, and mutated again (fees only) on resend. The
/// nonce, once stamped, survives every later mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsentTransaction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: Option<u64>,
}

impl UnsentTransaction {
    pub fn new(to: Address, data: Bytes, value: U256) -> Self {
        Self {
            to,
            data,
            value,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: None,
        }
    }

    /// Multiply recorded fee fields by `percent / 100`.
    ///
    /// Used before a resend so the replacement strictly outbids the original.
    pub fn boost_fees(&mut self, percent: u64) {
        if let Some(fee) = self.max_fee_per_gas {
            self.max_fee_per_gas = Some(fee * percent / 100);
        }
        if let Some(priority) = self.max_priority_fee_per_gas {
            self.max_priority_fee_per_gas = Some(priority * percent / 100);
        }
    }

    /// Render as an EIP-1559 request ready for signing or estimation
    pub fn to_typed(&self, from: Address, chain_id: u64) -> TypedTransaction {
        let mut request = Eip1559TransactionRequest::new()
            .from(from)
            .to(self.to)
            .data(self.data.clone())
            .value(self.value)
            .chain_id(chain_id);

        if let Some(gas) = self.gas_limit {
            request = request.gas(gas);
        }
        if let Some(fee) = self.max_fee_per_gas {
            request = request.max_fee_per_gas(fee);
        }
        if let Some(priority) = self.max_priority_fee_per_gas {
            request = request.max_priority_fee_per_gas(priority);
        }
        if let Some(nonce) = self.nonce {
            request = request.nonce(nonce);
        }

        TypedTransaction::Eip1559(request)
    }
}

/// Fee-policy collaborator: computes the fee upper bound recorded on a
/// freshly built transaction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeePolicy: Send + Sync {
    async fn fee_upper_bound(&self, tx: &UnsentTransaction) -> DispatchResult<FeeEstimate>;
}

/// Default policy: take the network's current estimate as the upper bound
pub struct ChainFeePolicy {
    reader: Arc<dyn ChainReader>,
}

impl ChainFeePolicy {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl FeePolicy for ChainFeePolicy {
    async fn fee_upper_bound(&self, _tx: &UnsentTransaction) -> DispatchResult<FeeEstimate> {
        self.reader.fee_estimate().await
    }
}

/// Assembles unsent transactions and read-only call descriptors
pub struct TransactionBuilder {
    policy: Arc<dyn FeePolicy>,
}

impl TransactionBuilder {
    pub fn new(policy: Arc<dyn FeePolicy>) -> Self {
        Self { policy }
    }

    /// Build a read-only call descriptor for eth_call.
    ///
    /// No nonce, no fee fields: the call never touches the ledger.
    pub fn build_call(
        &self,
        to: Address,
        data: Bytes,
        value: Option<U256>,
        sender: Address,
    ) -> TypedTransaction {
        let request = Eip1559TransactionRequest::new()
            .from(sender)
            .to(to)
            .data(data)
            .value(value.unwrap_or_default());

        TypedTransaction::Eip1559(request)
    }

    /// Build a fee-bearing transaction skeleton.
    ///
    /// The fee-policy upper bound is stamped now; the nonce is deferred to
    /// dispatch time to keep the issue-to-submit window small.
    pub async fn build_sendable(
        &self,
        to: Address,
        data: Bytes,
        value: Option<U256>,
    ) -> DispatchResult<UnsentTransaction> {
        let mut tx = UnsentTransaction::new(to, data, value.unwrap_or_default());

        let bound = self.policy.fee_upper_bound(&tx).await?;
        tx.max_fee_per_gas = Some(bound.max_fee_per_gas);
        tx.max_priority_fee_per_gas = Some(bound.max_priority_fee_per_gas);

        debug!(
            "Built sendable tx to {:?} with fee bound {}",
            to, bound.max_fee_per_gas
        );

        Ok(tx)
    }
}
