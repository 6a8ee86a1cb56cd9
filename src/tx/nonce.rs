//! Nonce ledger for one signing account
//!
//! Keeps the next nonce to assign locally so concurrent senders never pay an
//! RPC round-trip per transaction, at the cost of possible drift after failed
//! sends. Drift is recovered explicitly via [`NonceLedger::resync`].

use crate::chain::ChainReader;
use crate::error::DispatchResult;

use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Next-nonce counter for a single account.
///
/// All three operations share one mutex: an issue that interleaves with a
/// resync or rollback can hand out a duplicate or skipped nonce.
pub struct NonceLedger {
    /// Account the counter belongs to
    address: Address,
    /// Next nonce to hand out
    next: Mutex<u64>,
}

impl NonceLedger {
    /// Create a ledger starting at `initial` (normally the on-chain nonce)
    pub fn new(address: Address, initial: u64) -> Self {
        Self {
            address,
            next: Mutex::new(initial),
        }
    }

    /// Hand out the next nonce and advance the counter.
    ///
    /// Infallible: once constructed, the ledger always has a next value.
    pub async fn issue(&self) -> u64 {
        let mut next = self.next.lock().await;
        let nonce = *next;
        *next += 1;

        debug!("Issued nonce {} for {:?}", nonce, self.address);
        nonce
    }

    /// Overwrite the counter with the current on-chain nonce.
    ///
    /// The lock is held across the chain read so no issue can interleave with
    /// the reset. On an RPC failure the counter is left untouched.
    pub async fn resync(&self, reader: &dyn ChainReader) -> DispatchResult<u64> {
        let mut next = self.next.lock().await;
        let on_chain = reader.get_nonce(self.address).await?;

        if *next != on_chain {
            warn!(
                "Nonce resync for {:?}: local {} -> on-chain {}",
                self.address, *next, on_chain
            );
        }
        *next = on_chain;

        Ok(on_chain)
    }

    /// Undo the most recent issue.
    ///
    /// Only valid when the corresponding transaction never reached the
    /// network; a rollback after a broadcast reopens a nonce the chain may
    /// already have seen.
    pub async fn rollback(&self) {
        let mut next = self.next.lock().await;
        *next = next.saturating_sub(1);

        debug!("Rolled nonce back to {} for {:?}", *next, self.address);
    }

    /// Current next-to-issue value, for status reporting
    pub async fn peek(&self) -> u64 {
        *self.next.lock().await
    }

    /// Account this ledger issues for
    pub fn address(&self) -> Address {
        self.address
    }
}
