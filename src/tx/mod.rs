//! Transaction lifecycle: nonce ledger, builder, fee resolution, dispatch

mod builder;
mod dispatcher;
mod fee;
mod nonce;

pub use builder::{ChainFeePolicy, FeePolicy, TransactionBuilder, UnsentTransaction};
pub use dispatcher::{Account, Dispatcher, PendingSubmission, Submission, TxSigner};
pub use fee::FeeResolver;
pub use nonce::NonceLedger;

#[cfg(test)]
pub use builder::MockFeePolicy;
