//! Transaction dispatcher: build, resolve, nonce-stamp, sign and submit
//!
//! The dispatch path never propagates a submission failure. Callers get a
//! [`Submission`] pairing the (possibly fee-mutated) transaction with either
//! a real hash or the zero-hash sentinel, and poll the hash from there. The
//! dispatcher performs no automatic retries; deciding that a transaction is
//! stuck and resending it is the caller's job.

use crate::chain::{ChainReader, Submitter};
use crate::config::WalletConfig;
use crate::contract::ContractRegistry;
use crate::error::{DispatchError, DispatchResult, SubmitFailure};
use crate::tx::{FeeResolver, NonceLedger, TransactionBuilder, UnsentTransaction};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::abi::Token;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

/// Signer collaborator: turns a prepared transaction into raw
/// broadcastable bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Address the signatures belong to
    fn address(&self) -> Address;

    /// Sign a prepared transaction
    async fn sign(&self, tx: &TypedTransaction) -> Result<Bytes, SubmitFailure>;
}

/// The signing identity. Immutable once constructed.
pub struct Account {
    wallet: LocalWallet,
    address: Address,
}

impl Account {
    /// Load the account from the environment variable named in config
    pub fn from_env(config: &WalletConfig, chain_id: u64) -> DispatchResult<Self> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            DispatchError::Wallet(format!(
                "No private key in environment variable {}",
                config.private_key_env
            ))
        })?;

        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| DispatchError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        let address = wallet.address();
        Ok(Self { wallet, address })
    }

    /// Wrap an existing wallet (used by tests and embedders)
    pub fn from_wallet(wallet: LocalWallet, chain_id: u64) -> Self {
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();
        Self { wallet, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl TxSigner for Account {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: &TypedTransaction) -> Result<Bytes, SubmitFailure> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SubmitFailure::Signing(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }
}

/// Outcome of a dispatch attempt.
///
/// `hash == H256::zero()` means nothing was broadcast; `failure` says why,
/// when the reason was a submission error rather than an unsendable verdict.
#[derive(Debug, Clone)]
pub struct Submission {
    pub tx: UnsentTransaction,
    pub hash: H256,
    pub failure: Option<SubmitFailure>,
}

impl Submission {
    fn sent(tx: UnsentTransaction, hash: H256) -> Self {
        Self {
            tx,
            hash,
            failure: None,
        }
    }

    fn not_broadcast(tx: UnsentTransaction, failure: Option<SubmitFailure>) -> Self {
        Self {
            tx,
            hash: H256::zero(),
            failure,
        }
    }

    /// Whether a real hash was obtained
    pub fn broadcast(&self) -> bool {
        self.hash != H256::zero()
    }
}

/// A submission the dispatcher has handed to the network, keyed by nonce
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingSubmission {
    pub hash: H256,
    pub submitted_at: DateTime<Utc>,
}

/// Orchestrates the transaction lifecycle for one account
pub struct Dispatcher {
    reader: Arc<dyn ChainReader>,
    submitter: Arc<dyn Submitter>,
    registry: Arc<ContractRegistry>,
    builder: TransactionBuilder,
    fees: FeeResolver,
    signer: Arc<dyn TxSigner>,
    ledger: NonceLedger,
    chain_id: u64,
    /// nonce -> last submitted hash, for operator visibility
    pending: DashMap<u64, PendingSubmission>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: Arc<dyn ChainReader>,
        submitter: Arc<dyn Submitter>,
        registry: Arc<ContractRegistry>,
        builder: TransactionBuilder,
        fees: FeeResolver,
        signer: Arc<dyn TxSigner>,
        ledger: NonceLedger,
        chain_id: u64,
    ) -> Self {
        Self {
            reader,
            submitter,
            registry,
            builder,
            fees,
            signer,
            ledger,
            chain_id,
            pending: DashMap::new(),
        }
    }

    /// Signing account address
    pub fn account_address(&self) -> Address {
        self.signer.address()
    }

    /// Take the next nonce from the ledger
    pub async fn issue_nonce(&self) -> u64 {
        let nonce = self.ledger.issue().await;
        crate::metrics::record_next_nonce(self.ledger.peek().await);
        nonce
    }

    /// Overwrite the ledger with the current on-chain nonce
    pub async fn reset_nonce(&self) -> DispatchResult<u64> {
        let nonce = self.ledger.resync(self.reader.as_ref()).await?;
        crate::metrics::record_next_nonce(nonce);
        Ok(nonce)
    }

    /// Next nonce the ledger would hand out, without consuming it
    pub async fn next_nonce(&self) -> u64 {
        self.ledger.peek().await
    }

    /// Native balance of the signing account
    pub async fn balance(&self) -> DispatchResult<U256> {
        self.reader.get_balance(self.signer.address()).await
    }

    /// Submissions handed to the network by this process, keyed by nonce
    pub fn pending(&self) -> Vec<(u64, PendingSubmission)> {
        let mut entries: Vec<_> = self
            .pending
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(nonce, _)| *nonce);
        entries
    }

    /// Encode a contract method call into a fee-bounded unsent transaction
    pub async fn build_transaction(
        &self,
        contract_name: &str,
        method: &str,
        params: &[Token],
        value: Option<U256>,
    ) -> DispatchResult<UnsentTransaction> {
        let (address, data) = self.registry.resolve(contract_name, method, params)?;
        self.builder.build_sendable(address, data, value).await
    }

    /// Execute a read-only contract call and decode its output.
    ///
    /// Bypasses the nonce ledger entirely.
    pub async fn call_transaction(
        &self,
        contract_name: &str,
        method: &str,
        params: &[Token],
        sender: Option<Address>,
    ) -> DispatchResult<Vec<Token>> {
        let (address, data) = self.registry.resolve(contract_name, method, params)?;
        let sender = sender.unwrap_or_else(|| self.signer.address());

        let call = self.builder.build_call(address, data, None, sender);
        let output = self.reader.call(&call).await?;

        self.registry.decode(contract_name, method, &output)
    }

    /// Resolve fees, stamp a nonce and submit.
    ///
    /// Unsendable transactions return the sentinel without consuming a nonce.
    /// A submission failure also returns the sentinel but leaves the issued
    /// nonce consumed: the node may have accepted the transaction despite the
    /// error, and reusing the nonce could replace a live transaction.
    /// Operators reconcile gaps with [`Dispatcher::reset_nonce`].
    pub async fn send_transaction(
        &self,
        mut tx: UnsentTransaction,
        boost: bool,
        resend: bool,
        gas_limit_multiplier: f64,
    ) -> DispatchResult<Submission> {
        let sendable = self
            .fees
            .resolve(
                self.reader.as_ref(),
                &mut tx,
                self.signer.address(),
                self.chain_id,
                boost,
                resend,
                gas_limit_multiplier,
            )
            .await?;

        if !sendable {
            crate::metrics::record_tx_unsendable();
            return Ok(Submission::not_broadcast(tx, None));
        }

        let issued = !(resend && tx.nonce.is_some());
        if issued {
            tx.nonce = Some(self.issue_nonce().await);
        }

        self.sign_and_submit(tx, issued).await
    }

    /// Resubmit an already nonce-stamped transaction with boosted fees.
    ///
    /// The nonce is reused unchanged, so the network accepts at most one of
    /// the original and the replacement. The ledger is not touched.
    pub async fn resend_transaction(&self, mut tx: UnsentTransaction) -> DispatchResult<Submission> {
        if tx.nonce.is_none() {
            return Err(DispatchError::Internal(
                "resend requires a nonce-stamped transaction".to_string(),
            ));
        }

        tx.boost_fees(self.fees.boost_percent());
        crate::metrics::record_tx_resent();

        self.sign_and_submit(tx, false).await
    }

    /// Send native coin with an empty payload through the normal send path
    pub async fn transfer_native(
        &self,
        receiver: Address,
        value: U256,
        boost: bool,
        resend: bool,
    ) -> DispatchResult<Submission> {
        let tx = self
            .builder
            .build_sendable(receiver, Bytes::default(), Some(value))
            .await?;
        self.send_transaction(tx, boost, resend, 1.0).await
    }

    async fn sign_and_submit(
        &self,
        tx: UnsentTransaction,
        issued: bool,
    ) -> DispatchResult<Submission> {
        let nonce = tx.nonce.ok_or_else(|| {
            DispatchError::Internal("transaction reached submission without a nonce".to_string())
        })?;

        let typed = tx.to_typed(self.signer.address(), self.chain_id);

        let raw = match self.signer.sign(&typed).await {
            Ok(raw) => raw,
            Err(failure) => {
                // The transaction provably never left the process, so the
                // nonce can be reopened.
                if issued {
                    self.ledger.rollback().await;
                }
                warn!("Signing failed for nonce {}: {}", nonce, failure);
                crate::metrics::record_tx_failed();
                return Ok(Submission::not_broadcast(tx, Some(failure)));
            }
        };

        match self.submitter.submit(raw).await {
            Ok(hash) => {
                info!("Submitted tx {:?} with nonce {}", hash, nonce);
                self.pending.insert(
                    nonce,
                    PendingSubmission {
                        hash,
                        submitted_at: Utc::now(),
                    },
                );
                crate::metrics::record_tx_submitted();
                Ok(Submission::sent(tx, hash))
            }
            Err(failure) => {
                warn!("Submission failed for nonce {}: {}", nonce, failure);
                crate::metrics::record_tx_failed();
                Ok(Submission::not_broadcast(tx, Some(failure)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{FeeEstimate, MockChainReader, MockSubmitter};
    use crate::config::FeeConfig;
    use crate::contract::{Contract, ContractRegistry};
    use crate::tx::MockFeePolicy;
    use ethers::abi::Abi;

    const GWEI: u64 = 1_000_000_000;

    const TOKEN_ABI: &str = r#"[
        {
            "name": "balanceOf",
            "type": "function",
            "stateMutability": "view",
            "inputs": [{"name": "owner", "type": "address"}],
            "outputs": [{"name": "balance", "type": "uint256"}]
        },
        {
            "name": "deposit",
            "type": "function",
            "stateMutability": "payable",
            "inputs": [{"name": "amount", "type": "uint256"}],
            "outputs": []
        }
    ]"#;

    fn registry() -> Arc<ContractRegistry> {
        let abi: Abi = serde_json::from_str(TOKEN_ABI).unwrap();
        Arc::new(ContractRegistry::from_contracts(vec![Contract {
            name: "Token".to_string(),
            address: Address::repeat_byte(0x11),
            abi,
        }]))
    }

    fn fee_config() -> FeeConfig {
        FeeConfig {
            gas_limit_buffer_percent: 20,
            boost_percent: 125,
            max_fee_per_gas_gwei: 300,
            default_priority_fee_gwei: 2,
        }
    }

    fn policy() -> TransactionBuilder {
        let mut policy = MockFeePolicy::new();
        policy.expect_fee_upper_bound().returning(|_| {
            Ok(FeeEstimate {
                max_fee_per_gas: U256::from(50 * GWEI),
                max_priority_fee_per_gas: U256::from(2 * GWEI),
            })
        });
        TransactionBuilder::new(Arc::new(policy))
    }

    fn sendable_reader() -> MockChainReader {
        let mut reader = MockChainReader::new();
        reader
            .expect_estimate_gas()
            .returning(|_| Ok(Some(U256::from(21_000))));
        reader.expect_fee_estimate().returning(|| {
            Ok(FeeEstimate {
                max_fee_per_gas: U256::from(50 * GWEI),
                max_priority_fee_per_gas: U256::from(2 * GWEI),
            })
        });
        reader
    }

    fn dispatcher(
        reader: MockChainReader,
        submitter: MockSubmitter,
        start_nonce: u64,
    ) -> Dispatcher {
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let account = Account::from_wallet(wallet, 1);
        let ledger = NonceLedger::new(account.address(), start_nonce);

        Dispatcher::new(
            Arc::new(reader),
            Arc::new(submitter),
            registry(),
            policy(),
            FeeResolver::new(fee_config()),
            Arc::new(account),
            ledger,
            1,
        )
    }

    fn dispatcher_with_signer(
        reader: MockChainReader,
        submitter: MockSubmitter,
        signer: MockTxSigner,
        start_nonce: u64,
    ) -> Dispatcher {
        let ledger = NonceLedger::new(signer.address(), start_nonce);

        Dispatcher::new(
            Arc::new(reader),
            Arc::new(submitter),
            registry(),
            policy(),
            FeeResolver::new(fee_config()),
            Arc::new(signer),
            ledger,
            1,
        )
    }

    fn failing_signer() -> MockTxSigner {
        let mut signer = MockTxSigner::new();
        signer
            .expect_address()
            .return_const(Address::repeat_byte(0x22));
        signer
            .expect_sign()
            .returning(|_| Err(SubmitFailure::Signing("key unavailable".to_string())));
        signer
    }

    fn skeleton() -> UnsentTransaction {
        UnsentTransaction::new(Address::repeat_byte(0x11), Bytes::default(), U256::zero())
    }

    #[tokio::test]
    async fn successful_send_stamps_issued_nonce() {
        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(H256::repeat_byte(0xaa)));

        let dispatcher = dispatcher(sendable_reader(), submitter, 5);
        let submission = dispatcher
            .send_transaction(skeleton(), false, false, 1.0)
            .await
            .unwrap();

        assert!(submission.broadcast());
        assert_eq!(submission.hash, H256::repeat_byte(0xaa));
        assert_eq!(submission.tx.nonce, Some(5));
        assert_eq!(dispatcher.next_nonce().await, 6);
        assert_eq!(dispatcher.pending().len(), 1);
    }

    #[tokio::test]
    async fn unsendable_returns_sentinel_and_leaves_ledger_untouched() {
        let mut reader = MockChainReader::new();
        reader.expect_estimate_gas().returning(|_| Ok(None));

        let dispatcher = dispatcher(reader, MockSubmitter::new(), 5);
        let submission = dispatcher
            .send_transaction(skeleton(), false, false, 1.0)
            .await
            .unwrap();

        assert!(!submission.broadcast());
        assert_eq!(submission.hash, H256::zero());
        assert!(submission.failure.is_none());
        assert_eq!(submission.tx.nonce, None);
        assert_eq!(dispatcher.next_nonce().await, 5);
    }

    #[tokio::test]
    async fn submission_failure_keeps_the_nonce_consumed() {
        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Err(SubmitFailure::Network("connection reset".into())));

        let dispatcher = dispatcher(sendable_reader(), submitter, 5);
        let submission = dispatcher
            .send_transaction(skeleton(), false, false, 1.0)
            .await
            .unwrap();

        assert!(!submission.broadcast());
        assert!(matches!(
            submission.failure,
            Some(SubmitFailure::Network(_))
        ));
        // The nonce stays burned; recovery is an explicit reset_nonce
        assert_eq!(dispatcher.next_nonce().await, 6);
    }

    #[tokio::test]
    async fn signing_failure_rolls_the_nonce_back() {
        let dispatcher = dispatcher_with_signer(
            sendable_reader(),
            MockSubmitter::new(),
            failing_signer(),
            5,
        );

        let submission = dispatcher
            .send_transaction(skeleton(), false, false, 1.0)
            .await
            .unwrap();

        assert!(!submission.broadcast());
        assert_eq!(submission.hash, H256::zero());
        assert!(matches!(
            submission.failure,
            Some(SubmitFailure::Signing(_))
        ));
        // The tx never left the process, so the issued nonce is returned
        assert_eq!(dispatcher.next_nonce().await, 5);
    }

    #[tokio::test]
    async fn signing_failure_on_resend_leaves_ledger_untouched() {
        let dispatcher = dispatcher_with_signer(
            MockChainReader::new(),
            MockSubmitter::new(),
            failing_signer(),
            9,
        );

        let mut tx = skeleton();
        tx.nonce = Some(5);
        tx.gas_limit = Some(U256::from(21_000));
        tx.max_fee_per_gas = Some(U256::from(40 * GWEI));
        tx.max_priority_fee_per_gas = Some(U256::from(2 * GWEI));

        let submission = dispatcher.resend_transaction(tx).await.unwrap();

        assert!(matches!(
            submission.failure,
            Some(SubmitFailure::Signing(_))
        ));
        // No nonce was issued for a resend, so nothing to roll back
        assert_eq!(dispatcher.next_nonce().await, 9);
    }

    #[tokio::test]
    async fn resend_reuses_nonce_and_boosts_fees() {
        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(H256::repeat_byte(0xbb)));

        let dispatcher = dispatcher(MockChainReader::new(), submitter, 9);

        let mut tx = skeleton();
        tx.nonce = Some(5);
        tx.gas_limit = Some(U256::from(21_000));
        tx.max_fee_per_gas = Some(U256::from(40 * GWEI));
        tx.max_priority_fee_per_gas = Some(U256::from(2 * GWEI));

        let submission = dispatcher.resend_transaction(tx).await.unwrap();

        assert!(submission.broadcast());
        assert_eq!(submission.tx.nonce, Some(5));
        assert_eq!(submission.tx.max_fee_per_gas, Some(U256::from(50 * GWEI)));
        assert_eq!(dispatcher.next_nonce().await, 9);
    }

    #[tokio::test]
    async fn resend_without_nonce_is_rejected() {
        let dispatcher = dispatcher(MockChainReader::new(), MockSubmitter::new(), 0);
        let err = dispatcher.resend_transaction(skeleton()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
    }

    #[tokio::test]
    async fn reset_nonce_adopts_chain_value() {
        let mut reader = sendable_reader();
        reader.expect_get_nonce().returning(|_| Ok(17));

        let dispatcher = dispatcher(reader, MockSubmitter::new(), 3);
        dispatcher.issue_nonce().await;

        assert_eq!(dispatcher.reset_nonce().await.unwrap(), 17);
        assert_eq!(dispatcher.issue_nonce().await, 17);
    }

    #[tokio::test]
    async fn call_transaction_round_trips_through_abi() {
        let mut reader = MockChainReader::new();
        reader.expect_call().returning(|_| {
            let mut word = [0u8; 32];
            U256::from(42u64).to_big_endian(&mut word);
            Ok(Bytes::from(word.to_vec()))
        });

        let dispatcher = dispatcher(reader, MockSubmitter::new(), 0);
        let decoded = dispatcher
            .call_transaction(
                "Token",
                "balanceOf",
                &[Token::Address(Address::repeat_byte(0x22))],
                None,
            )
            .await
            .unwrap();

        assert_eq!(decoded, vec![Token::Uint(U256::from(42u64))]);
        // Read path never touches the ledger
        assert_eq!(dispatcher.next_nonce().await, 0);
    }

    #[tokio::test]
    async fn build_transaction_rejects_unknown_contract() {
        let dispatcher = dispatcher(MockChainReader::new(), MockSubmitter::new(), 0);
        let err = dispatcher
            .build_transaction("Escrow", "deposit", &[Token::Uint(100.into())], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownContract(_)));
    }

    #[tokio::test]
    async fn built_then_unsendable_leaves_nonce_identical() {
        let mut reader = MockChainReader::new();
        reader.expect_estimate_gas().returning(|_| Ok(None));

        let dispatcher = dispatcher(reader, MockSubmitter::new(), 12);
        let tx = dispatcher
            .build_transaction("Token", "deposit", &[Token::Uint(100.into())], Some(U256::exp10(18)))
            .await
            .unwrap();

        let before = dispatcher.next_nonce().await;
        let submission = dispatcher.send_transaction(tx, false, false, 1.0).await.unwrap();

        assert_eq!(submission.hash, H256::zero());
        assert_eq!(dispatcher.next_nonce().await, before);
    }

    #[tokio::test]
    async fn transfer_native_goes_through_the_send_path() {
        let mut submitter = MockSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_| Ok(H256::repeat_byte(0xcc)));

        let dispatcher = dispatcher(sendable_reader(), submitter, 0);
        let submission = dispatcher
            .transfer_native(Address::repeat_byte(0x99), U256::exp10(18), false, false)
            .await
            .unwrap();

        assert!(submission.broadcast());
        assert_eq!(submission.tx.value, U256::exp10(18));
        assert!(submission.tx.data.is_empty());
        assert_eq!(submission.tx.nonce, Some(0));
    }
}
