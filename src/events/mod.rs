//! Contract event watching
//!
//! Polls logs emitted by the registered contracts and fans them out over a
//! broadcast channel. Topic signatures come straight from the registered
//! ABIs, so any contract added to the registry is watched without code
//! changes.

use crate::chain::ChainProvider;
use crate::config::EventsConfig;
use crate::contract::ContractRegistry;
use crate::error::DispatchResult;

use ethers::abi::RawLog;
use ethers::types::{Address, BlockNumber, Bytes, Filter, Log, H256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, warn};

/// A log emitted by one of the registered contracts.
///
/// `name` is `None` when the topic does not match any event in the
/// registered ABIs.
#[derive(Debug, Clone)]
pub struct ContractEvent {
    pub contract: String,
    pub name: Option<String>,
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: H256,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl ContractEvent {
    /// Event name for logs and metrics
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }
}

/// Polls the chain for logs from the registered contracts
pub struct EventWatcher {
    config: EventsConfig,
    provider: Arc<ChainProvider>,
    registry: Arc<ContractRegistry>,
    event_tx: broadcast::Sender<ContractEvent>,
    last_block: RwLock<u64>,
    /// topic0 -> (contract name, event name)
    topics: HashMap<H256, (String, String)>,
}

impl EventWatcher {
    pub fn new(
        config: EventsConfig,
        provider: Arc<ChainProvider>,
        registry: Arc<ContractRegistry>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(10000);
        let topics = topic_table(&registry);

        Self {
            config,
            provider,
            registry,
            event_tx,
            last_block: RwLock::new(0),
            topics,
        }
    }

    /// Subscribe to events from all registered contracts
    pub fn subscribe(&self) -> broadcast::Receiver<ContractEvent> {
        self.event_tx.subscribe()
    }

    /// Main polling loop
    pub async fn watch(&self) -> DispatchResult<()> {
        let addresses = self.registry.addresses();
        if addresses.is_empty() {
            warn!("No contracts registered; event watcher idle");
            return Ok(());
        }

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        // Start from the chain head; historical logs are out of scope
        {
            let mut last = self.last_block.write().await;
            if *last == 0 {
                *last = self.provider.get_block_number().await?;
            }
        }

        loop {
            let current_block = match self.provider.get_block_number().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to get block number: {}", e);
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            let last_block = *self.last_block.read().await;

            if current_block <= last_block {
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            let (from_block, to_block) =
                scan_range(last_block, current_block, self.config.max_block_range);

            debug!("Scanning blocks {} to {}", from_block, to_block);

            let filter = Filter::new()
                .address(addresses.clone())
                .from_block(BlockNumber::Number(from_block.into()))
                .to_block(BlockNumber::Number(to_block.into()));

            match self.provider.get_logs(&filter).await {
                Ok(logs) => {
                    for log in logs {
                        if let Err(e) = self.process_log(log) {
                            error!("Failed to process log: {}", e);
                        }
                    }

                    *self.last_block.write().await = to_block;
                }
                Err(e) => {
                    // Watermark stays put; the range is retried next round
                    warn!("Failed to get logs: {}", e);
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    fn process_log(&self, log: Log) -> DispatchResult<()> {
        let event = self.parse_log(&log);

        debug!(
            "Event {} from {} at block {}",
            event.label(),
            event.contract,
            event.block_number
        );
        crate::metrics::record_event(event.label());

        // A send error just means nobody is subscribed right now
        let _ = self.event_tx.send(event);

        Ok(())
    }

    /// Resolve a raw log against the registered ABIs
    pub fn parse_log(&self, log: &Log) -> ContractEvent {
        let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
        let tx_hash = log.transaction_hash.unwrap_or_default();

        let (contract, name) = log
            .topics
            .first()
            .and_then(|topic| self.topics.get(topic))
            .map(|(c, e)| (c.clone(), Some(e.clone())))
            .unwrap_or_else(|| ("unknown".to_string(), None));

        ContractEvent {
            contract,
            name,
            address: log.address,
            block_number,
            tx_hash,
            topics: log.topics.clone(),
            data: log.data.clone(),
        }
    }

    /// Decode the non-indexed data of a recognized event
    pub fn decode_event(&self, event: &ContractEvent) -> Option<Vec<ethers::abi::Token>> {
        let name = event.name.as_deref()?;
        let contract = self.registry.get(&event.contract).ok()?;
        let abi_event = contract.abi.event(name).ok()?;

        abi_event
            .parse_log(RawLog {
                topics: event.topics.clone(),
                data: event.data.to_vec(),
            })
            .ok()
            .map(|parsed| parsed.params.into_iter().map(|p| p.value).collect())
    }
}

/// Inclusive block window for one polling round.
///
/// Resumes one past the watermark and caps the window at `max_block_range`
/// blocks, so a watcher catching up after downtime never asks the node for
/// an unbounded log range.
fn scan_range(last_block: u64, current_block: u64, max_block_range: u64) -> (u64, u64) {
    let from_block = last_block + 1;
    let capped = from_block + max_block_range.saturating_sub(1);
    (from_block, std::cmp::min(current_block, capped))
}

/// Build the topic0 lookup table from every registered ABI
fn topic_table(registry: &ContractRegistry) -> HashMap<H256, (String, String)> {
    let mut topics = HashMap::new();

    for name in registry.names() {
        if let Ok(contract) = registry.get(&name) {
            for event in contract.abi.events() {
                topics.insert(
                    event.signature(),
                    (name.clone(), event.name.clone()),
                );
            }
        }
    }

    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::contract::Contract;
    use ethers::abi::Abi;

    const EVENT_ABI: &str = r#"[
        {
            "name": "Transfer",
            "type": "event",
            "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "amount", "type": "uint256", "indexed": false}
            ]
        }
    ]"#;

    fn watcher() -> EventWatcher {
        let abi: Abi = serde_json::from_str(EVENT_ABI).unwrap();
        let registry = Arc::new(ContractRegistry::from_contracts(vec![Contract {
            name: "Token".to_string(),
            address: Address::repeat_byte(0x11),
            abi,
        }]));

        let provider = Arc::new(
            ChainProvider::new(
                &ChainConfig {
                    chain_id: 1,
                    name: "test".to_string(),
                    rpc_urls: vec!["http://localhost:8545".to_string()],
                },
                2,
            )
            .unwrap(),
        );

        EventWatcher::new(
            EventsConfig {
                enabled: true,
                poll_interval_secs: 1,
                max_block_range: 100,
            },
            provider,
            registry,
        )
    }

    fn transfer_topic() -> H256 {
        let abi: Abi = serde_json::from_str(EVENT_ABI).unwrap();
        abi.event("Transfer").unwrap().signature()
    }

    fn address_topic(address: Address) -> H256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_bytes());
        H256::from(word)
    }

    #[test]
    fn parse_log_resolves_registered_topic() {
        let watcher = watcher();
        let log = Log {
            address: Address::repeat_byte(0x11),
            topics: vec![
                transfer_topic(),
                H256::repeat_byte(0x01),
                H256::repeat_byte(0x02),
            ],
            data: Bytes::from(vec![0u8; 32]),
            block_number: Some(100.into()),
            transaction_hash: Some(H256::repeat_byte(0xaa)),
            ..Default::default()
        };

        let event = watcher.parse_log(&log);
        assert_eq!(event.contract, "Token");
        assert_eq!(event.name.as_deref(), Some("Transfer"));
        assert_eq!(event.label(), "Transfer");
        assert_eq!(event.block_number, 100);
    }

    #[test]
    fn parse_log_marks_unregistered_topic_unknown() {
        let watcher = watcher();
        let log = Log {
            address: Address::repeat_byte(0x11),
            topics: vec![H256::repeat_byte(0xff)],
            ..Default::default()
        };

        let event = watcher.parse_log(&log);
        assert_eq!(event.name, None);
        assert_eq!(event.label(), "unknown");
    }

    #[test]
    fn decode_event_yields_declared_shape() {
        use ethers::abi::Token;
        use ethers::types::U256;

        let watcher = watcher();
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let mut amount = [0u8; 32];
        U256::from(500u64).to_big_endian(&mut amount);

        let log = Log {
            address: Address::repeat_byte(0x11),
            topics: vec![
                transfer_topic(),
                address_topic(from),
                address_topic(to),
            ],
            data: Bytes::from(amount.to_vec()),
            ..Default::default()
        };

        let event = watcher.parse_log(&log);
        let decoded = watcher.decode_event(&event).unwrap();

        assert_eq!(
            decoded,
            vec![
                Token::Address(from),
                Token::Address(to),
                Token::Uint(U256::from(500u64)),
            ]
        );
    }

    #[test]
    fn scan_range_caps_window_at_max_block_range() {
        // 1000-block cap scans blocks 1..=1000 inclusive, not 1001
        assert_eq!(scan_range(0, 5000, 1000), (1, 1000));
        assert_eq!(scan_range(999, 5000, 1000), (1000, 1999));
    }

    #[test]
    fn scan_range_stops_at_chain_head() {
        assert_eq!(scan_range(0, 5, 1000), (1, 5));
        assert_eq!(scan_range(4, 5, 1000), (5, 5));
    }

    #[test]
    fn scan_range_with_unit_cap_advances_one_block_per_round() {
        assert_eq!(scan_range(10, 50, 1), (11, 11));
    }
}
