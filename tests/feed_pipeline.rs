use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crosschain_feed::feed::poller::{PollerConfig, TransactionPoller};
use crosschain_feed::feed::reconciler::FeedReconciler;
use crosschain_feed::feed::store::FeedStore;
use crosschain_feed::feed::view::{FeedFilter, FeedStats};
use crosschain_feed::models::errors::SourceError;
use crosschain_feed::models::transaction::{TransactionRecord, TxStatus};
use crosschain_feed::source::{ChainDataSource, fetch_multi_chain};

const SEPOLIA: u64 = 11155111;
const BASE_SEPOLIA: u64 = 84532;
const AMOY: u64 = 80002;

/// In-memory source: a fixed history per chain plus queued poll responses.
/// Amoy is treated as having no endpoint.
struct MockSource {
    tip: u64,
    history: HashMap<u64, Vec<TransactionRecord>>,
    polls: Mutex<HashMap<u64, VecDeque<Result<Vec<TransactionRecord>, ()>>>>,
}

impl MockSource {
    fn new(tip: u64) -> Self {
        Self {
            tip,
            history: HashMap::new(),
            polls: Mutex::new(HashMap::new()),
        }
    }

    fn queue_poll(&self, chain_id: u64, response: Result<Vec<TransactionRecord>, ()>) {
        self.polls
            .lock()
            .unwrap()
            .entry(chain_id)
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl ChainDataSource for MockSource {
    fn supports_chain(&self, chain_id: u64) -> bool {
        chain_id != AMOY
    }

    async fn get_tip(&self, _chain_id: u64) -> Result<u64, SourceError> {
        Ok(self.tip)
    }

    async fn fetch_since(
        &self,
        chain_id: u64,
        _address: Address,
        from_block: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, SourceError> {
        if from_block < self.tip {
            let history = self.history.get(&chain_id).cloned().unwrap_or_default();
            return Ok(history.into_iter().take(limit).collect());
        }

        let queued = self
            .polls
            .lock()
            .unwrap()
            .get_mut(&chain_id)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Ok(records)) => Ok(records),
            Some(Err(())) => Err(SourceError::Status { chain_id, status: 503 }),
            None => Ok(Vec::new()),
        }
    }
}

fn tx(hash: &str, chain_id: u64, block_number: u64, timestamp: u64, status: TxStatus) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        chain_id,
        block_number,
        timestamp,
        from: Address::repeat_byte(0xaa),
        to: Some(Address::repeat_byte(0xbb)),
        value: U256::from(10u64).pow(U256::from(17u64)),
        status,
        token_transfers: Vec::new(),
        gas_limit: None,
        gas_price: None,
        input: None,
    }
}

fn hashes(records: &[TransactionRecord]) -> Vec<&str> {
    records.iter().map(|r| r.hash.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_initial_load_then_polled_updates() -> anyhow::Result<()> {
    let mut source = MockSource::new(1_000);
    source.history.insert(
        SEPOLIA,
        vec![tx("0xa", SEPOLIA, 990, 10, TxStatus::Pending)],
    );
    source.history.insert(
        BASE_SEPOLIA,
        vec![tx("0xb", BASE_SEPOLIA, 900, 5, TxStatus::Success)],
    );
    let source = Arc::new(source);

    let chains = vec![SEPOLIA, AMOY, BASE_SEPOLIA];
    let mut store = FeedStore::new(FeedReconciler::new(3)?, None);
    let mut observer = store.subscribe();

    let initial = fetch_multi_chain(source.as_ref(), Address::ZERO, &chains, 0, 20).await;
    store.set_initial(initial)?;
    assert_eq!(hashes(&observer.changed().await.unwrap()), vec!["0xa", "0xb"]);

    // One chain fails while the other confirms 0xa and sees a new transfer
    source.queue_poll(BASE_SEPOLIA, Err(()));
    source.queue_poll(
        SEPOLIA,
        Ok(vec![
            tx("0xc", SEPOLIA, 1_001, 20, TxStatus::Success),
            tx("0xa", SEPOLIA, 1_001, 15, TxStatus::Success),
        ]),
    );
    // The oldest record in a full feed is dropped
    source.queue_poll(BASE_SEPOLIA, Ok(vec![tx("0xd", BASE_SEPOLIA, 1_002, 1, TxStatus::Success)]));

    let mut config = PollerConfig::new(Address::ZERO, chains);
    config.interval = Duration::from_secs(5);
    let mut poller = TransactionPoller::new(source.clone(), config, None);
    poller.start(move |batch| {
        store.merge(batch).unwrap();
    })?;

    let snapshot = observer.changed().await.unwrap();
    assert_eq!(hashes(&snapshot), vec!["0xc", "0xa", "0xb"]);
    assert_eq!(snapshot[1].status, TxStatus::Success);
    assert_eq!(snapshot[1].timestamp, 15);

    let snapshot = observer.changed().await.unwrap();
    assert_eq!(hashes(&snapshot), vec!["0xc", "0xa", "0xb"]);

    poller.stop().await;
    assert_eq!(poller.watermark(SEPOLIA), Some(1_001));
    assert_eq!(poller.watermark(BASE_SEPOLIA), Some(1_002));
    assert_eq!(poller.watermark(AMOY), None);

    let stats = FeedStats::from_records(&observer.current());
    assert_eq!(stats.total, 3);
    assert_eq!(stats.success_rate, 100);
    assert_eq!(stats.chains, 2);

    let base_only = FeedFilter {
        chain: Some(BASE_SEPOLIA),
        query: String::new(),
    };
    assert_eq!(base_only.apply(&observer.current()).len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_callbacks_after_stop() {
    let source = Arc::new(MockSource::new(50));
    source.queue_poll(SEPOLIA, Ok(vec![tx("0x1", SEPOLIA, 51, 1, TxStatus::Success)]));

    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = deliveries.clone();

    let mut config = PollerConfig::new(Address::ZERO, vec![SEPOLIA]);
    config.interval = Duration::from_secs(1);
    let mut poller = TransactionPoller::new(source.clone(), config, None);
    poller
        .start(move |batch| sink.lock().unwrap().push(batch))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    poller.stop().await;
    assert_eq!(deliveries.lock().unwrap().len(), 1);

    source.queue_poll(SEPOLIA, Ok(vec![tx("0x2", SEPOLIA, 52, 2, TxStatus::Success)]));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(deliveries.lock().unwrap().len(), 1);
}
