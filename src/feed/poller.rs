use alloy_primitives::Address;
use futures::future::join_all;
use opentelemetry::KeyValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::common::{DEFAULT_POLL_FETCH_LIMIT, DEFAULT_POLL_INTERVAL_MS};
use crate::models::errors::PollerError;
use crate::models::transaction::TransactionRecord;
use crate::source::ChainDataSource;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub address: Address,
    pub chain_ids: Vec<u64>,
    pub interval: Duration,
    // Max records requested per chain per cycle
    pub fetch_limit: usize,
}

impl PollerConfig {
    pub fn new(address: Address, chain_ids: Vec<u64>) -> Self {
        Self {
            address,
            chain_ids,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            fetch_limit: DEFAULT_POLL_FETCH_LIMIT,
        }
    }
}

/// Highest block observed on one chain.
///
/// Fetches are inclusive of the watermark block, so the records already
/// delivered at that block are remembered. A later result is filtered out only
/// when it is identical to what was delivered, so status changes still flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainWatermark {
    block: u64,
    delivered: HashMap<String, TransactionRecord>,
}

impl ChainWatermark {
    pub fn new(block: u64) -> Self {
        Self {
            block,
            delivered: HashMap::new(),
        }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    fn retain_unseen(&self, records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
        records
            .into_iter()
            .filter(|r| {
                r.block_number != self.block || self.delivered.get(&r.hash) != Some(r)
            })
            .collect()
    }

    /// Advances to the highest block in `records`. Never moves backwards.
    fn observe(&mut self, records: &[TransactionRecord]) {
        let Some(max_block) = records.iter().map(|r| r.block_number).max() else {
            return;
        };
        if max_block > self.block {
            self.block = max_block;
            self.delivered.clear();
        }
        self.delivered.extend(
            records
                .iter()
                .filter(|r| r.block_number == self.block)
                .map(|r| (r.hash.clone(), r.clone())),
        );
    }
}

/// Everything the scheduler task owns. Handed back to the poller on stop.
struct PollerState<S: ?Sized> {
    source: Arc<S>,
    address: Address,
    interval: Duration,
    fetch_limit: usize,
    // Chains the source can serve, in a fixed order
    chains: Vec<u64>,
    watermarks: BTreeMap<u64, ChainWatermark>,
    metrics: Option<Arc<Metrics>>,
}

impl<S> PollerState<S>
where
    S: ChainDataSource + ?Sized,
{
    /// Looks up the tip of every chain that has no watermark yet. Failures
    /// leave the chain uninitialised until a later cycle.
    async fn initialize_watermarks(&mut self) {
        let source = &*self.source;
        let pending: Vec<u64> = self
            .chains
            .iter()
            .copied()
            .filter(|chain_id| !self.watermarks.contains_key(chain_id))
            .collect();

        if pending.is_empty() {
            return;
        }

        let lookups = pending
            .into_iter()
            .map(|chain_id| async move { (chain_id, source.get_tip(chain_id).await) });

        for (chain_id, result) in join_all(lookups).await {
            match result {
                Ok(tip) => {
                    info!("Watching chain {} from block {}", chain_id, tip);
                    self.watermarks.insert(chain_id, ChainWatermark::new(tip));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_watermark(chain_id, tip);
                    }
                }
                Err(e) => warn!(
                    "Error fetching latest block for chain {}, retrying next cycle: {}",
                    chain_id, e
                ),
            }
        }
    }

    /// Runs one poll cycle and returns the newly observed records, newest first.
    ///
    /// Watermarks are only touched after every chain has settled.
    async fn cycle(&mut self) -> Vec<TransactionRecord> {
        let start = Instant::now();
        self.initialize_watermarks().await;

        let source = &*self.source;
        let address = self.address;
        let limit = self.fetch_limit;
        let requests: Vec<_> = self
            .watermarks
            .iter()
            .map(|(&chain_id, watermark)| {
                let from_block = watermark.block();
                async move {
                    let result = source.fetch_since(chain_id, address, from_block, limit).await;
                    (chain_id, result)
                }
            })
            .collect();

        let results = join_all(requests).await;

        let mut batch = Vec::new();
        for (chain_id, result) in results {
            let records = match result {
                Ok(records) => records,
                Err(e) => {
                    error!("Error polling chain {}: {}", chain_id, e);
                    continue;
                }
            };
            let Some(watermark) = self.watermarks.get_mut(&chain_id) else {
                continue;
            };

            let fresh = watermark.retain_unseen(records);
            if fresh.is_empty() {
                continue;
            }
            watermark.observe(&fresh);
            debug!(
                "Chain {}: {} new transactions, watermark at block {}",
                chain_id,
                fresh.len(),
                watermark.block()
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_watermark(chain_id, watermark.block());
            }
            batch.extend(fresh);
        }

        batch.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(metrics) = &self.metrics {
            metrics.poll_cycles.add(1, &[]);
            metrics
                .poll_cycle_duration
                .record(start.elapsed().as_secs_f64(), &[]);
        }

        batch
    }
}

struct PollerTask<S: ?Sized> {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<PollerState<S>>,
}

/// Periodically asks the data source for records newer than each chain's
/// watermark and hands every non-empty cycle result to a callback.
///
/// Cycles never overlap: a tick that fires while a cycle is still running is
/// skipped. [`stop`](TransactionPoller::stop) discards an in-flight cycle and
/// waits for the scheduler task to exit, so the callback is never invoked
/// after it returns.
pub struct TransactionPoller<S: ?Sized + 'static> {
    state: Option<PollerState<S>>,
    task: Option<PollerTask<S>>,
}

impl<S> TransactionPoller<S>
where
    S: ChainDataSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, config: PollerConfig, metrics: Option<Arc<Metrics>>) -> Self {
        let mut chains = Vec::with_capacity(config.chain_ids.len());
        for chain_id in config.chain_ids {
            if !source.supports_chain(chain_id) {
                warn!("No data source endpoint for chain {}, not polling it", chain_id);
                continue;
            }
            if !chains.contains(&chain_id) {
                chains.push(chain_id);
            }
        }

        Self {
            state: Some(PollerState {
                source,
                address: config.address,
                interval: config.interval,
                fetch_limit: config.fetch_limit,
                chains,
                watermarks: BTreeMap::new(),
                metrics,
            }),
            task: None,
        }
    }

    /// Spawns the scheduler task. Calling this while already running does nothing.
    pub fn start<F>(&mut self, on_batch: F) -> Result<(), PollerError>
    where
        F: FnMut(Vec<TransactionRecord>) + Send + 'static,
    {
        if self.task.is_some() {
            warn!("Poller already running");
            return Ok(());
        }

        let state = self.state.take().ok_or(PollerError::StateLost)?;
        info!(
            "Starting poller for {} on {} chains every {:?}",
            state.address,
            state.chains.len(),
            state.interval
        );

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(state, on_batch, shutdown_rx));
        self.task = Some(PollerTask { shutdown, handle });
        Ok(())
    }

    /// Cancels the schedule and waits for the scheduler task to exit.
    /// Safe to call when not started or more than once.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        // The task only exits on shutdown, so a send error means it already died
        let _ = task.shutdown.send(());

        match task.handle.await {
            Ok(state) => self.state = Some(state),
            Err(e) => error!("Poller task exited abnormally: {}", e),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Current watermark for `chain_id`. Only available while stopped.
    pub fn watermark(&self, chain_id: u64) -> Option<u64> {
        self.state
            .as_ref()
            .and_then(|state| state.watermarks.get(&chain_id))
            .map(ChainWatermark::block)
    }
}

impl<S: ?Sized + 'static> Drop for TransactionPoller<S> {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.handle.abort();
        }
    }
}

async fn run<S, F>(
    mut state: PollerState<S>,
    mut on_batch: F,
    mut shutdown: broadcast::Receiver<()>,
) -> PollerState<S>
where
    S: ChainDataSource + ?Sized,
    F: FnMut(Vec<TransactionRecord>) + Send,
{
    // The first tick completes immediately, giving the initial poll
    let mut ticker = interval(state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let completed = tokio::select! {
            biased;
            _ = shutdown.recv() => None,
            batch = state.cycle() => Some(batch),
        };
        let Some(batch) = completed else {
            debug!("Discarding in-flight poll cycle");
            break;
        };

        if batch.is_empty() {
            continue;
        }

        if let Some(metrics) = &state.metrics {
            metrics.batches_delivered.add(1, &[]);
            metrics
                .records_delivered
                .add(batch.len() as u64, &[KeyValue::new("source", "poll")]);
        }
        on_batch(batch);
    }

    info!("Poller stopped");
    state
}
