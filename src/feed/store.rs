use opentelemetry::KeyValue;
use std::sync::Arc;
use tokio::sync::watch;

use crate::feed::reconciler::FeedReconciler;
use crate::metrics::Metrics;
use crate::models::errors::FeedError;
use crate::models::transaction::TransactionRecord;

/// Immutable view of the feed at one point in time.
pub type FeedSnapshot = Arc<[TransactionRecord]>;

/// The only writer of feed state.
///
/// Deliberately not `Clone`: whoever holds the store decides when the feed
/// changes. Readers get a [`FeedObserver`] from [`subscribe`](FeedStore::subscribe)
/// and see a new snapshot after every successful update.
pub struct FeedStore {
    reconciler: FeedReconciler,
    sender: watch::Sender<FeedSnapshot>,
    metrics: Option<Arc<Metrics>>,
}

impl FeedStore {
    pub fn new(reconciler: FeedReconciler, metrics: Option<Arc<Metrics>>) -> Self {
        let (sender, _) = watch::channel(FeedSnapshot::from(reconciler.records()));
        Self {
            reconciler,
            sender,
            metrics,
        }
    }

    pub fn subscribe(&self) -> FeedObserver {
        FeedObserver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn set_initial(&mut self, records: Vec<TransactionRecord>) -> Result<(), FeedError> {
        let count = records.len();
        self.reconciler.set_initial(records)?;
        if let Some(metrics) = &self.metrics {
            metrics
                .records_delivered
                .add(count as u64, &[KeyValue::new("source", "initial")]);
        }
        self.publish();
        Ok(())
    }

    pub fn merge(&mut self, batch: Vec<TransactionRecord>) -> Result<(), FeedError> {
        self.reconciler.merge(batch)?;
        self.publish();
        Ok(())
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.sender.borrow().clone()
    }

    fn publish(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.feed_size.record(self.reconciler.len() as u64, &[]);
        }
        // send_replace succeeds even when nobody is subscribed
        self.sender
            .send_replace(FeedSnapshot::from(self.reconciler.records()));
    }
}

/// Read-only handle on the feed. Any number may exist.
#[derive(Clone)]
pub struct FeedObserver {
    receiver: watch::Receiver<FeedSnapshot>,
}

impl FeedObserver {
    pub fn current(&self) -> FeedSnapshot {
        self.receiver.borrow().clone()
    }

    /// Waits for the next published snapshot. Returns `None` once the store
    /// has been dropped.
    pub async fn changed(&mut self) -> Option<FeedSnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
