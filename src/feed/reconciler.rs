use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::models::common::DEFAULT_FEED_CAP;
use crate::models::errors::FeedError;
use crate::models::transaction::{TransactionRecord, TxKey};

/// Owns the canonical list of observed transactions.
///
/// The list is unique by `(hash, chain_id)`, ordered newest first by timestamp
/// and never longer than `cap`. All updates go through [`set_initial`] or
/// [`merge`], both of which leave the state untouched when they fail.
///
/// [`set_initial`]: FeedReconciler::set_initial
/// [`merge`]: FeedReconciler::merge
#[derive(Debug, Clone)]
pub struct FeedReconciler {
    cap: usize,
    records: Vec<TransactionRecord>,
}

impl Default for FeedReconciler {
    fn default() -> Self {
        Self {
            cap: DEFAULT_FEED_CAP,
            records: Vec::new(),
        }
    }
}

impl FeedReconciler {
    pub fn new(cap: usize) -> Result<Self, FeedError> {
        if cap == 0 {
            return Err(FeedError::ZeroCap);
        }
        Ok(Self {
            cap,
            records: Vec::new(),
        })
    }

    pub fn set_initial(&mut self, records: Vec<TransactionRecord>) -> Result<(), FeedError> {
        self.records = reconcile_initial(records, self.cap)?;
        Ok(())
    }

    pub fn merge(&mut self, batch: Vec<TransactionRecord>) -> Result<(), FeedError> {
        self.records = reconcile_merge(&self.records, batch, self.cap)?;
        Ok(())
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn get(&self, hash: &str, chain_id: u64) -> Option<&TransactionRecord> {
        self.records
            .iter()
            .find(|r| r.hash == hash && r.chain_id == chain_id)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Builds a fresh feed from a one-shot fetch. The first occurrence of a key wins.
pub fn reconcile_initial(
    records: Vec<TransactionRecord>,
    cap: usize,
) -> Result<Vec<TransactionRecord>, FeedError> {
    validate_all(&records)?;

    let mut seen: HashSet<TxKey> = HashSet::with_capacity(records.len());
    let unique: Vec<_> = records
        .into_iter()
        .filter(|record| seen.insert(record.key()))
        .collect();

    Ok(order_and_truncate(unique, cap))
}

/// Folds a poll batch into existing state. On a key collision the incoming
/// record replaces the existing one, since it may carry a newer status.
pub fn reconcile_merge(
    existing: &[TransactionRecord],
    incoming: Vec<TransactionRecord>,
    cap: usize,
) -> Result<Vec<TransactionRecord>, FeedError> {
    validate_all(&incoming)?;

    // Incoming first so that stable sorting puts it ahead of existing ties
    let mut by_key: HashMap<TxKey, usize> = HashMap::with_capacity(existing.len() + incoming.len());
    let mut merged: Vec<TransactionRecord> = Vec::with_capacity(existing.len() + incoming.len());

    for record in incoming {
        match by_key.entry(record.key()) {
            // Later entries within one batch supersede earlier ones
            Entry::Occupied(slot) => merged[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(record);
            }
        }
    }

    for record in existing {
        if !by_key.contains_key(&record.key()) {
            merged.push(record.clone());
        }
    }

    Ok(order_and_truncate(merged, cap))
}

fn validate_all(records: &[TransactionRecord]) -> Result<(), FeedError> {
    records.iter().try_for_each(TransactionRecord::validate)
}

fn order_and_truncate(mut records: Vec<TransactionRecord>, cap: usize) -> Vec<TransactionRecord> {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records.truncate(cap);
    records
}
