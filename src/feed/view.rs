use std::collections::HashSet;

use crate::models::transaction::{TransactionRecord, TxStatus};

/// Chain and free-text filter applied to a feed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    // None means all chains
    pub chain: Option<u64>,
    pub query: String,
}

impl FeedFilter {
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        if self.chain.is_some_and(|chain_id| chain_id != record.chain_id) {
            return false;
        }

        let query = self.query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }

        record.hash.to_lowercase().contains(&query)
            || record.from.to_string().to_lowercase().contains(&query)
            || record
                .to
                .is_some_and(|to| to.to_string().to_lowercase().contains(&query))
    }

    pub fn apply<'a>(&self, records: &'a [TransactionRecord]) -> Vec<&'a TransactionRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }

    pub fn is_active(&self) -> bool {
        self.chain.is_some() || !self.query.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
    // Whole percent, 0 for an empty feed
    pub success_rate: u8,
    pub chains: usize,
}

impl FeedStats {
    pub fn from_records(records: &[TransactionRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Default::default()
        };
        let mut chains = HashSet::new();

        for record in records {
            match record.status {
                TxStatus::Success => stats.success += 1,
                TxStatus::Failed => stats.failed += 1,
                TxStatus::Pending => stats.pending += 1,
            }
            chains.insert(record.chain_id);
        }

        stats.chains = chains.len();
        if stats.total > 0 {
            stats.success_rate = ((stats.success as f64 / stats.total as f64) * 100.0).round() as u8;
        }
        stats
    }
}
