pub mod hypersync;

use alloy_primitives::Address;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, warn};

use crate::models::errors::SourceError;
use crate::models::transaction::TransactionRecord;

/// Read access to per-chain transaction history for one address.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Whether an endpoint exists for this chain at all. Unsupported chains
    /// never yield data.
    fn supports_chain(&self, chain_id: u64) -> bool;

    /// Latest block the source has indexed for the chain.
    async fn get_tip(&self, chain_id: u64) -> Result<u64, SourceError>;

    /// Records for `address` at or after `from_block`, at most `limit` of them.
    /// Result order is unspecified.
    async fn fetch_since(
        &self,
        chain_id: u64,
        address: Address,
        from_block: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, SourceError>;
}

/// One-shot fetch across several chains, used to seed the feed.
///
/// Chains are queried concurrently. A failing or unsupported chain contributes
/// nothing. The result is ordered newest first.
pub async fn fetch_multi_chain<S>(
    source: &S,
    address: Address,
    chain_ids: &[u64],
    from_block: u64,
    per_chain_limit: usize,
) -> Vec<TransactionRecord>
where
    S: ChainDataSource + ?Sized,
{
    let requests = chain_ids.iter().map(|&chain_id| async move {
        if !source.supports_chain(chain_id) {
            warn!("No data source endpoint for chain {}, skipping", chain_id);
            return Vec::new();
        }
        match source
            .fetch_since(chain_id, address, from_block, per_chain_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!("Error fetching transactions for chain {}: {}", chain_id, e);
                Vec::new()
            }
        }
    });

    let mut all: Vec<TransactionRecord> = join_all(requests).await.into_iter().flatten().collect();
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all
}
