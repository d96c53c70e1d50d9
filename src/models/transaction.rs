use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::models::errors::FeedError;

/// Execution status of an observed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

/// An ERC-20 transfer emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub decimals: Option<u8>,
    pub symbol: Option<String>,
}

/// Identity of a record within the feed. Hashes are chain-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxKey {
    pub hash: String,
    pub chain_id: u64,
}

/// A single observed chain transaction. Records are never mutated once built;
/// a newer observation replaces an older one with the same [`TxKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub timestamp: u64,
    pub from: Address,
    // None for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub status: TxStatus,
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub input: Option<Bytes>,
}

impl TransactionRecord {
    pub fn key(&self) -> TxKey {
        TxKey {
            hash: self.hash.clone(),
            chain_id: self.chain_id,
        }
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Rejects records whose identity key is incomplete.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.hash.trim().is_empty() {
            return Err(FeedError::EmptyHash {
                chain_id: self.chain_id,
            });
        }
        if self.chain_id == 0 {
            return Err(FeedError::MissingChainId {
                hash: self.hash.clone(),
            });
        }
        Ok(())
    }
}
