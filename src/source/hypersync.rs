use alloy_primitives::{Address, B256, Bytes, U256, b256};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::metrics::Metrics;
use crate::models::common::{Chain, ChainConfig};
use crate::models::errors::SourceError;
use crate::models::transaction::{TokenTransfer, TransactionRecord, TxStatus};
use crate::source::ChainDataSource;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const TIP_TIMEOUT: Duration = Duration::from_secs(5);

// keccak256("Transfer(address,address,uint256)")
const ERC20_TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

///////////////////////////////////// Query ////////////////////////////////////////

#[derive(Debug, Serialize)]
struct Query {
    from_block: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transactions: Vec<TransactionSelection>,
    field_selection: FieldSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_num_transactions: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
struct TransactionSelection {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    from: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FieldSelection {
    block: Vec<&'static str>,
    transaction: Vec<&'static str>,
    log: Vec<&'static str>,
}

impl Query {
    /// Transactions sent or received by `address`, with their blocks and logs.
    fn for_address(address: Address, from_block: u64, limit: usize) -> Self {
        let address = address.to_string().to_lowercase();
        Self {
            from_block,
            transactions: vec![
                TransactionSelection {
                    from: vec![address.clone()],
                    ..Default::default()
                },
                TransactionSelection {
                    to: vec![address],
                    ..Default::default()
                },
            ],
            field_selection: FieldSelection {
                block: vec!["number", "timestamp", "hash"],
                transaction: vec![
                    "hash",
                    "from",
                    "to",
                    "value",
                    "gas_price",
                    "gas",
                    "input",
                    "nonce",
                    "transaction_index",
                    "block_number",
                    "block_hash",
                    "status",
                ],
                log: vec!["address", "data", "topics", "transaction_hash", "log_index"],
            },
            max_num_transactions: Some(limit),
        }
    }

    /// Empty selection, only useful for reading the archive height.
    fn height_only() -> Self {
        Self {
            from_block: 0,
            transactions: Vec::new(),
            field_selection: FieldSelection {
                block: vec!["number"],
                transaction: Vec::new(),
                log: Vec::new(),
            },
            max_num_transactions: None,
        }
    }
}

//////////////////////////////////// Response //////////////////////////////////////

#[derive(Debug, Deserialize)]
struct QueryResponse {
    archive_height: Option<u64>,
    #[serde(default)]
    data: ResponseData,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseData {
    #[serde(default)]
    blocks: Vec<BlockRow>,
    #[serde(default)]
    transactions: Vec<TransactionRow>,
    #[serde(default)]
    logs: Vec<LogRow>,
}

#[derive(Debug, Deserialize)]
struct BlockRow {
    number: u64,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct TransactionRow {
    hash: String,
    from: Address,
    to: Option<Address>,
    value: Option<String>,
    gas: Option<String>,
    gas_price: Option<String>,
    input: Option<Bytes>,
    block_number: u64,
    status: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct LogRow {
    address: Address,
    data: String,
    topics: Vec<String>,
    transaction_hash: String,
}

//////////////////////////////////// Source ////////////////////////////////////////

/// [`ChainDataSource`] backed by Envio HyperSync endpoints, one per chain.
pub struct HyperSyncSource {
    client: Client,
    endpoints: HashMap<u64, Url>,
    metrics: Option<Arc<Metrics>>,
}

impl HyperSyncSource {
    /// Resolves an endpoint for every configured chain. Chains with neither a
    /// configured nor a built-in endpoint are left out and reported.
    pub fn new(chains: &[ChainConfig], metrics: Option<Arc<Metrics>>) -> Result<Self, SourceError> {
        let mut endpoints = HashMap::new();

        for chain in chains {
            let endpoint = match &chain.hypersync_url {
                Some(url) => Some(url.clone()),
                None => default_endpoint(chain.chain_id)?,
            };

            match endpoint {
                Some(url) => {
                    info!("HyperSync endpoint for chain {}: {}", chain.chain_id, url);
                    endpoints.insert(chain.chain_id, url);
                }
                None => warn!(
                    "No HyperSync endpoint for chain {}, it will not produce data",
                    chain.chain_id
                ),
            }
        }

        Ok(Self {
            client: Client::new(),
            endpoints,
            metrics,
        })
    }

    fn endpoint(&self, chain_id: u64) -> Result<&Url, SourceError> {
        self.endpoints
            .get(&chain_id)
            .ok_or(SourceError::MissingEndpoint { chain_id })
    }

    async fn post_query(
        &self,
        chain_id: u64,
        query: &Query,
        timeout: Duration,
        method: &'static str,
    ) -> Result<QueryResponse, SourceError> {
        let endpoint = self.endpoint(chain_id)?;
        let url = format!("{}/query", endpoint.as_str().trim_end_matches('/'));
        let start = Instant::now();

        let result = self.send_query(&url, chain_id, query, timeout).await;

        // Record metrics if enabled
        if let Some(metrics) = &self.metrics {
            metrics.record_source_call(chain_id, method, start.elapsed(), result.is_err());
        }

        result
    }

    async fn send_query(
        &self,
        url: &str,
        chain_id: u64,
        query: &Query,
        timeout: Duration,
    ) -> Result<QueryResponse, SourceError> {
        let response = self
            .client
            .post(url)
            .json(query)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                chain_id,
                status: status.as_u16(),
            });
        }

        Ok(response.json::<QueryResponse>().await?)
    }
}

#[async_trait]
impl ChainDataSource for HyperSyncSource {
    fn supports_chain(&self, chain_id: u64) -> bool {
        self.endpoints.contains_key(&chain_id)
    }

    async fn get_tip(&self, chain_id: u64) -> Result<u64, SourceError> {
        let response = self
            .post_query(chain_id, &Query::height_only(), TIP_TIMEOUT, "get_tip")
            .await?;
        response
            .archive_height
            .ok_or(SourceError::MissingArchiveHeight { chain_id })
    }

    async fn fetch_since(
        &self,
        chain_id: u64,
        address: Address,
        from_block: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, SourceError> {
        let query = Query::for_address(address, from_block, limit);
        let response = self
            .post_query(chain_id, &query, QUERY_TIMEOUT, "fetch_since")
            .await?;

        let records = records_from_response(chain_id, response.data, limit)?;
        debug!(
            "Fetched {} transactions for chain {} from block {}",
            records.len(),
            chain_id,
            from_block
        );
        Ok(records)
    }
}

fn default_endpoint(chain_id: u64) -> Result<Option<Url>, SourceError> {
    let Some(raw) = Chain::from_chain_id(chain_id)
        .ok()
        .and_then(|chain| chain.default_hypersync_url())
    else {
        return Ok(None);
    };

    Url::parse(raw)
        .map(Some)
        .map_err(|_| SourceError::InvalidEndpoint {
            chain_id,
            url: raw.to_string(),
        })
}

fn parse_quantity(field: &'static str, raw: &str) -> Result<U256, SourceError> {
    U256::from_str(raw).map_err(|_| SourceError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_optional_quantity(field: &'static str, raw: Option<&str>) -> Result<Option<U256>, SourceError> {
    raw.map(|raw| parse_quantity(field, raw)).transpose()
}

/// Joins transactions with their blocks and logs into feed records.
fn records_from_response(
    chain_id: u64,
    data: ResponseData,
    limit: usize,
) -> Result<Vec<TransactionRecord>, SourceError> {
    let timestamps: HashMap<u64, u64> = data
        .blocks
        .iter()
        .map(|block| (block.number, block.timestamp))
        .collect();

    let mut logs_by_tx: HashMap<String, Vec<&LogRow>> = HashMap::new();
    for log in &data.logs {
        logs_by_tx
            .entry(log.transaction_hash.to_lowercase())
            .or_default()
            .push(log);
    }

    data.transactions
        .into_iter()
        .take(limit)
        .map(|tx| {
            let hash = tx.hash.to_lowercase();
            let timestamp = match timestamps.get(&tx.block_number) {
                Some(ts) => *ts,
                None => {
                    debug!(
                        "Block {} missing from response for {}, using current time",
                        tx.block_number, hash
                    );
                    Utc::now().timestamp().max(0) as u64
                }
            };
            let token_transfers = logs_by_tx
                .get(&hash)
                .map(|logs| extract_token_transfers(logs))
                .unwrap_or_default();

            Ok(TransactionRecord {
                chain_id,
                block_number: tx.block_number,
                timestamp,
                from: tx.from,
                to: tx.to,
                value: parse_optional_quantity("value", tx.value.as_deref())?.unwrap_or_default(),
                status: match tx.status {
                    Some(0) => TxStatus::Failed,
                    _ => TxStatus::Success,
                },
                token_transfers,
                gas_limit: parse_optional_quantity("gas", tx.gas.as_deref())?,
                gas_price: parse_optional_quantity("gas_price", tx.gas_price.as_deref())?,
                input: tx.input,
                hash,
            })
        })
        .collect()
}

/// ERC-20 `Transfer(from, to, amount)` logs. Logs that do not decode are skipped.
fn extract_token_transfers(logs: &[&LogRow]) -> Vec<TokenTransfer> {
    logs.iter()
        .filter_map(|log| {
            let topics = log
                .topics
                .iter()
                .map(|t| B256::from_str(t).ok())
                .collect::<Option<Vec<_>>>()?;
            if topics.len() < 3 || topics[0] != ERC20_TRANSFER_TOPIC {
                return None;
            }
            let amount = match U256::from_str(&log.data) {
                Ok(amount) => amount,
                Err(_) => {
                    debug!("Skipping transfer log with undecodable data: {}", log.data);
                    return None;
                }
            };
            Some(TokenTransfer {
                token: log.address,
                from: Address::from_word(topics[1]),
                to: Address::from_word(topics[2]),
                amount,
                decimals: None,
                symbol: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const SENDER: &str = "0x1111111111111111111111111111111111111111";

    fn response_fixture() -> QueryResponse {
        let json = serde_json::json!({
            "archive_height": 7_000_000,
            "next_block": 6_000_101,
            "total_execution_time": 12,
            "data": {
                "blocks": [
                    { "number": 6_000_000, "timestamp": 1_700_000_000, "hash": "0x01" },
                    { "number": 6_000_100, "timestamp": 1_700_001_200, "hash": "0x02" }
                ],
                "transactions": [
                    {
                        "hash": "0xAAAA000000000000000000000000000000000000000000000000000000000001",
                        "from": SENDER,
                        "to": "0x2222222222222222222222222222222222222222",
                        "value": "0xde0b6b3a7640000",
                        "gas": "0x5208",
                        "gas_price": "0x3b9aca00",
                        "input": "0x",
                        "block_number": 6_000_000,
                        "status": 1
                    },
                    {
                        "hash": "0xbbbb000000000000000000000000000000000000000000000000000000000002",
                        "from": SENDER,
                        "to": null,
                        "value": "0x0",
                        "block_number": 6_000_100,
                        "status": 0
                    }
                ],
                "logs": [
                    {
                        "address": "0x3333333333333333333333333333333333333333",
                        "data": "0x00000000000000000000000000000000000000000000000000000000000003e8",
                        "topics": [
                            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                            "0x0000000000000000000000001111111111111111111111111111111111111111",
                            "0x0000000000000000000000004444444444444444444444444444444444444444"
                        ],
                        "transaction_hash": "0xaaaa000000000000000000000000000000000000000000000000000000000001",
                        "log_index": 0
                    },
                    {
                        "address": "0x3333333333333333333333333333333333333333",
                        "data": "0x",
                        "topics": [
                            "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925"
                        ],
                        "transaction_hash": "0xaaaa000000000000000000000000000000000000000000000000000000000001",
                        "log_index": 1
                    }
                ]
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_records_from_response() {
        let response = response_fixture();
        assert_eq!(response.archive_height, Some(7_000_000));

        let records = records_from_response(84532, response.data, 50).unwrap();
        assert_eq!(records.len(), 2);

        let transfer = &records[0];
        assert_eq!(
            transfer.hash,
            "0xaaaa000000000000000000000000000000000000000000000000000000000001"
        );
        assert_eq!(transfer.chain_id, 84532);
        assert_eq!(transfer.timestamp, 1_700_000_000);
        assert_eq!(transfer.status, TxStatus::Success);
        assert_eq!(transfer.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(transfer.gas_limit, Some(U256::from(21_000u64)));
        assert_eq!(transfer.token_transfers.len(), 1);
        assert_eq!(
            transfer.token_transfers[0],
            TokenTransfer {
                token: address!("3333333333333333333333333333333333333333"),
                from: address!("1111111111111111111111111111111111111111"),
                to: address!("4444444444444444444444444444444444444444"),
                amount: U256::from(1_000u64),
                decimals: None,
                symbol: None,
            }
        );

        let creation = &records[1];
        assert!(creation.is_contract_creation());
        assert_eq!(creation.status, TxStatus::Failed);
        assert_eq!(creation.timestamp, 1_700_001_200);
        assert!(creation.token_transfers.is_empty());
    }

    #[test]
    fn test_records_respect_limit() {
        let records = records_from_response(84532, response_fixture().data, 1).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let data = ResponseData {
            blocks: Vec::new(),
            transactions: vec![TransactionRow {
                hash: "0x01".to_string(),
                from: Address::ZERO,
                to: None,
                value: Some("not-a-number".to_string()),
                gas: None,
                gas_price: None,
                input: None,
                block_number: 1,
                status: None,
            }],
            logs: Vec::new(),
        };
        let err = records_from_response(1, data, 10).unwrap_err();
        assert!(matches!(err, SourceError::InvalidField { field: "value", .. }));
    }

    #[test]
    fn test_query_selects_sender_and_recipient() {
        let query = Query::for_address(address!("abcdefabcdefabcdefabcdefabcdefabcdefabcd"), 42, 10);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["from_block"], 42);
        assert_eq!(
            json["transactions"][0]["from"][0],
            "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"
        );
        assert_eq!(
            json["transactions"][1]["to"][0],
            "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"
        );
        assert_eq!(json["max_num_transactions"], 10);
        assert!(json["transactions"][0].get("to").is_none());
    }

    #[tokio::test]
    async fn test_unsupported_chain_has_no_endpoint() {
        let chains = vec![
            ChainConfig {
                chain_id: 11155111,
                hypersync_url: None,
            },
            ChainConfig {
                chain_id: 80002,
                hypersync_url: None,
            },
        ];
        let source = HyperSyncSource::new(&chains, None).unwrap();
        assert!(source.supports_chain(11155111));
        assert!(!source.supports_chain(80002));

        let err = source.get_tip(80002).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingEndpoint { chain_id: 80002 }));
    }
}
