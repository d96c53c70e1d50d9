use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Unsupported chain ID: {chain_id}")]
    UnsupportedChainId { chain_id: u64 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedError {
    #[error("Transaction record on chain {chain_id} has an empty hash")]
    EmptyHash { chain_id: u64 },
    #[error("Transaction record {hash} has no chain ID")]
    MissingChainId { hash: String },
    #[error("Feed cap must be greater than zero")]
    ZeroCap,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No HyperSync endpoint configured for chain {chain_id}")]
    MissingEndpoint { chain_id: u64 },
    #[error("Invalid endpoint URL for chain {chain_id}: {url}")]
    InvalidEndpoint { chain_id: u64, url: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {status} from chain {chain_id}")]
    Status { chain_id: u64, status: u16 },
    #[error("Invalid {field} in response: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("Response for chain {chain_id} is missing the archive height")]
    MissingArchiveHeight { chain_id: u64 },
}

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("Poller state was lost after its task exited abnormally")]
    StateLost,
}
