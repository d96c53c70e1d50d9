use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::models::errors::ChainError;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_FEED_CAP: usize = 100;
pub const DEFAULT_INITIAL_FETCH_LIMIT: usize = 20;
pub const DEFAULT_POLL_FETCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    // Overrides the built-in HyperSync endpoint for this chain
    pub hypersync_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub address: Address,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_feed_cap")]
    pub feed_cap: usize,
    #[serde(default = "default_initial_fetch_limit")]
    pub initial_fetch_limit: usize,
    #[serde(default = "default_poll_fetch_limit")]
    pub poll_fetch_limit: usize,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_feed_cap() -> usize {
    DEFAULT_FEED_CAP
}

fn default_initial_fetch_limit() -> usize {
    DEFAULT_INITIAL_FETCH_LIMIT
}

fn default_poll_fetch_limit() -> usize {
    DEFAULT_POLL_FETCH_LIMIT
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(anyhow!("at least one chain must be configured"));
        }
        if self.feed_cap == 0 {
            return Err(anyhow!("feed_cap must be greater than zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.initial_fetch_limit == 0 || self.poll_fetch_limit == 0 {
            return Err(anyhow!("fetch limits must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.chain_id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Ethereum,
    Sepolia,
    PolygonAmoy,
    BaseSepolia,
    ArbitrumSepolia,
    OptimismSepolia,
}

impl Chain {
    pub fn from_chain_id(chain_id: u64) -> Result<Self, ChainError> {
        match chain_id {
            1 => Ok(Self::Ethereum),
            11155111 => Ok(Self::Sepolia),
            80002 => Ok(Self::PolygonAmoy),
            84532 => Ok(Self::BaseSepolia),
            421614 => Ok(Self::ArbitrumSepolia),
            11155420 => Ok(Self::OptimismSepolia),
            _ => Err(ChainError::UnsupportedChainId { chain_id }),
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Ethereum => 1,
            Self::Sepolia => 11155111,
            Self::PolygonAmoy => 80002,
            Self::BaseSepolia => 84532,
            Self::ArbitrumSepolia => 421614,
            Self::OptimismSepolia => 11155420,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum",
            Self::Sepolia => "Sepolia",
            Self::PolygonAmoy => "Amoy",
            Self::BaseSepolia => "Base Sepolia",
            Self::ArbitrumSepolia => "Arbitrum Sepolia",
            Self::OptimismSepolia => "Optimism Sepolia",
        }
    }

    pub fn explorer_base_url(&self) -> &'static str {
        match self {
            Self::Ethereum => "https://etherscan.io",
            Self::Sepolia => "https://sepolia.etherscan.io",
            Self::PolygonAmoy => "https://www.oklink.com/amoy",
            Self::BaseSepolia => "https://sepolia.basescan.org",
            Self::ArbitrumSepolia => "https://sepolia.arbiscan.io",
            Self::OptimismSepolia => "https://sepolia-optimism.etherscan.io",
        }
    }

    /// HyperSync does not index every chain we can display (Amoy, mainnet).
    pub fn default_hypersync_url(&self) -> Option<&'static str> {
        match self {
            Self::Sepolia => Some("https://sepolia.hypersync.xyz"),
            Self::BaseSepolia => Some("https://base-sepolia.hypersync.xyz"),
            Self::ArbitrumSepolia => Some("https://arbitrum-sepolia.hypersync.xyz"),
            Self::OptimismSepolia => Some("https://optimism-sepolia.hypersync.xyz"),
            Self::Ethereum | Self::PolygonAmoy => None,
        }
    }
}

pub fn chain_name(chain_id: u64) -> String {
    match Chain::from_chain_id(chain_id) {
        Ok(chain) => chain.name().to_string(),
        Err(_) => format!("Chain {chain_id}"),
    }
}

pub fn explorer_tx_url(chain_id: u64, hash: &str) -> String {
    let base = Chain::from_chain_id(chain_id)
        .map(|c| c.explorer_base_url())
        .unwrap_or(Chain::Ethereum.explorer_base_url());
    format!("{base}/tx/{hash}")
}
