//! Runtime configuration
//!
//! Defaults cover public mainnet/testnet endpoints; everything can be
//! overridden from JSON or from `TXB_*` environment variables.

use crate::error::{TxError, TxResult};
use crate::types::Network;
use serde::{Deserialize, Serialize};
use url::Url;

/// Smallest Paillier modulus the two-party ECDSA protocol accepts.
/// The homomorphic sum must stay below N for two 256-bit products plus a mask.
pub const MIN_PAILLIER_BITS: u64 = 768;

/// Transaction construction limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Lowest accepted fee rate in sat/vB
    pub min_fee_rate: u64,
    /// Highest accepted fee rate in sat/vB
    pub max_fee_rate: u64,
    /// Change below this value is given to the miner instead of creating an output
    pub dust_limit: u64,
    /// Signal opt-in replaceability on every input
    pub rbf: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_fee_rate: 1,
            max_fee_rate: 5_000,
            dust_limit: 546,
            rbf: false,
        }
    }
}

/// External collaborator endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub esplora_mainnet: Vec<String>,
    pub esplora_testnet: Vec<String>,
    pub fee_api_mainnet: String,
    pub fee_api_testnet: String,
    pub remote_signer_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            esplora_mainnet: vec![
                "https://mempool.space/api".to_string(),
                "https://blockstream.info/api".to_string(),
            ],
            esplora_testnet: vec![
                "https://mempool.space/testnet/api".to_string(),
                "https://blockstream.info/testnet/api".to_string(),
            ],
            fee_api_mainnet: "https://mempool.space/api".to_string(),
            fee_api_testnet: "https://mempool.space/testnet/api".to_string(),
            remote_signer_url: None,
            request_timeout_secs: 15,
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl EndpointConfig {
    pub fn esplora_for(&self, network: Network) -> &[String] {
        match network {
            Network::Main => &self.esplora_mainnet,
            Network::Test => &self.esplora_testnet,
        }
    }

    pub fn fee_api_for(&self, network: Network) -> &str {
        match network {
            Network::Main => &self.fee_api_mainnet,
            Network::Test => &self.fee_api_testnet,
        }
    }
}

/// Threshold protocol parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Paillier modulus size used by two-party ECDSA
    pub paillier_bits: u64,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self { paillier_bits: 2048 }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub builder: BuilderConfig,
    pub endpoints: EndpointConfig,
    pub mpc: MpcConfig,
    pub debug: bool,
}

impl Config {
    pub fn from_json(json: &str) -> TxResult<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `TXB_*` environment variables
    pub fn from_env() -> TxResult<Self> {
        let mut config = Config::default();

        if let Some(v) = env_u64("TXB_MIN_FEE_RATE")? {
            config.builder.min_fee_rate = v;
        }
        if let Some(v) = env_u64("TXB_MAX_FEE_RATE")? {
            config.builder.max_fee_rate = v;
        }
        if let Some(v) = env_u64("TXB_DUST_LIMIT")? {
            config.builder.dust_limit = v;
        }
        if let Some(v) = env_u64("TXB_PAILLIER_BITS")? {
            config.mpc.paillier_bits = v;
        }
        if let Ok(url) = std::env::var("TXB_REMOTE_SIGNER_URL") {
            if !url.trim().is_empty() {
                config.endpoints.remote_signer_url = Some(url.trim().to_string());
            }
        }
        if let Ok(v) = std::env::var("TXB_DEBUG") {
            config.debug = matches!(v.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TxResult<()> {
        if self.builder.min_fee_rate == 0 {
            return Err(TxError::validation("min_fee_rate must be at least 1 sat/vB"));
        }
        if self.builder.max_fee_rate < self.builder.min_fee_rate {
            return Err(TxError::validation("max_fee_rate is below min_fee_rate"));
        }
        if self.mpc.paillier_bits < MIN_PAILLIER_BITS {
            return Err(TxError::validation(format!(
                "paillier_bits must be at least {}",
                MIN_PAILLIER_BITS
            )));
        }
        if self.endpoints.max_retries == 0 {
            return Err(TxError::validation("max_retries must be at least 1"));
        }

        let all_urls = self
            .endpoints
            .esplora_mainnet
            .iter()
            .chain(self.endpoints.esplora_testnet.iter())
            .chain(std::iter::once(&self.endpoints.fee_api_mainnet))
            .chain(std::iter::once(&self.endpoints.fee_api_testnet))
            .chain(self.endpoints.remote_signer_url.iter());
        for raw in all_urls {
            validate_endpoint(raw)?;
        }
        Ok(())
    }
}

fn validate_endpoint(raw: &str) -> TxResult<()> {
    let url = Url::parse(raw)
        .map_err(|e| TxError::validation(format!("Invalid endpoint URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TxError::validation(format!(
            "Unsupported endpoint scheme '{}' in {}",
            other, raw
        ))),
    }
}

fn env_u64(name: &str) -> TxResult<Option<u64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| TxError::validation(format!("{} is not a number: {}", name, v))),
        Err(_) => Ok(None),
    }
}
