//! Unspent outputs and where they come from

use crate::config::EndpointConfig;
use crate::error::{TxError, TxResult};
use crate::types::Network;
use crate::utils::{extract_domain, HttpClient};
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

const MODULE: &str = "tx::utxo";

/// Spendable output of the source address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Transaction id in display (big-endian) hex
    pub txid: String,
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    #[serde(default)]
    pub confirmations: Option<u64>,
}

impl UnspentOutput {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            value,
            confirmations: None,
        }
    }

    pub fn outpoint(&self) -> TxResult<OutPoint> {
        let txid = Txid::from_str(self.txid.trim())
            .map_err(|e| TxError::serialization(format!("Invalid txid '{}': {}", self.txid, e)))?;
        Ok(OutPoint::new(txid, self.vout))
    }
}

/// Source of unspent outputs for an address
pub trait UtxoProvider {
    fn fetch(&self, address: &str) -> TxResult<Vec<UnspentOutput>>;
}

/// Fixed UTXO sets keyed by address
#[derive(Debug, Clone, Default)]
pub struct StaticUtxoProvider {
    sets: HashMap<String, Vec<UnspentOutput>>,
}

impl StaticUtxoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: impl Into<String>, utxos: Vec<UnspentOutput>) -> Self {
        self.sets.insert(address.into(), utxos);
        self
    }
}

impl UtxoProvider for StaticUtxoProvider {
    fn fetch(&self, address: &str) -> TxResult<Vec<UnspentOutput>> {
        Ok(self.sets.get(address).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Esplora
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

/// Esplora-compatible REST APIs (mempool.space, blockstream.info)
///
/// Base URLs are tried in order; each request is retried with backoff by
/// the HTTP client before moving on to the next one.
#[derive(Debug, Clone)]
pub struct EsploraUtxoProvider {
    http: HttpClient,
    base_urls: Vec<String>,
}

impl EsploraUtxoProvider {
    pub fn new(config: &EndpointConfig, network: Network) -> TxResult<Self> {
        Self::with_base_urls(HttpClient::new(config)?, config.esplora_for(network).to_vec())
    }

    pub fn with_base_urls(http: HttpClient, base_urls: Vec<String>) -> TxResult<Self> {
        if base_urls.is_empty() {
            return Err(TxError::validation("At least one esplora endpoint is required"));
        }
        Ok(Self { http, base_urls })
    }

    fn fetch_from(&self, base_url: &str, address: &str) -> TxResult<Vec<UnspentOutput>> {
        let base = base_url.trim_end_matches('/');
        let body = self.http.get_text(&format!("{}/address/{}/utxo", base, address))?;
        let raw: Vec<EsploraUtxo> = serde_json::from_str(&body)?;

        let tip = if raw.iter().any(|u| u.status.confirmed) {
            let text = self.http.get_text(&format!("{}/blocks/tip/height", base))?;
            Some(text.trim().parse::<u64>().map_err(|_| {
                TxError::network(format!("Unexpected tip height from {}: {}", extract_domain(base), text))
            })?)
        } else {
            None
        };
        Ok(convert(raw, tip))
    }
}

impl UtxoProvider for EsploraUtxoProvider {
    fn fetch(&self, address: &str) -> TxResult<Vec<UnspentOutput>> {
        let mut last_error = None;
        for base_url in &self.base_urls {
            match self.fetch_from(base_url, address) {
                Ok(utxos) => {
                    crate::log_debug!(
                        MODULE,
                        "UTXOs fetched",
                        host = extract_domain(base_url),
                        count = utxos.len(),
                        address = address
                    );
                    return Ok(utxos);
                }
                Err(e) => {
                    crate::log_warn!(
                        MODULE,
                        "UTXO endpoint failed",
                        host = extract_domain(base_url),
                        error = e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TxError::network("All UTXO endpoints failed")))
    }
}

fn convert(raw: Vec<EsploraUtxo>, tip: Option<u64>) -> Vec<UnspentOutput> {
    raw.into_iter()
        .map(|u| {
            let confirmations = match (u.status.confirmed, u.status.block_height, tip) {
                (true, Some(height), Some(tip)) => Some(tip.saturating_sub(height) + 1),
                (false, _, _) => Some(0),
                _ => None,
            };
            UnspentOutput {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                confirmations,
            }
        })
        .collect()
}

/// Parses an esplora `/address/:addr/utxo` body
pub fn parse_esplora_utxos(body: &str, tip_height: Option<u64>) -> TxResult<Vec<UnspentOutput>> {
    Ok(convert(serde_json::from_str(body)?, tip_height))
}
