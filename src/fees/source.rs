//! Fee-rate suggestions
//!
//! A suggestion is a hint for choosing a rate; the builder never depends on
//! one being available.

use crate::config::{BuilderConfig, EndpointConfig};
use crate::error::{TxError, TxResult};
use crate::types::Network;
use crate::utils::HttpClient;
use serde::{Deserialize, Serialize};

const MODULE: &str = "fees::source";

/// Confirmation urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePriority {
    Low,
    Average,
    High,
}

/// Suggested rates in sat/vB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSuggestion {
    pub low: u64,
    pub average: u64,
    pub high: u64,
}

impl FeeSuggestion {
    pub fn rate(&self, priority: FeePriority) -> u64 {
        match priority {
            FeePriority::Low => self.low,
            FeePriority::Average => self.average,
            FeePriority::High => self.high,
        }
    }

    /// Raises every rate to the configured floor and caps it at the ceiling
    pub fn clamped(&self, config: &BuilderConfig) -> Self {
        let clamp = |rate: u64| rate.max(config.min_fee_rate).min(config.max_fee_rate);
        Self {
            low: clamp(self.low),
            average: clamp(self.average),
            high: clamp(self.high),
        }
    }
}

/// Anything that can suggest fee rates
pub trait FeeRateSource {
    fn suggest(&self) -> TxResult<FeeSuggestion>;
}

/// Fixed suggestion for offline use and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFeeSource(pub FeeSuggestion);

impl StaticFeeSource {
    pub fn flat(rate: u64) -> Self {
        Self(FeeSuggestion {
            low: rate,
            average: rate,
            high: rate,
        })
    }
}

impl FeeRateSource for StaticFeeSource {
    fn suggest(&self) -> TxResult<FeeSuggestion> {
        Ok(self.0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    fastest_fee: u64,
    half_hour_fee: u64,
    minimum_fee: u64,
}

/// mempool.space `/v1/fees/recommended`
#[derive(Debug, Clone)]
pub struct MempoolFeeSource {
    http: HttpClient,
    base_url: String,
}

impl MempoolFeeSource {
    pub fn new(config: &EndpointConfig, network: Network) -> TxResult<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
            base_url: config.fee_api_for(network).to_string(),
        })
    }

    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/fees/recommended", self.base_url.trim_end_matches('/'))
    }
}

impl FeeRateSource for MempoolFeeSource {
    fn suggest(&self) -> TxResult<FeeSuggestion> {
        let url = self.url();
        let fees: RecommendedFees = self
            .http
            .get_json(&url)
            .map_err(|e| TxError::network("Fee suggestion request failed").with_details(e.to_string()))?;
        let suggestion = suggestion_from(fees)?;
        crate::log_debug!(
            MODULE,
            "Fee suggestion received",
            low = suggestion.low,
            average = suggestion.average,
            high = suggestion.high
        );
        Ok(suggestion)
    }
}

fn suggestion_from(fees: RecommendedFees) -> TxResult<FeeSuggestion> {
    if fees.minimum_fee == 0 || fees.half_hour_fee < fees.minimum_fee || fees.fastest_fee < fees.half_hour_fee {
        return Err(TxError::network(format!(
            "Inconsistent fee suggestion: minimum {} half-hour {} fastest {}",
            fees.minimum_fee, fees.half_hour_fee, fees.fastest_fee
        )));
    }
    Ok(FeeSuggestion {
        low: fees.minimum_fee,
        average: fees.half_hour_fee,
        high: fees.fastest_fee,
    })
}

/// Parses a `/v1/fees/recommended` response body
pub fn parse_recommended(body: &str) -> TxResult<FeeSuggestion> {
    suggestion_from(serde_json::from_str(body)?)
}
