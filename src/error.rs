//! Unified error types for the transaction builder
//!
//! Every fallible operation in the crate reports a [`TxError`] carrying an
//! [`ErrorKind`] so callers can branch on the category instead of parsing
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all builder, signing and protocol operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl TxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn crypto_consistency(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CryptoConsistency, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_crypto_consistency(&self) -> bool {
        self.kind == ErrorKind::CryptoConsistency
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for TxError {}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied something the builder cannot accept: empty UTXO set,
    /// fee rate under the floor, network mismatch, missing outputs, shortfall.
    Validation,
    /// Cross-party disagreement in a threshold session or a signature that
    /// does not verify under the key it claims.
    CryptoConsistency,
    /// A secrets source has no key, public key or script for an address.
    NotFound,
    /// Malformed hex, script, address or wire data.
    Serialization,
    /// An external collaborator (UTXO provider, fee source, remote signer) failed.
    Network,
    /// Broken internal invariant.
    Internal,
}

/// Result type alias for crate operations
pub type TxResult<T> = Result<T, TxError>;

// Conversions from common error types

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::new(ErrorKind::Serialization, e.to_string())
    }
}

impl From<hex::FromHexError> for TxError {
    fn from(e: hex::FromHexError) -> Self {
        TxError::new(ErrorKind::Serialization, format!("Invalid hex: {}", e))
    }
}

impl From<std::io::Error> for TxError {
    fn from(e: std::io::Error) -> Self {
        TxError::new(ErrorKind::Internal, e.to_string())
    }
}

impl From<reqwest::Error> for TxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TxError::new(ErrorKind::Network, "Request timed out")
        } else if e.is_connect() {
            TxError::new(ErrorKind::Network, "Connection failed")
        } else {
            TxError::new(ErrorKind::Network, e.to_string())
        }
    }
}

impl From<bitcoin::address::ParseError> for TxError {
    fn from(e: bitcoin::address::ParseError) -> Self {
        TxError::new(ErrorKind::Serialization, format!("Address parse error: {}", e))
    }
}

impl From<bitcoin::bip32::Error> for TxError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        TxError::new(ErrorKind::Validation, format!("BIP32 error: {}", e))
    }
}

impl From<bip39::Error> for TxError {
    fn from(e: bip39::Error) -> Self {
        TxError::new(ErrorKind::Validation, format!("BIP39 error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = TxError::validation("utxo set is empty").with_details("build");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"validation\""));
        assert!(json.contains("utxo set is empty"));

        let back: TxError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_display_includes_kind_and_details() {
        let err = TxError::not_found("no key for address").with_details("bc1q...");
        assert_eq!(err.to_string(), "[NotFound] no key for address (bc1q...)");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_hex_error_maps_to_serialization() {
        let err: TxError = hex::decode("zz").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Serialization);
    }
}
