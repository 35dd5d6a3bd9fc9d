//! Shared types for the transaction builder
//!
//! Data structures that cross module boundaries are defined here
//! for consistent serialization.

use crate::error::{TxError, TxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Network
// =============================================================================

/// Chain parameters the builder works against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Main,
    Test,
}

impl Network {
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Test)
    }

    /// Parameters used by the `bitcoin` crate encoders
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Main => bitcoin::Network::Bitcoin,
            Network::Test => bitcoin::Network::Testnet,
        }
    }

    /// BIP44-style coin type used in derivation paths
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Main => 0,
            Network::Test => 1,
        }
    }

    /// Bech32 human readable part
    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Main => "bc",
            Network::Test => "tb",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Main => write!(f, "main"),
            Network::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Network {
    type Err = TxError;

    fn from_str(s: &str) -> TxResult<Self> {
        match s.to_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Ok(Network::Main),
            "test" | "testnet" | "testnet3" => Ok(Network::Test),
            other => Err(TxError::validation(format!("Unknown network: {}", other))),
        }
    }
}

// =============================================================================
// Address Types
// =============================================================================

/// The four single-key output families an account can receive on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Legacy,
    Nested,
    Segwit,
    Taproot,
}

impl AddressType {
    pub const ALL: [AddressType; 4] = [
        AddressType::Legacy,
        AddressType::Nested,
        AddressType::Segwit,
        AddressType::Taproot,
    ];

    /// Whether spending from this type needs witness data
    pub fn is_witness(&self) -> bool {
        !matches!(self, AddressType::Legacy)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressType::Legacy => "legacy",
            AddressType::Nested => "nested",
            AddressType::Segwit => "segwit",
            AddressType::Taproot => "taproot",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for AddressType {
    type Err = TxError;

    fn from_str(s: &str) -> TxResult<Self> {
        match s.to_lowercase().as_str() {
            "legacy" | "p2pkh" => Ok(AddressType::Legacy),
            "nested" | "p2sh-p2wpkh" | "p2sh" => Ok(AddressType::Nested),
            "segwit" | "p2wpkh" => Ok(AddressType::Segwit),
            "taproot" | "p2tr" => Ok(AddressType::Taproot),
            other => Err(TxError::validation(format!("Unknown address type: {}", other))),
        }
    }
}

// =============================================================================
// Script Classes
// =============================================================================

/// Classification of an output script, used to pick the sighash algorithm
/// and the fee table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptClass {
    PubkeyHash,
    ScriptHash,
    WitnessV0KeyHash,
    WitnessV0ScriptHash,
    WitnessV1Taproot,
    NonStandard,
}

impl ScriptClass {
    pub fn classify(script: &bitcoin::Script) -> Self {
        if script.is_p2pkh() {
            ScriptClass::PubkeyHash
        } else if script.is_p2sh() {
            ScriptClass::ScriptHash
        } else if script.is_p2wpkh() {
            ScriptClass::WitnessV0KeyHash
        } else if script.is_p2wsh() {
            ScriptClass::WitnessV0ScriptHash
        } else if script.is_p2tr() {
            ScriptClass::WitnessV1Taproot
        } else {
            ScriptClass::NonStandard
        }
    }
}
