//! Virtual-size formulas
//!
//! Sizes are per input/output script class and expressed in virtual bytes
//! (weight / 4). Witness bytes are already discounted in the input table;
//! [`raw_size_bytes`] adds the remaining three quarters back for the
//! serialized-length figure.

use crate::config::BuilderConfig;
use crate::error::{TxError, TxResult};
use crate::types::{AddressType, ScriptClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Size Tables
// =============================================================================

pub const P2PKH_IN_VBYTES: f64 = 148.0;
pub const P2SH_P2WPKH_IN_VBYTES: f64 = 90.75;
pub const P2WPKH_IN_VBYTES: f64 = 67.75;
pub const P2TR_IN_VBYTES: f64 = 57.25;

pub const P2PKH_OUT_VBYTES: f64 = 34.0;
pub const P2SH_OUT_VBYTES: f64 = 32.0;
pub const P2WPKH_OUT_VBYTES: f64 = 31.0;
pub const P2WSH_OUT_VBYTES: f64 = 43.0;
pub const P2TR_OUT_VBYTES: f64 = 43.0;

/// Compressed public key
pub const PUBKEY_SIZE: f64 = 33.0;
/// Upper bound of a DER signature with its sighash byte
pub const SIGNATURE_SIZE: f64 = 72.0;

/// Witness of a key-hash spend: count, sig push, sig, key push, key
const KEY_HASH_WITNESS_BYTES: f64 = 107.0;
/// Witness of a key-path taproot spend: push and 64-byte signature
const TAPROOT_WITNESS_BYTES: f64 = 65.0;

/// Largest `n` accepted for bare multisig redeem scripts
pub const MAX_MULTISIG_KEYS: u32 = 20;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("Fee rate {rate} sat/vB is below the minimum of {min}")]
    RateTooLow { rate: u64, min: u64 },

    #[error("Fee rate {rate} sat/vB is above the maximum of {max}")]
    RateTooHigh { rate: u64, max: u64 },

    #[error("A transaction needs at least one input")]
    NoInputs,

    #[error("Invalid multisig policy {m}-of-{n}")]
    InvalidMultisig { m: u32, n: u32 },
}

impl From<FeeError> for TxError {
    fn from(e: FeeError) -> Self {
        TxError::validation(e.to_string())
    }
}

// =============================================================================
// Script Classes
// =============================================================================

/// Script class of the outputs being spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputClass {
    P2pkh,
    P2shP2wpkh,
    P2wpkh,
    P2tr,
    P2shMultisig { m: u32, n: u32 },
    P2wshMultisig { m: u32, n: u32 },
    P2shP2wshMultisig { m: u32, n: u32 },
}

impl InputClass {
    pub fn from_address_type(address_type: AddressType) -> Self {
        match address_type {
            AddressType::Legacy => InputClass::P2pkh,
            AddressType::Nested => InputClass::P2shP2wpkh,
            AddressType::Segwit => InputClass::P2wpkh,
            AddressType::Taproot => InputClass::P2tr,
        }
    }

    /// Whether spending this class puts data in the witness
    pub fn has_witness(&self) -> bool {
        !matches!(self, InputClass::P2pkh | InputClass::P2shMultisig { .. })
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        match *self {
            InputClass::P2shMultisig { m, n }
            | InputClass::P2wshMultisig { m, n }
            | InputClass::P2shP2wshMultisig { m, n } => {
                if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
                    return Err(FeeError::InvalidMultisig { m, n });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Virtual size of one input
    pub fn vbytes(&self) -> f64 {
        match *self {
            InputClass::P2pkh => P2PKH_IN_VBYTES,
            InputClass::P2shP2wpkh => P2SH_P2WPKH_IN_VBYTES,
            InputClass::P2wpkh => P2WPKH_IN_VBYTES,
            InputClass::P2tr => P2TR_IN_VBYTES,
            InputClass::P2shMultisig { m, n } => {
                let script_sig = multisig_unlock_bytes(m, n);
                32.0 + 4.0 + varint_size(script_sig as u64) + script_sig + 4.0
            }
            InputClass::P2wshMultisig { m, n } => 36.0 + multisig_unlock_bytes(m, n) / 4.0 + 4.0,
            // P2SH wrapper: push of the 34-byte witness program plus its length
            InputClass::P2shP2wshMultisig { m, n } => {
                36.0 + multisig_unlock_bytes(m, n) / 4.0 + 4.0 + 32.0 + 3.0
            }
        }
    }

    /// Full witness bytes of one input, before the 4x discount
    pub fn witness_bytes(&self) -> f64 {
        match *self {
            InputClass::P2pkh | InputClass::P2shMultisig { .. } => 0.0,
            InputClass::P2shP2wpkh | InputClass::P2wpkh => KEY_HASH_WITNESS_BYTES,
            InputClass::P2tr => TAPROOT_WITNESS_BYTES,
            InputClass::P2wshMultisig { m, n } | InputClass::P2shP2wshMultisig { m, n } => {
                multisig_unlock_bytes(m, n)
            }
        }
    }
}

impl fmt::Display for InputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputClass::P2pkh => write!(f, "p2pkh"),
            InputClass::P2shP2wpkh => write!(f, "p2sh-p2wpkh"),
            InputClass::P2wpkh => write!(f, "p2wpkh"),
            InputClass::P2tr => write!(f, "p2tr"),
            InputClass::P2shMultisig { m, n } => write!(f, "p2sh-{}of{}", m, n),
            InputClass::P2wshMultisig { m, n } => write!(f, "p2wsh-{}of{}", m, n),
            InputClass::P2shP2wshMultisig { m, n } => write!(f, "p2sh-p2wsh-{}of{}", m, n),
        }
    }
}

impl FromStr for InputClass {
    type Err = TxError;

    /// Accepts `p2pkh`, `p2sh-p2wpkh`, `p2wpkh`, `p2tr`, the address type
    /// names, and multisig forms such as `p2wsh-2of3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if let Ok(address_type) = lower.parse::<AddressType>() {
            return Ok(Self::from_address_type(address_type));
        }

        let class = match lower.as_str() {
            "p2pkh" => InputClass::P2pkh,
            "p2sh-p2wpkh" => InputClass::P2shP2wpkh,
            "p2wpkh" => InputClass::P2wpkh,
            "p2tr" => InputClass::P2tr,
            other => parse_multisig(other)
                .ok_or_else(|| TxError::validation(format!("Unknown input class: {}", s)))?,
        };
        class.validate()?;
        Ok(class)
    }
}

fn parse_multisig(s: &str) -> Option<InputClass> {
    let (prefix, policy) = s.rsplit_once('-')?;
    let (m, n) = policy.split_once("of")?;
    let (m, n) = (m.parse().ok()?, n.parse().ok()?);
    match prefix {
        "p2sh" => Some(InputClass::P2shMultisig { m, n }),
        "p2wsh" => Some(InputClass::P2wshMultisig { m, n }),
        "p2sh-p2wsh" => Some(InputClass::P2shP2wshMultisig { m, n }),
        _ => None,
    }
}

/// Script class of a created output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputClass {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl OutputClass {
    pub fn vbytes(&self) -> f64 {
        match self {
            OutputClass::P2pkh => P2PKH_OUT_VBYTES,
            OutputClass::P2sh => P2SH_OUT_VBYTES,
            OutputClass::P2wpkh => P2WPKH_OUT_VBYTES,
            OutputClass::P2wsh => P2WSH_OUT_VBYTES,
            OutputClass::P2tr => P2TR_OUT_VBYTES,
        }
    }

    pub fn from_script_class(class: ScriptClass) -> Option<Self> {
        match class {
            ScriptClass::PubkeyHash => Some(OutputClass::P2pkh),
            ScriptClass::ScriptHash => Some(OutputClass::P2sh),
            ScriptClass::WitnessV0KeyHash => Some(OutputClass::P2wpkh),
            ScriptClass::WitnessV0ScriptHash => Some(OutputClass::P2wsh),
            ScriptClass::WitnessV1Taproot => Some(OutputClass::P2tr),
            ScriptClass::NonStandard => None,
        }
    }

    /// Classifies an output script, failing for non-standard scripts
    pub fn of_script(script: &bitcoin::Script) -> TxResult<Self> {
        Self::from_script_class(ScriptClass::classify(script)).ok_or_else(|| {
            TxError::serialization(format!(
                "Cannot size non-standard output script {}",
                hex::encode(script.as_bytes())
            ))
        })
    }
}

impl FromStr for OutputClass {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(OutputClass::P2pkh),
            "p2sh" | "nested" => Ok(OutputClass::P2sh),
            "p2wpkh" | "segwit" => Ok(OutputClass::P2wpkh),
            "p2wsh" => Ok(OutputClass::P2wsh),
            "p2tr" | "taproot" => Ok(OutputClass::P2tr),
            _ => Err(TxError::validation(format!("Unknown output class: {}", s))),
        }
    }
}

/// Number of outputs per class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCounts {
    pub p2pkh: usize,
    pub p2sh: usize,
    pub p2wpkh: usize,
    pub p2wsh: usize,
    pub p2tr: usize,
}

impl OutputCounts {
    pub fn add(&mut self, class: OutputClass) {
        match class {
            OutputClass::P2pkh => self.p2pkh += 1,
            OutputClass::P2sh => self.p2sh += 1,
            OutputClass::P2wpkh => self.p2wpkh += 1,
            OutputClass::P2wsh => self.p2wsh += 1,
            OutputClass::P2tr => self.p2tr += 1,
        }
    }

    pub fn with(mut self, class: OutputClass) -> Self {
        self.add(class);
        self
    }

    pub fn total(&self) -> usize {
        self.p2pkh + self.p2sh + self.p2wpkh + self.p2wsh + self.p2tr
    }

    pub fn vbytes(&self) -> f64 {
        self.p2pkh as f64 * P2PKH_OUT_VBYTES
            + self.p2sh as f64 * P2SH_OUT_VBYTES
            + self.p2wpkh as f64 * P2WPKH_OUT_VBYTES
            + self.p2wsh as f64 * P2WSH_OUT_VBYTES
            + self.p2tr as f64 * P2TR_OUT_VBYTES
    }
}

impl FromIterator<OutputClass> for OutputCounts {
    fn from_iter<I: IntoIterator<Item = OutputClass>>(iter: I) -> Self {
        let mut counts = OutputCounts::default();
        for class in iter {
            counts.add(class);
        }
        counts
    }
}

// =============================================================================
// Formulas
// =============================================================================

/// Encoded size of a CompactSize integer
pub fn varint_size(n: u64) -> f64 {
    if n < 253 {
        1.0
    } else if n <= 0xFFFF {
        3.0
    } else if n <= 0xFFFF_FFFF {
        5.0
    } else {
        9.0
    }
}

/// Size of the opcode(s) pushing `len` bytes
pub fn push_size(len: u64) -> f64 {
    if len <= 75 {
        1.0
    } else if len <= 0xFF {
        2.0
    } else if len <= 0xFFFF {
        3.0
    } else {
        5.0
    }
}

/// `OP_0 <sig>... <redeem script>` for an m-of-n CHECKMULTISIG script
fn multisig_unlock_bytes(m: u32, n: u32) -> f64 {
    let redeem_script = 1.0 + n as f64 * (1.0 + PUBKEY_SIZE) + 1.0 + 1.0;
    1.0 + m as f64 * (1.0 + SIGNATURE_SIZE) + push_size(redeem_script as u64) + redeem_script
}

/// Segwit marker, flag and per-input witness item counts, discounted
fn witness_overhead(input_count: usize) -> f64 {
    0.25 + 0.25 + input_count as f64 / 4.0
}

/// Version, counts and locktime
pub fn overhead_vbytes(input_class: InputClass, input_count: usize, output_count: usize) -> f64 {
    let witness = if input_class.has_witness() {
        witness_overhead(input_count)
    } else {
        0.0
    };
    4.0 + varint_size(input_count as u64) + varint_size(output_count as u64) + 4.0 + witness
}

/// Virtual size of a transaction spending `input_count` inputs of one class
pub fn estimate_vbytes(input_class: InputClass, input_count: usize, outputs: &OutputCounts) -> f64 {
    overhead_vbytes(input_class, input_count, outputs.total())
        + input_class.vbytes() * input_count as f64
        + outputs.vbytes()
}

/// Serialized length including the undiscounted witness bytes
pub fn raw_size_bytes(input_class: InputClass, input_count: usize, outputs: &OutputCounts) -> f64 {
    let vbytes = estimate_vbytes(input_class, input_count, outputs);
    if !input_class.has_witness() {
        return vbytes;
    }
    vbytes
        + witness_overhead(input_count) * 3.0
        + input_class.witness_bytes() * input_count as f64 * 3.0 / 4.0
}

/// `ceil(vbytes) * rate`
pub fn fee_for(vbytes: f64, fee_rate: u64) -> u64 {
    (vbytes.ceil() as u64).saturating_mul(fee_rate)
}

// =============================================================================
// FeeEstimator
// =============================================================================

/// Size and fee of a planned transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub vbytes: f64,
    pub raw_bytes: f64,
    pub fee_rate: u64,
    pub fee: u64,
}

/// Fee calculator bounded by the configured rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimator {
    min_fee_rate: u64,
    max_fee_rate: u64,
}

impl FeeEstimator {
    pub fn new(min_fee_rate: u64) -> Self {
        Self {
            min_fee_rate: min_fee_rate.max(1),
            max_fee_rate: u64::MAX,
        }
    }

    pub fn from_config(config: &BuilderConfig) -> Self {
        Self {
            min_fee_rate: config.min_fee_rate.max(1),
            max_fee_rate: config.max_fee_rate,
        }
    }

    pub fn min_fee_rate(&self) -> u64 {
        self.min_fee_rate
    }

    pub fn check_rate(&self, fee_rate: u64) -> Result<(), FeeError> {
        if fee_rate < self.min_fee_rate {
            return Err(FeeError::RateTooLow {
                rate: fee_rate,
                min: self.min_fee_rate,
            });
        }
        if fee_rate > self.max_fee_rate {
            return Err(FeeError::RateTooHigh {
                rate: fee_rate,
                max: self.max_fee_rate,
            });
        }
        Ok(())
    }

    pub fn estimate(
        &self,
        input_class: InputClass,
        input_count: usize,
        outputs: &OutputCounts,
        fee_rate: u64,
    ) -> TxResult<FeeEstimate> {
        self.check_rate(fee_rate)?;
        input_class.validate()?;
        if input_count == 0 {
            return Err(FeeError::NoInputs.into());
        }

        let vbytes = estimate_vbytes(input_class, input_count, outputs);
        Ok(FeeEstimate {
            vbytes,
            raw_bytes: raw_size_bytes(input_class, input_count, outputs),
            fee_rate,
            fee: fee_for(vbytes, fee_rate),
        })
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::from_config(&BuilderConfig::default())
    }
}
