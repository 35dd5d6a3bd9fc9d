//! BIP-340 Schnorr Signatures
//!
//! Schnorr signing and verification over the crate's own secp256k1
//! arithmetic, as used for Taproot key-path spends.
//!
//! Key features:
//! - Tagged hashes for domain separation
//! - X-only public keys (32 bytes instead of 33)
//! - 64-byte signatures
//! - Nonces derived from the key, message and auxiliary randomness
//!
//! Reference: https://github.com/bitcoin/bips/blob/master/bip-0340.mediawiki

use crate::crypto::curve::{scalar_base_mult, scalar_mult, AffinePoint, CURVE};
use crate::crypto::keys::PrivateKey;
use crate::crypto::scalar::Scalar;
use crate::error::{TxError, TxResult};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

// MARK: - Tagged Hash Functions

/// BIP-340 tagged hash computation
///
/// tagged_hash(tag, msg) = SHA256(SHA256(tag) || SHA256(tag) || msg)
pub fn tagged_hash(tag: &str, msg: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(msg);

    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Standard BIP-340 / BIP-341 tags
pub mod tags {
    pub const BIP0340_AUX: &str = "BIP0340/aux";
    pub const BIP0340_NONCE: &str = "BIP0340/nonce";
    pub const BIP0340_CHALLENGE: &str = "BIP0340/challenge";
    pub const TAP_TWEAK: &str = "TapTweak";
    pub const TAP_LEAF: &str = "TapLeaf";
    pub const TAP_BRANCH: &str = "TapBranch";
}

/// e = int(tagged_hash("BIP0340/challenge", R.x || P.x || m)) mod n
pub fn challenge(r_x: &[u8; 32], p_x: &[u8; 32], msg: &[u8; 32]) -> Scalar {
    let mut data = [0u8; 96];
    data[..32].copy_from_slice(r_x);
    data[32..64].copy_from_slice(p_x);
    data[64..].copy_from_slice(msg);
    Scalar::from_bytes_reduced(&tagged_hash(tags::BIP0340_CHALLENGE, &data))
}

// MARK: - Schnorr Key Types

/// X-only public key (32 bytes)
///
/// In BIP-340, public keys are represented as only their x-coordinate.
/// The y-coordinate is implicitly even.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XOnlyPubKey(pub [u8; 32]);

impl XOnlyPubKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SchnorrError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            SchnorrError::InvalidPublicKey(format!("Expected 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SchnorrError> {
        let bytes = hex::decode(s).map_err(|e| SchnorrError::InvalidPublicKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// lift_x: the curve point with this x and even y
    pub fn to_point(&self) -> Result<AffinePoint, SchnorrError> {
        AffinePoint::lift_x(&BigUint::from_bytes_be(&self.0))
            .map_err(|e| SchnorrError::InvalidPublicKey(e.message))
    }
}

/// Schnorr signature (64 bytes: 32-byte R.x + 32-byte s)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchnorrSig(pub [u8; 64]);

// 64 bytes as hex
impl serde::Serialize for SchnorrSig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for SchnorrSig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map(SchnorrSig)
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

impl SchnorrSig {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SchnorrError> {
        let bytes: [u8; 64] = slice.try_into().map_err(|_| {
            SchnorrError::InvalidSignature(format!("Expected 64 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_parts(r_x: &[u8; 32], s: &Scalar) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(r_x);
        bytes[32..].copy_from_slice(&s.to_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// R.x (first 32 bytes)
    pub fn r(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[..32]);
        out
    }

    /// s (last 32 bytes)
    pub fn s(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[32..]);
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SchnorrError> {
        let bytes = hex::decode(s).map_err(|e| SchnorrError::InvalidSignature(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

// MARK: - Schnorr Errors

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchnorrError {
    InvalidPrivateKey(String),
    InvalidPublicKey(String),
    InvalidSignature(String),
    SigningFailed(String),
}

impl std::fmt::Display for SchnorrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPrivateKey(s) => write!(f, "Invalid private key: {}", s),
            Self::InvalidPublicKey(s) => write!(f, "Invalid public key: {}", s),
            Self::InvalidSignature(s) => write!(f, "Invalid signature: {}", s),
            Self::SigningFailed(s) => write!(f, "Signing failed: {}", s),
        }
    }
}

impl std::error::Error for SchnorrError {}

impl From<SchnorrError> for TxError {
    fn from(e: SchnorrError) -> Self {
        match e {
            SchnorrError::SigningFailed(_) => TxError::internal(e.to_string()),
            _ => TxError::serialization(e.to_string()),
        }
    }
}

// MARK: - Sign / Verify

/// Signs a 32-byte message with BIP-340 using the given auxiliary randomness
pub fn sign(key: &PrivateKey, msg: &[u8; 32], aux_rand: &[u8; 32]) -> TxResult<SchnorrSig> {
    let public = key.public_key();
    let p_x = public.x_only();
    let d = key.scalar().negate_if(public.has_odd_y());

    // t = bytes(d) xor tagged_hash("BIP0340/aux", a)
    let aux_hash = tagged_hash(tags::BIP0340_AUX, aux_rand);
    let mut nonce_input = Zeroizing::new([0u8; 96]);
    let d_bytes = Zeroizing::new(d.to_bytes());
    for i in 0..32 {
        nonce_input[i] = d_bytes[i] ^ aux_hash[i];
    }
    nonce_input[32..64].copy_from_slice(&p_x);
    nonce_input[64..].copy_from_slice(msg);

    let k0 = Scalar::from_bytes_reduced(&tagged_hash(tags::BIP0340_NONCE, &nonce_input[..]));
    if k0.is_zero() {
        return Err(SchnorrError::SigningFailed("nonce reduced to zero".to_string()).into());
    }

    let r_point = scalar_base_mult(k0.as_biguint());
    let k = k0.negate_if(r_point.has_odd_y());
    let r_x = r_point.x_bytes();

    let e = challenge(&r_x, &p_x, msg);
    let s = &k + &(&e * &d);
    let sig = SchnorrSig::from_parts(&r_x, &s);

    if !verify(&XOnlyPubKey(p_x), msg, &sig) {
        return Err(TxError::crypto_consistency(
            "Produced Schnorr signature does not verify",
        ));
    }
    Ok(sig)
}

/// Verifies a BIP-340 signature: s·G == R + e·P with R having even y
pub fn verify(public_key: &XOnlyPubKey, msg: &[u8; 32], signature: &SchnorrSig) -> bool {
    let p = match public_key.to_point() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let r = BigUint::from_bytes_be(&signature.0[..32]);
    if r >= CURVE.p {
        return false;
    }
    let s = match Scalar::from_bytes(&signature.s()) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let e = challenge(&signature.r(), public_key.as_bytes(), msg);
    // R = sG - eP
    let s_g = scalar_base_mult(s.as_biguint()).to_jacobian();
    let neg_e_p = scalar_mult(&p, (-&e).as_biguint()).to_jacobian();
    let point = s_g.add(&neg_e_p).to_affine();

    !point.is_infinity() && !point.has_odd_y() && point.x == r
}
