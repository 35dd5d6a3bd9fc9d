//! ECDSA over secp256k1
//!
//! Deterministic nonces per RFC 6979 (HMAC-SHA256), low-s normalized output,
//! strict DER encoding for script signatures.

use crate::crypto::curve::{scalar_base_mult, scalar_mult, CURVE};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::scalar::Scalar;
use crate::error::{TxError, TxResult};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

// MARK: - Signature

/// (r, s) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub r: Scalar,
    pub s: Scalar,
}

impl EcdsaSignature {
    pub fn new(r: Scalar, s: Scalar) -> TxResult<Self> {
        if r.is_zero() || s.is_zero() {
            return Err(TxError::serialization("Signature component is zero"));
        }
        Ok(Self { r, s })
    }

    /// Replaces s with n - s when s is in the upper half
    pub fn normalize_s(self) -> Self {
        if self.s.is_high() {
            Self {
                s: -&self.s,
                r: self.r,
            }
        } else {
            self
        }
    }

    pub fn is_low_s(&self) -> bool {
        !self.s.is_high()
    }

    /// 64-byte r || s
    pub fn to_compact(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r.to_bytes());
        out[32..].copy_from_slice(&self.s.to_bytes());
        out
    }

    pub fn from_compact(bytes: &[u8]) -> TxResult<Self> {
        if bytes.len() != 64 {
            return Err(TxError::serialization(format!(
                "Compact signature must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self::new(Scalar::from_bytes(&r)?, Scalar::from_bytes(&s)?)
    }

    /// Strict DER: SEQUENCE { INTEGER r, INTEGER s }
    pub fn to_der(&self) -> Vec<u8> {
        let r = der_integer(&self.r.to_bytes());
        let s = der_integer(&self.s.to_bytes());
        let mut out = Vec::with_capacity(6 + r.len() + s.len());
        out.push(0x30);
        out.push((4 + r.len() + s.len()) as u8);
        out.push(0x02);
        out.push(r.len() as u8);
        out.extend_from_slice(&r);
        out.push(0x02);
        out.push(s.len() as u8);
        out.extend_from_slice(&s);
        out
    }

    pub fn from_der(der: &[u8]) -> TxResult<Self> {
        let invalid = |why: &str| TxError::serialization(format!("Invalid DER signature: {}", why));

        if der.len() < 8 || der.len() > 72 {
            return Err(invalid("length"));
        }
        if der[0] != 0x30 || der[1] as usize != der.len() - 2 {
            return Err(invalid("sequence header"));
        }
        let (r, rest) = parse_der_integer(&der[2..]).ok_or_else(|| invalid("r"))?;
        let (s, rest) = parse_der_integer(rest).ok_or_else(|| invalid("s"))?;
        if !rest.is_empty() {
            return Err(invalid("trailing bytes"));
        }
        Self::new(r, s)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_compact())
    }
}

impl Serialize for EcdsaSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EcdsaSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        EcdsaSignature::from_compact(&bytes).map_err(serde::de::Error::custom)
    }
}

fn der_integer(bytes: &[u8; 32]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(31);
    let mut out = Vec::with_capacity(33);
    if bytes[start] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(&bytes[start..]);
    out
}

fn parse_der_integer(data: &[u8]) -> Option<(Scalar, &[u8])> {
    if data.len() < 2 || data[0] != 0x02 {
        return None;
    }
    let len = data[1] as usize;
    if len == 0 || len > 33 || data.len() < 2 + len {
        return None;
    }
    let value = &data[2..2 + len];
    // Negative numbers and superfluous padding are both non-canonical
    if value[0] & 0x80 != 0 {
        return None;
    }
    if len > 1 && value[0] == 0 && value[1] & 0x80 == 0 {
        return None;
    }
    let value = if value[0] == 0 { &value[1..] } else { value };
    if value.len() > 32 {
        return None;
    }
    let mut buf = [0u8; 32];
    buf[32 - value.len()..].copy_from_slice(value);
    let scalar = Scalar::from_bytes(&buf).ok()?;
    Some((scalar, &data[2 + len..]))
}

// MARK: - Nonce Derivation

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> TxResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TxError::internal(format!("HMAC key rejected: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// RFC 6979 section 3.2 nonce generator for a 256-bit curve
struct Rfc6979 {
    k: Zeroizing<[u8; 32]>,
    v: Zeroizing<[u8; 32]>,
}

impl Rfc6979 {
    fn new(secret: &[u8; 32], msg_hash: &[u8; 32]) -> TxResult<Self> {
        let h1 = Scalar::from_bytes_reduced(msg_hash).to_bytes();
        let mut k = Zeroizing::new([0u8; 32]);
        let mut v = Zeroizing::new([1u8; 32]);

        *k = hmac_sha256(&k[..], &[&v[..], &[0x00], secret, &h1])?;
        *v = hmac_sha256(&k[..], &[&v[..]])?;
        *k = hmac_sha256(&k[..], &[&v[..], &[0x01], secret, &h1])?;
        *v = hmac_sha256(&k[..], &[&v[..]])?;

        Ok(Self { k, v })
    }

    fn next_candidate(&mut self) -> TxResult<Scalar> {
        loop {
            *self.v = hmac_sha256(&self.k[..], &[&self.v[..]])?;
            let candidate = BigUint::from_bytes_be(&self.v[..]);
            if candidate > BigUint::default() && candidate < CURVE.n {
                return Ok(Scalar::from_biguint(&candidate));
            }
            self.retry()?;
        }
    }

    fn retry(&mut self) -> TxResult<()> {
        *self.k = hmac_sha256(&self.k[..], &[&self.v[..], &[0x00]])?;
        *self.v = hmac_sha256(&self.k[..], &[&self.v[..]])?;
        Ok(())
    }
}

// MARK: - Sign / Verify

/// Signs a 32-byte message hash; output is low-s normalized
pub fn sign(key: &PrivateKey, msg_hash: &[u8; 32]) -> TxResult<EcdsaSignature> {
    let d = key.scalar();
    let z = Scalar::from_bytes_reduced(msg_hash);
    let mut nonces = Rfc6979::new(&key.to_bytes(), msg_hash)?;

    loop {
        let k = nonces.next_candidate()?;
        let point = scalar_base_mult(k.as_biguint());
        let r = Scalar::from_biguint(&point.x);
        if r.is_zero() {
            nonces.retry()?;
            continue;
        }
        let s = &k.invert()? * &(&z + &(&r * &d));
        if s.is_zero() {
            nonces.retry()?;
            continue;
        }
        return Ok(EcdsaSignature { r, s }.normalize_s());
    }
}

/// Standard verification; accepts both low and high s
pub fn verify(public_key: &PublicKey, msg_hash: &[u8; 32], signature: &EcdsaSignature) -> bool {
    if signature.r.is_zero() || signature.s.is_zero() {
        return false;
    }
    let z = Scalar::from_bytes_reduced(msg_hash);
    let w = match signature.s.invert() {
        Ok(w) => w,
        Err(_) => return false,
    };
    let u1 = &z * &w;
    let u2 = &signature.r * &w;

    let lhs = scalar_base_mult(u1.as_biguint()).to_jacobian();
    let rhs = scalar_mult(public_key.point(), u2.as_biguint()).to_jacobian();
    let point = lhs.add(&rhs).to_affine();
    if point.is_infinity() {
        return false;
    }
    Scalar::from_biguint(&point.x) == signature.r
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest;

    fn satoshi_hash() -> [u8; 32] {
        sha2::Sha256::digest(b"Satoshi Nakamoto").into()
    }

    #[test]
    fn test_rfc6979_known_vector() {
        let key = PrivateKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let sig = sign(&key, &satoshi_hash()).unwrap();
        assert_eq!(
            hex::encode(sig.r.to_bytes()),
            "934b1ea10a4b3c1757e2b0c017d0b6143ce3c9a7e6a4a49860d7a6ab210ee3d8"
        );
        assert_eq!(
            hex::encode(sig.s.to_bytes()),
            "2442ce9d2b916064108014783e923ec36b49743e2ffa1c4496f01a512aafd9e5"
        );
        assert!(verify(&key.public_key(), &satoshi_hash(), &sig));
    }

    #[test]
    fn test_rfc6979_max_key_vector() {
        let key = PrivateKey::from_hex(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140",
        )
        .unwrap();
        let sig = sign(&key, &satoshi_hash()).unwrap();
        assert_eq!(
            hex::encode(sig.to_compact()),
            "fd567d121db66e382991534ada77a6bd3106f0a1098c231e47993447cd6af2d0\
             6b39cd0eb1bc8603e159ef5c20a5c8ad685a45b06ce9bebed3f153d10d93bed5"
        );
    }

    #[test]
    fn test_matches_libsecp256k1() {
        let secp = secp256k1::Secp256k1::new();
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let msg = [0x42u8; 32];
        let ours = sign(&key, &msg).unwrap();

        let sk = secp256k1::SecretKey::from_slice(&key.to_bytes()[..]).unwrap();
        let message = secp256k1::Message::from_digest(msg);
        let theirs = secp.sign_ecdsa(&message, &sk);
        assert_eq!(ours.to_compact(), theirs.serialize_compact());
        assert_eq!(ours.to_der(), theirs.serialize_der().to_vec());
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let sig = sign(&key, &[1u8; 32]).unwrap();
        assert!(verify(&key.public_key(), &[1u8; 32], &sig));
        assert!(!verify(&key.public_key(), &[2u8; 32], &sig));
        let other = PrivateKey::random(&mut rand::rngs::OsRng);
        assert!(!verify(&other.public_key(), &[1u8; 32], &sig));
    }

    #[test]
    fn test_der_roundtrip_and_strictness() {
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let sig = sign(&key, &[7u8; 32]).unwrap();
        let der = sig.to_der();
        assert_eq!(EcdsaSignature::from_der(&der).unwrap(), sig);

        let mut trailing = der.clone();
        trailing.push(0x01);
        assert!(EcdsaSignature::from_der(&trailing).is_err());

        let mut bad_header = der;
        bad_header[0] = 0x31;
        assert!(EcdsaSignature::from_der(&bad_header).is_err());
    }

    #[test]
    fn test_normalize_s() {
        let sig = EcdsaSignature::new(Scalar::one(), -&Scalar::one()).unwrap();
        assert!(!sig.is_low_s());
        let normalized = sig.normalize_s();
        assert!(normalized.is_low_s());
        assert_eq!(normalized.s, Scalar::one());
    }
}
