//! Private and public keys on secp256k1
//!
//! Public keys parse and serialize in SEC1 form (33-byte compressed or
//! 65-byte uncompressed). Everything is computed with [`crate::crypto::curve`].

use crate::crypto::curve::{scalar_base_mult, AffinePoint};
use crate::crypto::scalar::{Scalar, SecretScalar};
use crate::error::{TxError, TxResult};
use crate::types::Network;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// SHA256(SHA256(data))
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

// MARK: - Private Key

/// Non-zero scalar below the group order
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: SecretScalar,
}

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> TxResult<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            TxError::validation(format!("Private key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self {
            secret: SecretScalar::from_bytes(&bytes)?,
        })
    }

    pub fn from_hex(hex_str: &str) -> TxResult<Self> {
        let bytes = Zeroizing::new(hex::decode(hex_str.trim().trim_start_matches("0x"))?);
        Self::from_bytes(&bytes)
    }

    /// Imports a wallet-import-format key and reports its network
    pub fn from_wif(wif: &str) -> TxResult<(Self, Network)> {
        let key = bitcoin::PrivateKey::from_wif(wif.trim())
            .map_err(|e| TxError::serialization(format!("Invalid WIF: {}", e)))?;
        let network = match key.network {
            bitcoin::NetworkKind::Main => Network::Main,
            bitcoin::NetworkKind::Test => Network::Test,
        };
        let bytes = Zeroizing::new(key.inner.secret_bytes());
        Ok((Self::from_bytes(&bytes[..])?, network))
    }

    pub fn from_scalar(scalar: &Scalar) -> TxResult<Self> {
        if scalar.is_zero() {
            return Err(TxError::validation("Private key must not be zero"));
        }
        Ok(Self {
            secret: SecretScalar::new(scalar),
        })
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            secret: SecretScalar::random(rng),
        }
    }

    pub fn secret(&self) -> &SecretScalar {
        &self.secret
    }

    pub fn scalar(&self) -> Scalar {
        self.secret.expose()
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: scalar_base_mult(self.secret.expose().as_biguint()),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

// MARK: - Public Key

/// Point on the curve other than infinity
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: AffinePoint,
}

impl PublicKey {
    pub fn from_point(point: AffinePoint) -> TxResult<Self> {
        if point.is_infinity() {
            return Err(TxError::validation("Public key cannot be the point at infinity"));
        }
        if !point.is_on_curve() {
            return Err(TxError::serialization("Public key is not on secp256k1"));
        }
        Ok(Self { point })
    }

    /// Parses SEC1 compressed (33 bytes) or uncompressed (65 bytes) encodings
    pub fn from_slice(data: &[u8]) -> TxResult<Self> {
        match (data.len(), data.first()) {
            (33, Some(prefix @ (0x02 | 0x03))) => {
                let x = BigUint::from_bytes_be(&data[1..]);
                let point = AffinePoint::decompress(&x, *prefix == 0x03)?;
                Ok(Self { point })
            }
            (65, Some(0x04)) => {
                let x = BigUint::from_bytes_be(&data[1..33]);
                let y = BigUint::from_bytes_be(&data[33..]);
                Ok(Self {
                    point: AffinePoint::new(x, y)?,
                })
            }
            (len, _) => Err(TxError::serialization(format!(
                "Invalid public key encoding ({} bytes)",
                len
            ))),
        }
    }

    pub fn from_hex(hex_str: &str) -> TxResult<Self> {
        let bytes = hex::decode(hex_str.trim().trim_start_matches("0x"))?;
        Self::from_slice(&bytes)
    }

    pub fn point(&self) -> &AffinePoint {
        &self.point
    }

    pub fn serialize_compressed(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = if self.point.has_odd_y() { 0x03 } else { 0x02 };
        out[1..].copy_from_slice(&self.point.x_bytes());
        out
    }

    pub fn serialize_uncompressed(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0] = 0x04;
        out[1..33].copy_from_slice(&self.point.x_bytes());
        out[33..].copy_from_slice(&self.point.y_bytes());
        out
    }

    /// BIP340 x-only encoding
    pub fn x_only(&self) -> [u8; 32] {
        self.point.x_bytes()
    }

    pub fn has_odd_y(&self) -> bool {
        self.point.has_odd_y()
    }

    pub fn negate(&self) -> PublicKey {
        PublicKey {
            point: self.point.negate(),
        }
    }

    /// The even-y point with the same x coordinate
    pub fn negate_if_odd(&self) -> PublicKey {
        if self.has_odd_y() {
            self.negate()
        } else {
            self.clone()
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize_compressed())
    }

    /// HASH160 of the compressed encoding
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.serialize_compressed())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = TxError;

    fn from_str(s: &str) -> TxResult<Self> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash160_of_generator() {
        let key = PrivateKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let public = key.public_key();
        assert_eq!(
            public.to_hex(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(
            hex::encode(public.pubkey_hash()),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_compressed_uncompressed_roundtrip() {
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let public = key.public_key();
        let from_compressed = PublicKey::from_slice(&public.serialize_compressed()).unwrap();
        let from_uncompressed = PublicKey::from_slice(&public.serialize_uncompressed()).unwrap();
        assert_eq!(from_compressed, public);
        assert_eq!(from_uncompressed, public);
    }

    #[test]
    fn test_rejects_bad_encodings() {
        assert!(PublicKey::from_slice(&[0x05; 33]).is_err());
        assert!(PublicKey::from_slice(&[0x02; 20]).is_err());
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
        assert!(PrivateKey::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_wif_import() {
        // Private key 1, compressed, mainnet
        let (key, network) =
            PrivateKey::from_wif("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
        assert_eq!(network, Network::Main);
        assert_eq!(key.scalar(), Scalar::one());
    }

    #[test]
    fn test_matches_libsecp256k1() {
        let secp = secp256k1::Secp256k1::new();
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let sk = secp256k1::SecretKey::from_slice(&key.to_bytes()[..]).unwrap();
        let expected = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        assert_eq!(key.public_key().serialize_compressed(), expected.serialize());
        assert_eq!(
            key.public_key().serialize_uncompressed(),
            expected.serialize_uncompressed()
        );
    }
}
