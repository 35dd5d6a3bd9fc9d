//! Cryptographic primitives
//!
//! This module provides the low-level operations every signer is built on:
//! - secp256k1 group arithmetic in Jacobian coordinates
//! - Scalars, private keys and SEC1 public keys
//! - ECDSA with RFC 6979 nonces
//! - Schnorr signatures (BIP-340) and tagged hashes
//! - Taproot key tweaking and script trees (BIP-341)
//! - Paillier encryption for the two-party ECDSA protocol

pub mod curve;
pub mod ecdsa;
pub mod keys;
pub mod paillier;
pub mod scalar;
pub mod schnorr;
pub mod taproot;

pub use curve::{AffinePoint, JacobianPoint, CURVE};
pub use ecdsa::EcdsaSignature;
pub use keys::{hash160, sha256d, PrivateKey, PublicKey};
pub use scalar::{Scalar, SecretScalar};
pub use schnorr::{tagged_hash, SchnorrSig, XOnlyPubKey};
pub use taproot::{TapMerkleRoot, TaprootOutputKey, TaprootTweaker};
