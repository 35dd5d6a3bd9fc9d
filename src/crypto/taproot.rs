//! Taproot Key Tweaking and Script Trees (BIP-341)
//!
//! Key features:
//! - Internal key to output key tweaking
//! - Private key tweaking for key-path spends
//! - Script tree Merkle root calculation
//! - TapLeaf and TapBranch tagged hashes
//!
//! Reference: https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki

use crate::crypto::curve::scalar_base_mult;
use crate::crypto::keys::PrivateKey;
use crate::crypto::scalar::Scalar;
use crate::crypto::schnorr::{tagged_hash, tags, XOnlyPubKey};
use crate::error::{TxError, TxResult};
use serde::{Deserialize, Serialize};

// MARK: - Taproot Constants

/// Default TapScript leaf version (0xc0)
pub const TAPSCRIPT_LEAF_VERSION: u8 = 0xc0;

// MARK: - Taproot Types

/// Taproot output key (tweaked public key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaprootOutputKey {
    /// The x-only output public key
    pub output_key: XOnlyPubKey,
    /// Parity of the output key
    pub parity: bool,
}

/// Merkle root of the script tree (32 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapMerkleRoot(pub [u8; 32]);

impl TapMerkleRoot {
    /// Key-path only commitment
    pub fn empty() -> Self {
        Self([0u8; 32])
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TaprootError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            TaprootError::InvalidMerkleRoot(format!("Expected 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// TapLeaf - a single script in the tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapLeaf {
    pub version: u8,
    pub script: Vec<u8>,
}

impl TapLeaf {
    pub fn new(script: Vec<u8>) -> Self {
        Self {
            version: TAPSCRIPT_LEAF_VERSION,
            script,
        }
    }

    pub fn with_version(version: u8, script: Vec<u8>) -> Self {
        Self { version, script }
    }

    /// TapLeaf hash = tagged_hash("TapLeaf", version || compact_size(script) || script)
    pub fn hash(&self) -> [u8; 32] {
        let mut data = Vec::with_capacity(1 + 9 + self.script.len());
        data.push(self.version);

        let len = self.script.len();
        if len < 253 {
            data.push(len as u8);
        } else if len <= 0xFFFF {
            data.push(253);
            data.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            data.push(254);
            data.extend_from_slice(&(len as u32).to_le_bytes());
        }

        data.extend_from_slice(&self.script);
        tagged_hash(tags::TAP_LEAF, &data)
    }
}

/// Node of a script tree
#[derive(Debug, Clone)]
pub enum TapNode {
    Leaf(TapLeaf),
    Branch(Box<TapNode>, Box<TapNode>),
}

impl TapNode {
    pub fn hash(&self) -> [u8; 32] {
        match self {
            TapNode::Leaf(leaf) => leaf.hash(),
            TapNode::Branch(left, right) => tap_branch_hash(&left.hash(), &right.hash()),
        }
    }

    pub fn branch(left: TapNode, right: TapNode) -> Self {
        TapNode::Branch(Box::new(left), Box::new(right))
    }
}

// MARK: - Taproot Errors

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaprootError {
    InvalidInternalKey(String),
    InvalidMerkleRoot(String),
    TweakFailed(String),
}

impl std::fmt::Display for TaprootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInternalKey(s) => write!(f, "Invalid internal key: {}", s),
            Self::InvalidMerkleRoot(s) => write!(f, "Invalid merkle root: {}", s),
            Self::TweakFailed(s) => write!(f, "Tweak failed: {}", s),
        }
    }
}

impl std::error::Error for TaprootError {}

impl From<TaprootError> for TxError {
    fn from(e: TaprootError) -> Self {
        match e {
            TaprootError::TweakFailed(_) => TxError::crypto_consistency(e.to_string()),
            _ => TxError::serialization(e.to_string()),
        }
    }
}

// MARK: - Taproot Functions

/// TapBranch hash of two children, sorted lexicographically
pub fn tap_branch_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let (first, second) = if left < right {
        (left, right)
    } else {
        (right, left)
    };

    let mut data = [0u8; 64];
    data[..32].copy_from_slice(first);
    data[32..].copy_from_slice(second);

    tagged_hash(tags::TAP_BRANCH, &data)
}

/// tweak = tagged_hash("TapTweak", internal_key || merkle_root)
///
/// With no merkle root (key-path only) the internal key is hashed alone.
pub fn tap_tweak_hash(internal_key: &XOnlyPubKey, merkle_root: Option<&TapMerkleRoot>) -> [u8; 32] {
    match merkle_root {
        Some(root) if !root.is_empty() => {
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(internal_key.as_bytes());
            data[32..].copy_from_slice(root.as_bytes());
            tagged_hash(tags::TAP_TWEAK, &data)
        }
        _ => tagged_hash(tags::TAP_TWEAK, internal_key.as_bytes()),
    }
}

/// Tweak as a scalar; a hash at or above n is rejected
pub fn tap_tweak_scalar(
    internal_key: &XOnlyPubKey,
    merkle_root: Option<&TapMerkleRoot>,
) -> TxResult<Scalar> {
    let hash = tap_tweak_hash(internal_key, merkle_root);
    Scalar::from_bytes(&hash)
        .map_err(|_| TaprootError::TweakFailed("tweak hash exceeds group order".to_string()).into())
}

/// Taproot key tweaker
#[derive(Debug, Clone, Copy, Default)]
pub struct TaprootTweaker;

impl TaprootTweaker {
    pub fn new() -> Self {
        Self
    }

    /// output_key = lift_x(internal_key) + tweak * G
    pub fn tweak_public_key(
        &self,
        internal_key: &XOnlyPubKey,
        merkle_root: Option<&TapMerkleRoot>,
    ) -> TxResult<TaprootOutputKey> {
        let internal = internal_key
            .to_point()
            .map_err(|e| TaprootError::InvalidInternalKey(e.to_string()))?;
        let tweak = tap_tweak_scalar(internal_key, merkle_root)?;

        let output = internal
            .to_jacobian()
            .add(&scalar_base_mult(tweak.as_biguint()).to_jacobian())
            .to_affine();
        if output.is_infinity() {
            return Err(TaprootError::TweakFailed("output key is infinity".to_string()).into());
        }

        Ok(TaprootOutputKey {
            output_key: XOnlyPubKey(output.x_bytes()),
            parity: output.has_odd_y(),
        })
    }

    /// tweaked = d + tweak (mod n), where d is negated first when its point has odd y
    pub fn tweak_private_key(
        &self,
        private_key: &PrivateKey,
        merkle_root: Option<&TapMerkleRoot>,
    ) -> TxResult<PrivateKey> {
        let public = private_key.public_key();
        let internal_key = XOnlyPubKey(public.x_only());
        let d = private_key.scalar().negate_if(public.has_odd_y());
        let tweak = tap_tweak_scalar(&internal_key, merkle_root)?;

        let tweaked = &d + &tweak;
        if tweaked.is_zero() {
            return Err(TaprootError::TweakFailed("tweaked key is zero".to_string()).into());
        }
        PrivateKey::from_scalar(&tweaked)
    }

    /// Output key for the public key of `private_key`
    pub fn create_output_key(
        &self,
        private_key: &PrivateKey,
        merkle_root: Option<&TapMerkleRoot>,
    ) -> TxResult<TaprootOutputKey> {
        let internal_key = XOnlyPubKey(private_key.public_key().x_only());
        self.tweak_public_key(&internal_key, merkle_root)
    }

    /// Merkle root of a balanced tree over `leaves`; an odd node is promoted
    pub fn build_merkle_root(&self, leaves: &[TapLeaf]) -> TapMerkleRoot {
        if leaves.is_empty() {
            return TapMerkleRoot::empty();
        }

        let mut hashes: Vec<[u8; 32]> = leaves.iter().map(|l| l.hash()).collect();
        while hashes.len() > 1 {
            hashes = hashes
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => tap_branch_hash(&pair[0], right),
                    None => pair[0],
                })
                .collect();
        }

        TapMerkleRoot::from_bytes(hashes[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr;

    fn key_one() -> PrivateKey {
        PrivateKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap()
    }

    #[test]
    fn test_tap_leaf_hash() {
        let leaf = TapLeaf::new(vec![0x51]);
        let leaf2 = TapLeaf::new(vec![0x00]);
        assert_ne!(leaf.hash(), leaf2.hash());
        assert_eq!(leaf.hash(), TapNode::Leaf(leaf.clone()).hash());
    }

    #[test]
    fn test_tap_branch_hash_is_order_independent() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        assert_eq!(tap_branch_hash(&left, &right), tap_branch_hash(&right, &left));
    }

    #[test]
    fn test_tap_tweak_hash_empty_root() {
        let internal_key = XOnlyPubKey([0xAB; 32]);
        let tweak1 = tap_tweak_hash(&internal_key, None);
        let tweak2 = tap_tweak_hash(&internal_key, Some(&TapMerkleRoot::empty()));
        assert_eq!(tweak1, tweak2);

        let tweak3 = tap_tweak_hash(&internal_key, Some(&TapMerkleRoot([0xCD; 32])));
        assert_ne!(tweak1, tweak3);
    }

    #[test]
    fn test_output_key_for_generator() {
        let output = TaprootTweaker::new().create_output_key(&key_one(), None).unwrap();
        assert_eq!(
            output.output_key.to_hex(),
            "da4710964f7852695de2da025290e24af6d8c281de5a0b902b7135fd9fd74d21"
        );
    }

    #[test]
    fn test_tweaked_private_key_matches_output_key() {
        let tweaker = TaprootTweaker::new();
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let root = TapMerkleRoot([7u8; 32]);

        let tweaked = tweaker.tweak_private_key(&key, Some(&root)).unwrap();
        let output = tweaker.create_output_key(&key, Some(&root)).unwrap();
        assert_eq!(tweaked.public_key().x_only(), output.output_key.0);
        assert_eq!(tweaked.public_key().has_odd_y(), output.parity);

        let msg = [0xFFu8; 32];
        let sig = schnorr::sign(&tweaked, &msg, &[0u8; 32]).unwrap();
        assert!(schnorr::verify(&output.output_key, &msg, &sig));
    }

    #[test]
    fn test_tweak_is_deterministic() {
        let tweaker = TaprootTweaker::new();
        let key = PrivateKey::random(&mut rand::rngs::OsRng);

        let a = tweaker.tweak_private_key(&key, None).unwrap();
        let b = tweaker.tweak_private_key(&key, None).unwrap();
        assert_eq!(a, b);

        let c = tweaker
            .tweak_private_key(&key, Some(&TapMerkleRoot([1u8; 32])))
            .unwrap();
        let d = tweaker
            .tweak_private_key(&key, Some(&TapMerkleRoot([2u8; 32])))
            .unwrap();
        assert_ne!(a, c);
        assert_ne!(c, d);
    }

    #[test]
    fn test_matches_bitcoin_crate_tweak() {
        use bitcoin::key::TapTweak;
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let key = PrivateKey::random(&mut rand::rngs::OsRng);
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&key.to_bytes()[..]).unwrap();
        let keypair = bitcoin::secp256k1::Keypair::from_secret_key(&secp, &sk);
        let (internal, _) = keypair.x_only_public_key();
        let (expected, _) = internal.tap_tweak(&secp, None);

        let ours = TaprootTweaker::new().create_output_key(&key, None).unwrap();
        assert_eq!(ours.output_key.0, expected.to_inner().serialize());
    }

    #[test]
    fn test_build_merkle_root() {
        let tweaker = TaprootTweaker::new();
        let leaf1 = TapLeaf::new(vec![0x51]);
        let leaf2 = TapLeaf::new(vec![0x00]);
        let leaf3 = TapLeaf::new(vec![0x52]);

        assert!(tweaker.build_merkle_root(&[]).is_empty());
        assert_eq!(tweaker.build_merkle_root(&[leaf1.clone()]).0, leaf1.hash());
        assert_eq!(
            tweaker.build_merkle_root(&[leaf1.clone(), leaf2.clone()]).0,
            tap_branch_hash(&leaf1.hash(), &leaf2.hash())
        );
        let tree = TapNode::branch(
            TapNode::branch(TapNode::Leaf(leaf1.clone()), TapNode::Leaf(leaf2.clone())),
            TapNode::Leaf(leaf3.clone()),
        );
        assert_eq!(tweaker.build_merkle_root(&[leaf1, leaf2, leaf3]).0, tree.hash());
    }
}
