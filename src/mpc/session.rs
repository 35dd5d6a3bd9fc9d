//! Local two-party sessions
//!
//! [`ThresholdKey`] holds both shares in one process and drives both parties
//! through every phase, comparing what each side computed. Any disagreement
//! on the joint key, the nonce point or the final signature discards the
//! session with a `CryptoConsistency` error; nothing from a failed session
//! is reused.

use super::ecdsa::EcdsaParty;
use super::schnorr::SchnorrParty;
use crate::crypto::ecdsa::EcdsaSignature;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::schnorr::{SchnorrSig, XOnlyPubKey};
use crate::crypto::taproot::TapMerkleRoot;
use crate::error::{TxError, TxResult};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::fmt;

const MODULE: &str = "mpc::session";

fn ensure_agreement<T: PartialEq>(a: &T, b: &T, what: &str) -> TxResult<()> {
    if a != b {
        crate::log_error!(MODULE, "Parties disagree", value = what);
        return Err(TxError::crypto_consistency(format!(
            "Parties derived different {}",
            what
        )));
    }
    Ok(())
}

/// Pair of key shares held by one process
#[derive(Clone)]
pub struct ThresholdKey {
    share1: PrivateKey,
    share2: PrivateKey,
    paillier_bits: u64,
}

impl ThresholdKey {
    pub fn new(share1: PrivateKey, share2: PrivateKey, paillier_bits: u64) -> TxResult<Self> {
        if share1.public_key() == share2.public_key() {
            return Err(TxError::validation("Threshold shares must differ"));
        }
        Ok(Self {
            share1,
            share2,
            paillier_bits,
        })
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R, paillier_bits: u64) -> TxResult<Self> {
        Self::new(PrivateKey::random(rng), PrivateKey::random(rng), paillier_bits)
    }

    pub fn public_shares(&self) -> (PublicKey, PublicKey) {
        (self.share1.public_key(), self.share2.public_key())
    }

    /// Joint ECDSA key `x1·x2·G`
    pub fn ecdsa_public_key(&self) -> TxResult<PublicKey> {
        let (pub1, pub2) = self.public_shares();
        let (_, q1) = EcdsaParty::new(&self.share1, self.paillier_bits).phase1(&pub2)?;
        let (_, q2) = EcdsaParty::new(&self.share2, self.paillier_bits).phase1(&pub1)?;
        ensure_agreement(&q1, &q2, "joint ECDSA keys")?;
        Ok(q1)
    }

    /// Joint x-only Schnorr key, tweaked when `merkle_root` is given
    pub fn schnorr_public_key(&self, merkle_root: Option<&TapMerkleRoot>) -> TxResult<XOnlyPubKey> {
        let (pub1, pub2) = self.public_shares();
        let (_, p1) = SchnorrParty::new(&self.share1).phase1(&pub2, merkle_root)?;
        let (_, p2) = SchnorrParty::new(&self.share2).phase1(&pub1, merkle_root)?;
        ensure_agreement(&p1, &p2, "joint Schnorr keys")?;
        Ok(p1)
    }

    /// Untweaked joint Schnorr key `X1 + X2`, with its actual parity
    pub fn schnorr_internal_key(&self) -> TxResult<PublicKey> {
        let (pub1, pub2) = self.public_shares();
        let sum = pub1
            .point()
            .to_jacobian()
            .add(&pub2.point().to_jacobian())
            .to_affine();
        PublicKey::from_point(sum)
    }

    pub fn sign_ecdsa(&self, message: &[u8; 32]) -> TxResult<EcdsaSignature> {
        self.sign_ecdsa_with_rng(message, &mut OsRng)
    }

    pub fn sign_ecdsa_with_rng<R: RngCore + CryptoRng>(
        &self,
        message: &[u8; 32],
        rng: &mut R,
    ) -> TxResult<EcdsaSignature> {
        let (pub1, pub2) = self.public_shares();
        let party1 = EcdsaParty::new(&self.share1, self.paillier_bits);
        let party2 = EcdsaParty::new(&self.share2, self.paillier_bits);

        let (party1, q1) = party1.phase1(&pub2)?;
        let (party2, q2) = party2.phase1(&pub1)?;
        ensure_agreement(&q1, &q2, "joint ECDSA keys")?;

        let (party1, commit1) = party1.phase2(message, rng)?;
        let (party2, commit2) = party2.phase2(message, rng)?;

        let (party1, r1) = party1.phase3(&commit2)?;
        let (party2, r2) = party2.phase3(&commit1)?;
        ensure_agreement(&r1, &r2, "joint nonce points")?;

        let (party1, partial1) = party1.phase4(rng)?;
        let (party2, partial2) = party2.phase4(rng)?;

        let (_, sig1) = party1.phase5(&partial2)?;
        let (_, sig2) = party2.phase5(&partial1)?;
        ensure_agreement(&sig1, &sig2, "final ECDSA signatures")?;

        crate::log_info!(MODULE, "Two-party ECDSA signature produced", joint_key = q1);
        Ok(sig1)
    }

    pub fn sign_schnorr(
        &self,
        message: &[u8; 32],
        merkle_root: Option<&TapMerkleRoot>,
    ) -> TxResult<SchnorrSig> {
        self.sign_schnorr_with_rng(message, merkle_root, &mut OsRng)
    }

    pub fn sign_schnorr_with_rng<R: RngCore + CryptoRng>(
        &self,
        message: &[u8; 32],
        merkle_root: Option<&TapMerkleRoot>,
        rng: &mut R,
    ) -> TxResult<SchnorrSig> {
        let (pub1, pub2) = self.public_shares();
        let party1 = SchnorrParty::new(&self.share1);
        let party2 = SchnorrParty::new(&self.share2);

        let (party1, p1) = party1.phase1(&pub2, merkle_root)?;
        let (party2, p2) = party2.phase1(&pub1, merkle_root)?;
        ensure_agreement(&p1, &p2, "joint Schnorr keys")?;

        let (party1, commit1) = party1.phase2(message, rng)?;
        let (party2, commit2) = party2.phase2(message, rng)?;

        let (party1, r1) = party1.phase3(&commit2)?;
        let (party2, r2) = party2.phase3(&commit1)?;
        ensure_agreement(&r1, &r2, "joint nonce points")?;

        let (party1, partial1) = party1.phase4()?;
        let (party2, partial2) = party2.phase4()?;

        let (_, sig1) = party1.phase5(&partial2)?;
        let (_, sig2) = party2.phase5(&partial1)?;
        ensure_agreement(&sig1, &sig2, "final Schnorr signatures")?;

        crate::log_info!(MODULE, "Two-party Schnorr signature produced", joint_key = p1.to_hex());
        Ok(sig1)
    }
}

impl fmt::Debug for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pub1, pub2) = self.public_shares();
        write!(f, "ThresholdKey({}, {})", pub1, pub2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PAILLIER_BITS;
    use crate::crypto::{ecdsa, schnorr};

    fn key() -> ThresholdKey {
        ThresholdKey::random(&mut OsRng, MIN_PAILLIER_BITS).unwrap()
    }

    #[test]
    fn test_ecdsa_session() {
        let key = key();
        let msg = [0x11u8; 32];
        let sig = key.sign_ecdsa(&msg).unwrap();
        assert!(ecdsa::verify(&key.ecdsa_public_key().unwrap(), &msg, &sig));
    }

    #[test]
    fn test_schnorr_session_with_and_without_tweak() {
        let key = key();
        let msg = [0x22u8; 32];

        let plain = key.sign_schnorr(&msg, None).unwrap();
        let internal = key.schnorr_public_key(None).unwrap();
        assert!(schnorr::verify(&internal, &msg, &plain));
        assert_eq!(internal.0, key.schnorr_internal_key().unwrap().x_only());

        let root = TapMerkleRoot::empty();
        let tweaked = key.sign_schnorr(&msg, Some(&root)).unwrap();
        let output = key.schnorr_public_key(Some(&root)).unwrap();
        assert_ne!(output, internal);
        assert!(schnorr::verify(&output, &msg, &tweaked));
    }

    #[test]
    fn test_ecdsa_and_schnorr_keys_differ() {
        let key = key();
        let ecdsa_key = key.ecdsa_public_key().unwrap();
        let schnorr_key = key.schnorr_internal_key().unwrap();
        assert_ne!(ecdsa_key, schnorr_key);
    }

    #[test]
    fn test_rejects_identical_shares() {
        let share = PrivateKey::random(&mut OsRng);
        assert!(ThresholdKey::new(share.clone(), share, MIN_PAILLIER_BITS)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_debug_hides_shares() {
        let key = key();
        let rendered = format!("{:?}", key);
        assert!(rendered.starts_with("ThresholdKey(0"));
        assert!(!rendered.contains(&hex::encode(&key.share1.to_bytes()[..])));
    }
}
