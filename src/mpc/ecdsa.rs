//! Two-party ECDSA
//!
//! The joint key is `Q = x1·x2·G`. In phase 2 each party publishes a fresh
//! Paillier key, an encryption of its share under that key and a nonce point
//! `R_i = k_i·G`. In phase 4 party i encrypts, under the peer's Paillier key,
//!
//! ```text
//! k_i⁻¹·m + ρ·n  +  (k_i⁻¹·r·x_i)·x_peer
//! ```
//!
//! using the peer's encrypted share homomorphically. The peer decrypts,
//! multiplies by its own `k⁻¹` and obtains `s = (k1·k2)⁻¹·(m + r·x1·x2)`.

use super::{Phase, PartyState};
use crate::crypto::curve::scalar_mult;
use crate::crypto::ecdsa::{self, EcdsaSignature};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::paillier::{Ciphertext, PaillierPublicKey, PaillierSecretKey};
use crate::crypto::scalar::{Scalar, SecretScalar};
use crate::crypto::CURVE;
use crate::error::{TxError, TxResult};
use num_bigint::RandBigInt;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

const MODULE: &str = "mpc::ecdsa";

// MARK: - Messages

/// Phase 2 output sent to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaNonceCommitment {
    pub paillier_key: PaillierPublicKey,
    pub encrypted_share: Ciphertext,
    pub nonce_point: PublicKey,
}

/// Phase 4 output sent to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaPartialSignature {
    pub ciphertext: Ciphertext,
}

// MARK: - States

pub struct Init;

pub struct KeyAgreed {
    joint: PublicKey,
}

pub struct NonceCommitted {
    joint: PublicKey,
    message: [u8; 32],
    nonce: SecretScalar,
    paillier: PaillierSecretKey,
}

pub struct NonceCombined {
    joint: PublicKey,
    message: [u8; 32],
    nonce: SecretScalar,
    paillier: PaillierSecretKey,
    r: Scalar,
    peer_paillier: PaillierPublicKey,
    peer_encrypted_share: Ciphertext,
}

pub struct PartiallySigned {
    joint: PublicKey,
    message: [u8; 32],
    nonce: SecretScalar,
    paillier: PaillierSecretKey,
    r: Scalar,
}

/// Signature combined and verified; nonce and Paillier secrets are dropped
pub struct Done;

impl PartyState for Init {
    const PHASE: Phase = Phase::Init;
}
impl PartyState for KeyAgreed {
    const PHASE: Phase = Phase::P1;
}
impl PartyState for NonceCommitted {
    const PHASE: Phase = Phase::P2;
}
impl PartyState for NonceCombined {
    const PHASE: Phase = Phase::P3;
}
impl PartyState for PartiallySigned {
    const PHASE: Phase = Phase::P4;
}
impl PartyState for Done {
    const PHASE: Phase = Phase::Done;
}

// MARK: - Party

/// One side of a two-party ECDSA session
pub struct EcdsaParty<S: PartyState> {
    share: SecretScalar,
    public: PublicKey,
    paillier_bits: u64,
    state: S,
}

impl<S: PartyState> EcdsaParty<S> {
    pub fn phase(&self) -> Phase {
        S::PHASE
    }

    /// This party's public share `x_i·G`
    pub fn public_share(&self) -> &PublicKey {
        &self.public
    }

    fn advance<T: PartyState>(self, state: T) -> EcdsaParty<T> {
        EcdsaParty {
            share: self.share,
            public: self.public,
            paillier_bits: self.paillier_bits,
            state,
        }
    }
}

impl EcdsaParty<Init> {
    pub fn new(share: &PrivateKey, paillier_bits: u64) -> Self {
        Self {
            share: share.secret().clone(),
            public: share.public_key(),
            paillier_bits,
            state: Init,
        }
    }

    /// Phase 1: joint key `Q = x_self · X_peer`
    pub fn phase1(self, peer_public: &PublicKey) -> TxResult<(EcdsaParty<KeyAgreed>, PublicKey)> {
        let point = scalar_mult(peer_public.point(), self.share.expose().as_biguint());
        let joint = PublicKey::from_point(point)?;
        crate::log_debug!(MODULE, "Joint key agreed", phase = Phase::P1, joint = joint);
        Ok((self.advance(KeyAgreed { joint: joint.clone() }), joint))
    }
}

impl EcdsaParty<KeyAgreed> {
    pub fn joint_public_key(&self) -> &PublicKey {
        &self.state.joint
    }

    /// Phase 2: fresh nonce and Paillier key, encrypted share for the peer
    pub fn phase2<R: RngCore + CryptoRng>(
        self,
        message: &[u8; 32],
        rng: &mut R,
    ) -> TxResult<(EcdsaParty<NonceCommitted>, EcdsaNonceCommitment)> {
        let paillier = PaillierSecretKey::generate(self.paillier_bits, rng)?;
        let encrypted_share = paillier
            .public_key()
            .encrypt(self.share.expose().as_biguint(), rng)?;

        let nonce = SecretScalar::random(rng);
        let nonce_point = PublicKey::from_point(crate::crypto::curve::scalar_base_mult(
            nonce.expose().as_biguint(),
        ))?;

        let commitment = EcdsaNonceCommitment {
            paillier_key: paillier.public_key().clone(),
            encrypted_share,
            nonce_point,
        };
        crate::log_debug!(MODULE, "Nonce committed", phase = Phase::P2);

        let joint = self.state.joint.clone();
        let party = self.advance(NonceCommitted {
            joint,
            message: *message,
            nonce,
            paillier,
        });
        Ok((party, commitment))
    }
}

impl EcdsaParty<NonceCommitted> {
    /// Phase 3: joint nonce point `R = k_self · R_peer`
    pub fn phase3(
        self,
        peer: &EcdsaNonceCommitment,
    ) -> TxResult<(EcdsaParty<NonceCombined>, PublicKey)> {
        let peer_paillier = PaillierPublicKey::from_modulus(peer.paillier_key.modulus().clone())?;
        let point = scalar_mult(peer.nonce_point.point(), self.state.nonce.expose().as_biguint());
        let joint_nonce = PublicKey::from_point(point)?;

        let r = Scalar::from_biguint(&joint_nonce.point().x);
        if r.is_zero() {
            return Err(TxError::crypto_consistency("Joint nonce has r = 0"));
        }
        crate::log_debug!(MODULE, "Nonce combined", phase = Phase::P3, r_point = joint_nonce);

        let NonceCommitted {
            joint,
            message,
            nonce,
            paillier,
        } = self.state;
        let party = EcdsaParty {
            share: self.share,
            public: self.public,
            paillier_bits: self.paillier_bits,
            state: NonceCombined {
                joint,
                message,
                nonce,
                paillier,
                r,
                peer_paillier,
                peer_encrypted_share: peer.encrypted_share.clone(),
            },
        };
        Ok((party, joint_nonce))
    }
}

impl EcdsaParty<NonceCombined> {
    /// Phase 4: `Enc_peer(k⁻¹·m + ρ·n) ⊕ Enc_peer(x_peer)^(k⁻¹·r·x_self)`
    pub fn phase4<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> TxResult<(EcdsaParty<PartiallySigned>, EcdsaPartialSignature)> {
        let state = &self.state;
        let k_inv = state.nonce.expose().invert()?;
        let m = Scalar::from_bytes_reduced(&state.message);

        let rho = rng.gen_biguint_below(&CURVE.n);
        let masked = (&k_inv * &m).as_biguint() + rho * &CURVE.n;
        let c_masked = state.peer_paillier.encrypt(&masked, rng)?;

        let factor = &(&k_inv * &state.r) * &self.share.expose();
        let c_key = state
            .peer_paillier
            .mul_scalar(&state.peer_encrypted_share, factor.as_biguint())?;
        let ciphertext = state.peer_paillier.add(&c_masked, &c_key)?;
        crate::log_debug!(MODULE, "Partial signature computed", phase = Phase::P4);

        let NonceCombined {
            joint,
            message,
            nonce,
            paillier,
            r,
            ..
        } = self.state;
        let party = EcdsaParty {
            share: self.share,
            public: self.public,
            paillier_bits: self.paillier_bits,
            state: PartiallySigned {
                joint,
                message,
                nonce,
                paillier,
                r,
            },
        };
        Ok((party, EcdsaPartialSignature { ciphertext }))
    }
}

impl EcdsaParty<PartiallySigned> {
    /// Phase 5: decrypt the peer's partial signature, finish with `k_self⁻¹`
    /// and verify under the joint key
    pub fn phase5(
        self,
        peer: &EcdsaPartialSignature,
    ) -> TxResult<(EcdsaParty<Done>, EcdsaSignature)> {
        let state = &self.state;
        let decrypted = state.paillier.decrypt(&peer.ciphertext)?;
        let s = &Scalar::from_biguint(&decrypted) * &state.nonce.expose().invert()?;

        let signature = EcdsaSignature::new(state.r.clone(), s)
            .map_err(|_| TxError::crypto_consistency("Combined signature has s = 0"))?
            .normalize_s();

        if !ecdsa::verify(&state.joint, &state.message, &signature) {
            return Err(TxError::crypto_consistency(
                "Combined ECDSA signature does not verify under the joint key",
            ));
        }
        crate::log_debug!(MODULE, "Signature combined", phase = Phase::P5);
        Ok((self.advance(Done), signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PAILLIER_BITS;
    use rand::rngs::OsRng;

    fn share(hex_str: &str) -> PrivateKey {
        PrivateKey::from_hex(hex_str).unwrap()
    }

    #[test]
    fn test_full_protocol() {
        let x1 = share("15bafcb56279dbfd985d4d17cdaf9bbfc6701b628f9fb00d6d1e0d2cb503ede3");
        let x2 = share("76818c328b8aa1e8f17bd599016fef8134b7d5ec315e0b6373953da7e8b5c0c9");
        let msg = crate::crypto::sha256d(&[1, 2, 3, 4]);

        let p1 = EcdsaParty::new(&x1, MIN_PAILLIER_BITS);
        let p2 = EcdsaParty::new(&x2, MIN_PAILLIER_BITS);
        assert_eq!(p1.phase(), Phase::Init);

        let (p1, q1) = p1.phase1(&x2.public_key()).unwrap();
        let (p2, q2) = p2.phase1(&x1.public_key()).unwrap();
        assert_eq!(q1, q2);
        assert_eq!(p1.phase(), Phase::P1);

        let (p1, c1) = p1.phase2(&msg, &mut OsRng).unwrap();
        let (p2, c2) = p2.phase2(&msg, &mut OsRng).unwrap();

        let (p1, r1) = p1.phase3(&c2).unwrap();
        let (p2, r2) = p2.phase3(&c1).unwrap();
        assert_eq!(r1, r2);

        let (p1, s1) = p1.phase4(&mut OsRng).unwrap();
        let (p2, s2) = p2.phase4(&mut OsRng).unwrap();
        assert_eq!(p2.phase(), Phase::P4);

        let (p1, sig1) = p1.phase5(&s2).unwrap();
        let (_, sig2) = p2.phase5(&s1).unwrap();
        assert_eq!(p1.phase(), Phase::Done);
        assert_eq!(sig1, sig2);
        assert!(sig1.is_low_s());
        assert!(ecdsa::verify(&q1, &msg, &sig1));

        // Joint key is x1·x2·G
        let product = &x1.scalar() * &x2.scalar();
        assert_eq!(PrivateKey::from_scalar(&product).unwrap().public_key(), q1);
    }

    #[test]
    fn test_tampered_partial_signature_is_rejected() {
        let x1 = PrivateKey::random(&mut OsRng);
        let x2 = PrivateKey::random(&mut OsRng);
        let msg = [7u8; 32];

        let (p1, _) = EcdsaParty::new(&x1, MIN_PAILLIER_BITS)
            .phase1(&x2.public_key())
            .unwrap();
        let (p2, _) = EcdsaParty::new(&x2, MIN_PAILLIER_BITS)
            .phase1(&x1.public_key())
            .unwrap();
        let (p1, c1) = p1.phase2(&msg, &mut OsRng).unwrap();
        let (p2, c2) = p2.phase2(&msg, &mut OsRng).unwrap();
        // p1's partial signature is encrypted under p2's Paillier key
        let (p1, _) = p1.phase3(&c2).unwrap();
        let (p2, _) = p2.phase3(&c1).unwrap();
        let (_p1, s1) = p1.phase4(&mut OsRng).unwrap();

        let tampered = EcdsaPartialSignature {
            ciphertext: c2
                .paillier_key
                .mul_scalar(&s1.ciphertext, &num_bigint::BigUint::from(2u32))
                .unwrap(),
        };
        let (p2, _) = p2.phase4(&mut OsRng).unwrap();
        let err = p2.phase5(&tampered).err().unwrap();
        assert!(err.is_crypto_consistency());
    }

    #[test]
    fn test_rejects_undersized_peer_paillier_key() {
        let x1 = PrivateKey::random(&mut OsRng);
        let x2 = PrivateKey::random(&mut OsRng);
        let (p1, _) = EcdsaParty::new(&x1, MIN_PAILLIER_BITS)
            .phase1(&x2.public_key())
            .unwrap();
        let (p1, _) = p1.phase2(&[1u8; 32], &mut OsRng).unwrap();

        let json = serde_json::json!({
            "paillier_key": { "n": "c5" },
            "encrypted_share": "02",
            "nonce_point": x2.public_key().to_hex(),
        });
        let bogus: EcdsaNonceCommitment = serde_json::from_value(json).unwrap();
        assert!(p1.phase3(&bogus).err().unwrap().is_validation());
    }
}
