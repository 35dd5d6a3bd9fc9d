//! Two-party BIP-340 Schnorr
//!
//! Shares are additive: the joint key is `P = X1 + X2`. Signatures aggregate
//! linearly, so phases 2 and 3 only exchange plain nonce points and phases
//! 4 and 5 add the partial `s` values.
//!
//! BIP-340 requires an even-y key and nonce. Each party negates its own
//! share (or nonce) whenever the combined point has odd y, which keeps the
//! sum consistent without either side learning the other's value. When a
//! taproot tweak is requested, the party whose compressed public share sorts
//! first adds the tweak scalar to its share.

use super::{PartyState, Phase};
use crate::crypto::curve::scalar_base_mult;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::scalar::{Scalar, SecretScalar};
use crate::crypto::schnorr::{self, challenge, SchnorrSig, XOnlyPubKey};
use crate::crypto::taproot::{tap_tweak_scalar, TapMerkleRoot};
use crate::error::{TxError, TxResult};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

const MODULE: &str = "mpc::schnorr";

// MARK: - Messages

/// Phase 2 output sent to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrNonceCommitment {
    pub nonce_point: PublicKey,
}

/// Phase 4 output sent to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrPartialSignature {
    #[serde(with = "crate::serde_bytes::hex32")]
    pub s: [u8; 32],
}

// MARK: - States

pub struct Init;

pub struct KeyAgreed {
    joint: XOnlyPubKey,
    /// Share after parity normalization and tweak; sums to the joint secret
    effective: SecretScalar,
}

pub struct NonceCommitted {
    joint: XOnlyPubKey,
    effective: SecretScalar,
    message: [u8; 32],
    nonce: SecretScalar,
    nonce_point: PublicKey,
}

pub struct NonceCombined {
    joint: XOnlyPubKey,
    effective: SecretScalar,
    message: [u8; 32],
    nonce: SecretScalar,
    r_x: [u8; 32],
}

pub struct PartiallySigned {
    joint: XOnlyPubKey,
    message: [u8; 32],
    r_x: [u8; 32],
    own_s: Scalar,
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

/// One side of a two-party Schnorr session
pub struct SchnorrParty<S: PartyState> {
    share: SecretScalar,
    public: PublicKey,
    state: S,
}

impl<S: PartyState> SchnorrParty<S> {
    pub fn phase(&self) -> Phase {
        S::PHASE
    }

    pub fn public_share(&self) -> &PublicKey {
        &self.public
    }

    fn advance<T: PartyState>(self, state: T) -> SchnorrParty<T> {
        SchnorrParty {
            share: self.share,
            public: self.public,
            state,
        }
    }
}

impl SchnorrParty<Init> {
    pub fn new(share: &PrivateKey) -> Self {
        Self {
            share: share.secret().clone(),
            public: share.public_key(),
            state: Init,
        }
    }

    /// Phase 1: joint x-only key `P = X_self + X_peer`, tweaked when
    /// `merkle_root` is given (an empty root is the key-path-only tweak)
    pub fn phase1(
        self,
        peer_public: &PublicKey,
        merkle_root: Option<&TapMerkleRoot>,
    ) -> TxResult<(SchnorrParty<KeyAgreed>, XOnlyPubKey)> {
        let own = self.public.serialize_compressed();
        let peer = peer_public.serialize_compressed();
        if own == peer {
            return Err(TxError::validation("Both parties hold the same public share"));
        }

        let sum = self
            .public
            .point()
            .to_jacobian()
            .add(&peer_public.point().to_jacobian())
            .to_affine();
        let joint = PublicKey::from_point(sum)
            .map_err(|_| TxError::validation("Public shares cancel out"))?;

        let mut effective = self.share.expose().negate_if(joint.has_odd_y());
        let mut output = joint.negate_if_odd();

        if let Some(root) = merkle_root {
            let internal = XOnlyPubKey(output.x_only());
            let tweak = tap_tweak_scalar(&internal, Some(root))?;
            let tweaked = output
                .point()
                .to_jacobian()
                .add(&scalar_base_mult(tweak.as_biguint()).to_jacobian())
                .to_affine();
            let tweaked = PublicKey::from_point(tweaked)?;

            if own < peer {
                effective = &effective + &tweak;
            }
            effective = effective.negate_if(tweaked.has_odd_y());
            output = tweaked.negate_if_odd();
        }

        if effective.is_zero() {
            return Err(TxError::crypto_consistency("Effective share is zero"));
        }

        let joint_x = XOnlyPubKey(output.x_only());
        crate::log_debug!(
            MODULE,
            "Joint key agreed",
            phase = Phase::P1,
            joint = joint_x.to_hex(),
            tweaked = merkle_root.is_some()
        );
        let party = self.advance(KeyAgreed {
            joint: joint_x.clone(),
            effective: SecretScalar::new(&effective),
        });
        Ok((party, joint_x))
    }
}

impl SchnorrParty<KeyAgreed> {
    pub fn joint_public_key(&self) -> &XOnlyPubKey {
        &self.state.joint
    }

    /// Phase 2: fresh nonce `k_i` and its point `R_i`
    pub fn phase2<R: RngCore + CryptoRng>(
        self,
        message: &[u8; 32],
        rng: &mut R,
    ) -> TxResult<(SchnorrParty<NonceCommitted>, SchnorrNonceCommitment)> {
        let nonce = SecretScalar::random(rng);
        let nonce_point = PublicKey::from_point(scalar_base_mult(nonce.expose().as_biguint()))?;
        crate::log_debug!(MODULE, "Nonce committed", phase = Phase::P2);

        let KeyAgreed { joint, effective } = self.state;
        let party = SchnorrParty {
            share: self.share,
            public: self.public,
            state: NonceCommitted {
                joint,
                effective,
                message: *message,
                nonce,
                nonce_point: nonce_point.clone(),
            },
        };
        Ok((party, SchnorrNonceCommitment { nonce_point }))
    }
}

impl SchnorrParty<NonceCommitted> {
    /// Phase 3: joint nonce `R = R_self + R_peer` with even y
    pub fn phase3(
        self,
        peer: &SchnorrNonceCommitment,
    ) -> TxResult<(SchnorrParty<NonceCombined>, XOnlyPubKey)> {
        if peer.nonce_point == self.state.nonce_point {
            return Err(TxError::crypto_consistency("Peer echoed our nonce point"));
        }
        let sum = self
            .state
            .nonce_point
            .point()
            .to_jacobian()
            .add(&peer.nonce_point.point().to_jacobian())
            .to_affine();
        let joint_nonce = PublicKey::from_point(sum)
            .map_err(|_| TxError::crypto_consistency("Nonce points cancel out"))?;

        let nonce = SecretScalar::new(&self.state.nonce.expose().negate_if(joint_nonce.has_odd_y()));
        let r_x = joint_nonce.x_only();
        crate::log_debug!(MODULE, "Nonce combined", phase = Phase::P3);

        let NonceCommitted {
            joint,
            effective,
            message,
            ..
        } = self.state;
        let party = SchnorrParty {
            share: self.share,
            public: self.public,
            state: NonceCombined {
                joint,
                effective,
                message,
                nonce,
                r_x,
            },
        };
        Ok((party, XOnlyPubKey(r_x)))
    }
}

impl SchnorrParty<NonceCombined> {
    /// Phase 4: `s_i = k_i + e·x_i`
    pub fn phase4(self) -> TxResult<(SchnorrParty<PartiallySigned>, SchnorrPartialSignature)> {
        let state = &self.state;
        let e = challenge(&state.r_x, state.joint.as_bytes(), &state.message);
        let own_s = &state.nonce.expose() + &(&e * &state.effective.expose());
        let partial = SchnorrPartialSignature { s: own_s.to_bytes() };
        crate::log_debug!(MODULE, "Partial signature computed", phase = Phase::P4);

        let NonceCombined {
            joint,
            message,
            r_x,
            ..
        } = self.state;
        let party = SchnorrParty {
            share: self.share,
            public: self.public,
            state: PartiallySigned {
                joint,
                message,
                r_x,
                own_s,
            },
        };
        Ok((party, partial))
    }
}

impl SchnorrParty<PartiallySigned> {
    /// Phase 5: `s = s_self + s_peer`, verified under the joint key
    pub fn phase5(
        self,
        peer: &SchnorrPartialSignature,
    ) -> TxResult<(SchnorrParty<Done>, SchnorrSig)> {
        let state = &self.state;
        let peer_s = Scalar::from_bytes(&peer.s)?;
        let s = &state.own_s + &peer_s;
        let signature = SchnorrSig::from_parts(&state.r_x, &s);

        if !schnorr::verify(&state.joint, &state.message, &signature) {
            return Err(TxError::crypto_consistency(
                "Combined Schnorr signature does not verify under the joint key",
            ));
        }
        crate::log_debug!(MODULE, "Signature combined", phase = Phase::P5);
        Ok((self.advance(Done), signature))
    }
}
