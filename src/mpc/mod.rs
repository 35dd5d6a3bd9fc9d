//! Two-party threshold signing
//!
//! Each party holds one private share and never reveals it. A signing
//! session runs five phases in a fixed order; every phase function consumes
//! the party in its current state and returns it in the next state together
//! with the message for the peer, so calling phases out of order does not
//! compile.
//!
//! - [`ecdsa`]: multiplicative shares (`Q = x1·x2·G`) with Paillier
//!   encryption of the peer's share
//! - [`schnorr`]: additive shares (`P = X1 + X2`) producing BIP-340
//!   signatures, optionally under a BIP-341 tweak
//! - [`session`]: drives both parties locally and checks every
//!   cross-party invariant

pub mod ecdsa;
pub mod schnorr;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use ecdsa::{EcdsaNonceCommitment, EcdsaPartialSignature, EcdsaParty};
pub use schnorr::{SchnorrNonceCommitment, SchnorrPartialSignature, SchnorrParty};
pub use session::ThresholdKey;

/// Phase tag of a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Init,
    P1,
    P2,
    P3,
    P4,
    P5,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::P1 => "phase1",
            Phase::P2 => "phase2",
            Phase::P3 => "phase3",
            Phase::P4 => "phase4",
            Phase::P5 => "phase5",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// State marker carried by a party
pub trait PartyState {
    const PHASE: Phase;
}
