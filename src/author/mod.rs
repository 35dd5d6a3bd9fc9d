//! Signing capabilities and input-script authoring
//!
//! A [`SecretsSource`] answers "which key controls this address" and signs
//! digests for it. Three variants exist:
//! - [`InMemoryStore`]: local private keys
//! - [`ExternalRemoteStore`]: an HTTP signing service that never reveals keys
//! - [`ThresholdStore`]: a two-party key whose shares sign jointly
//!
//! [`InputScriptAuthor`] turns an unsigned transaction into a signed one using
//! whichever variant the caller picked for the session.

mod memory;
mod remote;
mod script;
mod threshold;

pub use memory::InMemoryStore;
pub use remote::{ExternalRemoteStore, HttpRemoteSigner, RemoteSigner, SignRequest};
pub use script::InputScriptAuthor;
pub use threshold::ThresholdStore;

use crate::crypto::ecdsa::EcdsaSignature;
use crate::crypto::keys::PublicKey;
use crate::crypto::scalar::SecretScalar;
use crate::crypto::schnorr::SchnorrSig;
use crate::error::TxResult;
use crate::types::Network;
use bitcoin::ScriptBuf;

/// Key custody seen by the input author
///
/// Addresses are encoded strings for [`SecretsSource::chain_params`].
/// Lookups of unknown addresses or keys fail with `NotFound`.
pub trait SecretsSource {
    /// Raw private key, when the source is able to export it.
    /// `Ok(None)` means the address is known but its key never leaves custody.
    fn get_key(&self, address: &str) -> TxResult<Option<SecretScalar>>;

    /// Compressed public key controlling `address`. For taproot addresses
    /// this is the internal (untweaked) key.
    fn get_pubkey(&self, address: &str) -> TxResult<PublicKey>;

    /// Output script `address` pays to
    fn get_script(&self, address: &str) -> TxResult<ScriptBuf>;

    /// ECDSA signature over `sighash` by the key behind `pubkey`
    fn sign(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<EcdsaSignature>;

    /// BIP340 signature over `sighash` by the key-path tweak of `pubkey`
    fn sign_taproot(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<SchnorrSig>;

    fn chain_params(&self) -> Network;
}
