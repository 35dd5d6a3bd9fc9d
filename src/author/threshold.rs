//! Two-party threshold custody
//!
//! The ECDSA joint key controls the legacy, nested and segwit addresses; the
//! Schnorr joint key, tweaked for key-path spending, controls the taproot
//! address. Neither joint private key ever exists in one place.

use super::SecretsSource;
use crate::address::{self, DerivedAddresses};
use crate::crypto::ecdsa::EcdsaSignature;
use crate::crypto::keys::PublicKey;
use crate::crypto::scalar::SecretScalar;
use crate::crypto::schnorr::SchnorrSig;
use crate::crypto::taproot::TapMerkleRoot;
use crate::error::{TxError, TxResult};
use crate::mpc::ThresholdKey;
use crate::types::{AddressType, Network};
use bitcoin::ScriptBuf;
use std::collections::HashMap;

const MODULE: &str = "author::threshold";

/// Secrets source whose signatures come from a two-party session
#[derive(Debug)]
pub struct ThresholdStore {
    network: Network,
    key: ThresholdKey,
    ecdsa_key: PublicKey,
    schnorr_key: PublicKey,
    derived: DerivedAddresses,
    addresses: HashMap<String, AddressType>,
}

impl ThresholdStore {
    pub fn new(key: ThresholdKey, network: Network) -> TxResult<Self> {
        let ecdsa_key = key.ecdsa_public_key()?;
        let schnorr_key = key.schnorr_internal_key()?;

        let mut derived = DerivedAddresses::new();
        for address_type in [AddressType::Legacy, AddressType::Nested, AddressType::Segwit] {
            derived.insert(address_type, address::derive_one(&ecdsa_key, address_type, network)?);
        }
        let taproot = address::derive_one(&schnorr_key, AddressType::Taproot, network)?;

        let joint_output = key.schnorr_public_key(Some(&TapMerkleRoot::empty()))?;
        if address::taproot_address(&joint_output, network)? != taproot {
            return Err(TxError::crypto_consistency(
                "Joint taproot output key does not match the tweaked internal key",
            ));
        }
        derived.insert(AddressType::Taproot, taproot);

        let addresses = derived
            .iter()
            .map(|(address_type, address)| (address.encoded.clone(), *address_type))
            .collect();

        crate::log_info!(
            MODULE,
            "Threshold store ready",
            ecdsa_key = ecdsa_key,
            schnorr_key = schnorr_key,
            network = network
        );
        Ok(Self {
            network,
            key,
            ecdsa_key,
            schnorr_key,
            derived,
            addresses,
        })
    }

    /// Addresses controlled by the joint keys
    pub fn addresses(&self) -> &DerivedAddresses {
        &self.derived
    }

    pub fn ecdsa_public_key(&self) -> &PublicKey {
        &self.ecdsa_key
    }

    /// Untweaked joint Schnorr key
    pub fn schnorr_internal_key(&self) -> &PublicKey {
        &self.schnorr_key
    }

    fn address_type(&self, address: &str) -> TxResult<AddressType> {
        self.addresses
            .get(address)
            .copied()
            .ok_or_else(|| TxError::not_found(format!("Address {} is not a threshold address", address)))
    }
}

impl SecretsSource for ThresholdStore {
    fn get_key(&self, address: &str) -> TxResult<Option<SecretScalar>> {
        self.address_type(address)?;
        Ok(None)
    }

    fn get_pubkey(&self, address: &str) -> TxResult<PublicKey> {
        Ok(match self.address_type(address)? {
            AddressType::Taproot => self.schnorr_key.clone(),
            _ => self.ecdsa_key.clone(),
        })
    }

    fn get_script(&self, address: &str) -> TxResult<ScriptBuf> {
        let address_type = self.address_type(address)?;
        self.derived
            .get(&address_type)
            .map(|a| a.script_pubkey.clone())
            .ok_or_else(|| TxError::internal("Threshold address table is incomplete"))
    }

    fn sign(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<EcdsaSignature> {
        if *pubkey != self.ecdsa_key {
            return Err(TxError::not_found(format!(
                "Public key {} is not the joint ECDSA key",
                pubkey
            )));
        }
        self.key.sign_ecdsa(sighash)
    }

    fn sign_taproot(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<SchnorrSig> {
        if *pubkey != self.schnorr_key {
            return Err(TxError::not_found(format!(
                "Public key {} is not the joint Schnorr key",
                pubkey
            )));
        }
        self.key.sign_schnorr(sighash, Some(&TapMerkleRoot::empty()))
    }

    fn chain_params(&self) -> Network {
        self.network
    }
}
