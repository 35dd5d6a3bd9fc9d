//! Local key store

use super::SecretsSource;
use crate::address::{self, DerivedAddresses};
use crate::crypto::ecdsa::{self, EcdsaSignature};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::scalar::SecretScalar;
use crate::crypto::schnorr::{self, SchnorrSig};
use crate::crypto::taproot::TaprootTweaker;
use crate::error::{TxError, TxResult};
use crate::types::Network;
use bitcoin::ScriptBuf;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

const MODULE: &str = "author::memory";

/// Private keys held in process memory
///
/// Every inserted key is reachable through all four of its addresses.
#[derive(Clone)]
pub struct InMemoryStore {
    network: Network,
    addresses: HashMap<String, [u8; 33]>,
    keys: HashMap<[u8; 33], PrivateKey>,
}

impl InMemoryStore {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            addresses: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn with_key(network: Network, key: PrivateKey) -> TxResult<Self> {
        let mut store = Self::new(network);
        store.insert(key)?;
        Ok(store)
    }

    /// Imports a WIF key, which must be encoded for the store's network
    pub fn insert_wif(&mut self, wif: &str) -> TxResult<DerivedAddresses> {
        let (key, network) = PrivateKey::from_wif(wif)?;
        if network != self.network {
            return Err(TxError::validation(format!(
                "WIF key is for {} but the store is for {}",
                network, self.network
            )));
        }
        self.insert(key)
    }

    /// Registers `key` and returns the addresses it now answers for
    pub fn insert(&mut self, key: PrivateKey) -> TxResult<DerivedAddresses> {
        let public = key.public_key();
        let derived = address::derive(&public, self.network)?;
        let compressed = public.serialize_compressed();

        for address in derived.values() {
            self.addresses.insert(address.encoded.clone(), compressed);
        }
        self.keys.insert(compressed, key);

        crate::log_debug!(MODULE, "Key registered", pubkey = public, network = self.network);
        Ok(derived)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn key_for_address(&self, address: &str) -> TxResult<&PrivateKey> {
        self.addresses
            .get(address)
            .and_then(|pk| self.keys.get(pk))
            .ok_or_else(|| TxError::not_found(format!("No key for address {}", address)))
    }

    fn key_for_pubkey(&self, pubkey: &PublicKey) -> TxResult<&PrivateKey> {
        self.keys
            .get(&pubkey.serialize_compressed())
            .ok_or_else(|| TxError::not_found(format!("No key for public key {}", pubkey)))
    }
}

impl SecretsSource for InMemoryStore {
    fn get_key(&self, address: &str) -> TxResult<Option<SecretScalar>> {
        Ok(Some(self.key_for_address(address)?.secret().clone()))
    }

    fn get_pubkey(&self, address: &str) -> TxResult<PublicKey> {
        Ok(self.key_for_address(address)?.public_key())
    }

    fn get_script(&self, address: &str) -> TxResult<ScriptBuf> {
        self.key_for_address(address)?;
        Ok(address::decode_for_network(address, self.network)?.script_pubkey)
    }

    fn sign(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<EcdsaSignature> {
        ecdsa::sign(self.key_for_pubkey(pubkey)?, sighash)
    }

    fn sign_taproot(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<SchnorrSig> {
        let key = self.key_for_pubkey(pubkey)?;
        let tweaked = TaprootTweaker::new().tweak_private_key(key, None)?;
        let mut aux = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut aux[..]);
        schnorr::sign(&tweaked, sighash, &aux)
    }

    fn chain_params(&self) -> Network {
        self.network
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("network", &self.network)
            .field("keys", &self.keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr::XOnlyPubKey;
    use crate::types::AddressType;

    fn store() -> (InMemoryStore, DerivedAddresses, PrivateKey) {
        let key = PrivateKey::from_hex("0000000000000000000000000000000000000000000000000000000000000003")
            .unwrap();
        let mut store = InMemoryStore::new(Network::Test);
        let derived = store.insert(key.clone()).unwrap();
        (store, derived, key)
    }

    #[test]
    fn test_lookup_by_every_address() {
        let (store, derived, key) = store();
        for address in derived.values() {
            assert_eq!(store.get_pubkey(&address.encoded).unwrap(), key.public_key());
            assert_eq!(store.get_script(&address.encoded).unwrap(), address.script_pubkey);
            assert!(store.get_key(&address.encoded).unwrap().is_some());
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_address_is_not_found() {
        let (store, _, _) = store();
        let err = store.get_pubkey("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx").unwrap_err();
        assert!(err.is_not_found());

        let stranger = PrivateKey::random(&mut OsRng).public_key();
        assert!(store.sign(&stranger, &[1u8; 32]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_sign_and_sign_taproot() {
        let (store, derived, key) = store();
        let msg = [0x5au8; 32];

        let sig = store.sign(&key.public_key(), &msg).unwrap();
        assert!(ecdsa::verify(&key.public_key(), &msg, &sig));

        let schnorr_sig = store.sign_taproot(&key.public_key(), &msg).unwrap();
        let program = &derived[&AddressType::Taproot].script_pubkey.as_bytes()[2..];
        let output_key = XOnlyPubKey::from_slice(program).unwrap();
        assert!(schnorr::verify(&output_key, &msg, &schnorr_sig));
    }

    #[test]
    fn test_wif_network_checked() {
        let mut store = InMemoryStore::new(Network::Main);
        // testnet WIF of key 1
        let err = store
            .insert_wif("cMahea7zqjxrtgAbB7LSGbcQUr1uX1ojuat9jZodMN87JcbXMTcA")
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());
    }
}
