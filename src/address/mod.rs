//! Address derivation and decoding
//!
//! A compressed public key yields four addresses:
//! - Legacy: P2PKH over HASH160(pubkey)
//! - Nested: P2SH wrapping the witness-v0 key-hash program
//! - Segwit: witness-v0 key-hash program (bech32)
//! - Taproot: witness-v1 program of the key tweaked with an empty script
//!   tree (bech32m)
//!
//! Scripts are built from the crate's own hashing and tweaking; the `bitcoin`
//! crate only renders them as strings and parses strings back to scripts.

pub mod mnemonic;

use crate::crypto::keys::{hash160, PublicKey};
use crate::crypto::schnorr::XOnlyPubKey;
use crate::crypto::taproot::TaprootTweaker;
use crate::error::{TxError, TxResult};
use crate::types::{AddressType, Network, ScriptClass};
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::key::TweakedPublicKey;
use bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash, WPubkeyHash};
use serde::ser::SerializeStruct;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Address
// =============================================================================

/// Encoded address together with the script it pays to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub address_type: AddressType,
    pub network: Network,
    pub encoded: String,
    pub script_pubkey: ScriptBuf,
}

impl Address {
    /// Class of the script this address pays to
    pub fn script_class(&self) -> ScriptClass {
        ScriptClass::classify(&self.script_pubkey)
    }

    pub fn script_hex(&self) -> String {
        hex::encode(self.script_pubkey.as_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("Address", 4)?;
        state.serialize_field("type", &self.address_type)?;
        state.serialize_field("network", &self.network)?;
        state.serialize_field("address", &self.encoded)?;
        state.serialize_field("script", &self.script_hex())?;
        state.end()
    }
}

/// The four addresses of one key, keyed by type
pub type DerivedAddresses = BTreeMap<AddressType, Address>;

// =============================================================================
// Scripts
// =============================================================================

/// Witness-v0 key-hash program used as the nested redeem script
pub fn p2wpkh_script(pubkey: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(pubkey.pubkey_hash()))
}

/// Output script paying `pubkey` in the given family
pub fn script_for(pubkey: &PublicKey, address_type: AddressType) -> TxResult<ScriptBuf> {
    let script = match address_type {
        AddressType::Legacy => {
            ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(pubkey.pubkey_hash()))
        }
        AddressType::Nested => {
            let redeem = p2wpkh_script(pubkey);
            ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash160(redeem.as_bytes())))
        }
        AddressType::Segwit => p2wpkh_script(pubkey),
        AddressType::Taproot => {
            let internal = XOnlyPubKey(pubkey.x_only());
            let output = TaprootTweaker::new().tweak_public_key(&internal, None)?;
            taproot_script(&output.output_key)?
        }
    };
    Ok(script)
}

/// Witness-v1 program for an already tweaked output key
pub fn taproot_script(output_key: &XOnlyPubKey) -> TxResult<ScriptBuf> {
    let key = bitcoin::XOnlyPublicKey::from_slice(output_key.as_bytes())
        .map_err(|e| TxError::serialization(format!("Invalid taproot output key: {}", e)))?;
    Ok(ScriptBuf::new_p2tr_tweaked(
        TweakedPublicKey::dangerous_assume_tweaked(key),
    ))
}

/// Renders a script as an address string for `network`
pub fn encode_script(script: &Script, network: Network) -> TxResult<String> {
    bitcoin::Address::from_script(script, network.to_bitcoin())
        .map(|a| a.to_string())
        .map_err(|e| TxError::serialization(format!("Script has no address form: {}", e)))
}

// =============================================================================
// Derivation
// =============================================================================

/// Address of one family for `pubkey`
pub fn derive_one(pubkey: &PublicKey, address_type: AddressType, network: Network) -> TxResult<Address> {
    let script_pubkey = script_for(pubkey, address_type)?;
    let encoded = encode_script(&script_pubkey, network)?;
    Ok(Address {
        address_type,
        network,
        encoded,
        script_pubkey,
    })
}

/// All four addresses of `pubkey`
pub fn derive(pubkey: &PublicKey, network: Network) -> TxResult<DerivedAddresses> {
    AddressType::ALL
        .iter()
        .map(|&t| derive_one(pubkey, t, network).map(|a| (t, a)))
        .collect()
}

/// Taproot address for an output key that is already tweaked
pub fn taproot_address(output_key: &XOnlyPubKey, network: Network) -> TxResult<Address> {
    let script_pubkey = taproot_script(output_key)?;
    let encoded = encode_script(&script_pubkey, network)?;
    Ok(Address {
        address_type: AddressType::Taproot,
        network,
        encoded,
        script_pubkey,
    })
}

// =============================================================================
// Decoding
// =============================================================================

/// Parses an address string of either network
///
/// Script-hash addresses decode as `Nested`. Witness-v0 script-hash programs
/// decode as `Segwit` with script class `WitnessV0ScriptHash`.
pub fn decode(encoded: &str) -> TxResult<Address> {
    let encoded = encoded.trim();
    let unchecked: bitcoin::Address<NetworkUnchecked> = encoded.parse()?;

    let network = if unchecked.is_valid_for_network(bitcoin::Network::Bitcoin) {
        Network::Main
    } else if unchecked.is_valid_for_network(bitcoin::Network::Testnet) {
        Network::Test
    } else {
        return Err(TxError::validation(format!(
            "Address {} is not for mainnet or testnet",
            encoded
        )));
    };

    let checked = unchecked.assume_checked();
    let script_pubkey = checked.script_pubkey();
    let address_type = match ScriptClass::classify(&script_pubkey) {
        ScriptClass::PubkeyHash => AddressType::Legacy,
        ScriptClass::ScriptHash => AddressType::Nested,
        ScriptClass::WitnessV0KeyHash | ScriptClass::WitnessV0ScriptHash => AddressType::Segwit,
        ScriptClass::WitnessV1Taproot => AddressType::Taproot,
        ScriptClass::NonStandard => {
            return Err(TxError::serialization(format!(
                "Unsupported address program: {}",
                encoded
            )))
        }
    };

    Ok(Address {
        address_type,
        network,
        encoded: encoded.to_string(),
        script_pubkey,
    })
}

/// Decodes and requires the address to belong to `network`
pub fn decode_for_network(encoded: &str, network: Network) -> TxResult<Address> {
    let address = decode(encoded)?;
    if address.network != network {
        return Err(TxError::validation(format!(
            "Address {} belongs to {} but {} is required",
            address.encoded, address.network, network
        )));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;

    fn key_one() -> PublicKey {
        PrivateKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap()
            .public_key()
    }

    #[test]
    fn test_derive_key_one_mainnet() {
        let addresses = derive(&key_one(), Network::Main).unwrap();
        assert_eq!(addresses[&AddressType::Legacy].encoded, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(addresses[&AddressType::Nested].encoded, "3JvL6Ymt8MVWiCNHC7oWU6nLeHNJKLZGLN");
        assert_eq!(
            addresses[&AddressType::Segwit].encoded,
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
        assert_eq!(
            addresses[&AddressType::Taproot].encoded,
            "bc1pmfr3p9j00pfxjh0zmgp99y8zftmd3s5pmedqhyptwy6lm87hf5sspknck9"
        );
    }

    #[test]
    fn test_testnet_prefixes() {
        let addresses = derive(&key_one(), Network::Test).unwrap();
        let legacy = &addresses[&AddressType::Legacy].encoded;
        assert!(legacy.starts_with('m') || legacy.starts_with('n'));
        assert!(addresses[&AddressType::Nested].encoded.starts_with('2'));
        assert!(addresses[&AddressType::Segwit].encoded.starts_with("tb1q"));
        assert!(addresses[&AddressType::Taproot].encoded.starts_with("tb1p"));
    }

    #[test]
    fn test_decode_roundtrip() {
        for network in [Network::Main, Network::Test] {
            for (address_type, address) in derive(&key_one(), network).unwrap() {
                let decoded = decode(&address.encoded).unwrap();
                assert_eq!(decoded.address_type, address_type);
                assert_eq!(decoded.network, network);
                assert_eq!(decoded.script_pubkey, address.script_pubkey);
            }
        }
    }

    #[test]
    fn test_decode_p2wsh() {
        let decoded =
            decode("bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3").unwrap();
        assert_eq!(decoded.address_type, AddressType::Segwit);
        assert_eq!(decoded.script_class(), ScriptClass::WitnessV0ScriptHash);
    }

    #[test]
    fn test_network_mismatch() {
        let err = decode_for_network("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", Network::Test)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(decode("not-an-address").is_err());
    }

    #[test]
    fn test_serialize_address() {
        let address = derive_one(&key_one(), AddressType::Segwit, Network::Main).unwrap();
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json["type"], "segwit");
        assert_eq!(json["script"], "0014751e76e8199196d454941c45d1b3a323f1433bd6");
    }
}
