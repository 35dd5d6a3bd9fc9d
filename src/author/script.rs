//! Input script authoring
//!
//! Sighash per prevout class:
//! - P2PKH: legacy sighash, signature and key in `script_sig`
//! - P2SH-P2WPKH: BIP143 sighash over the key-hash program, redeem script
//!   in `script_sig`, signature and key in the witness
//! - P2WPKH: BIP143 sighash, signature and key in the witness
//! - P2TR key path: BIP341 sighash over all prevouts, 64-byte signature as
//!   the only witness item
//!
//! The caller's transaction is never modified. Signing happens on a copy
//! that is returned only after every input has been signed and verified.

use super::SecretsSource;
use crate::address;
use crate::crypto::ecdsa;
use crate::crypto::keys::PublicKey;
use crate::crypto::schnorr::{self, XOnlyPubKey};
use crate::error::{TxError, TxResult};
use crate::types::{AddressType, Network, ScriptClass};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{Script, ScriptBuf, Transaction, TxOut, Witness};

const MODULE: &str = "author::script";

/// Produces `script_sig` and witness data for every input
#[derive(Debug, Clone, Copy, Default)]
pub struct InputScriptAuthor;

impl InputScriptAuthor {
    pub fn new() -> Self {
        Self
    }

    /// Signs every input of `tx`; `prevouts[i]` is the output spent by input `i`
    pub fn sign_all(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
        secrets: &dyn SecretsSource,
    ) -> TxResult<Transaction> {
        if tx.input.is_empty() {
            return Err(TxError::validation("Transaction has no inputs to sign"));
        }
        if tx.input.len() != prevouts.len() {
            return Err(TxError::validation(format!(
                "{} inputs but {} prevouts",
                tx.input.len(),
                prevouts.len()
            )));
        }

        let network = secrets.chain_params();
        let mut cache = SighashCache::new(tx);
        let mut unlocks = Vec::with_capacity(prevouts.len());
        for index in 0..prevouts.len() {
            let unlock = sign_input(&mut cache, index, prevouts, network, secrets).map_err(|e| {
                crate::log_warn!(MODULE, "Input signing failed", input = index, kind = format!("{:?}", e.kind));
                e.with_details(format!("input {}", index))
            })?;
            unlocks.push(unlock);
        }

        let mut signed = tx.clone();
        for (input, (script_sig, witness)) in signed.input.iter_mut().zip(unlocks) {
            input.script_sig = script_sig;
            input.witness = witness;
        }

        crate::log_debug!(MODULE, "All inputs signed", inputs = signed.input.len(), txid = signed.compute_txid());
        Ok(signed)
    }
}

fn sign_input(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    prevouts: &[TxOut],
    network: Network,
    secrets: &dyn SecretsSource,
) -> TxResult<(ScriptBuf, Witness)> {
    let prevout = &prevouts[index];
    let script = prevout.script_pubkey.as_script();

    let address_type = match ScriptClass::classify(script) {
        ScriptClass::PubkeyHash => AddressType::Legacy,
        ScriptClass::ScriptHash => AddressType::Nested,
        ScriptClass::WitnessV0KeyHash => AddressType::Segwit,
        ScriptClass::WitnessV1Taproot => AddressType::Taproot,
        other => {
            return Err(TxError::serialization(format!(
                "Cannot sign for {:?} prevout script {}",
                other,
                hex::encode(script.as_bytes())
            )))
        }
    };

    let encoded = address::encode_script(script, network)?;
    let pubkey = secrets.get_pubkey(&encoded)?;
    ensure_controls(&pubkey, address_type, script)?;
    let key_bytes = pubkey.serialize_compressed();

    match address_type {
        AddressType::Legacy => {
            let sighash = cache
                .legacy_signature_hash(index, script, EcdsaSighashType::All.to_u32())
                .map_err(|e| TxError::internal(format!("Legacy sighash failed: {}", e)))?
                .to_byte_array();
            let signature = sign_ecdsa(secrets, &pubkey, &sighash)?;
            let script_sig = Builder::new()
                .push_slice(push_bytes(signature)?)
                .push_slice(push_bytes(key_bytes.to_vec())?)
                .into_script();
            Ok((script_sig, Witness::new()))
        }
        AddressType::Nested | AddressType::Segwit => {
            let program = address::p2wpkh_script(&pubkey);
            let sighash = cache
                .p2wpkh_signature_hash(index, &program, prevout.value, EcdsaSighashType::All)
                .map_err(|e| TxError::internal(format!("Segwit sighash failed: {}", e)))?
                .to_byte_array();
            let signature = sign_ecdsa(secrets, &pubkey, &sighash)?;
            let witness = Witness::from_slice(&[signature, key_bytes.to_vec()]);

            let script_sig = if address_type == AddressType::Nested {
                Builder::new().push_slice(push_bytes(program.to_bytes())?).into_script()
            } else {
                ScriptBuf::new()
            };
            Ok((script_sig, witness))
        }
        AddressType::Taproot => {
            let sighash = cache
                .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), TapSighashType::Default)
                .map_err(|e| TxError::internal(format!("Taproot sighash failed: {}", e)))?
                .to_byte_array();
            let signature = secrets.sign_taproot(&pubkey, &sighash)?;

            let output_key = XOnlyPubKey::from_slice(&script.as_bytes()[2..])?;
            if !schnorr::verify(&output_key, &sighash, &signature) {
                return Err(TxError::crypto_consistency(
                    "Taproot signature does not verify under the output key",
                ));
            }
            Ok((ScriptBuf::new(), Witness::from_slice(&[signature.as_bytes()])))
        }
    }
}

/// DER signature with the SIGHASH_ALL byte, checked against `pubkey`
fn sign_ecdsa(secrets: &dyn SecretsSource, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<Vec<u8>> {
    let signature = secrets.sign(pubkey, sighash)?.normalize_s();
    if !ecdsa::verify(pubkey, sighash, &signature) {
        return Err(TxError::crypto_consistency(format!(
            "ECDSA signature does not verify under {}",
            pubkey
        )));
    }
    let mut bytes = signature.to_der();
    bytes.push(EcdsaSighashType::All.to_u32() as u8);
    Ok(bytes)
}

fn ensure_controls(pubkey: &PublicKey, address_type: AddressType, script: &Script) -> TxResult<()> {
    if address::script_for(pubkey, address_type)?.as_script() != script {
        return Err(TxError::crypto_consistency(format!(
            "Public key {} does not control {} prevout {}",
            pubkey,
            address_type,
            hex::encode(script.as_bytes())
        )));
    }
    Ok(())
}

fn push_bytes(data: Vec<u8>) -> TxResult<PushBytesBuf> {
    PushBytesBuf::try_from(data).map_err(|e| TxError::serialization(format!("Push too large: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::author::InMemoryStore;
    use crate::crypto::keys::PrivateKey;
    use bitcoin::absolute::LockTime;
    use bitcoin::secp256k1::{self as secp, Message, Secp256k1};
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, Txid};

    fn key() -> PrivateKey {
        PrivateKey::from_hex("0000000000000000000000000000000000000000000000000000000000000003").unwrap()
    }

    fn unsigned(prevouts: &[TxOut]) -> Transaction {
        let input = (0..prevouts.len())
            .map(|i| TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([i as u8 + 1; 32]), i as u32),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![TxOut {
                value: Amount::from_sat(40_000),
                script_pubkey: prevouts[0].script_pubkey.clone(),
            }],
        }
    }

    fn prevouts_for_every_type(network: Network) -> Vec<TxOut> {
        let public = key().public_key();
        AddressType::ALL
            .iter()
            .map(|&t| TxOut {
                value: Amount::from_sat(20_000),
                script_pubkey: address::derive_one(&public, t, network).unwrap().script_pubkey,
            })
            .collect()
    }

    #[test]
    fn test_signs_every_class() {
        let store = InMemoryStore::with_key(Network::Test, key()).unwrap();
        let prevouts = prevouts_for_every_type(Network::Test);
        let tx = unsigned(&prevouts);

        let signed = InputScriptAuthor::new().sign_all(&tx, &prevouts, &store).unwrap();
        let pubkey = key().public_key().serialize_compressed();

        // legacy: everything in script_sig
        assert!(!signed.input[0].script_sig.is_empty());
        assert!(signed.input[0].witness.is_empty());
        assert!(signed.input[0].script_sig.as_bytes().ends_with(&pubkey));

        // nested: redeem script push plus witness
        let redeem = address::p2wpkh_script(&key().public_key());
        let mut expected_sig = vec![0x16];
        expected_sig.extend_from_slice(redeem.as_bytes());
        assert_eq!(signed.input[1].script_sig.as_bytes(), &expected_sig[..]);
        assert_eq!(signed.input[1].witness.len(), 2);

        // segwit
        assert!(signed.input[2].script_sig.is_empty());
        assert_eq!(&signed.input[2].witness[1], &pubkey[..]);

        // taproot
        assert_eq!(signed.input[3].witness.len(), 1);
        assert_eq!(signed.input[3].witness[0].len(), 64);

        // caller's copy untouched
        assert!(tx.input.iter().all(|i| i.script_sig.is_empty() && i.witness.is_empty()));
    }

    #[test]
    fn test_signatures_verify_with_secp256k1() {
        let store = InMemoryStore::with_key(Network::Main, key()).unwrap();
        let prevouts = prevouts_for_every_type(Network::Main);
        let tx = unsigned(&prevouts);
        let signed = InputScriptAuthor::new().sign_all(&tx, &prevouts, &store).unwrap();

        let secp = Secp256k1::verification_only();
        let mut cache = SighashCache::new(&tx);
        let public = secp::PublicKey::from_slice(&key().public_key().serialize_compressed()).unwrap();

        let sighash = cache
            .p2wpkh_signature_hash(2, &prevouts[2].script_pubkey, prevouts[2].value, EcdsaSighashType::All)
            .unwrap();
        let der = &signed.input[2].witness[0];
        let sig = secp::ecdsa::Signature::from_der(&der[..der.len() - 1]).unwrap();
        secp.verify_ecdsa(&Message::from_digest(sighash.to_byte_array()), &sig, &public)
            .unwrap();

        let sighash = cache
            .taproot_key_spend_signature_hash(3, &Prevouts::All(&prevouts), TapSighashType::Default)
            .unwrap();
        let sig = secp::schnorr::Signature::from_slice(&signed.input[3].witness[0]).unwrap();
        let output_key = secp::XOnlyPublicKey::from_slice(&prevouts[3].script_pubkey.as_bytes()[2..]).unwrap();
        secp.verify_schnorr(&sig, &Message::from_digest(sighash.to_byte_array()), &output_key)
            .unwrap();
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let store = InMemoryStore::new(Network::Test);
        let prevouts = prevouts_for_every_type(Network::Test);
        let tx = unsigned(&prevouts);
        let before = tx.clone();

        let err = InputScriptAuthor::new().sign_all(&tx, &prevouts, &store).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(tx, before);
    }

    #[test]
    fn test_prevout_count_mismatch() {
        let store = InMemoryStore::with_key(Network::Test, key()).unwrap();
        let prevouts = prevouts_for_every_type(Network::Test);
        let tx = unsigned(&prevouts);
        let err = InputScriptAuthor::new()
            .sign_all(&tx, &prevouts[..2], &store)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unsupported_prevout() {
        let store = InMemoryStore::with_key(Network::Main, key()).unwrap();
        let p2wsh = address::decode("bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3")
            .unwrap()
            .script_pubkey;
        let prevouts = vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: p2wsh,
        }];
        let tx = unsigned(&prevouts);
        let err = InputScriptAuthor::new().sign_all(&tx, &prevouts, &store).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Serialization);
    }
}
