//! Remote signing service
//!
//! Keys live in an external key manager. The store only knows which public
//! key and key id sit behind each address; digests go out, signatures come
//! back and are checked locally before anything uses them.

use super::SecretsSource;
use crate::address::{self, DerivedAddresses};
use crate::config::EndpointConfig;
use crate::crypto::ecdsa::{self, EcdsaSignature};
use crate::crypto::keys::PublicKey;
use crate::crypto::scalar::SecretScalar;
use crate::crypto::schnorr::{self, SchnorrSig, XOnlyPubKey};
use crate::crypto::taproot::TaprootTweaker;
use crate::error::{TxError, TxResult};
use crate::types::Network;
use crate::utils::HttpClient;
use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const MODULE: &str = "author::remote";

/// Signature algorithm requested from the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignType {
    Ecdsa,
    Taproot,
}

/// Body of a signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// 0x-prefixed hex of the 32-byte digest
    pub data: String,
    pub type_sign: SignType,
    pub key_id: String,
}

impl SignRequest {
    pub fn new(hash: &[u8; 32], type_sign: SignType, key_id: &str) -> Self {
        Self {
            data: format!("0x{}", hex::encode(hash)),
            type_sign,
            key_id: key_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    data: SignResponseData,
}

#[derive(Debug, Deserialize)]
struct SignResponseData {
    signature: String,
}

/// Something that signs digests with keys it never reveals
pub trait RemoteSigner {
    /// ECDSA signature bytes (DER or 64-byte compact)
    fn sign(&self, hash: &[u8; 32], key_id: &str) -> TxResult<Vec<u8>>;

    /// 64-byte BIP340 signature by the taproot output key of `key_id`
    fn sign_schnorr(&self, hash: &[u8; 32], key_id: &str) -> TxResult<Vec<u8>>;
}

// =============================================================================
// HTTP signer
// =============================================================================

/// JSON-over-HTTP key manager client
#[derive(Clone)]
pub struct HttpRemoteSigner {
    http: HttpClient,
    url: String,
    token: Option<String>,
}

impl HttpRemoteSigner {
    /// Uses `remote_signer_url` from the endpoint configuration
    pub fn new(config: &EndpointConfig) -> TxResult<Self> {
        let url = config
            .remote_signer_url
            .clone()
            .ok_or_else(|| TxError::validation("No remote signer URL configured"))?;
        Ok(Self::with_url(HttpClient::new(config)?, url))
    }

    pub fn with_url(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            token: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn request(&self, hash: &[u8; 32], type_sign: SignType, key_id: &str) -> TxResult<Vec<u8>> {
        let body = SignRequest::new(hash, type_sign, key_id);
        let response: SignResponse = match &self.token {
            Some(token) => self.http.post_json_with_token(&self.url, &body, token)?,
            None => self.http.post_json(&self.url, &body)?,
        };
        decode_signature_hex(&response.data.signature)
    }
}

impl RemoteSigner for HttpRemoteSigner {
    fn sign(&self, hash: &[u8; 32], key_id: &str) -> TxResult<Vec<u8>> {
        self.request(hash, SignType::Ecdsa, key_id)
    }

    fn sign_schnorr(&self, hash: &[u8; 32], key_id: &str) -> TxResult<Vec<u8>> {
        self.request(hash, SignType::Taproot, key_id)
    }
}

impl fmt::Debug for HttpRemoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteSigner")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn decode_signature_hex(signature: &str) -> TxResult<Vec<u8>> {
    let trimmed = signature.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))?;
    if bytes.is_empty() {
        return Err(TxError::serialization("Remote signer returned an empty signature"));
    }
    Ok(bytes)
}

/// Accepts DER (optionally with a trailing sighash byte), 64-byte compact,
/// or 65-byte compact with a recovery id
fn parse_ecdsa(bytes: &[u8]) -> TxResult<EcdsaSignature> {
    if bytes.len() == 64 {
        return EcdsaSignature::from_compact(bytes);
    }
    if let Ok(signature) = EcdsaSignature::from_der(bytes) {
        return Ok(signature);
    }
    if let Some((0x01, der)) = bytes.split_last() {
        if let Ok(signature) = EcdsaSignature::from_der(der) {
            return Ok(signature);
        }
    }
    if bytes.len() == 65 {
        return EcdsaSignature::from_compact(&bytes[..64]);
    }
    Err(TxError::serialization(format!(
        "Unrecognised {}-byte ECDSA signature from remote signer",
        bytes.len()
    )))
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone)]
struct Registration {
    pubkey: PublicKey,
    key_id: String,
}

/// Secrets source backed by a [`RemoteSigner`]
pub struct ExternalRemoteStore<S: RemoteSigner = HttpRemoteSigner> {
    network: Network,
    signer: S,
    addresses: HashMap<String, [u8; 33]>,
    registrations: HashMap<[u8; 33], Registration>,
}

impl<S: RemoteSigner> ExternalRemoteStore<S> {
    pub fn new(network: Network, signer: S) -> Self {
        Self {
            network,
            signer,
            addresses: HashMap::new(),
            registrations: HashMap::new(),
        }
    }

    /// Registers the remote key `key_id` whose public key is `pubkey`
    pub fn register(&mut self, pubkey: PublicKey, key_id: impl Into<String>) -> TxResult<DerivedAddresses> {
        let derived = address::derive(&pubkey, self.network)?;
        let compressed = pubkey.serialize_compressed();
        for address in derived.values() {
            self.addresses.insert(address.encoded.clone(), compressed);
        }
        self.registrations.insert(
            compressed,
            Registration {
                pubkey,
                key_id: key_id.into(),
            },
        );
        Ok(derived)
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    fn by_address(&self, address: &str) -> TxResult<&Registration> {
        self.addresses
            .get(address)
            .and_then(|pk| self.registrations.get(pk))
            .ok_or_else(|| TxError::not_found(format!("No remote key for address {}", address)))
    }

    fn by_pubkey(&self, pubkey: &PublicKey) -> TxResult<&Registration> {
        self.registrations
            .get(&pubkey.serialize_compressed())
            .ok_or_else(|| TxError::not_found(format!("No remote key for public key {}", pubkey)))
    }
}

impl<S: RemoteSigner> SecretsSource for ExternalRemoteStore<S> {
    fn get_key(&self, address: &str) -> TxResult<Option<SecretScalar>> {
        self.by_address(address)?;
        Ok(None)
    }

    fn get_pubkey(&self, address: &str) -> TxResult<PublicKey> {
        Ok(self.by_address(address)?.pubkey.clone())
    }

    fn get_script(&self, address: &str) -> TxResult<ScriptBuf> {
        self.by_address(address)?;
        Ok(address::decode_for_network(address, self.network)?.script_pubkey)
    }

    fn sign(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<EcdsaSignature> {
        let registration = self.by_pubkey(pubkey)?;
        let bytes = self.signer.sign(sighash, &registration.key_id)?;
        let signature = parse_ecdsa(&bytes)?.normalize_s();

        if !ecdsa::verify(pubkey, sighash, &signature) {
            crate::log_error!(MODULE, "Remote ECDSA signature rejected", key_id = registration.key_id);
            return Err(TxError::crypto_consistency(format!(
                "Remote signature from key {} does not verify",
                registration.key_id
            )));
        }
        Ok(signature)
    }

    fn sign_taproot(&self, pubkey: &PublicKey, sighash: &[u8; 32]) -> TxResult<SchnorrSig> {
        let registration = self.by_pubkey(pubkey)?;
        let bytes = self.signer.sign_schnorr(sighash, &registration.key_id)?;
        let signature = SchnorrSig::from_slice(&bytes)?;

        let output = TaprootTweaker::new().tweak_public_key(&XOnlyPubKey(pubkey.x_only()), None)?;
        if !schnorr::verify(&output.output_key, sighash, &signature) {
            crate::log_error!(MODULE, "Remote Schnorr signature rejected", key_id = registration.key_id);
            return Err(TxError::crypto_consistency(format!(
                "Remote taproot signature from key {} does not verify",
                registration.key_id
            )));
        }
        Ok(signature)
    }

    fn chain_params(&self) -> Network {
        self.network
    }
}

impl<S: RemoteSigner> fmt::Debug for ExternalRemoteStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalRemoteStore")
            .field("network", &self.network)
            .field("keys", &self.registrations.len())
            .finish()
    }
}
