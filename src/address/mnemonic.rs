//! Key derivation from a BIP-39 mnemonic
//!
//! Keys live at `m/82'/c'/0'/0/i`, with `c = 0` on mainnet and `c = 1` on
//! testnet. The seed uses an empty passphrase.
//!
//! SECURITY: the seed and every intermediate private key are zeroized when
//! dropped.

use super::{derive, DerivedAddresses};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::error::TxResult;
use crate::types::Network;
use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

/// Purpose level of the derivation path
pub const PURPOSE: u32 = 82;

/// Addresses of one derived key
#[derive(Debug, Clone, Serialize)]
pub struct KeyAddresses {
    pub index: u32,
    pub path: String,
    pub public_key: PublicKey,
    pub addresses: DerivedAddresses,
}

/// `m/82'/c'/0'/0/index`
pub fn derivation_path(network: Network, index: u32) -> TxResult<DerivationPath> {
    let path = vec![
        ChildNumber::from_hardened_idx(PURPOSE)?,
        ChildNumber::from_hardened_idx(network.coin_type())?,
        ChildNumber::from_hardened_idx(0)?,
        ChildNumber::from_normal_idx(0)?,
        ChildNumber::from_normal_idx(index)?,
    ];
    Ok(DerivationPath::from(path))
}

/// 64-byte BIP-39 seed for `words` with an empty passphrase
pub fn seed_from_mnemonic(words: &str) -> TxResult<Zeroizing<[u8; 64]>> {
    let normalized = Zeroizing::new(words.nfkd().collect::<String>());
    let mnemonic = Mnemonic::parse_normalized(normalized.trim())?;
    Ok(Zeroizing::new(mnemonic.to_seed_normalized("")))
}

fn master_key(seed: &[u8], network: Network) -> TxResult<Xpriv> {
    Ok(Xpriv::new_master(network.to_bitcoin(), seed)?)
}

/// Private key at `index` on the receiving chain
pub fn key_from_mnemonic(words: &str, network: Network, index: u32) -> TxResult<PrivateKey> {
    let seed = seed_from_mnemonic(words)?;
    let master = master_key(&seed[..], network)?;
    derive_child(&master, network, index)
}

fn derive_child(master: &Xpriv, network: Network, index: u32) -> TxResult<PrivateKey> {
    let secp = Secp256k1::signing_only();
    let child = master.derive_priv(&secp, &derivation_path(network, index)?)?;
    let secret = Zeroizing::new(child.private_key.secret_bytes());
    PrivateKey::from_bytes(&secret[..])
}

/// Addresses for indices `0..count`
pub fn addresses_from_mnemonic(
    words: &str,
    network: Network,
    count: u32,
) -> TxResult<Vec<KeyAddresses>> {
    let seed = seed_from_mnemonic(words)?;
    let master = master_key(&seed[..], network)?;

    (0..count)
        .map(|index| {
            let key = derive_child(&master, network, index)?;
            let public_key = key.public_key();
            Ok(KeyAddresses {
                index,
                path: format!("m/{}", derivation_path(network, index)?),
                addresses: derive(&public_key, network)?,
                public_key,
            })
        })
        .collect()
}
