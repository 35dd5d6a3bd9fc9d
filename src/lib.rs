//! Bitcoin Transaction Builder
//!
//! Builds and signs Bitcoin transactions that spend from one address of a
//! compressed public key, for any of the four standard address types.
//!
//! # Architecture
//!
//! This crate provides:
//! - **crypto**: secp256k1 arithmetic, ECDSA, BIP-340 Schnorr, Taproot tweaks, Paillier
//! - **mpc**: two-party threshold ECDSA and Schnorr signing
//! - **address**: address derivation, decoding and mnemonic key derivation
//! - **fees**: virtual-size estimation and fee-rate sources
//! - **author**: secrets sources and the input script author that signs every input
//! - **tx**: UTXO providers and the transaction builder
//! - **config**, **error**, **utils**: configuration, the error type, logging and HTTP
//!
//! # Signing
//!
//! Signatures never come from a global key table. Every builder is handed a
//! [`SecretsSource`]: an in-memory key store, a remote signing service, or a
//! two-party [`ThresholdStore`] whose joint private key exists nowhere.
//!
//! # Security
//!
//! Private keys, key shares and signing nonces are stored as `zeroize` byte
//! buffers that are cleared on drop, and Paillier secret keys overwrite λ
//! and μ when dropped. Arithmetic runs on short-lived [`crypto::Scalar`]
//! copies from `SecretScalar::expose`, which are not wiped. Log output
//! redacts any field whose name looks sensitive.
//!
//! # Example
//!
//! ```rust,ignore
//! use tx_builder::{AddressType, BuilderConfig, Network, Output, PrivateKey, TxBuilder, UnspentOutput};
//!
//! let key = PrivateKey::from_hex(KEY_HEX)?;
//! let built = TxBuilder::new(key.public_key(), AddressType::Segwit, Network::Test, BuilderConfig::default())?
//!     .with_private_key(key)?
//!     .set_utxos(vec![UnspentOutput::new(TXID, 0, 50_000)])?
//!     .set_outputs(vec![Output::new(RECIPIENT, 20_000)])?
//!     .set_fee_rate(2)?
//!     .build()?;
//! println!("{}", built.hex);
//! ```

pub mod address;
pub mod author;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fees;
pub mod mpc;
pub mod serde_bytes;
pub mod tx;
pub mod types;
pub mod utils;

// Re-export key types for convenience
pub use error::{ErrorKind, TxError, TxResult};
pub use types::*;

pub use address::{Address, DerivedAddresses};
pub use author::{
    ExternalRemoteStore, HttpRemoteSigner, InMemoryStore, InputScriptAuthor, RemoteSigner,
    SecretsSource, ThresholdStore,
};
pub use config::{BuilderConfig, Config, EndpointConfig, MpcConfig};
pub use crypto::{EcdsaSignature, PrivateKey, PublicKey, SchnorrSig, TaprootTweaker, XOnlyPubKey};
pub use fees::{FeeEstimate, FeeEstimator, FeeRateSource, InputClass, OutputClass, OutputCounts};
pub use mpc::ThresholdKey;
pub use tx::{BuiltTransaction, Output, TxBuilder, UnspentOutput, UtxoProvider};
