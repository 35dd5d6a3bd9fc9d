//! Transaction Builder
//!
//! Single-address builder: every input spends an output of the configured
//! source address and every UTXO handed to the builder is spent, in order.
//!
//! ```text
//! TxBuilder::new(pubkey, type, network, config)
//!     .with_private_key(key) | .with_secrets(source)
//!     .set_utxos(utxos)
//!     .set_outputs(outputs) | .sweep_to(address)
//!     .set_fee_rate(rate)
//!     .build()
//! ```
//!
//! Every step returns a `TxResult`; all validation happens before any
//! signature is requested.

use super::utxo::{UnspentOutput, UtxoProvider};
use crate::address::{self, Address};
use crate::author::{InMemoryStore, InputScriptAuthor, SecretsSource};
use crate::config::BuilderConfig;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::error::{TxError, TxResult};
use crate::fees::{FeeEstimator, InputClass, OutputClass, OutputCounts};
use crate::types::{AddressType, Network};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const MODULE: &str = "tx::builder";

/// Payment to one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: String,
    /// Value in satoshis
    pub amount: u64,
}

impl Output {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, Serialize)]
pub struct BuiltTransaction {
    #[serde(skip)]
    pub tx: Transaction,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub hex: String,
    pub txid: String,
    /// Fee paid in satoshis
    pub fee: u64,
    /// Estimated virtual size the fee was computed from
    pub vbytes: f64,
    /// Change returned to the change address, if an output was created
    pub change: Option<u64>,
}

/// Consuming transaction builder
pub struct TxBuilder {
    config: BuilderConfig,
    network: Network,
    pubkey: PublicKey,
    address_type: AddressType,
    source: Address,
    secrets: Option<Box<dyn SecretsSource>>,
    utxos: Vec<UnspentOutput>,
    outputs: Vec<TxOut>,
    change_script: Option<ScriptBuf>,
    sweep_script: Option<ScriptBuf>,
    fee_rate: Option<u64>,
}

impl TxBuilder {
    /// Spends from the `address_type` address of `pubkey`
    pub fn new(
        pubkey: PublicKey,
        address_type: AddressType,
        network: Network,
        config: BuilderConfig,
    ) -> TxResult<Self> {
        let source = address::derive_one(&pubkey, address_type, network)?;
        Ok(Self {
            config,
            network,
            pubkey,
            address_type,
            source,
            secrets: None,
            utxos: Vec::new(),
            outputs: Vec::new(),
            change_script: None,
            sweep_script: None,
            fee_rate: None,
        })
    }

    /// Signs locally with `key`, which must match the configured public key
    pub fn with_private_key(self, key: PrivateKey) -> TxResult<Self> {
        if key.public_key() != self.pubkey {
            return Err(TxError::validation(
                "Private key does not match the builder's public key",
            ));
        }
        let store = InMemoryStore::with_key(self.network, key)?;
        self.with_secrets(store)
    }

    /// Signs through any secrets source for the builder's network
    pub fn with_secrets<S: SecretsSource + 'static>(mut self, secrets: S) -> TxResult<Self> {
        if secrets.chain_params() != self.network {
            return Err(TxError::validation(format!(
                "Secrets source is for {} but the builder is for {}",
                secrets.chain_params(),
                self.network
            )));
        }
        self.secrets = Some(Box::new(secrets));
        Ok(self)
    }

    pub fn set_utxos(mut self, utxos: Vec<UnspentOutput>) -> TxResult<Self> {
        let mut seen = HashSet::new();
        for utxo in &utxos {
            let outpoint = utxo.outpoint()?;
            if !seen.insert(outpoint) {
                return Err(TxError::validation(format!(
                    "UTXO {}:{} listed twice",
                    utxo.txid, utxo.vout
                )));
            }
            if utxo.value == 0 {
                return Err(TxError::validation(format!(
                    "UTXO {}:{} has no value",
                    utxo.txid, utxo.vout
                )));
            }
        }
        self.utxos = utxos;
        Ok(self)
    }

    /// Loads the source address's UTXOs from `provider`
    pub fn fetch_utxos(self, provider: &dyn UtxoProvider) -> TxResult<Self> {
        let utxos = provider.fetch(&self.source.encoded)?;
        self.set_utxos(utxos)
    }

    pub fn set_outputs(mut self, outputs: Vec<Output>) -> TxResult<Self> {
        let mut resolved = Vec::with_capacity(outputs.len());
        for output in &outputs {
            if output.amount < self.config.dust_limit {
                return Err(TxError::validation(format!(
                    "Output of {} sat to {} is below the dust limit of {}",
                    output.amount, output.address, self.config.dust_limit
                )));
            }
            let destination = address::decode_for_network(&output.address, self.network)?;
            resolved.push(TxOut {
                value: Amount::from_sat(output.amount),
                script_pubkey: destination.script_pubkey,
            });
        }
        self.outputs = resolved;
        Ok(self)
    }

    /// Change goes here instead of back to the source address
    pub fn set_change_address(mut self, change: &str) -> TxResult<Self> {
        self.change_script = Some(address::decode_for_network(change, self.network)?.script_pubkey);
        Ok(self)
    }

    /// Sends everything, minus the fee, to `destination`
    pub fn sweep_to(mut self, destination: &str) -> TxResult<Self> {
        self.sweep_script = Some(address::decode_for_network(destination, self.network)?.script_pubkey);
        Ok(self)
    }

    /// Fee rate in sat/vB
    pub fn set_fee_rate(mut self, fee_rate: u64) -> TxResult<Self> {
        FeeEstimator::from_config(&self.config).check_rate(fee_rate)?;
        self.fee_rate = Some(fee_rate);
        Ok(self)
    }

    pub fn source_address(&self) -> &Address {
        &self.source
    }

    /// Sum of all UTXO values given so far
    pub fn estimated_balance(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }

    pub fn build(self) -> TxResult<BuiltTransaction> {
        if self.utxos.is_empty() {
            return Err(TxError::validation("No UTXOs to spend"));
        }
        let fee_rate = self
            .fee_rate
            .ok_or_else(|| TxError::validation("Fee rate has not been set"))?;
        let estimator = FeeEstimator::from_config(&self.config);
        estimator.check_rate(fee_rate)?;

        let plan = self.plan(&estimator, fee_rate)?;
        let secrets = self
            .secrets
            .as_deref()
            .ok_or_else(|| TxError::not_found("No secrets source configured for the source address"))?;

        let sequence = if self.config.rbf {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::MAX
        };
        let input = self
            .utxos
            .iter()
            .map(|utxo| {
                Ok(TxIn {
                    previous_output: utxo.outpoint()?,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
            })
            .collect::<TxResult<Vec<_>>>()?;
        let prevouts: Vec<TxOut> = self
            .utxos
            .iter()
            .map(|utxo| TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: self.source.script_pubkey.clone(),
            })
            .collect();

        let unsigned = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: plan.outputs,
        };

        let signed = InputScriptAuthor::new().sign_all(&unsigned, &prevouts, secrets)?;

        let total_out: u64 = signed.output.iter().map(|o| o.value.to_sat()).sum();
        if plan.total_in != total_out + plan.fee {
            return Err(TxError::internal(format!(
                "Funding mismatch: in {} out {} fee {}",
                plan.total_in, total_out, plan.fee
            )));
        }

        let raw = serialize(&signed);
        let txid = signed.compute_txid().to_string();
        crate::log_info!(
            MODULE,
            "Transaction built",
            txid = txid,
            inputs = signed.input.len(),
            outputs = signed.output.len(),
            fee = plan.fee,
            source_address = self.source.encoded
        );

        Ok(BuiltTransaction {
            hex: hex::encode(&raw),
            raw,
            txid,
            fee: plan.fee,
            vbytes: plan.vbytes,
            change: plan.change,
            tx: signed,
        })
    }

    fn total_in(&self) -> TxResult<u64> {
        self.utxos.iter().try_fold(0u64, |acc, u| {
            acc.checked_add(u.value)
                .ok_or_else(|| TxError::validation("UTXO values overflow"))
        })
    }

    fn plan(&self, estimator: &FeeEstimator, fee_rate: u64) -> TxResult<Plan> {
        let input_class = InputClass::from_address_type(self.address_type);
        let input_count = self.utxos.len();
        let total_in = self.total_in()?;

        if let Some(sweep) = &self.sweep_script {
            if !self.outputs.is_empty() {
                return Err(TxError::validation("Sweep cannot be combined with explicit outputs"));
            }
            let counts = OutputCounts::default().with(OutputClass::of_script(sweep)?);
            let estimate = estimator.estimate(input_class, input_count, &counts, fee_rate)?;
            let value = total_in.saturating_sub(estimate.fee);
            if value < self.config.dust_limit {
                return Err(TxError::validation(format!(
                    "Sweeping {} sat at {} sat/vB leaves {} sat, below the dust limit",
                    total_in, fee_rate, value
                )));
            }
            return Ok(Plan {
                outputs: vec![TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey: sweep.clone(),
                }],
                total_in,
                fee: estimate.fee,
                vbytes: estimate.vbytes,
                change: None,
            });
        }

        if self.outputs.is_empty() {
            return Err(TxError::validation("No outputs to pay"));
        }

        let total_out = self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.value.to_sat())
                .ok_or_else(|| TxError::validation("Output values overflow"))
        })?;
        let counts = self
            .outputs
            .iter()
            .map(|o| OutputClass::of_script(&o.script_pubkey))
            .collect::<TxResult<OutputCounts>>()?;

        let change_script = self
            .change_script
            .clone()
            .unwrap_or_else(|| self.source.script_pubkey.clone());
        let with_change = counts.with(OutputClass::of_script(&change_script)?);

        let without = estimator.estimate(input_class, input_count, &counts, fee_rate)?;
        let needed = total_out.saturating_add(without.fee);
        if total_in < needed {
            return Err(TxError::validation(format!(
                "Insufficient funds: have {} sat, need {} sat ({} + {} fee)",
                total_in, needed, total_out, without.fee
            )));
        }

        let with = estimator.estimate(input_class, input_count, &with_change, fee_rate)?;
        let mut outputs = self.outputs.clone();
        let change = total_in
            .checked_sub(total_out)
            .and_then(|rest| rest.checked_sub(with.fee))
            .filter(|change| *change >= self.config.dust_limit);

        let (fee, vbytes) = match change {
            Some(change) => {
                outputs.push(TxOut {
                    value: Amount::from_sat(change),
                    script_pubkey: change_script,
                });
                (with.fee, with.vbytes)
            }
            // Leftover below the dust limit goes to the miner
            None => (total_in - total_out, without.vbytes),
        };

        Ok(Plan {
            outputs,
            total_in,
            fee,
            vbytes,
            change,
        })
    }
}

struct Plan {
    outputs: Vec<TxOut>,
    total_in: u64,
    fee: u64,
    vbytes: f64,
    change: Option<u64>,
}

impl fmt::Debug for TxBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxBuilder")
            .field("source", &self.source.encoded)
            .field("network", &self.network)
            .field("utxos", &self.utxos.len())
            .field("outputs", &self.outputs.len())
            .field("sweep", &self.sweep_script.is_some())
            .field("fee_rate", &self.fee_rate)
            .field("has_secrets", &self.secrets.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::deserialize;

    const TXID_A: &str = "b6f6991d03df0e2e04dafffcd6bc418aac66049e2cd74b80f14ac86db1e3f0da";
    const TXID_B: &str = "0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9";
    const RECIPIENT: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn key() -> PrivateKey {
        PrivateKey::from_hex("00000000000000000000000000000000000000000000000000000000000000aa").unwrap()
    }

    fn builder(address_type: AddressType) -> TxBuilder {
        TxBuilder::new(key().public_key(), address_type, Network::Test, BuilderConfig::default())
            .unwrap()
            .with_private_key(key())
            .unwrap()
    }

    fn utxos() -> Vec<UnspentOutput> {
        vec![UnspentOutput::new(TXID_A, 0, 60_000), UnspentOutput::new(TXID_B, 3, 40_000)]
    }

    #[test]
    fn test_segwit_payment_with_change() {
        let built = builder(AddressType::Segwit)
            .set_utxos(utxos())
            .unwrap()
            .set_outputs(vec![Output::new(RECIPIENT, 30_000)])
            .unwrap()
            .set_fee_rate(2)
            .unwrap()
            .build()
            .unwrap();

        // 2 inputs, 2 p2wpkh outputs: 4+1+1+4+0.5+0.5 + 2*67.75 + 2*31
        assert_eq!(built.vbytes, 208.5);
        assert_eq!(built.fee, 418);
        assert_eq!(built.change, Some(100_000 - 30_000 - 418));
        assert_eq!(built.tx.output.len(), 2);
        assert_eq!(built.tx.version, Version::TWO);
        assert_eq!(built.tx.input[0].sequence, Sequence::MAX);
        assert_eq!(built.tx.input[1].previous_output.vout, 3);

        let decoded: Transaction = deserialize(&built.raw).unwrap();
        assert_eq!(decoded, built.tx);
        assert_eq!(built.txid, decoded.compute_txid().to_string());
        assert_eq!(built.hex, hex::encode(&built.raw));
    }

    #[test]
    fn test_dust_change_goes_to_fee() {
        // 500 sat left over, 141 of it for the change output: 359 is dust
        let built = builder(AddressType::Segwit)
            .set_utxos(vec![UnspentOutput::new(TXID_A, 0, 31_000)])
            .unwrap()
            .set_outputs(vec![Output::new(RECIPIENT, 30_500)])
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(built.change, None);
        assert_eq!(built.fee, 500);
        assert_eq!(built.tx.output.len(), 1);
    }

    #[test]
    fn test_sweep() {
        let built = builder(AddressType::Taproot)
            .set_utxos(utxos())
            .unwrap()
            .sweep_to(RECIPIENT)
            .unwrap()
            .set_fee_rate(3)
            .unwrap()
            .build()
            .unwrap();
        // 4+1+1+4+0.5+0.5 + 2*57.25 + 31 = 156.5
        assert_eq!(built.fee, 157 * 3);
        assert_eq!(built.tx.output.len(), 1);
        assert_eq!(built.tx.output[0].value.to_sat(), 100_000 - built.fee);
        assert!(built.tx.input.iter().all(|i| i.witness.len() == 1));
    }

    #[test]
    fn test_sweep_below_dust_rejected() {
        let err = builder(AddressType::Legacy)
            .set_utxos(vec![UnspentOutput::new(TXID_A, 0, 1_000)])
            .unwrap()
            .sweep_to(RECIPIENT)
            .unwrap()
            .set_fee_rate(5)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_rbf_sequence() {
        let config = BuilderConfig {
            rbf: true,
            ..BuilderConfig::default()
        };
        let built = TxBuilder::new(key().public_key(), AddressType::Nested, Network::Test, config)
            .unwrap()
            .with_private_key(key())
            .unwrap()
            .set_utxos(utxos())
            .unwrap()
            .set_outputs(vec![Output::new(RECIPIENT, 10_000)])
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap();
        assert!(built.tx.input.iter().all(|i| i.sequence == Sequence::ENABLE_RBF_NO_LOCKTIME));
    }

    #[test]
    fn test_validation_failures() {
        let err = builder(AddressType::Segwit)
            .set_outputs(vec![Output::new(RECIPIENT, 1_000)])
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_validation());

        assert!(builder(AddressType::Segwit).set_fee_rate(0).unwrap_err().is_validation());

        let err = builder(AddressType::Segwit)
            .set_outputs(vec![Output::new("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", 1_000)])
            .unwrap_err();
        assert!(err.is_validation());

        let err = builder(AddressType::Segwit)
            .set_utxos(utxos())
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_validation());

        let err = builder(AddressType::Segwit)
            .set_utxos(utxos())
            .unwrap()
            .set_outputs(vec![Output::new(RECIPIENT, 99_990)])
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_duplicate_utxo_and_bad_txid() {
        let twice = vec![UnspentOutput::new(TXID_A, 0, 1_000), UnspentOutput::new(TXID_A, 0, 1_000)];
        assert!(builder(AddressType::Segwit).set_utxos(twice).unwrap_err().is_validation());
        let bad = vec![UnspentOutput::new("nothex", 0, 1_000)];
        assert!(builder(AddressType::Segwit).set_utxos(bad).is_err());
    }

    #[test]
    fn test_mismatched_private_key() {
        let other = PrivateKey::from_hex("00000000000000000000000000000000000000000000000000000000000000bb").unwrap();
        let err = TxBuilder::new(key().public_key(), AddressType::Segwit, Network::Test, BuilderConfig::default())
            .unwrap()
            .with_private_key(other)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_missing_secrets_is_not_found() {
        let err = TxBuilder::new(key().public_key(), AddressType::Segwit, Network::Test, BuilderConfig::default())
            .unwrap()
            .set_utxos(utxos())
            .unwrap()
            .set_outputs(vec![Output::new(RECIPIENT, 10_000)])
            .unwrap()
            .set_fee_rate(1)
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_secrets_network_checked() {
        let store = InMemoryStore::with_key(Network::Main, key()).unwrap();
        let err = TxBuilder::new(key().public_key(), AddressType::Segwit, Network::Test, BuilderConfig::default())
            .unwrap()
            .with_secrets(store)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
