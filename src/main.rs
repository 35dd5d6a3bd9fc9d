use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tx_builder::address::{self, mnemonic};
use tx_builder::crypto::{ecdsa, schnorr};
use tx_builder::fees::{FeeEstimator, InputClass, OutputClass, OutputCounts};
use tx_builder::utils::logging;
use tx_builder::{Config, Network, PublicKey, ThresholdKey};

#[derive(Parser)]
#[command(name = "tx-builder", version, about = "Bitcoin address, fee and threshold-signing tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the four addresses of a mnemonic-derived or given public key
    Addresses {
        #[arg(long, conflicts_with = "pubkey", required_unless_present = "pubkey")]
        mnemonic: Option<String>,
        /// Compressed public key in hex
        #[arg(long)]
        pubkey: Option<String>,
        #[arg(long, default_value_t = 0)]
        index: u32,
        #[arg(long, default_value_t = 1)]
        count: u32,
        #[arg(long, default_value = "main")]
        network: String,
    },
    /// Estimate virtual size and fee of a single-class spend
    Estimate {
        #[arg(long, default_value = "p2wpkh")]
        input_class: String,
        #[arg(long, default_value_t = 1)]
        inputs: usize,
        /// Output class, repeat once per output
        #[arg(long = "output", required = true)]
        outputs: Vec<String>,
        /// Sat/vB
        #[arg(long, default_value_t = 1)]
        fee_rate: u64,
    },
    /// Print class, network and script of an address
    DecodeAddress { address: String },
    /// Run a local two-party signing session
    MpcDemo {
        /// 32-byte message digest in hex
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        schnorr: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    if config.debug {
        logging::enable_debug();
    }

    let output = match cli.command {
        Command::Addresses {
            mnemonic,
            pubkey,
            index,
            count,
            network,
        } => addresses(mnemonic, pubkey, index, count, &network)?,
        Command::Estimate {
            input_class,
            inputs,
            outputs,
            fee_rate,
        } => estimate(&config, &input_class, inputs, &outputs, fee_rate)?,
        Command::DecodeAddress { address } => decode_address(&address)?,
        Command::MpcDemo { message, schnorr } => mpc_demo(&config, message.as_deref(), schnorr)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn addresses(
    words: Option<String>,
    pubkey: Option<String>,
    index: u32,
    count: u32,
    network: &str,
) -> Result<Value> {
    let network: Network = network.parse()?;

    if let Some(hex) = pubkey {
        let pubkey = PublicKey::from_hex(hex.trim())?;
        let derived = address::derive(&pubkey, network)?;
        return Ok(json!({ "public_key": pubkey, "addresses": derived }));
    }

    let words = words.ok_or_else(|| anyhow!("either --mnemonic or --pubkey is required"))?;
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let keys = mnemonic::addresses_from_mnemonic(&words, network, index.saturating_add(count))?;
    let selected: Vec<_> = keys.into_iter().skip(index as usize).collect();
    Ok(serde_json::to_value(selected)?)
}

fn estimate(
    config: &Config,
    input_class: &str,
    inputs: usize,
    outputs: &[String],
    fee_rate: u64,
) -> Result<Value> {
    let class: InputClass = input_class.parse()?;
    let counts = outputs
        .iter()
        .map(|o| o.parse::<OutputClass>())
        .collect::<Result<OutputCounts, _>>()?;

    let estimate = FeeEstimator::from_config(&config.builder).estimate(class, inputs, &counts, fee_rate)?;
    Ok(json!({
        "input_class": class.to_string(),
        "inputs": inputs,
        "outputs": counts,
        "estimate": estimate,
    }))
}

fn decode_address(encoded: &str) -> Result<Value> {
    let decoded = address::decode(encoded)?;
    Ok(json!({
        "address": decoded.encoded,
        "type": decoded.address_type,
        "class": decoded.script_class(),
        "network": decoded.network,
        "script": decoded.script_hex(),
    }))
}

fn mpc_demo(config: &Config, message: Option<&str>, use_schnorr: bool) -> Result<Value> {
    let digest: [u8; 32] = match message {
        Some(hex) => hex::decode(hex.trim())
            .context("message is not hex")?
            .try_into()
            .map_err(|_| anyhow!("message must be exactly 32 bytes"))?,
        None => Sha256::digest(b"tx-builder two-party demo").into(),
    };

    let key = ThresholdKey::random(&mut OsRng, config.mpc.paillier_bits)?;

    if use_schnorr {
        let joint = key.schnorr_public_key(None)?;
        let sig = key.sign_schnorr(&digest, None)?;
        return Ok(json!({
            "scheme": "schnorr",
            "message": hex::encode(digest),
            "public_key": joint.to_hex(),
            "signature": sig.to_hex(),
            "verified": schnorr::verify(&joint, &digest, &sig),
        }));
    }

    let joint = key.ecdsa_public_key()?;
    let sig = key.sign_ecdsa(&digest)?;
    Ok(json!({
        "scheme": "ecdsa",
        "message": hex::encode(digest),
        "public_key": joint.to_hex(),
        "signature": hex::encode(sig.to_compact()),
        "der": hex::encode(sig.to_der()),
        "verified": ecdsa::verify(&joint, &digest, &sig),
    }))
}
