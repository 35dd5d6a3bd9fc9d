use serde_json::Value;
use std::process::{Command, Output};

const WORDS: &str = "furnace diesel fault piano wrap surface focus saddle chuckle absent range exact";

fn run(args: &[&str]) -> Output {
    let binary_path = assert_cmd::cargo::cargo_bin!("tx-builder");
    Command::new(binary_path)
        .args(args)
        .env("TXB_PAILLIER_BITS", "768")
        .env_remove("TXB_MIN_FEE_RATE")
        .env_remove("TXB_MAX_FEE_RATE")
        .output()
        .expect("cli runs")
}

fn run_json(args: &[&str]) -> Value {
    let output = run(args);
    assert!(output.status.success(), "cli exited unsuccessfully: {:?}", output);
    let stdout = String::from_utf8(output.stdout).expect("stdout is utf8");
    serde_json::from_str(&stdout).expect("stdout is valid json")
}

#[test]
fn cli_derives_mnemonic_addresses() {
    let json = run_json(&["addresses", "--mnemonic", WORDS, "--network", "test"]);
    let first = &json[0];
    assert_eq!(first["index"], 0);
    assert_eq!(first["path"], "m/82'/1'/0'/0/0");
    assert_eq!(
        first["public_key"],
        "02f95384cab585e9c4fbc3461e9d7de5a94211150fb22b15ec46913103ccde9b8b"
    );
    assert_eq!(
        first["addresses"]["segwit"]["address"],
        "tb1qxnzjxax8j49n3e275yqyr040jtyphzm33x5nyx"
    );
    assert_eq!(
        first["addresses"]["taproot"]["address"],
        "tb1pgzg7sw699zr8vah3zplpxt0cm6cyr87xm9272lkjct9el736rvpsgr8m8u"
    );
}

#[test]
fn cli_selects_index_range() {
    let json = run_json(&["addresses", "--mnemonic", WORDS, "--index", "2", "--count", "2"]);
    let entries = json.as_array().expect("array of keys");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["index"], 2);
    assert_eq!(entries[1]["path"], "m/82'/0'/0'/0/3");
}

#[test]
fn cli_derives_from_pubkey() {
    let json = run_json(&[
        "addresses",
        "--pubkey",
        "0296976794727c7c6959eb8375035cc7bfbcdf3c9999e7b782d1f59f5b04d64e88",
    ]);
    assert_eq!(
        json["addresses"]["legacy"]["address"],
        "1Lgeairny9zPpYVDeF69Mo7zXCMetUGo5Z"
    );
    assert_eq!(
        json["addresses"]["nested"]["address"],
        "31sDqn3YjTezMnbLJ8me9RMyFTr5PHwdkM"
    );
}

#[test]
fn cli_estimates_fee() {
    let json = run_json(&[
        "estimate",
        "--input-class",
        "p2wpkh",
        "--inputs",
        "1",
        "--output",
        "p2wpkh",
        "--output",
        "p2wpkh",
        "--fee-rate",
        "1",
    ]);
    assert_eq!(json["estimate"]["vbytes"], 140.5);
    assert_eq!(json["estimate"]["fee"], 141);
    assert_eq!(json["outputs"]["p2wpkh"], 2);
}

#[test]
fn cli_decodes_address() {
    let json = run_json(&["decode-address", "bc1q6l5lhkguf6chx2hhcp28swusghcdsyyxh8mfl2"]);
    assert_eq!(json["type"], "segwit");
    assert_eq!(json["class"], "witness_v0_key_hash");
    assert_eq!(json["network"], "main");
    assert!(json["script"].as_str().expect("script hex").starts_with("0014"));
}

#[test]
fn cli_rejects_bad_input() {
    assert!(!run(&["decode-address", "not-an-address"]).status.success());
    assert!(!run(&["estimate", "--output", "p2wpkh", "--fee-rate", "0"]).status.success());
    assert!(!run(&["addresses", "--mnemonic", "abandon abandon"]).status.success());
    assert!(!run(&["mpc-demo", "--message", "abcd"]).status.success());
}

#[test]
fn cli_runs_two_party_sessions() {
    let message = "11".repeat(32);
    for scheme in ["ecdsa", "schnorr"] {
        let mut args = vec!["mpc-demo", "--message", message.as_str()];
        if scheme == "schnorr" {
            args.push("--schnorr");
        }
        let json = run_json(&args);
        assert_eq!(json["scheme"], scheme);
        assert_eq!(json["verified"], true);
        assert_eq!(json["message"], message.as_str());
    }
}
