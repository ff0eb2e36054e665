#![cfg(feature = "std")]
// Functions in this file are all used but clippy complains still.
#![allow(dead_code)]

use bitcoin_txkit::bitcoin::hex::FromHex;
use bitcoin_txkit::ecc::EccLib;
use bitcoin_txkit::keypair::{KeyPair, KeyPairOpts};
use bitcoin_txkit::psbt::map::input::Input;
use bitcoin_txkit::psbt::{Psbt, PsbtOpts, PsbtTxInput, PsbtTxOutput};
use bitcoin_txkit::transaction::TxOutput;

#[track_caller]
pub fn hex(s: &str) -> Vec<u8> {
    match Vec::from_hex(s) {
        Ok(v) => v,
        Err(_e) => panic!("invalid hex string {}", s),
    }
}

/// Deterministic key `n`, its private key is `n` repeated 32 times.
#[track_caller]
pub fn key(n: u8) -> KeyPair {
    KeyPair::from_private_key(&EccLib::default(), &[n; 32], KeyPairOpts::default())
        .expect("valid private key")
}

/// A PSBT spending a dummy utxo of `utxo_value` paying to `script`, into an `OP_TRUE` output.
#[track_caller]
pub fn single_input_psbt(script: Vec<u8>, utxo_value: u64, out_value: u64, fields: Input) -> Psbt {
    let mut psbt = Psbt::new(PsbtOpts::default());
    let fields = Input {
        witness_utxo: Some(TxOutput { script, value: utxo_value }),
        ..fields
    };
    psbt.add_input(PsbtTxInput { hash: [0xab; 32], index: 0, sequence: None }, fields)
        .expect("valid input");
    psbt.add_output(PsbtTxOutput { script: vec![0x51], value: out_value }, Default::default())
        .expect("valid output");
    psbt
}

#[track_caller]
pub fn assert_parse_round_trip(psbt: &Psbt) {
    let parsed = Psbt::from_hex(&psbt.to_hex(), PsbtOpts::default()).expect("valid PSBT");
    assert_eq!(&parsed, psbt);
    #[cfg(feature = "base64")]
    {
        let parsed = Psbt::from_base64(&psbt.to_base64(), PsbtOpts::default()).expect("valid PSBT");
        assert_eq!(&parsed, psbt);
    }
}
