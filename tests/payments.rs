//! Payment templates used from outside the crate.

#![cfg(feature = "std")]

mod util;

use bitcoin_txkit::address;
use bitcoin_txkit::crypto::hash160;
use bitcoin_txkit::network;
use bitcoin_txkit::payments::{p2ms, p2pkh, p2sh, p2tr, p2wpkh, p2wsh, Payment, PaymentError, PaymentOpts};
use bitcoin_txkit::taproot::{self, Taptree};
use bitcoin_txkit::EccLib;

use self::util::{hex, key};

/// Compressed generator point, the public key of private key 1.
const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

#[test]
fn p2pkh_from_pubkey() {
    let pubkey = hex(G);
    let payment =
        p2pkh(Payment { pubkey: Some(pubkey.clone()), ..Default::default() }, PaymentOpts::default())
            .unwrap();
    assert_eq!(payment.address.as_deref(), Some("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"));

    let decoded =
        p2pkh(Payment { output: payment.output, ..Default::default() }, PaymentOpts::default())
            .unwrap();
    assert_eq!(decoded.hash, Some(hash160(&pubkey).to_vec()));
    assert_eq!(decoded.address.as_deref(), Some("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"));
}

#[test]
fn p2wpkh_from_pubkey() {
    let payment =
        p2wpkh(Payment { pubkey: Some(hex(G)), ..Default::default() }, PaymentOpts::default())
            .unwrap();
    assert_eq!(payment.address.as_deref(), Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"));
    assert_eq!(payment.output.as_ref().map(|o| o.len()), Some(22));

    let script = address::to_output_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", &network::BITCOIN)
        .unwrap();
    assert_eq!(Some(script), payment.output);
}

#[test]
fn nested_names() {
    let pubkeys: Vec<Vec<u8>> = (1..=3).map(|n| key(n).public_key().to_vec()).collect();
    let ms = p2ms(Payment { m: Some(2), pubkeys: Some(pubkeys), ..Default::default() }, PaymentOpts::default())
        .unwrap();
    assert_eq!(ms.n, Some(3));
    let wsh = p2wsh(Payment { redeem: Some(Box::new(ms)), ..Default::default() }, PaymentOpts::default())
        .unwrap();
    assert!(wsh.address.as_deref().unwrap().starts_with("bc1q"));
    let sh = p2sh(Payment { redeem: Some(Box::new(wsh)), ..Default::default() }, PaymentOpts::default())
        .unwrap();
    assert_eq!(sh.name.as_deref(), Some("p2sh-p2wsh-p2ms(2 of 3)"));
    assert!(sh.address.as_deref().unwrap().starts_with('3'));
}

#[test]
fn p2ms_needs_enough_data() {
    assert_eq!(p2ms(Payment::default(), PaymentOpts::default()), Err(PaymentError::NotEnoughData));
}

#[test]
fn p2tr_script_tree() {
    let ecc = EccLib::default();
    let internal = key(1).x_only_public_key();
    let tree = Taptree::branch(Taptree::leaf(vec![0x51]), Taptree::leaf(vec![0x52]));
    let payment = p2tr(
        Payment { internal_pubkey: Some(internal.to_vec()), script_tree: Some(tree.clone()), ..Default::default() },
        PaymentOpts::default(),
        &ecc,
    )
    .unwrap();
    assert_eq!(payment.hash, Some(taproot::compute_mast_root(&tree).to_vec()));
    assert!(payment.address.as_deref().unwrap().starts_with("bc1p"));

    let from_address = p2tr(
        Payment { address: payment.address.clone(), ..Default::default() },
        PaymentOpts::default(),
        &ecc,
    )
    .unwrap();
    assert_eq!(from_address.output, payment.output);
    assert_eq!(from_address.pubkey, payment.pubkey);
}
