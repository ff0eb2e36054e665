//! End to end runs of the PSBT roles.

#![cfg(feature = "std")]

mod util;

use bitcoin_txkit::address;
use bitcoin_txkit::bitcoin::bip32::{ChildNumber, DerivationPath};
use bitcoin_txkit::crypto::{hash160, sha256};
use bitcoin_txkit::payments::{self, Payment, PaymentOpts};
use bitcoin_txkit::psbt::{Input, PsbtError, PsbtTxInput, PsbtTxOutput, SignError};
use bitcoin_txkit::script::{self, Chunk};
use bitcoin_txkit::transaction::{Transaction, TxOutput};
use bitcoin_txkit::{EccLib, HdKeyPair, HdSigner, Psbt, PsbtOpts, SighashType};

use self::util::{assert_parse_round_trip, key, single_input_psbt};

fn p2wpkh_script(pubkey: &[u8]) -> Vec<u8> { address::witness_script(0x00, &hash160(pubkey)) }

#[test]
fn p2wpkh_through_every_role() {
    let alice = key(1);
    let mut psbt = Psbt::new(PsbtOpts::default());
    psbt.add_input(PsbtTxInput { hash: [7; 32], index: 1, sequence: None }, Input::default())
        .unwrap();
    psbt.add_output(PsbtTxOutput { script: vec![0x51], value: 49_000 }, Default::default())
        .unwrap();
    psbt.update_input(
        0,
        Input {
            witness_utxo: Some(TxOutput { script: p2wpkh_script(alice.public_key()), value: 50_000 }),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(psbt.get_input_type(0).unwrap(), "witnesspubkeyhash");

    psbt.sign_input(0, &alice, None).unwrap();
    assert_eq!(psbt.validate_signatures_of_all_inputs(), Ok(true));
    assert_parse_round_trip(&psbt);
    let sig = psbt.inputs()[0].partial_sigs[alice.public_key()].clone();

    psbt.finalize_input(0).unwrap();
    let tx = psbt.extract_transaction(false).unwrap();

    let mut expected = Transaction { version: 2, ..Default::default() };
    expected.add_input([7; 32], 1, None, None);
    expected.ins[0].witness = vec![sig, alice.public_key().to_vec()];
    expected.add_output(vec![0x51], 49_000);
    assert_eq!(tx.get_id(), expected.get_id());
    assert_eq!(tx.to_hex(), expected.to_hex());
    assert_eq!(psbt.get_fee(), Ok(1_000));

    assert_eq!(psbt.finalize_input(0), Err(PsbtError::InputFinalized(0)));
    assert_eq!(psbt.sign_input(0, &alice, None), Err(SignError::InputFinalized(0)));
}

#[test]
fn p2sh_multisig_two_of_three() {
    let keys = [key(1), key(2), key(3)];
    let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| k.public_key().to_vec()).collect();
    let ms = payments::p2ms(
        Payment { m: Some(2), pubkeys: Some(pubkeys.clone()), ..Default::default() },
        PaymentOpts::default(),
    )
    .unwrap();
    let redeem_script = ms.output.clone().unwrap();
    let p2sh = payments::p2sh(
        Payment { redeem: Some(Box::new(ms)), ..Default::default() },
        PaymentOpts::default(),
    )
    .unwrap();

    let mut prev = Transaction::default();
    prev.add_input([3; 32], 0, None, None);
    prev.add_output(p2sh.output.unwrap(), 200_000);

    let mut psbt = Psbt::new(PsbtOpts::default());
    psbt.add_input(
        PsbtTxInput { hash: prev.get_hash(false), index: 0, sequence: None },
        Input {
            non_witness_utxo: Some(prev),
            redeem_script: Some(redeem_script.clone()),
            ..Default::default()
        },
    )
    .unwrap();
    psbt.add_output(PsbtTxOutput { script: vec![0x51], value: 190_000 }, Default::default())
        .unwrap();
    assert_eq!(psbt.get_input_type(0).unwrap(), "p2sh-multisig");

    psbt.sign_input(0, &keys[2], None).unwrap();
    let sig3 = psbt.inputs()[0].partial_sigs[&pubkeys[2]].clone();
    let partial = payments::p2ms(
        Payment {
            output: Some(redeem_script.clone()),
            signatures: Some(vec![sig3.clone()]),
            ..Default::default()
        },
        PaymentOpts { allow_incomplete: true, ..Default::default() },
    )
    .unwrap();
    assert_eq!(partial.signatures.as_ref().map(Vec::len), Some(1));
    assert_eq!(partial.m, Some(2));
    assert_eq!(psbt.finalize_input(0), Err(PsbtError::CannotFinalize(0)));

    psbt.sign_input(0, &keys[0], None).unwrap();
    let sig1 = psbt.inputs()[0].partial_sigs[&pubkeys[0]].clone();
    assert_eq!(psbt.validate_signatures_of_input(0, None), Ok(true));
    psbt.finalize_all_inputs().unwrap();

    let script_sig = psbt.inputs()[0].final_script_sig.clone().unwrap();
    assert_eq!(
        script::decompile(&script_sig).unwrap(),
        vec![Chunk::Op(0x00), Chunk::push(sig1), Chunk::push(sig3), Chunk::push(redeem_script)]
    );
    assert!(psbt.extract_transaction(false).is_ok());
}

#[test]
fn p2sh_p2wsh_p2pk() {
    let bob = key(4);
    let witness_script =
        script::compile(&[Chunk::push(bob.public_key()), Chunk::Op(0xac)]);
    let redeem_script = address::witness_script(0x00, &sha256(&witness_script));
    let script = address::p2sh_script(&hash160(&redeem_script));

    let mut psbt = single_input_psbt(
        script,
        10_000,
        9_000,
        Input {
            redeem_script: Some(redeem_script.clone()),
            witness_script: Some(witness_script.clone()),
            ..Default::default()
        },
    );
    assert_eq!(psbt.get_input_type(0).unwrap(), "p2sh-p2wsh-pubkey");
    assert!(psbt.input_has_pubkey(0, bob.public_key()).unwrap());

    psbt.sign_input(0, &bob, None).unwrap();
    psbt.finalize_input(0).unwrap();

    let input = &psbt.inputs()[0];
    assert_eq!(
        input.final_script_sig.clone().unwrap(),
        script::compile(&[Chunk::push(redeem_script)])
    );
    let witness = input.final_script_witness.clone().unwrap();
    assert_eq!(witness.len(), 2);
    assert_eq!(witness[1], witness_script);
    assert_eq!(psbt.get_input_type(0).unwrap(), "p2sh-p2wsh-pubkey");
}

#[test]
fn fee_rate_guard() {
    let alice = key(1);
    let mut psbt = single_input_psbt(p2wpkh_script(alice.public_key()), 1_000_000, 1_000, Input::default());
    psbt.sign_input(0, &alice, None).unwrap();
    psbt.finalize_input(0).unwrap();

    match psbt.extract_transaction(false) {
        Err(PsbtError::AbsurdFee { fee, fee_rate, .. }) => {
            assert!(fee_rate >= 5000);
            assert!(fee <= 999_000);
        }
        other => panic!("expected an absurd fee, got {:?}", other),
    }
    assert!(psbt.extract_transaction(true).is_ok());

    psbt.set_maximum_fee_rate(100_000);
    assert!(psbt.extract_transaction(false).is_ok());
}

#[test]
fn combine_independent_signers() {
    let keys = [key(1), key(2)];
    let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| k.public_key().to_vec()).collect();
    let ms = payments::p2ms(
        Payment { m: Some(2), pubkeys: Some(pubkeys), ..Default::default() },
        PaymentOpts::default(),
    )
    .unwrap();
    let witness_script = ms.output.unwrap();
    let script = address::witness_script(0x00, &sha256(&witness_script));
    let base = single_input_psbt(
        script,
        50_000,
        40_000,
        Input { witness_script: Some(witness_script), ..Default::default() },
    );

    let mut first = base.clone();
    first.sign_input(0, &keys[0], None).unwrap();
    let mut second = Psbt::from_hex(&base.to_hex(), PsbtOpts::default()).unwrap();
    second.sign_input(0, &keys[1], None).unwrap();

    first.combine(second).unwrap();
    assert_eq!(first.inputs()[0].partial_sigs.len(), 2);
    first.finalize_all_inputs().unwrap();
    let witness = first.inputs()[0].final_script_witness.clone().unwrap();
    // OP_0 placeholder, two signatures, witness script.
    assert_eq!(witness.len(), 4);
    assert!(witness[0].is_empty());

    let mut other_tx = base.clone();
    other_tx.set_locktime(500).unwrap();
    assert_eq!(first.combine(other_tx), Err(PsbtError::CombineMismatch));
}

#[test]
fn async_signing() {
    let alice = key(9);
    let mut psbt = single_input_psbt(p2wpkh_script(alice.public_key()), 20_000, 19_000, Input::default());
    futures::executor::block_on(psbt.sign_all_inputs_async(&alice, None)).unwrap();
    assert_eq!(psbt.validate_signatures_of_input(0, Some(alice.public_key())), Ok(true));

    let other = key(10);
    let err = futures::executor::block_on(psbt.sign_all_inputs_async(&other, None));
    assert_eq!(err, Err(SignError::NoInputsSigned));
}

#[test]
fn hd_signing_all_inputs() {
    let ecc = EccLib::default();
    let root = HdKeyPair::from_seed(&ecc, &[42; 32], bitcoin_txkit::bitcoin::Network::Bitcoin).unwrap();
    let path: DerivationPath = vec![
        ChildNumber::from_hardened_idx(84).unwrap(),
        ChildNumber::from_hardened_idx(0).unwrap(),
        ChildNumber::from_normal_idx(5).unwrap(),
    ]
    .into();
    let child = HdSigner::derive_path(&root, &path).unwrap();

    let mut fields = Input::default();
    fields
        .bip32_derivations
        .insert(child.public_key().to_vec(), (HdSigner::fingerprint(&root), path));
    let mut psbt = single_input_psbt(p2wpkh_script(child.public_key()), 20_000, 19_000, fields);
    assert!(psbt.input_has_hd_key(0, &root).unwrap());

    futures::executor::block_on(psbt.sign_all_inputs_hd_async(&root, None)).unwrap();
    assert_eq!(psbt.validate_signatures_of_all_inputs(), Ok(true));
    psbt.finalize_all_inputs().unwrap();
    assert!(psbt.extract_transaction(false).is_ok());
}

#[test]
fn taproot_key_path_spend() {
    let ecc = EccLib::default();
    let internal = key(11);
    let p2tr = payments::p2tr(
        Payment { internal_pubkey: Some(internal.x_only_public_key().to_vec()), ..Default::default() },
        PaymentOpts::default(),
        &ecc,
    )
    .unwrap();
    let mut psbt = single_input_psbt(
        p2tr.output.unwrap(),
        30_000,
        29_000,
        Input { tap_internal_key: Some(internal.x_only_public_key()), ..Default::default() },
    );
    assert_eq!(psbt.get_input_type(0).unwrap(), "taproot");

    let tweaked = internal.tap_tweak(None).unwrap();
    psbt.sign_input(0, &tweaked, Some(&[SighashType::DEFAULT])).unwrap();
    assert_eq!(psbt.validate_signatures_of_input(0, None), Ok(true));
    psbt.finalize_input(0).unwrap();

    let tx = psbt.extract_transaction(false).unwrap();
    assert_eq!(tx.ins[0].witness.len(), 1);
    assert_eq!(tx.ins[0].witness[0].len(), 64);
}

#[test]
fn signatures_verify_with_libsecp256k1() {
    use secp256k1::{ecdsa, schnorr, Message, PublicKey, XOnlyPublicKey, SECP256K1};

    let alice = key(12);
    let script = p2wpkh_script(alice.public_key());
    let mut psbt = single_input_psbt(script, 40_000, 39_000, Input::default());
    psbt.sign_input(0, &alice, None).unwrap();

    let sig = &psbt.inputs()[0].partial_sigs[alice.public_key()];
    let (der, hash_type) = sig.split_at(sig.len() - 1);
    let script_code = address::p2pkh_script(&hash160(alice.public_key()));
    assert!(matches!(psbt.extract_transaction(true), Err(PsbtError::NotFinalized)));

    let hash = unsigned_of(&psbt)
        .hash_for_witness_v0(0, &script_code, 40_000, u32::from(hash_type[0]))
        .unwrap();
    let msg = Message::from_digest_slice(&hash).unwrap();
    let sig = ecdsa::Signature::from_der(der).unwrap();
    let pk = PublicKey::from_slice(alice.public_key()).unwrap();
    assert!(SECP256K1.verify_ecdsa(&msg, &sig, &pk).is_ok());

    // Key path spend of a taproot output.
    let ecc = EccLib::default();
    let internal = key(13);
    let tweaked = internal.tap_tweak(None).unwrap();
    let output = address::witness_script(0x51, &tweaked.x_only_public_key());
    let mut psbt = single_input_psbt(
        output.clone(),
        40_000,
        39_000,
        Input { tap_internal_key: Some(internal.x_only_public_key()), ..Default::default() },
    );
    psbt.sign_input(0, &tweaked, None).unwrap();
    let tap_sig = psbt.inputs()[0].tap_key_sig.clone().unwrap();
    let hash = unsigned_of(&psbt)
        .hash_for_witness_v1(0, &[output], &[40_000], 0, None, None)
        .unwrap();
    let msg = Message::from_digest_slice(&hash).unwrap();
    let sig = schnorr::Signature::from_slice(&tap_sig).unwrap();
    let xonly = XOnlyPublicKey::from_slice(&tweaked.x_only_public_key()).unwrap();
    assert!(SECP256K1.verify_schnorr(&sig, &msg, &xonly).is_ok());
    assert!(ecc.verify_schnorr(&hash, &tweaked.x_only_public_key(), &tap_sig[..].try_into().unwrap()));
}

/// The unsigned transaction of `psbt`, rebuilt from its getters.
fn unsigned_of(psbt: &Psbt) -> Transaction {
    let mut tx = Transaction { version: psbt.version(), locktime: psbt.locktime(), ..Default::default() };
    for txin in psbt.tx_inputs() {
        tx.add_input(txin.hash, txin.index, txin.sequence, None);
    }
    for txout in psbt.tx_outputs() {
        tx.add_output(txout.script, txout.value);
    }
    tx
}
