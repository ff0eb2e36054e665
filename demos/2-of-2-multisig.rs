//! PSBT 2 of 2 multisig example.
//!
//! Alice and Bob each spend a native segwit v0 output of their own to a native segwit v0 2 of 2
//! multisig output. Each of them signs their own input on their own copy of the PSBT, the copies
//! are then combined, finalized and the transaction extracted.

use bitcoin_txkit::crypto::hash160;
use bitcoin_txkit::ecc::EccLib;
use bitcoin_txkit::keypair::{KeyPair, KeyPairOpts};
use bitcoin_txkit::payments::{p2ms, p2wsh, Payment, PaymentOpts};
use bitcoin_txkit::psbt::{Input, PsbtTxInput, PsbtTxOutput};
use bitcoin_txkit::transaction::TxOutput;
use bitcoin_txkit::{address, Psbt, PsbtOpts};

const DUMMY_UTXO_AMOUNT: u64 = 20_000_000;
const FEE: u64 = 1_000; // Usually this would be calculated.

fn main() -> anyhow::Result<()> {
    let ecc = EccLib::default();
    let alice = KeyPair::from_private_key(&ecc, &[0xa1; 32], KeyPairOpts::default())?;
    let bob = KeyPair::from_private_key(&ecc, &[0xb0; 32], KeyPairOpts::default())?;

    // The multisig output both parties are paying into.
    let ms = p2ms(
        Payment {
            m: Some(2),
            pubkeys: Some(vec![alice.public_key().to_vec(), bob.public_key().to_vec()]),
            ..Default::default()
        },
        PaymentOpts::default(),
    )?;
    let multisig = p2wsh(Payment { redeem: Some(Box::new(ms)), ..Default::default() }, PaymentOpts::default())?;
    let multisig_script = multisig.output.clone().unwrap_or_default();
    println!("multisig address: {}", multisig.address.unwrap_or_default());

    // The creator builds the unsigned transaction, the updater adds what signers need.
    let mut psbt = Psbt::new(PsbtOpts::default());
    for (txid_byte, party) in [(0x01, &alice), (0x02, &bob)] {
        let script = address::witness_script(0x00, &hash160(party.public_key()));
        psbt.add_input(
            PsbtTxInput { hash: [txid_byte; 32], index: 0, sequence: Some(0xffff_fffd) },
            Input {
                witness_utxo: Some(TxOutput { script, value: DUMMY_UTXO_AMOUNT }),
                ..Default::default()
            },
        )?;
    }
    psbt.add_output(
        PsbtTxOutput { script: multisig_script.clone(), value: DUMMY_UTXO_AMOUNT * 2 - FEE },
        Default::default(),
    )?;
    println!("unsigned PSBT: {}", psbt.to_base64());

    // Each party signs a copy.
    let mut alice_copy = Psbt::from_base64(&psbt.to_base64(), PsbtOpts::default())?;
    alice_copy.sign_all_inputs(&alice, None)?;
    let mut bob_copy = Psbt::from_base64(&psbt.to_base64(), PsbtOpts::default())?;
    bob_copy.sign_all_inputs(&bob, None)?;

    // Combiner, finalizer and extractor.
    psbt.combine_all([alice_copy, bob_copy])?;
    if !psbt.validate_signatures_of_all_inputs()? {
        anyhow::bail!("invalid signature");
    }
    psbt.finalize_all_inputs()?;
    let tx = psbt.extract_transaction(false)?;

    assert_eq!(tx.outs[0].script, multisig_script);
    println!("fee rate: {} sat/vB", psbt.get_fee_rate()?);
    println!("txid: {}", tx.get_id());
    println!("raw transaction: {}", tx.to_hex());
    Ok(())
}
