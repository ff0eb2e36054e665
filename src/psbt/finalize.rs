// SPDX-License-Identifier: CC0-1.0

//! The finalizer role.
//!
//! Finalizing turns the partial signatures of an input into its final scriptSig and witness, then
//! drops every field only the signers needed.

use tracing::debug;

use super::error::PsbtError;
use super::map::input::{Input, TapLeafScript};
use super::scripts;
use super::Psbt;
use crate::classify;
use crate::error::FundingUtxoError;
use crate::payments::{self, Payment, PaymentOpts};
use crate::prelude::*;
use crate::script::signature;

/// The final scripts of an input.
struct FinalScripts {
    script_sig: Option<Vec<u8>>,
    witness: Option<Vec<Vec<u8>>>,
}

impl Psbt {
    /// Finalizes input `index`.
    ///
    /// Taproot inputs are finalized on the key path if a key signature is known, otherwise on
    /// the leaf with signatures and the shortest control block.
    ///
    /// Other inputs need a funding utxo unless a redeem or witness script says what is spent.
    pub fn finalize_input(&mut self, index: usize) -> Result<(), PsbtError> {
        self.finalize(index, None)
    }

    /// Finalizes taproot input `index`, spending through the leaf `leaf_hash` if given.
    pub fn finalize_taproot_input(
        &mut self,
        index: usize,
        leaf_hash: Option<&[u8; 32]>,
    ) -> Result<(), PsbtError> {
        if !self.checked_input(index)?.is_taproot() {
            return Err(PsbtError::NotTaproot(index));
        }
        self.finalize(index, leaf_hash)
    }

    /// Finalizes every input, stopping at the first that can not be.
    pub fn finalize_all_inputs(&mut self) -> Result<(), PsbtError> {
        for index in 0..self.inputs.len() {
            self.finalize_input(index)?;
        }
        Ok(())
    }

    fn finalize(&mut self, index: usize, leaf_hash: Option<&[u8; 32]>) -> Result<(), PsbtError> {
        let input = self.checked_input(index)?;
        if input.is_finalized() {
            return Err(PsbtError::InputFinalized(index));
        }

        let FinalScripts { script_sig, witness } = if input.is_taproot() {
            taproot_final_scripts(index, input, leaf_hash)?
        } else {
            let utxo_script = match self.funding_utxo(index) {
                Ok(utxo) => utxo.script.clone(),
                Err(FundingUtxoError::MissingUtxo)
                    if input.witness_script.is_some() || input.redeem_script.is_some() =>
                    Vec::new(),
                Err(e) => return Err(e.into()),
            };
            ecdsa_final_scripts(index, input, &utxo_script)?
        };

        let input = &mut self.inputs[index];
        input.final_script_sig = script_sig;
        input.final_script_witness = witness;
        input.clear_finalized();
        self.invalidate();
        debug!(index, "input finalized");
        Ok(())
    }
}

fn ecdsa_final_scripts(
    index: usize,
    input: &Input,
    utxo_script: &[u8],
) -> Result<FinalScripts, PsbtError> {
    let script = match (&input.witness_script, &input.redeem_script) {
        (Some(witness_script), _) => &witness_script[..],
        (None, Some(redeem_script)) => &redeem_script[..],
        (None, None) if !utxo_script.is_empty() => utxo_script,
        (None, None) => return Err(PsbtError::NoScript(index)),
    };
    let is_p2sh = input.redeem_script.is_some();
    let is_p2wsh = input.witness_script.is_some();
    let is_segwit = is_p2wsh || classify::is_p2wpkh_output(script);

    if let Some(sighash_type) = input.sighash_type {
        for sig in input.partial_sigs.values() {
            let decoded = signature::decode(sig)?;
            if u32::from(decoded.hash_type) != sighash_type.to_u32() {
                return Err(PsbtError::SighashMismatch);
            }
        }
    }

    let mut payment = match scripts::classify_script(script) {
        "multisig" => multisig_payment(index, script, input)?,
        kind @ ("pubkey" | "pubkeyhash" | "witnesspubkeyhash") => {
            let (pubkey, sig) = single_signature(index, input)?;
            let a = Payment {
                output: Some(script.to_vec()),
                pubkey: Some(pubkey.clone()),
                signature: Some(sig.clone()),
                ..Default::default()
            };
            match kind {
                "pubkey" => payments::p2pk(a, PaymentOpts::default())?,
                "pubkeyhash" => payments::p2pkh(a, PaymentOpts::default())?,
                _ => payments::p2wpkh(a, PaymentOpts::default())?,
            }
        }
        _ => return Err(PsbtError::CannotFinalize(index)),
    };

    if is_p2wsh {
        payment = payments::p2wsh(
            Payment { redeem: Some(Box::new(payment)), ..Default::default() },
            PaymentOpts::default(),
        )?;
    }
    if is_p2sh {
        payment = payments::p2sh(
            Payment { redeem: Some(Box::new(payment)), ..Default::default() },
            PaymentOpts::default(),
        )?;
    }

    if is_segwit {
        Ok(FinalScripts {
            script_sig: if is_p2sh { payment.input } else { None },
            witness: payment.witness.filter(|witness| !witness.is_empty()),
        })
    } else {
        Ok(FinalScripts { script_sig: payment.input, witness: None })
    }
}

/// The only partial signature of an input spending a single key.
fn single_signature(index: usize, input: &Input) -> Result<(&Vec<u8>, &Vec<u8>), PsbtError> {
    let mut sigs = input.partial_sigs.iter();
    match (sigs.next(), sigs.next()) {
        (Some(only), None) => Ok(only),
        (Some(_), Some(_)) => Err(PsbtError::TooManySignatures),
        (None, _) => Err(PsbtError::CannotFinalize(index)),
    }
}

/// A multisig spend with exactly `m` signatures, ordered like their keys in `script`.
fn multisig_payment(index: usize, script: &[u8], input: &Input) -> Result<Payment, PsbtError> {
    let decoded = payments::p2ms(
        Payment { output: Some(script.to_vec()), ..Default::default() },
        PaymentOpts::default(),
    )?;
    let (m, pubkeys) = match (decoded.m, decoded.pubkeys) {
        (Some(m), Some(pubkeys)) => (m, pubkeys),
        _ => return Err(PsbtError::CannotFinalize(index)),
    };

    let signatures: Vec<Vec<u8>> =
        pubkeys.iter().filter_map(|pubkey| input.partial_sigs.get(pubkey)).cloned().collect();
    if signatures.len() > m {
        return Err(PsbtError::TooManySignatures);
    }
    if signatures.len() < m {
        return Err(PsbtError::CannotFinalize(index));
    }

    Ok(payments::p2ms(
        Payment { output: Some(script.to_vec()), signatures: Some(signatures), ..Default::default() },
        PaymentOpts::default(),
    )?)
}

fn taproot_final_scripts(
    index: usize,
    input: &Input,
    leaf_hash: Option<&[u8; 32]>,
) -> Result<FinalScripts, PsbtError> {
    if input.witness_utxo.is_none() {
        return Err(PsbtError::MissingWitnessUtxo(index));
    }
    if let (Some(sig), None) = (&input.tap_key_sig, leaf_hash) {
        return Ok(FinalScripts { script_sig: None, witness: Some(vec![sig.clone()]) });
    }

    let (control_block, leaf) = tap_leaf_to_finalize(index, input, leaf_hash)?;
    let this_leaf = leaf.leaf_hash();
    let mut sigs: Vec<(Option<usize>, &Vec<u8>)> = input
        .tap_script_sigs
        .iter()
        .filter(|((_, sig_leaf), _)| *sig_leaf == this_leaf)
        .map(|((key, _), sig)| (scripts::pubkey_position_in_script(key, &leaf.script), sig))
        .collect();
    // Signatures are consumed from the top of the stack, the last key first.
    sigs.sort_by(|a, b| b.0.cmp(&a.0));

    let mut witness: Vec<Vec<u8>> = sigs.into_iter().map(|(_, sig)| sig.clone()).collect();
    witness.push(leaf.script.clone());
    witness.push(control_block.clone());
    Ok(FinalScripts { script_sig: None, witness: Some(witness) })
}

/// The leaf to spend: `leaf_hash` if given, else the signed leaf with the shortest control block.
fn tap_leaf_to_finalize<'a>(
    index: usize,
    input: &'a Input,
    leaf_hash: Option<&[u8; 32]>,
) -> Result<(&'a Vec<u8>, &'a TapLeafScript), PsbtError> {
    if input.tap_script_sigs.is_empty() {
        return Err(PsbtError::NoTapScriptSignature(index));
    }
    let signed = |leaf: &TapLeafScript| {
        let hash = leaf.leaf_hash();
        input.tap_script_sigs.keys().any(|(_, sig_leaf)| *sig_leaf == hash)
    };

    let found = match leaf_hash {
        Some(wanted) => input
            .tap_leaf_scripts
            .iter()
            .find(|(_, leaf)| leaf.leaf_hash() == *wanted && signed(leaf)),
        None => input
            .tap_leaf_scripts
            .iter()
            .filter(|(_, leaf)| signed(leaf))
            .min_by_key(|(control_block, _)| control_block.len()),
    };
    found.ok_or(PsbtError::TapLeafSignatureNotFound(index))
}
