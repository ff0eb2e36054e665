// SPDX-License-Identifier: CC0-1.0

//! Legacy incremental transaction builder.
//!
//! Inputs are classified as they are added and expanded into public key and signature slots as
//! they are signed. Once any input carries a signature, changes that would invalidate it under
//! its sighash type are refused. [`TransactionBuilder::build`] assembles every scriptSig and
//! witness through the payment templates.

use core::fmt;

use bitcoin::hex::FromHex;
use tracing::{debug, warn};

use crate::address::{self, AddressError};
use crate::classify::{self, ScriptType};
use crate::crypto::hash160;
use crate::ecc::EccLib;
use crate::error::write_err;
use crate::network::Network;
use crate::payments::{self, Payment, PaymentError, PaymentOpts};
use crate::prelude::*;
use crate::script::signature::{self, SignatureError};
use crate::script::{self, Chunk};
use crate::signer::{Signer, SignerError};
use crate::transaction::{
    SighashError, Transaction, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};

/// Default fee rate ceiling of [`TransactionBuilder::build`], in satoshis per virtual byte.
pub const DEFAULT_MAXIMUM_FEE_RATE: u64 = 2500;

/// Per input state collected while building.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct TxbInput {
    value: Option<u64>,
    has_witness: Option<bool>,
    sign_script: Option<Vec<u8>>,
    sign_type: Option<ScriptType>,
    prev_out_script: Option<Vec<u8>>,
    prev_out_type: Option<ScriptType>,
    redeem_script: Option<Vec<u8>>,
    redeem_script_type: Option<ScriptType>,
    witness_script: Option<Vec<u8>>,
    witness_script_type: Option<ScriptType>,
    /// Public key slots, a key may be unknown for inputs read from a scriptSig.
    pubkeys: Option<Vec<Option<Vec<u8>>>>,
    /// Signature slots, parallel to `pubkeys` once the input can be signed.
    signatures: Option<Vec<Option<Vec<u8>>>>,
    max_signatures: Option<usize>,
}

impl TxbInput {
    fn can_sign(&self) -> bool {
        match (&self.pubkeys, &self.signatures) {
            (Some(pubkeys), Some(signatures)) =>
                self.sign_script.is_some()
                    && self.sign_type.is_some()
                    && !pubkeys.is_empty()
                    && pubkeys.len() == signatures.len()
                    && (self.has_witness == Some(false) || self.value.is_some()),
            _ => false,
        }
    }

    fn has_signatures(&self) -> bool {
        self.signatures.as_ref().map_or(false, |s| s.iter().any(Option::is_some))
    }

    /// Hash types of the signatures present.
    fn hash_types(&self) -> impl Iterator<Item = u32> + '_ {
        self.signatures
            .iter()
            .flatten()
            .flatten()
            .filter_map(|sig| signature::hash_type_of(sig))
            .map(u32::from)
    }

    /// Overwrites every field `other` knows.
    fn assign(&mut self, other: TxbInput) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            value,
            has_witness,
            sign_script,
            sign_type,
            prev_out_script,
            prev_out_type,
            redeem_script,
            redeem_script_type,
            witness_script,
            witness_script_type,
            pubkeys,
            signatures,
            max_signatures
        );
    }
}

/// Optional arguments of [`TransactionBuilder::sign`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignOpts {
    /// P2SH redeem script, required to sign a P2SH input the first time.
    pub redeem_script: Option<Vec<u8>>,
    /// Sighash type, `SIGHASH_ALL` if absent.
    pub hash_type: Option<u32>,
    /// Value of the spent output, required for segwit inputs.
    pub witness_value: Option<u64>,
    /// P2WSH witness script, required to sign a P2WSH input the first time.
    pub witness_script: Option<Vec<u8>>,
}

/// Builds and signs a transaction one input at a time.
#[derive(Clone, Debug)]
pub struct TransactionBuilder {
    network: Network,
    maximum_fee_rate: u64,
    low_r: bool,
    prev_tx_set: BTreeSet<([u8; 32], u32)>,
    inputs: Vec<TxbInput>,
    tx: Transaction,
}

impl TransactionBuilder {
    /// Creates a builder for `network` with the default fee rate ceiling.
    pub fn new(network: Network) -> Self {
        Self::with_maximum_fee_rate(network, DEFAULT_MAXIMUM_FEE_RATE)
    }

    /// Creates a builder refusing to build transactions paying more than `maximum_fee_rate`
    /// satoshis per virtual byte.
    pub fn with_maximum_fee_rate(network: Network, maximum_fee_rate: u64) -> Self {
        let mut tx = Transaction::new();
        tx.version = 2;
        TransactionBuilder {
            network,
            maximum_fee_rate,
            low_r: false,
            prev_tx_set: BTreeSet::new(),
            inputs: vec![],
            tx,
        }
    }

    /// Loads a (partially) signed transaction, recovering the signature slots of every input.
    ///
    /// Multisig signatures are matched back to their public key with `ecc`.
    pub fn from_transaction(
        transaction: &Transaction,
        network: Network,
        ecc: &EccLib,
    ) -> Result<Self, BuilderError> {
        let mut txb = Self::new(network);
        txb.set_version(transaction.version)?;
        txb.set_lock_time(transaction.locktime)?;

        for out in &transaction.outs {
            txb.add_output(out.script.clone(), out.value)?;
        }
        for input in &transaction.ins {
            txb.add_input_unsafe(
                input.hash,
                input.index,
                Some(input.sequence),
                None,
                None,
                Some((&input.script[..], &input.witness[..])),
            )?;
        }
        for (vin, input) in txb.inputs.iter_mut().enumerate() {
            fix_multisig_order(input, transaction, vin, ecc)?;
        }
        Ok(txb)
    }

    /// Grind ECDSA signatures until `r` is low, saving a byte per signature.
    pub fn set_low_r(&mut self, low_r: bool) { self.low_r = low_r; }

    /// Sets the lock time, refused once any input is signed.
    pub fn set_lock_time(&mut self, locktime: u32) -> Result<(), BuilderError> {
        if self.inputs.iter().any(TxbInput::has_signatures) {
            return Err(BuilderError::InvalidatesSignatures);
        }
        self.tx.locktime = locktime;
        Ok(())
    }

    /// Sets the transaction version, refused once any input is signed.
    pub fn set_version(&mut self, version: i32) -> Result<(), BuilderError> {
        if self.inputs.iter().any(TxbInput::has_signatures) {
            return Err(BuilderError::InvalidatesSignatures);
        }
        self.tx.version = version;
        Ok(())
    }

    /// Spends output `vout` of the transaction with id `txid` (display byte order hex).
    pub fn add_input(
        &mut self,
        txid: &str,
        vout: u32,
        sequence: Option<u32>,
        prev_out_script: Option<Vec<u8>>,
    ) -> Result<usize, BuilderError> {
        let mut hash = <[u8; 32]>::from_hex(txid).map_err(|_| BuilderError::InvalidTxid(txid.to_owned()))?;
        hash.reverse();
        self.add_input_hash(hash, vout, sequence, prev_out_script)
    }

    /// Spends output `vout` of the transaction with hash `hash` (internal byte order).
    pub fn add_input_hash(
        &mut self,
        hash: [u8; 32],
        vout: u32,
        sequence: Option<u32>,
        prev_out_script: Option<Vec<u8>>,
    ) -> Result<usize, BuilderError> {
        if !self.can_modify_inputs() {
            return Err(BuilderError::InvalidatesSignatures);
        }
        self.add_input_unsafe(hash, vout, sequence, prev_out_script, None, None)
    }

    /// Spends output `vout` of `prev_tx`, learning its script and value.
    pub fn add_input_from_tx(
        &mut self,
        prev_tx: &Transaction,
        vout: u32,
        sequence: Option<u32>,
    ) -> Result<usize, BuilderError> {
        if !self.can_modify_inputs() {
            return Err(BuilderError::InvalidatesSignatures);
        }
        let out = prev_tx.outs.get(vout as usize).ok_or(BuilderError::NoOutput(vout))?;
        let (script, value) = (out.script.clone(), out.value);
        self.add_input_unsafe(prev_tx.get_hash(false), vout, sequence, Some(script), Some(value), None)
    }

    fn add_input_unsafe(
        &mut self,
        hash: [u8; 32],
        vout: u32,
        sequence: Option<u32>,
        prev_out_script: Option<Vec<u8>>,
        value: Option<u64>,
        spend: Option<(&[u8], &[Vec<u8>])>,
    ) -> Result<usize, BuilderError> {
        if Transaction::is_coinbase_hash(&hash) {
            return Err(BuilderError::CoinbaseInput);
        }
        if self.prev_tx_set.contains(&(hash, vout)) {
            return Err(BuilderError::DuplicateTxOut(format!("{}:{}", hash.to_lower_hex_string(), vout)));
        }

        let mut input = match spend {
            Some((script_sig, witness)) => expand_input(script_sig, witness, None, None)?,
            None => TxbInput::default(),
        };
        if value.is_some() {
            input.value = value;
        }
        if input.prev_out_script.is_none() {
            if let Some(prev_out_script) = prev_out_script {
                let expanded = expand_output(&prev_out_script, None)?;
                if expanded.pubkeys.is_some() {
                    input.pubkeys = expanded.pubkeys;
                    input.signatures = expanded.signatures;
                }
                input.prev_out_type = expanded.prev_out_type;
                input.prev_out_script = Some(prev_out_script);
            }
        }

        let vin = self.tx.add_input(hash, vout, sequence, None);
        self.inputs.push(input);
        self.prev_tx_set.insert((hash, vout));
        debug!(vin, vout, "input added");
        Ok(vin)
    }

    /// Adds an output paying `value` to `script`.
    pub fn add_output(&mut self, script: Vec<u8>, value: u64) -> Result<usize, BuilderError> {
        if !self.can_modify_outputs() {
            return Err(BuilderError::InvalidatesSignatures);
        }
        Ok(self.tx.add_output(script, value))
    }

    /// Adds an output paying `value` to `address`, which must belong to the builder's network.
    pub fn add_output_address(&mut self, address: &str, value: u64) -> Result<usize, BuilderError> {
        let script = address::to_output_script(address, &self.network)?;
        self.add_output(script, value)
    }

    /// Builds the transaction, every input must be fully signed.
    pub fn build(&self) -> Result<Transaction, BuilderError> { self.build_inner(false) }

    /// Builds the transaction with whatever signatures are present.
    pub fn build_incomplete(&self) -> Result<Transaction, BuilderError> { self.build_inner(true) }

    fn build_inner(&self, allow_incomplete: bool) -> Result<Transaction, BuilderError> {
        if !allow_incomplete {
            if self.tx.ins.is_empty() {
                return Err(BuilderError::NoInputs);
            }
            if self.tx.outs.is_empty() {
                return Err(BuilderError::NoOutputs);
            }
        }

        let mut tx = self.tx.clone();
        for (vin, input) in self.inputs.iter().enumerate() {
            let prev_out_type = match input.prev_out_type {
                Some(t) => t,
                None if allow_incomplete => continue,
                None => return Err(BuilderError::Incomplete),
            };
            match build_payment(prev_out_type, input, allow_incomplete)? {
                Some(payment) => {
                    tx.ins[vin].script = payment.input.unwrap_or_default();
                    tx.ins[vin].witness = payment.witness.unwrap_or_default();
                }
                None if allow_incomplete => {}
                None if prev_out_type == ScriptType::NonStandard =>
                    return Err(BuilderError::UnknownInputType),
                None => return Err(BuilderError::NotEnoughInformation),
            }
        }

        if !allow_incomplete && self.over_maximum_fees(tx.virtual_size()) {
            warn!(maximum_fee_rate = self.maximum_fee_rate, "refusing to build transaction with absurd fees");
            return Err(BuilderError::AbsurdFees);
        }
        Ok(tx)
    }

    /// Signs input `vin` with `signer`, filling every slot matching its public key.
    pub fn sign(&mut self, vin: usize, signer: &dyn Signer, opts: SignOpts) -> Result<(), BuilderError> {
        if signer.network().map_or(false, |n| n != self.network) {
            return Err(BuilderError::InconsistentNetwork);
        }
        if vin >= self.inputs.len() {
            return Err(BuilderError::NoInput(vin));
        }
        let hash_type = opts.hash_type.unwrap_or(SIGHASH_ALL);
        let hash_type_byte = u8::try_from(hash_type).map_err(|_| BuilderError::InvalidHashType(hash_type))?;
        if self.needs_outputs(hash_type) {
            return Err(BuilderError::NeedsOutputs);
        }

        let input = &mut self.inputs[vin];
        if let (Some(known), Some(given)) = (&input.redeem_script, &opts.redeem_script) {
            if known != given {
                return Err(BuilderError::InconsistentRedeemScript);
            }
        }

        let our_pubkey = signer.public_key();
        if !input.can_sign() {
            if let Some(witness_value) = opts.witness_value {
                if input.value.map_or(false, |v| v != witness_value) {
                    return Err(BuilderError::WitnessValueMismatch);
                }
                input.value = Some(witness_value);
            }
            if !input.can_sign() {
                let prepared = prepare_input(
                    input,
                    &our_pubkey,
                    opts.redeem_script.as_deref(),
                    opts.witness_script.as_deref(),
                )?;
                input.assign(prepared);
            }
            if !input.can_sign() {
                let name = input.prev_out_type.map_or("undefined", |t| t.as_str());
                return Err(BuilderError::NotSupported(format!("{} not supported", name)));
            }
        }

        let sign_script = input.sign_script.as_deref().unwrap_or_default();
        let has_witness = input.has_witness == Some(true);
        let signature_hash = if has_witness {
            let value = input.value.ok_or(BuilderError::WitnessValueMismatch)?;
            self.tx.hash_for_witness_v0(vin, sign_script, value, hash_type)?
        } else {
            self.tx.hash_for_signature(vin, sign_script, hash_type)
        };

        let pubkeys = input.pubkeys.clone().unwrap_or_default();
        let signatures = input.signatures.get_or_insert_with(Vec::new);
        let mut signed = false;
        for (i, pubkey) in pubkeys.iter().enumerate() {
            if pubkey.as_deref() != Some(our_pubkey.as_slice()) {
                continue;
            }
            if signatures.get(i).map_or(false, Option::is_some) {
                return Err(BuilderError::SignatureExists);
            }
            if our_pubkey.len() != 33 && has_witness {
                return Err(BuilderError::UncompressedWitnessKey);
            }
            let sig = signer.sign(&signature_hash, self.low_r)?;
            if let Some(slot) = signatures.get_mut(i) {
                *slot = Some(signature::encode(&sig, hash_type_byte)?);
                signed = true;
            }
        }
        if !signed {
            return Err(BuilderError::CannotSign);
        }
        debug!(vin, hash_type, "input signed");
        Ok(())
    }

    fn needs_outputs(&self, signing_hash_type: u32) -> bool {
        if signing_hash_type == SIGHASH_ALL {
            return self.tx.outs.is_empty();
        }
        // Outputs only matter to signatures committing to them.
        self.tx.outs.is_empty()
            && self.inputs.iter().any(|input| input.hash_types().any(|t| t & SIGHASH_NONE == 0))
    }

    fn can_modify_inputs(&self) -> bool {
        self.inputs.iter().all(|input| input.hash_types().all(|t| t & SIGHASH_ANYONECANPAY != 0))
    }

    fn can_modify_outputs(&self) -> bool {
        let n_inputs = self.tx.ins.len();
        let n_outputs = self.tx.outs.len();
        self.inputs.iter().all(|input| {
            input.hash_types().all(|t| match t & 0x1f {
                SIGHASH_NONE => true,
                // New outputs may not break the input to output pairing.
                SIGHASH_SINGLE => n_inputs <= n_outputs,
                _ => false,
            })
        })
    }

    fn over_maximum_fees(&self, vsize: usize) -> bool {
        let incoming: u128 = self.inputs.iter().map(|i| u128::from(i.value.unwrap_or(0))).sum();
        let outgoing: u128 = self.tx.outs.iter().map(|o| u128::from(o.value)).sum();
        match incoming.checked_sub(outgoing) {
            Some(fee) => fee > u128::from(self.maximum_fee_rate) * vsize as u128,
            None => false,
        }
    }
}

/// Recovers the slots of an input from its scriptSig and witness.
fn expand_input(
    script_sig: &[u8],
    witness: &[Vec<u8>],
    script_type: Option<ScriptType>,
    script_pubkey: Option<&[u8]>,
) -> Result<TxbInput, BuilderError> {
    if script_sig.is_empty() && witness.is_empty() {
        return Ok(TxbInput::default());
    }
    let script_type = script_type.unwrap_or_else(|| {
        let ss_type = classify::input(script_sig, true).filter(|t| *t != ScriptType::NonStandard);
        let ws_type = Some(classify::witness(witness, true)).filter(|t| *t != ScriptType::NonStandard);
        ss_type.or(ws_type).unwrap_or(ScriptType::NonStandard)
    });
    let opts = PaymentOpts::default();

    let single = |prev_out_script, pubkey: Option<Vec<u8>>, signature: Option<Vec<u8>>| TxbInput {
        prev_out_script,
        prev_out_type: Some(script_type),
        pubkeys: Some(vec![pubkey]),
        signatures: Some(vec![signature]),
        ..Default::default()
    };

    match script_type {
        ScriptType::P2WPKH => {
            let p = payments::p2wpkh(Payment { witness: Some(witness.to_vec()), ..Default::default() }, opts)?;
            Ok(single(p.output, p.pubkey, p.signature))
        }
        ScriptType::P2PKH => {
            let p = payments::p2pkh(Payment { input: Some(script_sig.to_vec()), ..Default::default() }, opts)?;
            Ok(single(p.output, p.pubkey, p.signature))
        }
        ScriptType::P2PK => {
            let p = payments::p2pk(Payment { input: Some(script_sig.to_vec()), ..Default::default() }, opts)?;
            Ok(single(None, None, p.signature))
        }
        ScriptType::P2MS => {
            let p = payments::p2ms(
                Payment {
                    input: Some(script_sig.to_vec()),
                    output: script_pubkey.map(<[u8]>::to_vec),
                    ..Default::default()
                },
                PaymentOpts { allow_incomplete: true, ..opts },
            )?;
            Ok(TxbInput {
                prev_out_type: Some(ScriptType::P2MS),
                pubkeys: p.pubkeys.map(|keys| keys.into_iter().map(Some).collect()),
                signatures: p
                    .signatures
                    .map(|sigs| sigs.into_iter().map(|s| Some(s).filter(|s| !s.is_empty())).collect()),
                max_signatures: p.m,
                ..Default::default()
            })
        }
        ScriptType::P2SH => {
            let p = payments::p2sh(
                Payment {
                    input: Some(script_sig.to_vec()),
                    witness: Some(witness.to_vec()),
                    ..Default::default()
                },
                opts,
            )?;
            let redeem = p.redeem.map(|r| *r).unwrap_or_default();
            let redeem_output = redeem.output.unwrap_or_default();
            let output_type = classify::output(&redeem_output);
            let expanded = expand_input(
                redeem.input.as_deref().unwrap_or_default(),
                redeem.witness.as_deref().unwrap_or_default(),
                Some(output_type),
                Some(&redeem_output),
            )?;
            if expanded.prev_out_type.is_none() {
                return Ok(TxbInput::default());
            }
            Ok(TxbInput {
                prev_out_script: p.output,
                prev_out_type: Some(ScriptType::P2SH),
                redeem_script: Some(redeem_output),
                redeem_script_type: expanded.prev_out_type,
                witness_script: expanded.witness_script,
                witness_script_type: expanded.witness_script_type,
                pubkeys: expanded.pubkeys,
                signatures: expanded.signatures,
                ..Default::default()
            })
        }
        ScriptType::P2WSH => {
            let p = payments::p2wsh(
                Payment {
                    input: Some(script_sig.to_vec()),
                    witness: Some(witness.to_vec()),
                    ..Default::default()
                },
                opts,
            )?;
            let redeem = p.redeem.map(|r| *r).unwrap_or_default();
            let redeem_output = redeem.output.unwrap_or_default();
            let redeem_witness = redeem.witness.unwrap_or_default();
            let output_type = classify::output(&redeem_output);
            let expanded = if output_type == ScriptType::P2WPKH {
                expand_input(
                    redeem.input.as_deref().unwrap_or_default(),
                    &redeem_witness,
                    Some(output_type),
                    None,
                )?
            } else {
                let stack: Vec<Chunk> = redeem_witness.into_iter().map(Chunk::Push).collect();
                expand_input(&script::compile(&stack), &[], Some(output_type), Some(&redeem_output))?
            };
            if expanded.prev_out_type.is_none() {
                return Ok(TxbInput::default());
            }
            Ok(TxbInput {
                prev_out_script: p.output,
                prev_out_type: Some(ScriptType::P2WSH),
                witness_script: Some(redeem_output),
                witness_script_type: expanded.prev_out_type,
                pubkeys: expanded.pubkeys,
                signatures: expanded.signatures,
                ..Default::default()
            })
        }
        _ => Ok(TxbInput {
            prev_out_type: Some(ScriptType::NonStandard),
            prev_out_script: Some(script_sig.to_vec()),
            ..Default::default()
        }),
    }
}

/// Slots of an output script, only for the templates `our_pubkey` (if given) can sign.
///
/// The script type lands in `prev_out_type`.
fn expand_output(script: &[u8], our_pubkey: Option<&[u8]>) -> Result<TxbInput, BuilderError> {
    let script_type = classify::output(script);
    let only_type = TxbInput { prev_out_type: Some(script_type), ..Default::default() };
    let single = |pubkey: Vec<u8>| TxbInput {
        prev_out_type: Some(script_type),
        pubkeys: Some(vec![Some(pubkey)]),
        signatures: Some(vec![None]),
        ..Default::default()
    };
    let from_output = || Payment { output: Some(script.to_vec()), ..Default::default() };
    let opts = PaymentOpts::default();

    match script_type {
        ScriptType::P2PKH | ScriptType::P2WPKH => {
            let our_pubkey = match our_pubkey {
                Some(pk) => pk,
                None => return Ok(only_type),
            };
            let p = if script_type == ScriptType::P2PKH {
                payments::p2pkh(from_output(), opts)?
            } else {
                payments::p2wpkh(from_output(), opts)?
            };
            if p.hash.as_deref() != Some(&hash160(our_pubkey)[..]) {
                return Ok(only_type);
            }
            Ok(single(our_pubkey.to_vec()))
        }
        ScriptType::P2PK => {
            let p = payments::p2pk(from_output(), opts)?;
            Ok(single(p.pubkey.unwrap_or_default()))
        }
        ScriptType::P2MS => {
            let p = payments::p2ms(from_output(), opts)?;
            let pubkeys = p.pubkeys.unwrap_or_default();
            Ok(TxbInput {
                prev_out_type: Some(script_type),
                signatures: Some(vec![None; pubkeys.len()]),
                pubkeys: Some(pubkeys.into_iter().map(Some).collect()),
                max_signatures: p.m,
                ..Default::default()
            })
        }
        _ => Ok(only_type),
    }
}

/// Works out how to sign an input from its previous output and the scripts supplied to `sign`.
fn prepare_input(
    input: &TxbInput,
    our_pubkey: &[u8],
    redeem_script: Option<&[u8]>,
    witness_script: Option<&[u8]>,
) -> Result<TxbInput, BuilderError> {
    let opts = PaymentOpts::default();
    let keep_signatures = |mut expanded: TxbInput| {
        if input.has_signatures() {
            expanded.signatures = input.signatures.clone();
        }
        expanded
    };
    let unsupported = |t: Option<ScriptType>, what: &str, script: &[u8]| {
        BuilderError::NotSupported(format!(
            "{} not supported{} ({})",
            t.map_or("undefined", |t| t.as_str()),
            what,
            script::script_to_asm(script).unwrap_or_default()
        ))
    };
    let with_output = |output: &[u8]| Payment { output: Some(output.to_vec()), ..Default::default() };

    match (redeem_script, witness_script) {
        (Some(redeem_script), Some(witness_script)) => {
            let p2wsh = payments::p2wsh(
                Payment { redeem: Some(Box::new(with_output(witness_script))), ..Default::default() },
                opts,
            )?;
            let p2wsh_alt = payments::p2wsh(with_output(redeem_script), opts)?;
            let p2sh = payments::p2sh(
                Payment { redeem: Some(Box::new(with_output(redeem_script))), ..Default::default() },
                opts,
            )?;
            let p2sh_alt = payments::p2sh(Payment { redeem: Some(Box::new(p2wsh.clone())), ..Default::default() }, opts)?;
            if p2wsh.hash != p2wsh_alt.hash {
                return Err(BuilderError::Rule("Witness script inconsistent with prevOutScript"));
            }
            if p2sh.hash != p2sh_alt.hash {
                return Err(BuilderError::Rule("Redeem script inconsistent with prevOutScript"));
            }

            let expanded = expand_output(witness_script, Some(our_pubkey))?;
            if expanded.pubkeys.is_none() {
                return Err(unsupported(expanded.prev_out_type, " as witnessScript", witness_script));
            }
            if expanded.prev_out_type == Some(ScriptType::P2WPKH) {
                return Err(BuilderError::Rule("P2SH(P2WSH(P2WPKH)) is a consensus failure"));
            }
            let expanded = keep_signatures(expanded);
            Ok(TxbInput {
                redeem_script: Some(redeem_script.to_vec()),
                redeem_script_type: Some(ScriptType::P2WSH),
                witness_script: Some(witness_script.to_vec()),
                witness_script_type: expanded.prev_out_type,
                prev_out_type: Some(ScriptType::P2SH),
                prev_out_script: p2sh.output,
                has_witness: Some(true),
                sign_script: Some(witness_script.to_vec()),
                sign_type: expanded.prev_out_type,
                ..expanded
            })
        }
        (Some(redeem_script), None) => {
            let p2sh = payments::p2sh(
                Payment { redeem: Some(Box::new(with_output(redeem_script))), ..Default::default() },
                opts,
            )?;
            if let Some(ref prev_out_script) = input.prev_out_script {
                let p2sh_alt = payments::p2sh(with_output(prev_out_script), opts)
                    .map_err(|_| BuilderError::Rule("PrevOutScript must be P2SH"))?;
                if p2sh.hash != p2sh_alt.hash {
                    return Err(BuilderError::Rule("Redeem script inconsistent with prevOutScript"));
                }
            }

            let expanded = expand_output(redeem_script, Some(our_pubkey))?;
            let pubkeys = match expanded.pubkeys {
                Some(ref pubkeys) => pubkeys.clone(),
                None => return Err(unsupported(expanded.prev_out_type, " as redeemScript", redeem_script)),
            };
            let is_p2wpkh = expanded.prev_out_type == Some(ScriptType::P2WPKH);
            let sign_script = if is_p2wpkh {
                p2pkh_script_of(pubkeys.first().cloned().flatten())?
            } else {
                Some(redeem_script.to_vec())
            };
            let expanded = keep_signatures(expanded);
            Ok(TxbInput {
                redeem_script: Some(redeem_script.to_vec()),
                redeem_script_type: expanded.prev_out_type,
                prev_out_type: Some(ScriptType::P2SH),
                prev_out_script: p2sh.output,
                has_witness: Some(is_p2wpkh),
                sign_script,
                sign_type: expanded.prev_out_type,
                ..expanded
            })
        }
        (None, Some(witness_script)) => {
            let p2wsh = payments::p2wsh(
                Payment { redeem: Some(Box::new(with_output(witness_script))), ..Default::default() },
                opts,
            )?;
            if let Some(ref prev_out_script) = input.prev_out_script {
                let p2wsh_alt = payments::p2wsh(with_output(prev_out_script), opts)?;
                if p2wsh.hash != p2wsh_alt.hash {
                    return Err(BuilderError::Rule("Witness script inconsistent with prevOutScript"));
                }
            }

            let expanded = expand_output(witness_script, Some(our_pubkey))?;
            if expanded.pubkeys.is_none() {
                return Err(unsupported(expanded.prev_out_type, " as witnessScript", witness_script));
            }
            if expanded.prev_out_type == Some(ScriptType::P2WPKH) {
                return Err(BuilderError::Rule("P2WSH(P2WPKH) is a consensus failure"));
            }
            let expanded = keep_signatures(expanded);
            Ok(TxbInput {
                witness_script: Some(witness_script.to_vec()),
                witness_script_type: expanded.prev_out_type,
                prev_out_type: Some(ScriptType::P2WSH),
                prev_out_script: p2wsh.output,
                has_witness: Some(true),
                sign_script: Some(witness_script.to_vec()),
                sign_type: expanded.prev_out_type,
                ..expanded
            })
        }
        (None, None) => {
            if let (Some(prev_out_type), Some(prev_out_script)) = (input.prev_out_type, &input.prev_out_script) {
                if prev_out_type == ScriptType::P2SH {
                    return Err(BuilderError::Rule("PrevOutScript is scripthash, requires redeemScript"));
                }
                if prev_out_type == ScriptType::P2WSH {
                    return Err(BuilderError::Rule(
                        "PrevOutScript is witnessscripthash, requires witnessScript",
                    ));
                }
                let expanded = expand_output(prev_out_script, Some(our_pubkey))?;
                let pubkeys = match expanded.pubkeys {
                    Some(ref pubkeys) => pubkeys.clone(),
                    None => return Err(unsupported(expanded.prev_out_type, "", prev_out_script)),
                };
                let is_p2wpkh = expanded.prev_out_type == Some(ScriptType::P2WPKH);
                let sign_script = if is_p2wpkh {
                    p2pkh_script_of(pubkeys.first().cloned().flatten())?
                } else {
                    Some(prev_out_script.clone())
                };
                let expanded = keep_signatures(expanded);
                return Ok(TxbInput {
                    prev_out_script: Some(prev_out_script.clone()),
                    has_witness: Some(is_p2wpkh),
                    sign_script,
                    sign_type: expanded.prev_out_type,
                    ..expanded
                });
            }

            let prev_out_script = p2pkh_script_of(Some(our_pubkey.to_vec()))?;
            Ok(TxbInput {
                prev_out_type: Some(ScriptType::P2PKH),
                prev_out_script: prev_out_script.clone(),
                has_witness: Some(false),
                sign_script: prev_out_script,
                sign_type: Some(ScriptType::P2PKH),
                pubkeys: Some(vec![Some(our_pubkey.to_vec())]),
                signatures: Some(vec![None]),
                ..Default::default()
            })
        }
    }
}

/// P2PKH output script for `pubkey`, the script code of P2WPKH.
fn p2pkh_script_of(pubkey: Option<Vec<u8>>) -> Result<Option<Vec<u8>>, BuilderError> {
    let p = payments::p2pkh(Payment { pubkey, ..Default::default() }, PaymentOpts::default())?;
    Ok(p.output)
}

/// Assembles the payment spending an input of type `script_type`, `None` if data is missing.
fn build_payment(
    script_type: ScriptType,
    input: &TxbInput,
    allow_incomplete: bool,
) -> Result<Option<Payment>, BuilderError> {
    let pubkeys = input.pubkeys.as_deref().unwrap_or_default();
    let signatures = input.signatures.as_deref().unwrap_or_default();
    let first_pubkey = pubkeys.first().cloned().flatten();
    let first_signature = signatures.first().cloned().flatten();
    let opts = PaymentOpts::default();

    let payment = match script_type {
        ScriptType::P2PKH | ScriptType::P2WPKH => {
            let (pubkey, signature) = match (first_pubkey, first_signature) {
                (Some(pk), Some(sig)) => (pk, sig),
                _ => return Ok(None),
            };
            let a = Payment { pubkey: Some(pubkey), signature: Some(signature), ..Default::default() };
            if script_type == ScriptType::P2PKH {
                payments::p2pkh(a, opts)?
            } else {
                payments::p2wpkh(a, opts)?
            }
        }
        ScriptType::P2PK => {
            let signature = match first_signature {
                Some(sig) => sig,
                None => return Ok(None),
            };
            payments::p2pk(Payment { signature: Some(signature), ..Default::default() }, opts)?
        }
        ScriptType::P2MS => {
            let pubkeys: Option<Vec<Vec<u8>>> = pubkeys.iter().cloned().collect();
            let pubkeys = match pubkeys {
                Some(pubkeys) if !pubkeys.is_empty() => pubkeys,
                _ => return Ok(None),
            };
            let signatures: Vec<Vec<u8>> = if allow_incomplete {
                signatures.iter().map(|s| s.clone().unwrap_or_default()).collect()
            } else {
                signatures.iter().flatten().cloned().collect()
            };
            let m = input.max_signatures;
            let validate = !allow_incomplete || m == Some(signatures.len());
            payments::p2ms(
                Payment { m, pubkeys: Some(pubkeys), signatures: Some(signatures), ..Default::default() },
                PaymentOpts { validate, allow_incomplete },
            )?
        }
        ScriptType::P2SH => {
            let inner_type = match input.redeem_script_type {
                Some(t) => t,
                None => return Ok(None),
            };
            let redeem = match build_payment(inner_type, input, allow_incomplete)? {
                Some(redeem) => redeem,
                None => return Ok(None),
            };
            let redeem = Payment {
                output: redeem.output.or_else(|| input.redeem_script.clone()),
                input: redeem.input,
                witness: redeem.witness,
                ..Default::default()
            };
            payments::p2sh(Payment { redeem: Some(Box::new(redeem)), ..Default::default() }, opts)?
        }
        ScriptType::P2WSH => {
            let inner_type = match input.witness_script_type {
                Some(t) => t,
                None => return Ok(None),
            };
            let redeem = match build_payment(inner_type, input, allow_incomplete)? {
                Some(redeem) => redeem,
                None => return Ok(None),
            };
            let redeem = Payment {
                output: input.witness_script.clone(),
                input: redeem.input,
                witness: redeem.witness,
                ..Default::default()
            };
            payments::p2wsh(Payment { redeem: Some(Box::new(redeem)), ..Default::default() }, opts)?
        }
        _ => return Ok(None),
    };
    Ok(Some(payment))
}

/// Puts the signatures of a partially signed P2SH multisig input back in public key order.
fn fix_multisig_order(
    input: &mut TxbInput,
    transaction: &Transaction,
    vin: usize,
    ecc: &EccLib,
) -> Result<(), BuilderError> {
    let redeem_script = match (input.redeem_script_type, &input.redeem_script) {
        (Some(ScriptType::P2MS), Some(script)) => script.clone(),
        _ => return Ok(()),
    };
    let (pubkeys, signatures) = match (&input.pubkeys, &input.signatures) {
        (Some(p), Some(s)) if p.len() != s.len() => (p.clone(), s.clone()),
        _ => return Ok(()),
    };

    let mut unmatched = signatures;
    let mut ordered = Vec::with_capacity(pubkeys.len());
    for pubkey in &pubkeys {
        let mut found = None;
        if let Some(pubkey) = pubkey {
            for slot in unmatched.iter_mut() {
                let candidate = match slot {
                    Some(sig) => sig,
                    None => continue,
                };
                let parsed = signature::decode(candidate)?;
                let hash = transaction.hash_for_signature(vin, &redeem_script, u32::from(parsed.hash_type));
                if ecc.verify(&hash, pubkey, &parsed.signature, false) {
                    found = slot.take();
                    break;
                }
            }
        }
        ordered.push(found);
    }
    input.signatures = Some(ordered);
    Ok(())
}

/// Error building or signing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuilderError {
    /// The change would invalidate existing signatures.
    InvalidatesSignatures,
    /// Coinbase inputs can not be added.
    CoinbaseInput,
    /// The outpoint is already spent by this transaction.
    DuplicateTxOut(String),
    /// A transaction id is not 32 bytes of hex.
    InvalidTxid(String),
    /// The previous transaction has no such output.
    NoOutput(u32),
    /// No input at this index.
    NoInput(usize),
    /// Building a complete transaction without inputs.
    NoInputs,
    /// Building a complete transaction without outputs.
    NoOutputs,
    /// An input was never classified.
    Incomplete,
    /// A nonstandard input can not be rebuilt.
    UnknownInputType,
    /// An input lacks signatures or keys.
    NotEnoughInformation,
    /// The fee rate exceeds the builder's maximum.
    AbsurdFees,
    /// Signer belongs to another network.
    InconsistentNetwork,
    /// Sighash type does not fit in a byte.
    InvalidHashType(u32),
    /// Signing with `SIGHASH_ALL` or after outputs were committed to, without outputs.
    NeedsOutputs,
    /// The redeem script differs from the one already known.
    InconsistentRedeemScript,
    /// The witness value differs from the known input value.
    WitnessValueMismatch,
    /// The input's script type can not be signed.
    NotSupported(String),
    /// A signature already fills this slot.
    SignatureExists,
    /// Uncompressed keys are not allowed in segwit.
    UncompressedWitnessKey,
    /// The signer's key is not one of the input's keys.
    CannotSign,
    /// A script consistency rule is violated.
    Rule(&'static str),
    /// Address error.
    Address(AddressError),
    /// Payment template error.
    Payment(PaymentError),
    /// Signature hash error.
    Sighash(SighashError),
    /// Script signature error.
    Signature(SignatureError),
    /// The signer failed.
    Signer(SignerError),
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BuilderError::*;

        match *self {
            InvalidatesSignatures => f.write_str("No, this would invalidate signatures"),
            CoinbaseInput => f.write_str("coinbase inputs not supported"),
            DuplicateTxOut(ref outpoint) => write!(f, "Duplicate TxOut: {}", outpoint),
            InvalidTxid(ref txid) => write!(f, "invalid txid: {}", txid),
            NoOutput(vout) => write!(f, "No output at index: {}", vout),
            NoInput(vin) => write!(f, "No input at index: {}", vin),
            NoInputs => f.write_str("Transaction has no inputs"),
            NoOutputs => f.write_str("Transaction has no outputs"),
            Incomplete => f.write_str("Transaction is not complete"),
            UnknownInputType => f.write_str("Unknown input type"),
            NotEnoughInformation => f.write_str("Not enough information"),
            AbsurdFees => f.write_str("Transaction has absurd fees"),
            InconsistentNetwork => f.write_str("Inconsistent network"),
            InvalidHashType(t) => write!(f, "invalid hashType {}", t),
            NeedsOutputs => f.write_str("Transaction needs outputs"),
            InconsistentRedeemScript => f.write_str("Inconsistent redeemScript"),
            WitnessValueMismatch => f.write_str("Input did not match witnessValue"),
            NotSupported(ref msg) => f.write_str(msg),
            SignatureExists => f.write_str("Signature already exists"),
            UncompressedWitnessKey =>
                f.write_str("BIP143 rejects uncompressed public keys in P2WPKH or P2WSH"),
            CannotSign => f.write_str("Key pair cannot sign for this input"),
            Rule(msg) => f.write_str(msg),
            Address(ref e) => write_err!(f, "address"; e),
            Payment(ref e) => write_err!(f, "payment"; e),
            Sighash(ref e) => write_err!(f, "sighash"; e),
            Signature(ref e) => write_err!(f, "signature"; e),
            Signer(ref e) => write_err!(f, "signer"; e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use BuilderError::*;

        match *self {
            Address(ref e) => Some(e),
            Payment(ref e) => Some(e),
            Sighash(ref e) => Some(e),
            Signature(ref e) => Some(e),
            Signer(ref e) => Some(e),
            InvalidatesSignatures | CoinbaseInput | DuplicateTxOut(_) | InvalidTxid(_)
            | NoOutput(_) | NoInput(_) | NoInputs | NoOutputs | Incomplete | UnknownInputType
            | NotEnoughInformation | AbsurdFees | InconsistentNetwork | InvalidHashType(_)
            | NeedsOutputs | InconsistentRedeemScript | WitnessValueMismatch | NotSupported(_)
            | SignatureExists | UncompressedWitnessKey | CannotSign | Rule(_) => None,
        }
    }
}

impl From<AddressError> for BuilderError {
    fn from(e: AddressError) -> Self { Self::Address(e) }
}

impl From<PaymentError> for BuilderError {
    fn from(e: PaymentError) -> Self { Self::Payment(e) }
}

impl From<SighashError> for BuilderError {
    fn from(e: SighashError) -> Self { Self::Sighash(e) }
}

impl From<SignatureError> for BuilderError {
    fn from(e: SignatureError) -> Self { Self::Signature(e) }
}

impl From<SignerError> for BuilderError {
    fn from(e: SignerError) -> Self { Self::Signer(e) }
}
