// SPDX-License-Identifier: CC0-1.0

//! Partially Signed Bitcoin Transactions.
//!
//! Implementation of the roles defined in [BIP-174], creator, updater, signer, combiner,
//! input finalizer and transaction extractor, with the taproot fields of [BIP-371].
//!
//! A [`Psbt`] wraps its unsigned transaction and keeps it consistent with the input and output
//! maps. Changes that would invalidate an existing signature are refused.
//!
//! [BIP-174]: <https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki>
//! [BIP-371]: <https://github.com/bitcoin/bips/blob/master/bip-0371.mediawiki>

mod bip371;
mod error;
mod finalize;
pub mod map;
pub mod raw;
mod scripts;
pub mod serialize;
mod sign;

use core::cell::OnceCell;

use bitcoin::bip32::{KeySource, Xpub};
use bitcoin::hex::FromHex;
use tracing::debug;

use crate::address;
use crate::consts::{
    psbt_global_key_type_value_to_str, psbt_in_key_type_value_to_str,
    psbt_out_key_type_value_to_str,
};
use crate::ecc::EccLib;
use crate::encode::Reader;
use crate::error::{FeeError, FundingUtxoError};
use crate::network::Network;
use crate::prelude::*;
use crate::script::signature;
use crate::signer::{HdSigner, Signer};
use crate::transaction::{Transaction, TxOutput};

use self::map::global::{self as global_map, Global};
use self::map::Map;

#[rustfmt::skip]                // Keep public exports separate.
#[doc(inline)]
pub use self::{
    error::{Error, IndexOutOfBoundsError, InputScriptError, PsbtError, SignError},
    map::{input::{Input, TapLeafScript}, output::Output, DecodeError, HashType, HashPreimageError, InsertPairError, UpdateError},
};

/// The "psbt" magic followed by the `0xff` separator.
const PSBT_MAGIC: [u8; 4] = *b"psbt";
const PSBT_SEPARATOR: u8 = 0xff;

/// Default fee rate ceiling of [`Psbt::extract_transaction`], in satoshis per virtual byte.
pub const DEFAULT_MAXIMUM_FEE_RATE: u64 = 5000;

/// Options of a [`Psbt`].
#[derive(Debug, Clone)]
pub struct PsbtOpts {
    /// Network used to convert between addresses and scripts.
    pub network: Network,
    /// Extraction fails at or above this fee rate, in satoshis per virtual byte.
    pub maximum_fee_rate: u64,
    /// Curve operations used to verify signatures and check taproot outputs.
    pub ecc: EccLib,
}

impl Default for PsbtOpts {
    fn default() -> Self {
        PsbtOpts {
            network: Network::default(),
            maximum_fee_rate: DEFAULT_MAXIMUM_FEE_RATE,
            ecc: EccLib::default(),
        }
    }
}

/// An input of the unsigned transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsbtTxInput {
    /// Hash of the transaction being spent, in internal byte order (the reverse of the txid).
    pub hash: [u8; 32],
    /// Index of the output being spent.
    pub index: u32,
    /// Sequence number, `0xffffffff` if not given.
    pub sequence: Option<u32>,
}

/// An output of the unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbtTxOutput {
    /// The scriptPubKey.
    pub script: Vec<u8>,
    /// Value in satoshis.
    pub value: u64,
}

/// An output of the unsigned transaction along with its address, when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutputInfo {
    /// The scriptPubKey.
    pub script: Vec<u8>,
    /// Value in satoshis.
    pub value: u64,
    /// The address of `script` on the network of the PSBT.
    pub address: Option<String>,
}

/// A fully finalized transaction with its fee.
#[derive(Debug, Clone)]
struct Extracted {
    tx: Transaction,
    fee: u64,
    fee_rate: u64,
}

/// Values derived from the maps, recomputed whenever the maps change.
#[derive(Debug, Clone, Default)]
struct Cache {
    extracted: OnceCell<Extracted>,
    non_witness_utxo_txids: BTreeMap<usize, [u8; 32]>,
    outpoints: BTreeSet<([u8; 32], u32)>,
}

/// Something a signature may or may not allow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Action {
    AddInput,
    AddOutput,
    SetInputSequence,
    SetVersion,
    SetLocktime,
}

/// A Partially Signed Transaction.
#[derive(Debug, Clone)]
pub struct Psbt {
    global: Global,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    opts: PsbtOpts,
    cache: Cache,
}

impl PartialEq for Psbt {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global && self.inputs == other.inputs && self.outputs == other.outputs
    }
}

impl Eq for Psbt {}

impl Psbt {
    /// Creates an empty PSBT around a version 2 transaction.
    pub fn new(opts: PsbtOpts) -> Self {
        let tx = Transaction { version: 2, ..Default::default() };
        Psbt {
            global: Global::new(tx),
            inputs: vec![],
            outputs: vec![],
            opts,
            cache: Cache::default(),
        }
    }

    /// Creates a PSBT around `unsigned_tx`, which must carry no scriptSig and no witness.
    pub fn from_unsigned_tx(unsigned_tx: Transaction, opts: PsbtOpts) -> Result<Self, Error> {
        global_map::check_unsigned(&unsigned_tx)?;
        let inputs = vec![Input::default(); unsigned_tx.ins.len()];
        let outputs = vec![Output::default(); unsigned_tx.outs.len()];
        let mut psbt =
            Psbt { global: Global::new(unsigned_tx), inputs, outputs, opts, cache: Cache::default() };
        psbt.rebuild_cache()?;
        Ok(psbt)
    }

    /// Parses a serialized PSBT.
    pub fn from_buffer(bytes: &[u8], opts: PsbtOpts) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        match r.read_slice(PSBT_MAGIC.len()) {
            Ok(magic) if magic == PSBT_MAGIC => {}
            _ => return Err(Error::InvalidMagic),
        }
        match r.read_u8() {
            Ok(PSBT_SEPARATOR) => {}
            _ => return Err(Error::InvalidSeparator),
        }

        let global = Global::decode(&mut r)?;

        let mut inputs: Vec<Input> = Vec::with_capacity(global.unsigned_tx.ins.len());
        for index in 0..global.unsigned_tx.ins.len() {
            inputs.push(Input::decode(&mut r).map_err(|error| Error::Input { index, error })?);
        }
        let mut outputs: Vec<Output> = Vec::with_capacity(global.unsigned_tx.outs.len());
        for index in 0..global.unsigned_tx.outs.len() {
            outputs.push(Output::decode(&mut r).map_err(|error| Error::Output { index, error })?);
        }
        if !r.is_empty() {
            return Err(Error::UnexpectedData);
        }

        let mut psbt = Psbt { global, inputs, outputs, opts, cache: Cache::default() };
        psbt.rebuild_cache()?;
        debug!(inputs = psbt.inputs.len(), outputs = psbt.outputs.len(), "parsed PSBT");
        Ok(psbt)
    }

    /// Parses a hex encoded PSBT.
    pub fn from_hex(s: &str, opts: PsbtOpts) -> Result<Self, Error> {
        let bytes = Vec::from_hex(s).map_err(Error::Hex)?;
        Self::from_buffer(&bytes, opts)
    }

    /// Serializes the PSBT.
    pub fn to_buffer(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&PSBT_MAGIC);
        buf.push(PSBT_SEPARATOR);
        buf.extend(self.global.serialize_map());
        for input in &self.inputs {
            buf.extend(input.serialize_map());
        }
        for output in &self.outputs {
            buf.extend(output.serialize_map());
        }
        buf
    }

    /// Serializes the PSBT as lower case hex.
    pub fn to_hex(&self) -> String { self.to_buffer().to_lower_hex_string() }

    /// The global map.
    pub fn global(&self) -> &Global { &self.global }

    /// The input maps, one per input of the unsigned transaction.
    pub fn inputs(&self) -> &[Input] { &self.inputs }

    /// The output maps, one per output of the unsigned transaction.
    pub fn outputs(&self) -> &[Output] { &self.outputs }

    /// The options this PSBT was created with.
    pub fn opts(&self) -> &PsbtOpts { &self.opts }

    /// Number of inputs.
    pub fn input_count(&self) -> usize { self.inputs.len() }

    /// Version of the unsigned transaction.
    pub fn version(&self) -> i32 { self.global.unsigned_tx.version }

    /// Lock time of the unsigned transaction.
    pub fn locktime(&self) -> u32 { self.global.unsigned_tx.locktime }

    /// The inputs of the unsigned transaction.
    pub fn tx_inputs(&self) -> Vec<PsbtTxInput> {
        self.global
            .unsigned_tx
            .ins
            .iter()
            .map(|txin| PsbtTxInput {
                hash: txin.hash,
                index: txin.index,
                sequence: Some(txin.sequence),
            })
            .collect()
    }

    /// The outputs of the unsigned transaction, with their address where the script has one.
    pub fn tx_outputs(&self) -> Vec<TxOutputInfo> {
        self.global
            .unsigned_tx
            .outs
            .iter()
            .map(|txout| TxOutputInfo {
                script: txout.script.clone(),
                value: txout.value,
                address: address::from_output_script(&txout.script, &self.opts.network).ok(),
            })
            .collect()
    }

    /// Sets the fee rate ceiling of [`Psbt::extract_transaction`].
    pub fn set_maximum_fee_rate(&mut self, satoshi_per_byte: u64) {
        self.opts.maximum_fee_rate = satoshi_per_byte;
    }

    /// Sets the version of the unsigned transaction.
    pub fn set_version(&mut self, version: i32) -> Result<(), PsbtError> {
        self.check_can_modify(Action::SetVersion)?;
        self.global.unsigned_tx.version = version;
        self.invalidate();
        Ok(())
    }

    /// Sets the lock time of the unsigned transaction.
    pub fn set_locktime(&mut self, locktime: u32) -> Result<(), PsbtError> {
        self.check_can_modify(Action::SetLocktime)?;
        self.global.unsigned_tx.locktime = locktime;
        self.invalidate();
        Ok(())
    }

    /// Sets the sequence number of input `index`.
    pub fn set_input_sequence(&mut self, index: usize, sequence: u32) -> Result<(), PsbtError> {
        self.check_can_modify(Action::SetInputSequence)?;
        let length = self.global.unsigned_tx.ins.len();
        let txin = self
            .global
            .unsigned_tx
            .ins
            .get_mut(index)
            .ok_or(IndexOutOfBoundsError::Inputs { index, length })?;
        txin.sequence = sequence;
        self.invalidate();
        Ok(())
    }

    /// Adds an input spending `txin`, described by the fields set in `fields`.
    ///
    /// Returns the index of the new input.
    pub fn add_input(&mut self, txin: PsbtTxInput, fields: Input) -> Result<usize, PsbtError> {
        bip371::check_input_fields(&fields, &fields, "addInput")?;
        self.check_can_modify(Action::AddInput)?;
        if let Some(ref witness_script) = fields.witness_script {
            scripts::check_invalid_p2wsh(witness_script)?;
        }
        if self.cache.outpoints.contains(&(txin.hash, txin.index)) {
            return Err(PsbtError::DuplicateInput);
        }

        let mut input = Input::default();
        input.update(fields)?;

        let index =
            self.global.unsigned_tx.add_input(txin.hash, txin.index, txin.sequence, None);
        self.inputs.push(input);
        self.cache.outpoints.insert((txin.hash, txin.index));
        self.cache_non_witness_utxo(index);
        self.invalidate();
        debug!(index, "added input");
        Ok(index)
    }

    /// Adds several inputs, stopping at the first failure.
    pub fn add_inputs<I>(&mut self, inputs: I) -> Result<(), PsbtError>
    where
        I: IntoIterator<Item = (PsbtTxInput, Input)>,
    {
        for (txin, fields) in inputs {
            self.add_input(txin, fields)?;
        }
        Ok(())
    }

    /// Adds an output paying `txout`, described by the fields set in `fields`.
    ///
    /// Returns the index of the new output.
    pub fn add_output(&mut self, txout: PsbtTxOutput, fields: Output) -> Result<usize, PsbtError> {
        bip371::check_output_fields(&fields, &fields, &txout.script, &self.opts.ecc, "addOutput")?;
        self.check_can_modify(Action::AddOutput)?;

        let mut output = Output::default();
        output.update(fields)?;

        let index = self.global.unsigned_tx.add_output(txout.script, txout.value);
        self.outputs.push(output);
        self.invalidate();
        debug!(index, "added output");
        Ok(index)
    }

    /// Adds an output paying `value` to `address`.
    pub fn add_output_address(
        &mut self,
        address: &str,
        value: u64,
        fields: Output,
    ) -> Result<usize, PsbtError> {
        let script = address::to_output_script(address, &self.opts.network)?;
        self.add_output(PsbtTxOutput { script, value }, fields)
    }

    /// Adds several outputs, stopping at the first failure.
    pub fn add_outputs<I>(&mut self, outputs: I) -> Result<(), PsbtError>
    where
        I: IntoIterator<Item = (PsbtTxOutput, Output)>,
    {
        for (txout, fields) in outputs {
            self.add_output(txout, fields)?;
        }
        Ok(())
    }

    /// Adds extended public keys to the global map.
    pub fn update_global(&mut self, xpubs: BTreeMap<Xpub, KeySource>) -> Result<(), PsbtError> {
        self.global.update(xpubs)?;
        Ok(())
    }

    /// Adds the fields set in `fields` to input `index`, none of which may already be set.
    pub fn update_input(&mut self, index: usize, fields: Input) -> Result<(), PsbtError> {
        let current = self.checked_input(index)?;
        if let Some(ref witness_script) = fields.witness_script {
            scripts::check_invalid_p2wsh(witness_script)?;
        }
        bip371::check_input_fields(current, &fields, "updateInput")?;

        self.inputs[index].update(fields)?;
        self.cache_non_witness_utxo(index);
        self.invalidate();
        Ok(())
    }

    /// Adds the fields set in `fields` to output `index`, none of which may already be set.
    pub fn update_output(&mut self, index: usize, fields: Output) -> Result<(), PsbtError> {
        let current = self.checked_output(index)?;
        let script = &self.global.unsigned_tx.outs[index].script;
        bip371::check_output_fields(current, &fields, script, &self.opts.ecc, "updateOutput")?;

        self.outputs[index].update(fields)?;
        Ok(())
    }

    /// Adds a key-value pair of a type this crate does not know to the global map.
    pub fn add_unknown_key_val_to_global(
        &mut self,
        key: raw::Key,
        value: Vec<u8>,
    ) -> Result<(), PsbtError> {
        check_unknown_key(psbt_global_key_type_value_to_str(key.type_value), &key)?;
        insert_unknown(&mut self.global.unknowns, key, value)
    }

    /// Adds a key-value pair of a type this crate does not know to input `index`.
    pub fn add_unknown_key_val_to_input(
        &mut self,
        index: usize,
        key: raw::Key,
        value: Vec<u8>,
    ) -> Result<(), PsbtError> {
        self.checked_input(index)?;
        check_unknown_key(psbt_in_key_type_value_to_str(key.type_value), &key)?;
        insert_unknown(&mut self.inputs[index].unknowns, key, value)
    }

    /// Adds a key-value pair of a type this crate does not know to output `index`.
    pub fn add_unknown_key_val_to_output(
        &mut self,
        index: usize,
        key: raw::Key,
        value: Vec<u8>,
    ) -> Result<(), PsbtError> {
        self.checked_output(index)?;
        check_unknown_key(psbt_out_key_type_value_to_str(key.type_value), &key)?;
        insert_unknown(&mut self.outputs[index].unknowns, key, value)
    }

    /// Merges `other` into this PSBT, fields already present here are kept.
    ///
    /// Both PSBTs must describe the same unsigned transaction.
    pub fn combine(&mut self, other: Psbt) -> Result<(), PsbtError> {
        if self.global.unsigned_tx.to_buffer() != other.global.unsigned_tx.to_buffer() {
            return Err(PsbtError::CombineMismatch);
        }

        let Psbt { global, inputs, outputs, .. } = other;
        self.global.combine(global);
        for (mine, theirs) in self.inputs.iter_mut().zip(inputs) {
            mine.combine(theirs);
        }
        for (mine, theirs) in self.outputs.iter_mut().zip(outputs) {
            mine.combine(theirs);
        }

        for index in 0..self.inputs.len() {
            self.cache_non_witness_utxo(index);
        }
        self.invalidate();
        debug!("combined PSBT");
        Ok(())
    }

    /// Combines all of `others` into this PSBT, in order.
    pub fn combine_all<I>(&mut self, others: I) -> Result<(), PsbtError>
    where
        I: IntoIterator<Item = Psbt>,
    {
        for other in others {
            self.combine(other)?;
        }
        Ok(())
    }

    /// The fee paid by the finalized transaction, in satoshis.
    pub fn get_fee(&self) -> Result<u64, FeeError> { Ok(self.extracted()?.fee) }

    /// The fee rate of the finalized transaction, in satoshis per virtual byte rounded down.
    pub fn get_fee_rate(&self) -> Result<u64, FeeError> { Ok(self.extracted()?.fee_rate) }

    /// Returns the network serializable transaction, every input must be finalized.
    ///
    /// Fails if the fee rate reaches the maximum fee rate, unless `disable_fee_check` is set.
    pub fn extract_transaction(&self, disable_fee_check: bool) -> Result<Transaction, PsbtError> {
        if !self.inputs.iter().all(Input::is_finalized) {
            return Err(PsbtError::NotFinalized);
        }
        if disable_fee_check {
            return Ok(match self.cache.extracted.get() {
                Some(extracted) => extracted.tx.clone(),
                None => self.finalized_tx(),
            });
        }

        let extracted = self.extracted().map_err(|e| match e {
            FeeError::NotFinalized => PsbtError::NotFinalized,
            e => PsbtError::Fee(e),
        })?;
        if extracted.fee_rate >= self.opts.maximum_fee_rate {
            let vsize = extracted.tx.virtual_size();
            return Err(PsbtError::AbsurdFee {
                fee: extracted.fee_rate.saturating_mul(vsize as u64),
                fee_rate: extracted.fee_rate,
                vsize,
            });
        }
        Ok(extracted.tx.clone())
    }

    /// Returns the script type spent by input `index`, prefixed by its wrapping.
    ///
    /// For example `"p2sh-p2wsh-multisig"` or `"witnesspubkeyhash"`.
    pub fn get_input_type(&self, index: usize) -> Result<String, PsbtError> {
        let input = self.checked_input(index)?;
        let utxo = self.funding_utxo(index)?;
        let redeem_script = input
            .redeem_script
            .clone()
            .or_else(|| input.final_script_sig.as_deref().and_then(scripts::redeem_from_final_script_sig));
        let witness_script = input.witness_script.clone().or_else(|| {
            input.final_script_witness.as_deref().and_then(scripts::redeem_from_final_witness)
        });

        let (script, wrapping) = scripts::meaningful_script(
            &utxo.script,
            index,
            "input",
            redeem_script.as_deref(),
            witness_script.as_deref(),
        )?;
        Ok(format!("{}{}", wrapping.prefix(), scripts::classify_script(script)))
    }

    /// Returns true if `pubkey` appears in the script input `index` executes.
    pub fn input_has_pubkey(&self, index: usize, pubkey: &[u8]) -> Result<bool, PsbtError> {
        let input = self.checked_input(index)?;
        let utxo = self.funding_utxo(index)?;
        let (script, _) = scripts::meaningful_script(
            &utxo.script,
            index,
            "input",
            input.redeem_script.as_deref(),
            input.witness_script.as_deref(),
        )?;
        Ok(scripts::pubkey_in_script(pubkey, script))
    }

    /// Returns true if `pubkey` appears in the script output `index` pays to.
    pub fn output_has_pubkey(&self, index: usize, pubkey: &[u8]) -> Result<bool, PsbtError> {
        let output = self.checked_output(index)?;
        let (script, _) = scripts::meaningful_script(
            &self.global.unsigned_tx.outs[index].script,
            index,
            "output",
            output.redeem_script.as_deref(),
            output.witness_script.as_deref(),
        )?;
        Ok(scripts::pubkey_in_script(pubkey, script))
    }

    /// Returns true if `root` derives one of the keys of input `index`.
    pub fn input_has_hd_key<H: HdSigner + ?Sized>(
        &self,
        index: usize,
        root: &H,
    ) -> Result<bool, PsbtError> {
        let input = self.checked_input(index)?;
        Ok(derivations_are_mine(&input.bip32_derivations, &input.tap_bip32_derivations, root))
    }

    /// Returns true if `root` derives one of the keys of output `index`.
    pub fn output_has_hd_key<H: HdSigner + ?Sized>(
        &self,
        index: usize,
        root: &H,
    ) -> Result<bool, PsbtError> {
        let output = self.checked_output(index)?;
        Ok(derivations_are_mine(&output.bip32_derivations, &output.tap_bip32_derivations, root))
    }

    pub(crate) fn checked_input(&self, index: usize) -> Result<&Input, IndexOutOfBoundsError> {
        self.inputs.get(index).ok_or(IndexOutOfBoundsError::Inputs { index, length: self.inputs.len() })
    }

    pub(crate) fn checked_output(&self, index: usize) -> Result<&Output, IndexOutOfBoundsError> {
        self.outputs
            .get(index)
            .ok_or(IndexOutOfBoundsError::Outputs { index, length: self.outputs.len() })
    }

    /// The output spent by input `index`.
    ///
    /// A witness utxo is used as is, a non-witness utxo must hash to the txid the input spends.
    pub(crate) fn funding_utxo(&self, index: usize) -> Result<&TxOutput, FundingUtxoError> {
        let (input, txin) = match (self.inputs.get(index), self.global.unsigned_tx.ins.get(index)) {
            (Some(input), Some(txin)) => (input, txin),
            _ => return Err(FundingUtxoError::MissingUtxo),
        };
        if input.witness_utxo.is_none() {
            if let Some(ref tx) = input.non_witness_utxo {
                let txid = match self.cache.non_witness_utxo_txids.get(&index) {
                    Some(txid) => *txid,
                    None => tx.get_hash(false),
                };
                if txid != txin.hash {
                    return Err(FundingUtxoError::TxidMismatch { input_index: index });
                }
            }
        }
        input.funding_utxo(txin.index)
    }

    /// The unsigned transaction with the final scripts of every input installed.
    fn finalized_tx(&self) -> Transaction {
        let mut tx = self.global.unsigned_tx.clone();
        for (txin, input) in tx.ins.iter_mut().zip(self.inputs.iter()) {
            txin.script = input.final_script_sig.clone().unwrap_or_default();
            txin.witness = input.final_script_witness.clone().unwrap_or_default();
        }
        tx
    }

    fn extracted(&self) -> Result<&Extracted, FeeError> {
        if let Some(extracted) = self.cache.extracted.get() {
            return Ok(extracted);
        }
        if !self.inputs.iter().all(Input::is_finalized) {
            return Err(FeeError::NotFinalized);
        }

        let tx = self.finalized_tx();
        let mut input_value: u64 = 0;
        for index in 0..self.inputs.len() {
            let utxo = self.funding_utxo(index)?;
            input_value = input_value.checked_add(utxo.value).ok_or(FeeError::InputOverflow)?;
        }
        let mut output_value: u64 = 0;
        for txout in &tx.outs {
            output_value = output_value.checked_add(txout.value).ok_or(FeeError::OutputOverflow)?;
        }
        let fee = input_value.checked_sub(output_value).ok_or(FeeError::Negative)?;
        let vsize = tx.virtual_size() as u64;
        let fee_rate = fee.checked_div(vsize).unwrap_or(fee);

        Ok(self.cache.extracted.get_or_init(|| Extracted { tx, fee, fee_rate }))
    }

    /// Drops the cached extraction, called after every change to the maps.
    fn invalidate(&mut self) { self.cache.extracted = OnceCell::new(); }

    fn cache_non_witness_utxo(&mut self, index: usize) {
        if let Some(ref tx) = self.inputs[index].non_witness_utxo {
            self.cache.non_witness_utxo_txids.insert(index, tx.get_hash(false));
        }
    }

    fn rebuild_cache(&mut self) -> Result<(), Error> {
        self.cache = Cache::default();
        for txin in &self.global.unsigned_tx.ins {
            if !self.cache.outpoints.insert((txin.hash, txin.index)) {
                return Err(Error::DuplicateInput);
            }
        }
        for index in 0..self.inputs.len() {
            self.cache_non_witness_utxo(index);
        }
        Ok(())
    }

    /// Fails if a signature on any input does not allow `action`.
    fn check_can_modify(&self, action: Action) -> Result<(), PsbtError> {
        let blocked = self.inputs.iter().any(|input| {
            if input.is_taproot() {
                input.taproot_signatures().iter().any(|sig| {
                    let hash_type = if sig.len() == 65 { u32::from(sig[64]) } else { 0 };
                    signature_blocks_action(hash_type, action)
                })
            } else {
                input.ecdsa_signatures().iter().any(|sig| {
                    let hash_type = signature::hash_type_of(sig).map_or(0, u32::from);
                    signature_blocks_action(hash_type, action)
                })
            }
        });
        if blocked {
            return Err(PsbtError::CannotModify);
        }
        Ok(())
    }
}

/// Returns true if a signature committing with `hash_type` forbids `action`.
fn signature_blocks_action(hash_type: u32, action: Action) -> bool {
    use crate::sighash_type::{SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE};

    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;
    let base = hash_type & 0x1f;
    let allowed = match action {
        Action::AddInput => anyone_can_pay,
        Action::AddOutput | Action::SetInputSequence =>
            base == SIGHASH_NONE || base == SIGHASH_SINGLE,
        Action::SetVersion | Action::SetLocktime => false,
    };
    !allowed
}

fn check_unknown_key(type_name: &str, key: &raw::Key) -> Result<(), PsbtError> {
    if !type_name.starts_with("unknown") {
        return Err(PsbtError::KnownKeyType(key.type_value));
    }
    Ok(())
}

fn insert_unknown(
    unknowns: &mut BTreeMap<raw::Key, Vec<u8>>,
    key: raw::Key,
    value: Vec<u8>,
) -> Result<(), PsbtError> {
    match unknowns.entry(key) {
        btree_map::Entry::Vacant(empty_key) => {
            empty_key.insert(value);
            Ok(())
        }
        btree_map::Entry::Occupied(_) => Err(UpdateError::DuplicateEntry("unknowns").into()),
    }
}

fn derivations_are_mine<H: HdSigner + ?Sized>(
    bip32_derivations: &BTreeMap<Vec<u8>, KeySource>,
    tap_bip32_derivations: &BTreeMap<[u8; 32], serialize::TapKeySource>,
    root: &H,
) -> bool {
    let fingerprint = root.fingerprint();
    let derives = |source: &KeySource, matches: &dyn Fn(&[u8]) -> bool| {
        source.0 == fingerprint
            && root.derive_path(&source.1).map_or(false, |child| matches(&child.public_key()))
    };

    bip32_derivations
        .iter()
        .any(|(pubkey, source)| derives(source, &|derived| derived == &pubkey[..]))
        || tap_bip32_derivations.iter().any(|(x_only, (_, source))| {
            derives(source, &|derived| derived.len() == 33 && &derived[1..] == &x_only[..])
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sighash_type::{SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_SINGLE};

    // A 71 byte strict DER signature.
    const DER_SIG: &str = "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb";
    const PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn txin(n: u8) -> PsbtTxInput { PsbtTxInput { hash: [n; 32], index: 0, sequence: None } }

    fn txout(value: u64) -> PsbtTxOutput { PsbtTxOutput { script: vec![0x51], value } }

    fn signed_with(hash_type: u8) -> Input {
        let mut sig = hex(DER_SIG);
        sig.push(hash_type);
        let mut input = Input::default();
        input.partial_sigs.insert(hex(PUBKEY), sig);
        input
    }

    fn two_in_one_out() -> Psbt {
        let mut psbt = Psbt::new(PsbtOpts::default());
        psbt.add_input(txin(1), Input::default()).unwrap();
        psbt.add_input(txin(2), Input::default()).unwrap();
        psbt.add_output(txout(1000), Output::default()).unwrap();
        psbt
    }

    #[test]
    fn creator_defaults() {
        let psbt = Psbt::new(PsbtOpts::default());
        assert_eq!(psbt.version(), 2);
        assert_eq!(psbt.locktime(), 0);
        assert_eq!(psbt.input_count(), 0);
        assert_eq!(psbt.opts().maximum_fee_rate, DEFAULT_MAXIMUM_FEE_RATE);
    }

    #[test]
    fn buffer_round_trip() {
        let mut psbt = two_in_one_out();
        psbt.set_locktime(500).unwrap();
        psbt.update_input(1, Input { redeem_script: Some(vec![0x51]), ..Default::default() })
            .unwrap();

        let parsed = Psbt::from_hex(&psbt.to_hex(), PsbtOpts::default()).unwrap();
        assert_eq!(parsed, psbt);
        assert_eq!(parsed.locktime(), 500);
        assert_eq!(parsed.tx_inputs()[1].hash, [2; 32]);
        assert_eq!(parsed.tx_inputs()[1].sequence, Some(0xffff_ffff));
    }

    #[test]
    fn bad_framing() {
        let opts = PsbtOpts::default;
        assert_eq!(Psbt::from_buffer(b"psbx\xff", opts()), Err(Error::InvalidMagic));
        assert_eq!(Psbt::from_buffer(b"psbt\x00", opts()), Err(Error::InvalidSeparator));
        assert_eq!(Psbt::from_buffer(b"ps", opts()), Err(Error::InvalidMagic));

        let mut bytes = two_in_one_out().to_buffer();
        bytes.push(0x00);
        assert_eq!(Psbt::from_buffer(&bytes, opts()), Err(Error::UnexpectedData));
        assert!(matches!(Psbt::from_hex("zz", opts()), Err(Error::Hex(_))));
    }

    #[test]
    fn duplicate_inputs() {
        let mut psbt = two_in_one_out();
        assert_eq!(psbt.add_input(txin(1), Input::default()), Err(PsbtError::DuplicateInput));
        assert_eq!(psbt.input_count(), 2);

        let mut tx = Transaction::default();
        tx.add_input([3; 32], 0, None, None);
        tx.add_input([3; 32], 0, None, None);
        assert_eq!(Psbt::from_unsigned_tx(tx, PsbtOpts::default()), Err(Error::DuplicateInput));
    }

    #[test]
    fn rejected_input_leaves_psbt_untouched() {
        let mut psbt = two_in_one_out();
        let mixed = Input {
            tap_internal_key: Some([1; 32]),
            redeem_script: Some(vec![0x51]),
            ..Default::default()
        };
        assert_eq!(psbt.add_input(txin(9), mixed), Err(PsbtError::MixedTaprootFields("addInput")));
        assert_eq!(psbt.input_count(), 2);
        assert_eq!(psbt.global().unsigned_tx().ins.len(), 2);
    }

    #[test]
    fn update_refuses_overwrite() {
        let mut psbt = two_in_one_out();
        let fields = Input { witness_script: Some(vec![0x51]), ..Default::default() };
        psbt.update_input(0, fields.clone()).unwrap();
        assert_eq!(
            psbt.update_input(0, fields),
            Err(PsbtError::Update(UpdateError::DuplicateField("witness_script")))
        );
        assert!(matches!(
            psbt.update_input(7, Input::default()),
            Err(PsbtError::IndexOutOfBounds(IndexOutOfBoundsError::Inputs { index: 7, length: 2 }))
        ));
    }

    #[test]
    fn signatures_block_modification() {
        let mut psbt = two_in_one_out();
        psbt.update_input(0, signed_with(SIGHASH_ALL as u8)).unwrap();
        assert_eq!(psbt.add_input(txin(5), Input::default()), Err(PsbtError::CannotModify));
        assert_eq!(psbt.add_output(txout(1), Output::default()), Err(PsbtError::CannotModify));
        assert_eq!(psbt.set_version(1), Err(PsbtError::CannotModify));
        assert_eq!(psbt.set_locktime(1), Err(PsbtError::CannotModify));
        assert_eq!(psbt.set_input_sequence(1, 0), Err(PsbtError::CannotModify));
    }

    #[test]
    fn weak_sighash_types_allow_some_changes() {
        let mut psbt = two_in_one_out();
        psbt.update_input(0, signed_with((SIGHASH_SINGLE | SIGHASH_ANYONECANPAY) as u8)).unwrap();
        psbt.add_input(txin(5), Input::default()).unwrap();
        psbt.add_output(txout(1), Output::default()).unwrap();
        psbt.set_input_sequence(1, 0xffff_fffd).unwrap();
        assert_eq!(psbt.tx_inputs()[1].sequence, Some(0xffff_fffd));
        assert_eq!(psbt.set_locktime(1), Err(PsbtError::CannotModify));
    }

    #[test]
    fn unknown_key_values() {
        let mut psbt = two_in_one_out();
        let key = raw::Key { type_value: 0x42, key: vec![1, 2] };
        psbt.add_unknown_key_val_to_input(0, key.clone(), vec![3]).unwrap();
        assert_eq!(
            psbt.add_unknown_key_val_to_input(0, key.clone(), vec![4]),
            Err(PsbtError::Update(UpdateError::DuplicateEntry("unknowns")))
        );
        psbt.add_unknown_key_val_to_output(0, key.clone(), vec![5]).unwrap();
        psbt.add_unknown_key_val_to_global(key, vec![6]).unwrap();
        assert_eq!(
            psbt.add_unknown_key_val_to_input(0, raw::Key { type_value: 0x00, key: vec![] }, vec![]),
            Err(PsbtError::KnownKeyType(0x00))
        );

        let parsed = Psbt::from_buffer(&psbt.to_buffer(), PsbtOpts::default()).unwrap();
        assert_eq!(parsed.inputs()[0].unknowns.len(), 1);
        assert_eq!(parsed.global().unknowns.len(), 1);
    }

    #[test]
    fn combine_merges_and_checks_tx() {
        let mut a = two_in_one_out();
        let mut b = a.clone();
        b.update_input(1, Input { redeem_script: Some(vec![0x52]), ..Default::default() }).unwrap();
        a.update_input(1, Input { witness_script: Some(vec![0x53]), ..Default::default() })
            .unwrap();
        a.combine(b).unwrap();
        assert_eq!(a.inputs()[1].redeem_script, Some(vec![0x52]));
        assert_eq!(a.inputs()[1].witness_script, Some(vec![0x53]));

        let mut other = two_in_one_out();
        other.set_locktime(9).unwrap();
        assert_eq!(a.combine(other), Err(PsbtError::CombineMismatch));
    }

    #[test]
    fn fee_needs_finalized_inputs() {
        let psbt = two_in_one_out();
        assert_eq!(psbt.get_fee(), Err(FeeError::NotFinalized));
        assert_eq!(psbt.extract_transaction(false), Err(PsbtError::NotFinalized));
    }

    #[test]
    fn fee_and_extraction() {
        let mut psbt = Psbt::new(PsbtOpts::default());
        let fields = Input {
            witness_utxo: Some(TxOutput { script: vec![0x51], value: 10_000 }),
            final_script_witness: Some(vec![vec![]]),
            ..Default::default()
        };
        psbt.add_input(txin(1), fields).unwrap();
        psbt.add_output(txout(9_000), Output::default()).unwrap();

        assert_eq!(psbt.get_fee(), Ok(1_000));
        let tx = psbt.extract_transaction(false).unwrap();
        assert_eq!(psbt.get_fee_rate(), Ok(1_000 / tx.virtual_size() as u64));

        psbt.set_maximum_fee_rate(1);
        assert!(matches!(psbt.extract_transaction(false), Err(PsbtError::AbsurdFee { .. })));
        assert_eq!(psbt.extract_transaction(true), Ok(tx));
    }

    #[test]
    fn overspending_is_an_error() {
        let mut psbt = Psbt::new(PsbtOpts::default());
        let fields = Input {
            witness_utxo: Some(TxOutput { script: vec![0x51], value: 10 }),
            final_script_sig: Some(vec![]),
            ..Default::default()
        };
        psbt.add_input(txin(1), fields).unwrap();
        psbt.add_output(txout(11), Output::default()).unwrap();
        assert_eq!(psbt.get_fee(), Err(FeeError::Negative));
    }

    #[test]
    fn non_witness_utxo_must_match_prevout() {
        let mut prev = Transaction::default();
        prev.add_input([9; 32], 0, None, None);
        prev.add_output(vec![0x51], 5_000);

        let mut psbt = Psbt::new(PsbtOpts::default());
        let good = PsbtTxInput { hash: prev.get_hash(false), index: 0, sequence: None };
        psbt.add_input(good, Input { non_witness_utxo: Some(prev.clone()), ..Default::default() })
            .unwrap();
        psbt.add_input(txin(4), Input { non_witness_utxo: Some(prev), ..Default::default() })
            .unwrap();

        assert_eq!(psbt.funding_utxo(0).map(|utxo| utxo.value), Ok(5_000));
        assert_eq!(psbt.funding_utxo(1), Err(FundingUtxoError::TxidMismatch { input_index: 1 }));
    }

    #[test]
    fn tx_outputs_have_addresses() {
        let mut psbt = Psbt::new(PsbtOpts::default());
        let address = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
        psbt.add_output_address(address, 1_000, Output::default()).unwrap();
        psbt.add_output(txout(5), Output::default()).unwrap();

        let outputs = psbt.tx_outputs();
        assert_eq!(outputs[0].address.as_deref(), Some(address));
        assert_eq!(outputs[1].address, None);
    }

    #[test]
    fn input_type_and_pubkeys() {
        let pubkey = hex(PUBKEY);
        let p2pkh = address::p2pkh_script(&crate::crypto::hash160(&pubkey));
        let mut psbt = Psbt::new(PsbtOpts::default());
        let fields = Input {
            witness_utxo: Some(TxOutput { script: p2pkh, value: 1 }),
            ..Default::default()
        };
        psbt.add_input(txin(1), fields).unwrap();
        assert_eq!(psbt.get_input_type(0).unwrap(), "pubkeyhash");
        assert_eq!(psbt.input_has_pubkey(0, &pubkey), Ok(true));
        assert_eq!(psbt.input_has_pubkey(0, &[2; 33]), Ok(false));
    }
}
