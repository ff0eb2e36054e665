// SPDX-License-Identifier: CC0-1.0

//! The signer role, and verification of the signatures it produced.
//!
//! Signing runs in three steps: the signature hashes are computed from the document, the
//! signer is asked for a signature over each of them, and the signatures are added to the input.
//! Only the middle step may suspend, so the async variants never hold a half updated input.

use bitcoin::bip32::{DerivationPath, Fingerprint};
use tracing::{debug, warn};

use super::error::{InputScriptError, PsbtError, SignError};
use super::map::input::Input;
use super::scripts;
use super::Psbt;
use crate::address;
use crate::classify;
use crate::error::FundingUtxoError;
use crate::prelude::*;
use crate::script::signature;
use crate::sighash_type::SighashType;
use crate::signer::{HdSigner, HdSignerAsync, Signer, SignerAsync};
use crate::transaction::{SighashError, TxOutput};

/// What a signature is for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SigTarget {
    Ecdsa { hash_type: u32 },
    TapKey { hash_type: u32 },
    TapScript { x_only: [u8; 32], leaf_hash: [u8; 32], hash_type: u32 },
}

impl SigTarget {
    fn is_schnorr(&self) -> bool { !matches!(self, SigTarget::Ecdsa { .. }) }
}

/// A hash waiting for a signature.
#[derive(Debug, Clone)]
struct SigRequest {
    hash: [u8; 32],
    target: SigTarget,
}

impl Psbt {
    /// Signs input `index` with `signer`.
    ///
    /// Taproot inputs are signed on the key path and every script leaf containing the key.
    /// `sighash_types` lists the acceptable sighash types of the input, by default `ALL` for
    /// ECDSA inputs and `DEFAULT` for taproot inputs.
    pub fn sign_input(
        &mut self,
        index: usize,
        signer: &dyn Signer,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let pubkey = signer.public_key();
        let requests = self.signature_requests(index, &pubkey, None, sighash_types, false)?;
        let mut signed = Vec::with_capacity(requests.len());
        for request in requests {
            let sig = if request.target.is_schnorr() {
                signer.sign_schnorr(&request.hash)?
            } else {
                signer.sign(&request.hash, false)?
            };
            signed.push((request.target, sig));
        }
        self.add_signatures(index, &pubkey, signed)
    }

    /// Signs taproot input `index` with `signer`, on the leaf `leaf_hash` only if given.
    pub fn sign_taproot_input(
        &mut self,
        index: usize,
        signer: &dyn Signer,
        leaf_hash: Option<&[u8; 32]>,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let pubkey = signer.public_key();
        let requests = self.signature_requests(index, &pubkey, leaf_hash, sighash_types, true)?;
        let mut signed = Vec::with_capacity(requests.len());
        for request in requests {
            signed.push((request.target, signer.sign_schnorr(&request.hash)?));
        }
        self.add_signatures(index, &pubkey, signed)
    }

    /// Signs every input `signer` can sign.
    ///
    /// Fails only if no input at all could be signed.
    pub fn sign_all_inputs(
        &mut self,
        signer: &dyn Signer,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input(index, signer, sighash_types) {
                Ok(()) => signed += 1,
                Err(e) => warn!(index, error = %e, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(SignError::NoInputsSigned);
        }
        Ok(())
    }

    /// Async version of [`Psbt::sign_input`].
    pub async fn sign_input_async(
        &mut self,
        index: usize,
        signer: &dyn SignerAsync,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let pubkey = signer.public_key();
        let requests = self.signature_requests(index, &pubkey, None, sighash_types, false)?;
        let mut signed = Vec::with_capacity(requests.len());
        for request in requests {
            let sig = if request.target.is_schnorr() {
                signer.sign_schnorr(&request.hash).await?
            } else {
                signer.sign(&request.hash, false).await?
            };
            signed.push((request.target, sig));
        }
        self.add_signatures(index, &pubkey, signed)
    }

    /// Async version of [`Psbt::sign_taproot_input`].
    pub async fn sign_taproot_input_async(
        &mut self,
        index: usize,
        signer: &dyn SignerAsync,
        leaf_hash: Option<&[u8; 32]>,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let pubkey = signer.public_key();
        let requests = self.signature_requests(index, &pubkey, leaf_hash, sighash_types, true)?;
        let mut signed = Vec::with_capacity(requests.len());
        for request in requests {
            signed.push((request.target, signer.sign_schnorr(&request.hash).await?));
        }
        self.add_signatures(index, &pubkey, signed)
    }

    /// Async version of [`Psbt::sign_all_inputs`], inputs are signed one after the other.
    pub async fn sign_all_inputs_async(
        &mut self,
        signer: &dyn SignerAsync,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input_async(index, signer, sighash_types).await {
                Ok(()) => signed += 1,
                Err(e) => warn!(index, error = %e, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(SignError::NoInputsSigned);
        }
        Ok(())
    }

    /// Signs input `index` with every key `root` derives for it.
    ///
    /// The keys are found through the BIP-32 derivations of the input whose master fingerprint
    /// is the fingerprint of `root`.
    pub fn sign_input_hd<H: HdSigner + ?Sized>(
        &mut self,
        index: usize,
        root: &H,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signers = vec![];
        for (pubkey, path) in self.my_derivations(index, HdSigner::fingerprint(root))? {
            let child = HdSigner::derive_path(root, &path)?;
            if !derived_key_matches(&pubkey, &Signer::public_key(&child)) {
                return Err(SignError::PubkeyMismatch);
            }
            signers.push(child);
        }
        for signer in &signers {
            self.sign_input(index, signer, sighash_types)?;
        }
        Ok(())
    }

    /// Signs every input `root` derives keys for.
    ///
    /// Fails only if no input at all could be signed.
    pub fn sign_all_inputs_hd<H: HdSigner + ?Sized>(
        &mut self,
        root: &H,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input_hd(index, root, sighash_types) {
                Ok(()) => signed += 1,
                Err(e) => warn!(index, error = %e, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(SignError::NoInputsSigned);
        }
        Ok(())
    }

    /// Async version of [`Psbt::sign_input_hd`].
    pub async fn sign_input_hd_async<H: HdSignerAsync + ?Sized>(
        &mut self,
        index: usize,
        root: &H,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signers = vec![];
        for (pubkey, path) in self.my_derivations(index, HdSignerAsync::fingerprint(root))? {
            let child = HdSignerAsync::derive_path(root, &path).await?;
            if !derived_key_matches(&pubkey, &SignerAsync::public_key(&child)) {
                return Err(SignError::PubkeyMismatch);
            }
            signers.push(child);
        }
        for signer in &signers {
            self.sign_input_async(index, signer, sighash_types).await?;
        }
        Ok(())
    }

    /// Async version of [`Psbt::sign_all_inputs_hd`].
    pub async fn sign_all_inputs_hd_async<H: HdSignerAsync + ?Sized>(
        &mut self,
        root: &H,
        sighash_types: Option<&[SighashType]>,
    ) -> Result<(), SignError> {
        let mut signed = 0;
        for index in 0..self.inputs.len() {
            match self.sign_input_hd_async(index, root, sighash_types).await {
                Ok(()) => signed += 1,
                Err(e) => warn!(index, error = %e, "input not signed"),
            }
        }
        if signed == 0 {
            return Err(SignError::NoInputsSigned);
        }
        Ok(())
    }

    /// Verifies the signatures of input `index`, only those by `pubkey` if given.
    ///
    /// Returns `Ok(false)` if any signature does not verify.
    pub fn validate_signatures_of_input(
        &self,
        index: usize,
        pubkey: Option<&[u8]>,
    ) -> Result<bool, PsbtError> {
        let input = self.checked_input(index)?;
        if input.is_taproot() {
            return self.validate_taproot_signatures(index, input, pubkey);
        }

        if input.partial_sigs.is_empty() {
            return Err(PsbtError::NoSignatures);
        }
        let mine: Vec<(&Vec<u8>, &Vec<u8>)> = input
            .partial_sigs
            .iter()
            .filter(|(key, _)| pubkey.map_or(true, |pubkey| pubkey == &key[..]))
            .collect();
        if mine.is_empty() {
            return Err(PsbtError::NoSignaturesForPubkey);
        }

        for (key, sig) in mine {
            let decoded = signature::decode(sig)?;
            let (hash, script) =
                self.ecdsa_hash::<PsbtError>(index, u32::from(decoded.hash_type), true)?;
            if !scripts::pubkey_in_script(key, &script) {
                return Err(PsbtError::KeyNotInScript(key.clone()));
            }
            if !self.opts.ecc.verify(&hash, key, &decoded.signature, true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Verifies the signatures of every input, each input must carry at least one.
    pub fn validate_signatures_of_all_inputs(&self) -> Result<bool, PsbtError> {
        let mut all_valid = true;
        for index in 0..self.inputs.len() {
            all_valid &= self.validate_signatures_of_input(index, None)?;
        }
        Ok(all_valid)
    }

    fn validate_taproot_signatures(
        &self,
        index: usize,
        input: &Input,
        pubkey: Option<&[u8]>,
    ) -> Result<bool, PsbtError> {
        if input.tap_key_sig.is_none() && input.tap_script_sigs.is_empty() {
            return Err(PsbtError::NoSignatures);
        }
        let wanted = match pubkey {
            Some(pubkey) => Some(x_only(pubkey).ok_or(PsbtError::NoSignaturesForPubkey)?),
            None => None,
        };
        let (prevout_scripts, values) = self.prevouts()?;
        let tx = &self.global.unsigned_tx;
        let mut checked = 0;

        if let Some(ref sig) = input.tap_key_sig {
            let prevout_script = &prevout_scripts[index];
            if classify::is_p2tr_output(prevout_script)
                && wanted.map_or(true, |key| key[..] == prevout_script[2..34])
            {
                let (sig, hash_type) = match split_taproot_signature(sig) {
                    Some(split) => split,
                    None => return Ok(false),
                };
                let hash = tx.hash_for_witness_v1(index, &prevout_scripts, &values, hash_type, None, None)?;
                if !self.opts.ecc.verify_schnorr(&hash, &prevout_script[2..34], &sig) {
                    return Ok(false);
                }
                checked += 1;
            }
        }

        for ((key, leaf_hash), sig) in &input.tap_script_sigs {
            if wanted.map_or(false, |wanted| wanted != *key) {
                continue;
            }
            let (sig, hash_type) = match split_taproot_signature(sig) {
                Some(split) => split,
                None => return Ok(false),
            };
            let hash = tx.hash_for_witness_v1(
                index,
                &prevout_scripts,
                &values,
                hash_type,
                Some(leaf_hash),
                None,
            )?;
            if !self.opts.ecc.verify_schnorr(&hash, key, &sig) {
                return Ok(false);
            }
            checked += 1;
        }

        if checked == 0 {
            return Err(PsbtError::NoSignaturesForPubkey);
        }
        Ok(true)
    }

    /// Computes the hashes `pubkey` has to sign for input `index`.
    fn signature_requests(
        &self,
        index: usize,
        pubkey: &[u8],
        leaf_hash: Option<&[u8; 32]>,
        sighash_types: Option<&[SighashType]>,
        taproot_only: bool,
    ) -> Result<Vec<SigRequest>, SignError> {
        let input = self.checked_input(index)?;
        if input.is_finalized() {
            return Err(SignError::InputFinalized(index));
        }

        if input.is_taproot() {
            let allowed = sighash_types.unwrap_or(&[SighashType::DEFAULT]);
            return self.taproot_requests(index, input, pubkey, leaf_hash, allowed);
        }
        if taproot_only {
            return Err(SignError::NotTaproot(index));
        }

        let allowed = sighash_types.unwrap_or(&[SighashType::ALL]);
        let sighash_type = input.sighash_type.unwrap_or(SighashType::ALL);
        check_allowed(sighash_type, allowed)?;

        let hash_type = sighash_type.to_u32();
        let (hash, script) = self.ecdsa_hash::<SignError>(index, hash_type, false)?;
        if !scripts::pubkey_in_script(pubkey, &script) {
            return Err(SignError::KeyNotInScript(pubkey.to_vec()));
        }
        Ok(vec![SigRequest { hash, target: SigTarget::Ecdsa { hash_type } }])
    }

    fn taproot_requests(
        &self,
        index: usize,
        input: &Input,
        pubkey: &[u8],
        leaf_hash: Option<&[u8; 32]>,
        allowed: &[SighashType],
    ) -> Result<Vec<SigRequest>, SignError> {
        let sighash_type = input.sighash_type.unwrap_or(SighashType::DEFAULT);
        check_allowed(sighash_type, allowed)?;
        let hash_type = sighash_type.to_u32();

        let not_found = || SignError::TaprootKeyNotFound { index, pubkey: pubkey.to_vec() };
        let key = x_only(pubkey).ok_or_else(not_found)?;
        let (prevout_scripts, values) = self.prevouts()?;
        let tx = &self.global.unsigned_tx;
        let mut requests = vec![];

        if input.tap_internal_key.is_some() && leaf_hash.is_none() {
            let prevout_script = &prevout_scripts[index];
            if classify::is_p2tr_output(prevout_script) && key[..] == prevout_script[2..34] {
                let hash =
                    tx.hash_for_witness_v1(index, &prevout_scripts, &values, hash_type, None, None)?;
                requests.push(SigRequest { hash, target: SigTarget::TapKey { hash_type } });
            }
        }

        let mut seen: BTreeSet<[u8; 32]> = BTreeSet::new();
        for leaf in input.tap_leaf_scripts.values() {
            if !scripts::pubkey_in_script(pubkey, &leaf.script) {
                continue;
            }
            let this_leaf = leaf.leaf_hash();
            if leaf_hash.map_or(false, |wanted| *wanted != this_leaf) || !seen.insert(this_leaf) {
                continue;
            }
            let hash = tx.hash_for_witness_v1(
                index,
                &prevout_scripts,
                &values,
                hash_type,
                Some(&this_leaf),
                None,
            )?;
            requests.push(SigRequest {
                hash,
                target: SigTarget::TapScript { x_only: key, leaf_hash: this_leaf, hash_type },
            });
        }

        if requests.is_empty() {
            return Err(not_found());
        }
        Ok(requests)
    }

    /// The scripts and values of every output spent by the transaction.
    fn prevouts(&self) -> Result<(Vec<Vec<u8>>, Vec<u64>), FundingUtxoError> {
        let mut prevout_scripts = Vec::with_capacity(self.inputs.len());
        let mut values = Vec::with_capacity(self.inputs.len());
        for index in 0..self.inputs.len() {
            let utxo = self.funding_utxo(index)?;
            prevout_scripts.push(utxo.script.clone());
            values.push(utxo.value);
        }
        Ok((prevout_scripts, values))
    }

    /// Signature hash of a non-taproot input along with the script the signature is checked
    /// against.
    ///
    /// The full previous transaction is preferred over the witness utxo when both are known.
    fn ecdsa_hash<E>(
        &self,
        index: usize,
        hash_type: u32,
        for_validation: bool,
    ) -> Result<([u8; 32], Vec<u8>), E>
    where
        E: From<InputScriptError> + From<FundingUtxoError> + From<SighashError>,
    {
        let input = &self.inputs[index];
        let txin = &self.global.unsigned_tx.ins[index];
        let prevout: &TxOutput = match (&input.non_witness_utxo, &input.witness_utxo) {
            (Some(tx), _) => {
                let txid = match self.cache.non_witness_utxo_txids.get(&index) {
                    Some(txid) => *txid,
                    None => tx.get_hash(false),
                };
                if txid != txin.hash {
                    return Err(FundingUtxoError::TxidMismatch { input_index: index }.into());
                }
                let vout = txin.index as usize;
                tx.outs.get(vout).ok_or(FundingUtxoError::OutOfBounds { vout, len: tx.outs.len() })?
            }
            (None, Some(utxo)) => utxo,
            (None, None) => return Err(FundingUtxoError::MissingUtxo.into()),
        };

        let (script, wrapping) = scripts::meaningful_script(
            &prevout.script,
            index,
            "input",
            input.redeem_script.as_deref(),
            input.witness_script.as_deref(),
        )?;

        let tx = &self.global.unsigned_tx;
        let hash = if wrapping.is_wsh() {
            tx.hash_for_witness_v0(index, script, prevout.value, hash_type)?
        } else if classify::is_p2wpkh_output(script) {
            let mut program = [0u8; 20];
            program.copy_from_slice(&script[2..22]);
            tx.hash_for_witness_v0(index, &address::p2pkh_script(&program), prevout.value, hash_type)?
        } else {
            if input.non_witness_utxo.is_none()
                && !for_validation
                && input.tap_internal_key.is_none()
            {
                return Err(InputScriptError::NonSegwitWitnessUtxo {
                    index,
                    script: script.to_vec(),
                }
                .into());
            }
            tx.hash_for_signature(index, script, hash_type)
        };
        Ok((hash, script.to_vec()))
    }

    /// BIP-32 derivations of input `index` under the master key `fingerprint`.
    fn my_derivations(
        &self,
        index: usize,
        fingerprint: Fingerprint,
    ) -> Result<Vec<(Vec<u8>, DerivationPath)>, SignError> {
        let input = self.checked_input(index)?;
        let all: Vec<(&[u8], &(Fingerprint, DerivationPath))> = if input.is_taproot() {
            input.tap_bip32_derivations.iter().map(|(key, (_, source))| (&key[..], source)).collect()
        } else {
            input.bip32_derivations.iter().map(|(key, source)| (&key[..], source)).collect()
        };
        if all.is_empty() {
            return Err(SignError::NoBip32Derivation);
        }

        let mine: Vec<(Vec<u8>, DerivationPath)> = all
            .into_iter()
            .filter(|(_, source)| source.0 == fingerprint)
            .map(|(key, source)| (key.to_vec(), source.1.clone()))
            .collect();
        if mine.is_empty() {
            return Err(SignError::NoMatchingFingerprint);
        }
        Ok(mine)
    }

    /// Adds freshly made signatures to input `index`.
    fn add_signatures(
        &mut self,
        index: usize,
        pubkey: &[u8],
        signed: Vec<(SigTarget, [u8; 64])>,
    ) -> Result<(), SignError> {
        let mut fields = Input::default();
        for (target, sig) in signed {
            match target {
                SigTarget::Ecdsa { hash_type } => {
                    let hash_type_byte =
                        u8::try_from(hash_type).map_err(|_| SignError::SighashNotAllowed(hash_type))?;
                    fields.partial_sigs.insert(pubkey.to_vec(), signature::encode(&sig, hash_type_byte)?);
                }
                SigTarget::TapKey { hash_type } =>
                    fields.tap_key_sig = Some(taproot_signature(&sig, hash_type)),
                SigTarget::TapScript { x_only, leaf_hash, hash_type } => {
                    fields.tap_script_sigs.insert((x_only, leaf_hash), taproot_signature(&sig, hash_type));
                }
            }
        }

        self.inputs[index].update(fields)?;
        self.invalidate();
        debug!(index, "input signed");
        Ok(())
    }
}

fn check_allowed(sighash_type: SighashType, allowed: &[SighashType]) -> Result<(), SignError> {
    if !allowed.contains(&sighash_type) {
        return Err(SignError::SighashNotAllowed(sighash_type.to_u32()));
    }
    Ok(())
}

/// The x-only form of a SEC1 or x-only public key.
fn x_only(pubkey: &[u8]) -> Option<[u8; 32]> {
    let x = match pubkey.len() {
        32 => pubkey,
        33 | 65 => &pubkey[1..33],
        _ => return None,
    };
    let mut rv = [0u8; 32];
    rv.copy_from_slice(x);
    Some(rv)
}

/// Derivation entries of taproot inputs name x-only keys.
fn derived_key_matches(expected: &[u8], derived: &[u8]) -> bool {
    expected == derived || (expected.len() == 32 && x_only(derived).map_or(false, |x| x[..] == *expected))
}

/// A Schnorr signature with its sighash byte, omitted for `SIGHASH_DEFAULT`.
fn taproot_signature(sig: &[u8; 64], hash_type: u32) -> Vec<u8> {
    let mut rv = sig.to_vec();
    if hash_type != 0 {
        rv.push(hash_type as u8);
    }
    rv
}

fn split_taproot_signature(sig: &[u8]) -> Option<([u8; 64], u32)> {
    let hash_type = match sig.len() {
        64 => 0,
        65 => u32::from(sig[64]),
        _ => return None,
    };
    let mut rv = [0u8; 64];
    rv.copy_from_slice(&sig[..64]);
    Some((rv, hash_type))
}
