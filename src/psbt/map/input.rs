// SPDX-License-Identifier: CC0-1.0

use core::convert::TryFrom;

use bitcoin::bip32::KeySource;
use tracing::trace;

use super::{
    is_control_block, is_taproot_signature, DecodeError, HashPreimageError, HashType,
    InsertPairError, Map, UpdateError,
};
use crate::consts::{
    psbt_in_key_type_value_to_str, PSBT_IN_BIP32_DERIVATION, PSBT_IN_FINAL_SCRIPTSIG,
    PSBT_IN_FINAL_SCRIPTWITNESS, PSBT_IN_HASH160, PSBT_IN_HASH256, PSBT_IN_NON_WITNESS_UTXO,
    PSBT_IN_PARTIAL_SIG, PSBT_IN_PROPRIETARY, PSBT_IN_REDEEM_SCRIPT, PSBT_IN_RIPEMD160,
    PSBT_IN_SHA256, PSBT_IN_SIGHASH_TYPE, PSBT_IN_TAP_BIP32_DERIVATION, PSBT_IN_TAP_INTERNAL_KEY,
    PSBT_IN_TAP_KEY_SIG, PSBT_IN_TAP_LEAF_SCRIPT, PSBT_IN_TAP_MERKLE_ROOT,
    PSBT_IN_TAP_SCRIPT_SIG, PSBT_IN_WITNESS_SCRIPT, PSBT_IN_WITNESS_UTXO,
};
use crate::crypto;
use crate::encode::Reader;
use crate::error::FundingUtxoError;
use crate::prelude::*;
use crate::psbt::raw;
use crate::psbt::serialize::{self, Deserialize, TapKeySource};
use crate::script;
use crate::sighash_type::SighashType;
use crate::taproot::Tapleaf;
use crate::transaction::{Transaction, TxOutput};

/// A script leaf an input can be spent through, keyed by its control block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TapLeafScript {
    /// The leaf script.
    pub script: Vec<u8>,
    /// The leaf version.
    pub leaf_version: u8,
}

impl TapLeafScript {
    /// The BIP-341 leaf hash of this script.
    pub fn leaf_hash(&self) -> [u8; 32] {
        Tapleaf { output: self.script.clone(), version: self.leaf_version }.hash()
    }
}

/// A key-value map for an input of the corresponding index in the unsigned
/// transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Input {
    /// The non-witness transaction this input spends from. Should only be
    /// `Option::Some` for inputs which spend non-segwit outputs or
    /// if it is unknown whether an input spends a segwit output.
    pub non_witness_utxo: Option<Transaction>,
    /// The transaction output this input spends from. Should only be
    /// `Option::Some` for inputs which spend segwit outputs,
    /// including P2SH embedded ones.
    pub witness_utxo: Option<TxOutput>,
    /// A map from public keys to their corresponding signature as would be
    /// pushed to the stack from a scriptSig or witness for a non-taproot inputs.
    pub partial_sigs: BTreeMap<Vec<u8>, Vec<u8>>,
    /// The sighash type to be used for this input. Signatures for this input
    /// must use the sighash type.
    pub sighash_type: Option<SighashType>,
    /// The redeem script for this input.
    pub redeem_script: Option<Vec<u8>>,
    /// The witness script for this input.
    pub witness_script: Option<Vec<u8>>,
    /// A map from public keys needed to sign this input to their corresponding
    /// master key fingerprints and derivation paths.
    pub bip32_derivations: BTreeMap<Vec<u8>, KeySource>,
    /// The finalized, fully-constructed scriptSig with signatures and any other
    /// scripts necessary for this input to pass validation.
    pub final_script_sig: Option<Vec<u8>>,
    /// The finalized, fully-constructed scriptWitness with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_script_witness: Option<Vec<Vec<u8>>>,
    /// RIPEMD160 hash to preimage map.
    pub ripemd160_preimages: BTreeMap<[u8; 20], Vec<u8>>,
    /// SHA256 hash to preimage map.
    pub sha256_preimages: BTreeMap<[u8; 32], Vec<u8>>,
    /// HASH160 hash to preimage map.
    pub hash160_preimages: BTreeMap<[u8; 20], Vec<u8>>,
    /// HASH256 hash to preimage map.
    pub hash256_preimages: BTreeMap<[u8; 32], Vec<u8>>,
    /// Serialized taproot signature with sighash type for key spend.
    pub tap_key_sig: Option<Vec<u8>>,
    /// Map of `(x-only pubkey, leaf hash)` to signature.
    pub tap_script_sigs: BTreeMap<([u8; 32], [u8; 32]), Vec<u8>>,
    /// Map of control blocks to the script they commit to.
    pub tap_leaf_scripts: BTreeMap<Vec<u8>, TapLeafScript>,
    /// Map of x-only pubkeys to the leaves they sign for and their key origin.
    pub tap_bip32_derivations: BTreeMap<[u8; 32], TapKeySource>,
    /// Taproot internal key.
    pub tap_internal_key: Option<[u8; 32]>,
    /// Taproot merkle root.
    pub tap_merkle_root: Option<[u8; 32]>,
    /// Proprietary key-value pairs for this input.
    pub proprietaries: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown key-value pairs for this input.
    pub unknowns: BTreeMap<raw::Key, Vec<u8>>,
}

impl Input {
    /// Returns a reference to the funding utxo for this input, `vout` being the spent index.
    pub fn funding_utxo(&self, vout: u32) -> Result<&TxOutput, FundingUtxoError> {
        if let Some(ref utxo) = self.witness_utxo {
            Ok(utxo)
        } else if let Some(ref tx) = self.non_witness_utxo {
            let vout = vout as usize;
            tx.outs.get(vout).ok_or(FundingUtxoError::OutOfBounds { vout, len: tx.outs.len() })
        } else {
            Err(FundingUtxoError::MissingUtxo)
        }
    }

    /// Returns true if this input has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }

    /// Returns true if any BIP-371 field is set, or the witness utxo pays to taproot.
    pub fn is_taproot(&self) -> bool {
        self.tap_internal_key.is_some()
            || self.tap_merkle_root.is_some()
            || !self.tap_leaf_scripts.is_empty()
            || !self.tap_bip32_derivations.is_empty()
            || self.witness_utxo.as_ref().map_or(false, |utxo| crate::classify::is_p2tr_output(&utxo.script))
    }

    /// Returns true if a field only meaningful for legacy and segwit v0 spends is set.
    pub(crate) fn has_non_taproot_fields(&self) -> bool {
        self.redeem_script.is_some()
            || self.witness_script.is_some()
            || !self.bip32_derivations.is_empty()
    }

    /// Signatures over this input, from the partial signatures or else the final scripts.
    pub(crate) fn ecdsa_signatures(&self) -> Vec<Vec<u8>> {
        if !self.partial_sigs.is_empty() {
            return self.partial_sigs.values().cloned().collect();
        }
        let mut rv: Vec<Vec<u8>> = vec![];
        if let Some(chunks) = self.final_script_sig.as_deref().and_then(script::decompile) {
            rv.extend(chunks.iter().filter_map(|chunk| chunk.data()).map(<[u8]>::to_vec));
        }
        if let Some(ref witness) = self.final_script_witness {
            rv.extend(witness.iter().cloned());
        }
        rv.retain(|item| script::is_canonical_script_signature(item));
        rv
    }

    /// Schnorr signatures over this input, falling back to a finalized key path spend.
    pub(crate) fn taproot_signatures(&self) -> Vec<&[u8]> {
        let mut sigs: Vec<&[u8]> = vec![];
        if let Some(ref sig) = self.tap_key_sig {
            sigs.push(sig);
        }
        sigs.extend(self.tap_script_sigs.values().map(|sig| &sig[..]));
        if sigs.is_empty() {
            if let Some(ref witness) = self.final_script_witness {
                if witness.len() == 1 && is_taproot_signature(&witness[0]) {
                    sigs.push(&witness[0]);
                }
            }
        }
        sigs
    }

    /// Drops everything but the utxos, the final scripts and unknown pairs.
    pub(crate) fn clear_finalized(&mut self) {
        *self = Input {
            non_witness_utxo: self.non_witness_utxo.take(),
            witness_utxo: self.witness_utxo.take(),
            final_script_sig: self.final_script_sig.take(),
            final_script_witness: self.final_script_witness.take(),
            proprietaries: core::mem::take(&mut self.proprietaries),
            unknowns: core::mem::take(&mut self.unknowns),
            ..Default::default()
        };
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut rv = Self::default();

        loop {
            match raw::Pair::decode(r) {
                Ok(pair) => rv.insert_pair(pair)?,
                Err(serialize::Error::NoMorePairs) => break,
                Err(e) => return Err(DecodeError::DeserPair(e)),
            }
        }

        Ok(rv)
    }

    fn insert_pair(&mut self, pair: raw::Pair) -> Result<(), InsertPairError> {
        let raw::Pair { key: raw_key, value: raw_value } = pair;
        trace!(key = psbt_in_key_type_value_to_str(raw_key.type_value), "input pair");

        match raw_key.type_value {
            PSBT_IN_NON_WITNESS_UTXO => {
                impl_psbt_insert_pair! {
                    self.non_witness_utxo <= <raw_key: _>|<raw_value: Transaction>
                }
            }
            PSBT_IN_WITNESS_UTXO => {
                impl_psbt_insert_pair! {
                    self.witness_utxo <= <raw_key: _>|<raw_value: TxOutput>
                }
            }
            PSBT_IN_PARTIAL_SIG => {
                if !raw_key.key.is_empty() && !script::is_point(&raw_key.key) {
                    return Err(InsertPairError::InvalidPublicKey(raw_key));
                }
                if !script::is_canonical_script_signature(&raw_value) {
                    return Err(InsertPairError::InvalidSignature(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.partial_sigs <= <raw_key: Vec<u8>>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_SIGHASH_TYPE => {
                impl_psbt_insert_pair! {
                    self.sighash_type <= <raw_key: _>|<raw_value: SighashType>
                }
            }
            PSBT_IN_REDEEM_SCRIPT => {
                impl_psbt_insert_pair! {
                    self.redeem_script <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_WITNESS_SCRIPT => {
                impl_psbt_insert_pair! {
                    self.witness_script <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_BIP32_DERIVATION => {
                if !raw_key.key.is_empty() && !script::is_point(&raw_key.key) {
                    return Err(InsertPairError::InvalidPublicKey(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.bip32_derivations <= <raw_key: Vec<u8>>|<raw_value: KeySource>
                }
            }
            PSBT_IN_FINAL_SCRIPTSIG => {
                impl_psbt_insert_pair! {
                    self.final_script_sig <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_FINAL_SCRIPTWITNESS => {
                impl_psbt_insert_pair! {
                    self.final_script_witness <= <raw_key: _>|<raw_value: Vec<Vec<u8>>>
                }
            }
            PSBT_IN_RIPEMD160 => {
                psbt_insert_hash_pair(
                    &mut self.ripemd160_preimages,
                    raw_key,
                    raw_value,
                    HashType::Ripemd,
                )?;
            }
            PSBT_IN_SHA256 => {
                psbt_insert_hash_pair(
                    &mut self.sha256_preimages,
                    raw_key,
                    raw_value,
                    HashType::Sha256,
                )?;
            }
            PSBT_IN_HASH160 => {
                psbt_insert_hash_pair(
                    &mut self.hash160_preimages,
                    raw_key,
                    raw_value,
                    HashType::Hash160,
                )?;
            }
            PSBT_IN_HASH256 => {
                psbt_insert_hash_pair(
                    &mut self.hash256_preimages,
                    raw_key,
                    raw_value,
                    HashType::Hash256,
                )?;
            }
            PSBT_IN_TAP_KEY_SIG => {
                if !is_taproot_signature(&raw_value) {
                    return Err(InsertPairError::InvalidTaprootSignature(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.tap_key_sig <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_TAP_SCRIPT_SIG => {
                if !is_taproot_signature(&raw_value) {
                    return Err(InsertPairError::InvalidTaprootSignature(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.tap_script_sigs <= <raw_key: ([u8; 32], [u8; 32])>|<raw_value: Vec<u8>>
                }
            }
            PSBT_IN_TAP_LEAF_SCRIPT => {
                if !raw_key.key.is_empty() && !is_control_block(&raw_key.key) {
                    return Err(InsertPairError::InvalidControlBlock(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.tap_leaf_scripts <= <raw_key: Vec<u8>>|<raw_value: TapLeafScript>
                }
            }
            PSBT_IN_TAP_BIP32_DERIVATION => {
                impl_psbt_insert_pair! {
                    self.tap_bip32_derivations <= <raw_key: [u8; 32]>|<raw_value: TapKeySource>
                }
            }
            PSBT_IN_TAP_INTERNAL_KEY => {
                impl_psbt_insert_pair! {
                    self.tap_internal_key <= <raw_key: _>|<raw_value: [u8; 32]>
                }
            }
            PSBT_IN_TAP_MERKLE_ROOT => {
                impl_psbt_insert_pair! {
                    self.tap_merkle_root <= <raw_key: _>|<raw_value: [u8; 32]>
                }
            }
            PSBT_IN_PROPRIETARY => {
                let key = raw::ProprietaryKey::try_from(raw_key.clone())?;
                match self.proprietaries.entry(key) {
                    btree_map::Entry::Vacant(empty_key) => {
                        empty_key.insert(raw_value);
                    }
                    btree_map::Entry::Occupied(_) =>
                        return Err(InsertPairError::DuplicateKey(raw_key)),
                }
            }
            _ => match self.unknowns.entry(raw_key) {
                btree_map::Entry::Vacant(empty_key) => {
                    empty_key.insert(raw_value);
                }
                btree_map::Entry::Occupied(k) =>
                    return Err(InsertPairError::DuplicateKey(k.key().clone())),
            },
        }

        Ok(())
    }

    /// Combines this [`Input`] with `other`.
    pub fn combine(&mut self, other: Self) {
        combine_option!(non_witness_utxo, self, other);
        combine_option!(witness_utxo, self, other);
        combine_map!(partial_sigs, self, other);
        combine_option!(sighash_type, self, other);
        combine_option!(redeem_script, self, other);
        combine_option!(witness_script, self, other);
        combine_map!(bip32_derivations, self, other);
        combine_option!(final_script_sig, self, other);
        combine_option!(final_script_witness, self, other);
        combine_map!(ripemd160_preimages, self, other);
        combine_map!(sha256_preimages, self, other);
        combine_map!(hash160_preimages, self, other);
        combine_map!(hash256_preimages, self, other);
        combine_option!(tap_key_sig, self, other);
        combine_map!(tap_script_sigs, self, other);
        combine_map!(tap_leaf_scripts, self, other);
        combine_map!(tap_bip32_derivations, self, other);
        combine_option!(tap_internal_key, self, other);
        combine_option!(tap_merkle_root, self, other);
        combine_map!(proprietaries, self, other);
        combine_map!(unknowns, self, other);
    }

    /// Adds the fields set in `other`, none of which may already be present.
    ///
    /// On error `self` is left untouched.
    pub(crate) fn update(&mut self, other: Self) -> Result<(), UpdateError> {
        other.check()?;

        let mut rv = self.clone();
        {
            let slf = &mut rv;
            update_option!(non_witness_utxo, slf, other);
            update_option!(witness_utxo, slf, other);
            update_map!(partial_sigs, slf, other);
            update_option!(sighash_type, slf, other);
            update_option!(redeem_script, slf, other);
            update_option!(witness_script, slf, other);
            update_map!(bip32_derivations, slf, other);
            update_option!(final_script_sig, slf, other);
            update_option!(final_script_witness, slf, other);
            update_map!(ripemd160_preimages, slf, other);
            update_map!(sha256_preimages, slf, other);
            update_map!(hash160_preimages, slf, other);
            update_map!(hash256_preimages, slf, other);
            update_option!(tap_key_sig, slf, other);
            update_map!(tap_script_sigs, slf, other);
            update_map!(tap_leaf_scripts, slf, other);
            update_map!(tap_bip32_derivations, slf, other);
            update_option!(tap_internal_key, slf, other);
            update_option!(tap_merkle_root, slf, other);
            update_map!(proprietaries, slf, other);
            update_map!(unknowns, slf, other);
        }
        *self = rv;
        Ok(())
    }

    /// Checks the fields the wire decoder would check.
    fn check(&self) -> Result<(), UpdateError> {
        use UpdateError::InvalidData;

        if self.partial_sigs.iter().any(|(pubkey, sig)| {
            !script::is_point(pubkey) || !script::is_canonical_script_signature(sig)
        }) {
            return Err(InvalidData("partial_sigs"));
        }
        if self.bip32_derivations.keys().any(|pubkey| !script::is_point(pubkey)) {
            return Err(InvalidData("bip32_derivations"));
        }
        if self.tap_key_sig.as_deref().map_or(false, |sig| !is_taproot_signature(sig)) {
            return Err(InvalidData("tap_key_sig"));
        }
        if self.tap_script_sigs.values().any(|sig| !is_taproot_signature(sig)) {
            return Err(InvalidData("tap_script_sigs"));
        }
        if self.tap_leaf_scripts.keys().any(|cb| !is_control_block(cb)) {
            return Err(InvalidData("tap_leaf_scripts"));
        }
        if !preimages_match(&self.ripemd160_preimages, crypto::ripemd160)
            || !preimages_match(&self.sha256_preimages, crypto::sha256)
            || !preimages_match(&self.hash160_preimages, crypto::hash160)
            || !preimages_match(&self.hash256_preimages, crypto::hash256)
        {
            return Err(InvalidData("preimages"));
        }
        Ok(())
    }
}

fn preimages_match<const N: usize>(
    map: &BTreeMap<[u8; N], Vec<u8>>,
    hash: fn(&[u8]) -> [u8; N],
) -> bool {
    map.iter().all(|(h, preimage)| hash(preimage) == *h)
}

impl Map for Input {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();

        impl_psbt_get_pair! {
            rv.push(self.non_witness_utxo, PSBT_IN_NON_WITNESS_UTXO)
        }

        impl_psbt_get_pair! {
            rv.push(self.witness_utxo, PSBT_IN_WITNESS_UTXO)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.partial_sigs, PSBT_IN_PARTIAL_SIG)
        }

        impl_psbt_get_pair! {
            rv.push(self.sighash_type, PSBT_IN_SIGHASH_TYPE)
        }

        impl_psbt_get_pair! {
            rv.push(self.redeem_script, PSBT_IN_REDEEM_SCRIPT)
        }

        impl_psbt_get_pair! {
            rv.push(self.witness_script, PSBT_IN_WITNESS_SCRIPT)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.bip32_derivations, PSBT_IN_BIP32_DERIVATION)
        }

        impl_psbt_get_pair! {
            rv.push(self.final_script_sig, PSBT_IN_FINAL_SCRIPTSIG)
        }

        impl_psbt_get_pair! {
            rv.push(self.final_script_witness, PSBT_IN_FINAL_SCRIPTWITNESS)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.ripemd160_preimages, PSBT_IN_RIPEMD160)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.sha256_preimages, PSBT_IN_SHA256)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.hash160_preimages, PSBT_IN_HASH160)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.hash256_preimages, PSBT_IN_HASH256)
        }

        impl_psbt_get_pair! {
            rv.push(self.tap_key_sig, PSBT_IN_TAP_KEY_SIG)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.tap_script_sigs, PSBT_IN_TAP_SCRIPT_SIG)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.tap_leaf_scripts, PSBT_IN_TAP_LEAF_SCRIPT)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.tap_bip32_derivations, PSBT_IN_TAP_BIP32_DERIVATION)
        }

        impl_psbt_get_pair! {
            rv.push(self.tap_internal_key, PSBT_IN_TAP_INTERNAL_KEY)
        }

        impl_psbt_get_pair! {
            rv.push(self.tap_merkle_root, PSBT_IN_TAP_MERKLE_ROOT)
        }

        for (key, value) in self.proprietaries.iter() {
            rv.push(raw::Pair { key: key.to_key(), value: value.clone() });
        }

        for (key, value) in self.unknowns.iter() {
            rv.push(raw::Pair { key: key.clone(), value: value.clone() });
        }

        rv
    }
}

fn psbt_insert_hash_pair<const N: usize>(
    map: &mut BTreeMap<[u8; N], Vec<u8>>,
    raw_key: raw::Key,
    raw_value: Vec<u8>,
    hash_type: HashType,
) -> Result<(), InsertPairError> {
    if raw_key.key.is_empty() {
        return Err(InsertPairError::InvalidKeyDataEmpty(raw_key));
    }

    let key_val: [u8; N] = Deserialize::deserialize(&raw_key.key)?;
    match map.entry(key_val) {
        btree_map::Entry::Vacant(empty_key) => {
            let hash: &[u8] = match hash_type {
                HashType::Ripemd => &crypto::ripemd160(&raw_value),
                HashType::Sha256 => &crypto::sha256(&raw_value),
                HashType::Hash160 => &crypto::hash160(&raw_value),
                HashType::Hash256 => &crypto::hash256(&raw_value),
            };

            if hash != &key_val[..] {
                return Err(HashPreimageError {
                    preimage: raw_value.into_boxed_slice(),
                    hash: Box::from(&key_val[..]),
                    hash_type,
                }
                .into());
            }
            empty_key.insert(raw_value);
            Ok(())
        }
        btree_map::Entry::Occupied(_) => Err(InsertPairError::DuplicateKey(raw_key)),
    }
}
