// SPDX-License-Identifier: CC0-1.0

use core::convert::TryFrom;

use bitcoin::bip32::KeySource;
use tracing::trace;

use super::{DecodeError, InsertPairError, Map, UpdateError};
use crate::consts::{
    psbt_out_key_type_value_to_str, PSBT_OUT_BIP32_DERIVATION, PSBT_OUT_PROPRIETARY,
    PSBT_OUT_REDEEM_SCRIPT, PSBT_OUT_TAP_BIP32_DERIVATION, PSBT_OUT_TAP_INTERNAL_KEY,
    PSBT_OUT_TAP_TREE, PSBT_OUT_WITNESS_SCRIPT,
};
use crate::encode::Reader;
use crate::prelude::*;
use crate::psbt::raw;
use crate::psbt::serialize::{self, TapKeySource};
use crate::script;
use crate::taproot::Taptree;

/// A key-value map for an output of the corresponding index in the unsigned
/// transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    /// The redeem script for this output.
    pub redeem_script: Option<Vec<u8>>,
    /// The witness script for this output.
    pub witness_script: Option<Vec<u8>>,
    /// A map from public keys needed to spend this output to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivations: BTreeMap<Vec<u8>, KeySource>,
    /// The internal key of a taproot output.
    pub tap_internal_key: Option<[u8; 32]>,
    /// The script tree committed to by a taproot output.
    pub tap_tree: Option<Taptree>,
    /// Map of x-only pubkeys to the leaves they sign for and their key origin.
    pub tap_bip32_derivations: BTreeMap<[u8; 32], TapKeySource>,
    /// Proprietary key-value pairs for this output.
    pub proprietaries: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown key-value pairs for this output.
    pub unknowns: BTreeMap<raw::Key, Vec<u8>>,
}

impl Output {
    /// Returns true if any BIP-371 field is set, or `script` pays to taproot.
    pub fn is_taproot(&self, script: &[u8]) -> bool {
        self.tap_internal_key.is_some()
            || self.tap_tree.is_some()
            || !self.tap_bip32_derivations.is_empty()
            || crate::classify::is_p2tr_output(script)
    }

    /// Returns true if a field only meaningful for legacy and segwit v0 outputs is set.
    pub(crate) fn has_non_taproot_fields(&self) -> bool {
        self.redeem_script.is_some()
            || self.witness_script.is_some()
            || !self.bip32_derivations.is_empty()
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
        trace!(key = psbt_out_key_type_value_to_str(raw_key.type_value), "output pair");

        match raw_key.type_value {
            PSBT_OUT_REDEEM_SCRIPT => {
                impl_psbt_insert_pair! {
                    self.redeem_script <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_OUT_WITNESS_SCRIPT => {
                impl_psbt_insert_pair! {
                    self.witness_script <= <raw_key: _>|<raw_value: Vec<u8>>
                }
            }
            PSBT_OUT_BIP32_DERIVATION => {
                if !raw_key.key.is_empty() && !script::is_point(&raw_key.key) {
                    return Err(InsertPairError::InvalidPublicKey(raw_key));
                }
                impl_psbt_insert_pair! {
                    self.bip32_derivations <= <raw_key: Vec<u8>>|<raw_value: KeySource>
                }
            }
            PSBT_OUT_TAP_INTERNAL_KEY => {
                impl_psbt_insert_pair! {
                    self.tap_internal_key <= <raw_key: _>|<raw_value: [u8; 32]>
                }
            }
            PSBT_OUT_TAP_TREE => {
                impl_psbt_insert_pair! {
                    self.tap_tree <= <raw_key: _>|<raw_value: Taptree>
                }
            }
            PSBT_OUT_TAP_BIP32_DERIVATION => {
                impl_psbt_insert_pair! {
                    self.tap_bip32_derivations <= <raw_key: [u8; 32]>|<raw_value: TapKeySource>
                }
            }
            PSBT_OUT_PROPRIETARY => {
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

    /// Combines this [`Output`] with `other`.
    pub fn combine(&mut self, other: Self) {
        combine_option!(redeem_script, self, other);
        combine_option!(witness_script, self, other);
        combine_map!(bip32_derivations, self, other);
        combine_option!(tap_internal_key, self, other);
        combine_option!(tap_tree, self, other);
        combine_map!(tap_bip32_derivations, self, other);
        combine_map!(proprietaries, self, other);
        combine_map!(unknowns, self, other);
    }

    /// Adds the fields set in `other`, none of which may already be present.
    ///
    /// On error `self` is left untouched.
    pub(crate) fn update(&mut self, other: Self) -> Result<(), UpdateError> {
        if other.bip32_derivations.keys().any(|pubkey| !script::is_point(pubkey)) {
            return Err(UpdateError::InvalidData("bip32_derivations"));
        }

        let mut rv = self.clone();
        {
            let slf = &mut rv;
            update_option!(redeem_script, slf, other);
            update_option!(witness_script, slf, other);
            update_map!(bip32_derivations, slf, other);
            update_option!(tap_internal_key, slf, other);
            update_option!(tap_tree, slf, other);
            update_map!(tap_bip32_derivations, slf, other);
            update_map!(proprietaries, slf, other);
            update_map!(unknowns, slf, other);
        }
        *self = rv;
        Ok(())
    }
}

impl Map for Output {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();

        impl_psbt_get_pair! {
            rv.push(self.redeem_script, PSBT_OUT_REDEEM_SCRIPT)
        }

        impl_psbt_get_pair! {
            rv.push(self.witness_script, PSBT_OUT_WITNESS_SCRIPT)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.bip32_derivations, PSBT_OUT_BIP32_DERIVATION)
        }

        impl_psbt_get_pair! {
            rv.push(self.tap_internal_key, PSBT_OUT_TAP_INTERNAL_KEY)
        }

        impl_psbt_get_pair! {
            rv.push(self.tap_tree, PSBT_OUT_TAP_TREE)
        }

        impl_psbt_get_pair! {
            rv.push_map(self.tap_bip32_derivations, PSBT_OUT_TAP_BIP32_DERIVATION)
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

#[cfg(test)]
mod tests {
    use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint};

    use super::*;

    fn decode(bytes: &[u8]) -> Result<Output, DecodeError> {
        Output::decode(&mut Reader::new(bytes))
    }

    fn key_source() -> KeySource {
        let path: Vec<ChildNumber> = vec![ChildNumber::from(0x8000_002c), ChildNumber::from(1)];
        (Fingerprint::from([0xd9, 0x0c, 0x6a, 0x4f]), DerivationPath::from(path))
    }

    #[test]
    fn round_trip() {
        let mut output = Output {
            redeem_script: Some(vec![0x00, 0x14]),
            witness_script: Some(vec![0x51]),
            tap_internal_key: Some([2; 32]),
            tap_tree: Some(Taptree::branch(Taptree::leaf(vec![0x51]), Taptree::leaf(vec![0x52]))),
            ..Default::default()
        };
        output.bip32_derivations.insert([&[0x02][..], &[0x11; 32]].concat(), key_source());
        output.tap_bip32_derivations.insert([3; 32], (vec![[4; 32]], key_source()));

        let bytes = output.serialize_map();
        assert_eq!(decode(&bytes).unwrap(), output);
    }

    #[test]
    fn rejects_bad_pubkey() {
        let mut output = Output::default();
        output.bip32_derivations.insert(vec![0x05; 33], key_source());
        assert!(matches!(
            decode(&output.serialize_map()),
            Err(DecodeError::InsertPair(InsertPairError::InvalidPublicKey(_)))
        ));
    }

    #[test]
    fn combine_keeps_first() {
        let mut first = Output { witness_script: Some(vec![0x51]), ..Default::default() };
        let second = Output {
            witness_script: Some(vec![0x52]),
            redeem_script: Some(vec![0x53]),
            ..Default::default()
        };
        first.combine(second);
        assert_eq!(first.witness_script, Some(vec![0x51]));
        assert_eq!(first.redeem_script, Some(vec![0x53]));
    }

    #[test]
    fn taproot_detection() {
        let p2tr = [&[0x51, 0x20][..], &[7; 32]].concat();
        assert!(Output::default().is_taproot(&p2tr));
        assert!(!Output::default().is_taproot(&[0x00, 0x14]));
        let output = Output { tap_internal_key: Some([1; 32]), ..Default::default() };
        assert!(output.is_taproot(&[]));
    }
}
