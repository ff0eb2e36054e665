// SPDX-License-Identifier: CC0-1.0

use core::convert::TryFrom;
use core::fmt;

use bitcoin::bip32::{KeySource, Xpub};
use tracing::trace;

use super::{InsertPairError, Map, UpdateError};
use crate::consts::{
    psbt_global_key_type_value_to_str, PSBT_GLOBAL_PROPRIETARY, PSBT_GLOBAL_UNSIGNED_TX,
    PSBT_GLOBAL_VERSION, PSBT_GLOBAL_XPUB,
};
use crate::encode::Reader;
use crate::error::write_err;
use crate::prelude::*;
use crate::psbt::raw;
use crate::psbt::serialize::{self, Deserialize};
use crate::transaction::Transaction;

/// The only PSBT version this crate reads and writes.
pub const PSBT_VERSION: u32 = 0;

/// The global key-value map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// The unsigned transaction, scriptSigs and witnesses for each input must be empty.
    pub(crate) unsigned_tx: Transaction,
    /// The extended public keys used to derive the keys of this transaction, with their origin.
    pub xpubs: BTreeMap<Xpub, KeySource>,
    /// The version number of this PSBT, 0 if omitted.
    pub version: Option<u32>,
    /// Global proprietary key-value pairs.
    pub proprietaries: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown global key-value pairs.
    pub unknowns: BTreeMap<raw::Key, Vec<u8>>,
}

impl Global {
    /// Creates a global map around `unsigned_tx`.
    pub(crate) fn new(unsigned_tx: Transaction) -> Self {
        Global {
            unsigned_tx,
            xpubs: BTreeMap::new(),
            version: None,
            proprietaries: BTreeMap::new(),
            unknowns: BTreeMap::new(),
        }
    }

    /// The unsigned transaction.
    pub fn unsigned_tx(&self) -> &Transaction { &self.unsigned_tx }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut unsigned_tx: Option<Transaction> = None;
        let mut rv = Global::new(Transaction::default());

        loop {
            match raw::Pair::decode(r) {
                Ok(pair) => {
                    trace!(key = psbt_global_key_type_value_to_str(pair.key.type_value), "global pair");
                    if pair.key.type_value == PSBT_GLOBAL_UNSIGNED_TX {
                        if !pair.key.key.is_empty() {
                            return Err(InsertPairError::InvalidKeyDataNotEmpty(pair.key).into());
                        }
                        if unsigned_tx.is_some() {
                            return Err(InsertPairError::DuplicateKey(pair.key).into());
                        }
                        let tx = Transaction::deserialize(&pair.value)
                            .map_err(InsertPairError::Deser)?;
                        check_unsigned(&tx)?;
                        unsigned_tx = Some(tx);
                    } else {
                        rv.insert_pair(pair)?;
                    }
                }
                Err(serialize::Error::NoMorePairs) => break,
                Err(e) => return Err(DecodeError::DeserPair(e)),
            }
        }

        if let Some(version) = rv.version {
            if version != PSBT_VERSION {
                return Err(DecodeError::UnsupportedVersion(version));
            }
        }

        rv.unsigned_tx = unsigned_tx.ok_or(DecodeError::MustHaveUnsignedTx)?;
        Ok(rv)
    }

    fn insert_pair(&mut self, pair: raw::Pair) -> Result<(), InsertPairError> {
        let raw::Pair { key: raw_key, value: raw_value } = pair;

        match raw_key.type_value {
            PSBT_GLOBAL_XPUB => {
                impl_psbt_insert_pair! {
                    self.xpubs <= <raw_key: Xpub>|<raw_value: KeySource>
                }
            }
            PSBT_GLOBAL_VERSION => {
                impl_psbt_insert_pair! {
                    self.version <= <raw_key: _>|<raw_value: u32>
                }
            }
            PSBT_GLOBAL_PROPRIETARY => {
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

    /// Combines this [`Global`] with `other`, the unsigned transactions must already match.
    pub(crate) fn combine(&mut self, other: Self) {
        combine_option!(version, self, other);
        combine_map!(xpubs, self, other);
        combine_map!(proprietaries, self, other);
        combine_map!(unknowns, self, other);
    }

    /// Adds extended public keys, none of which may be present already.
    pub(crate) fn update(&mut self, xpubs: BTreeMap<Xpub, KeySource>) -> Result<(), UpdateError> {
        let other = Global { xpubs, ..Global::new(Transaction::default()) };
        update_map!(xpubs, self, other);
        Ok(())
    }
}

/// Checks that `tx` carries no scriptSig and no witness.
pub(crate) fn check_unsigned(tx: &Transaction) -> Result<(), DecodeError> {
    if tx.ins.iter().any(|input| !input.script.is_empty()) {
        return Err(DecodeError::UnsignedTxHasScriptSigs);
    }
    if tx.ins.iter().any(|input| !input.witness.is_empty()) {
        return Err(DecodeError::UnsignedTxHasScriptWitnesses);
    }
    Ok(())
}

impl Map for Global {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();

        rv.push(raw::Pair {
            key: raw::Key { type_value: PSBT_GLOBAL_UNSIGNED_TX, key: vec![] },
            value: self.unsigned_tx.to_buffer(),
        });

        impl_psbt_get_pair! {
            rv.push_map(self.xpubs, PSBT_GLOBAL_XPUB)
        }

        impl_psbt_get_pair! {
            rv.push(self.version, PSBT_GLOBAL_VERSION)
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

/// An error while decoding the global map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Error inserting a key-value pair.
    InsertPair(InsertPairError),
    /// Error decoding a pair.
    DeserPair(serialize::Error),
    /// The global map must contain an unsigned transaction.
    MustHaveUnsignedTx,
    /// The unsigned transaction has a non-empty scriptSig.
    UnsignedTxHasScriptSigs,
    /// The unsigned transaction has a non-empty witness.
    UnsignedTxHasScriptWitnesses,
    /// PSBT version other than 0.
    UnsupportedVersion(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DecodeError::*;

        match *self {
            InsertPair(ref e) => write_err!(f, "error inserting a key-value pair"; e),
            DeserPair(ref e) => write_err!(f, "error decoding pair"; e),
            MustHaveUnsignedTx => f.write_str("Format Error: Unsigned Transaction missing"),
            UnsignedTxHasScriptSigs => f.write_str("Format Error: Transaction ScriptSigs are not empty"),
            UnsignedTxHasScriptWitnesses =>
                f.write_str("Format Error: Transaction Witnesses are not empty"),
            UnsupportedVersion(v) => write!(f, "unsupported PSBT version {}", v),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use DecodeError::*;

        match *self {
            InsertPair(ref e) => Some(e),
            DeserPair(ref e) => Some(e),
            MustHaveUnsignedTx
            | UnsignedTxHasScriptSigs
            | UnsignedTxHasScriptWitnesses
            | UnsupportedVersion(_) => None,
        }
    }
}

impl From<InsertPairError> for DecodeError {
    fn from(e: InsertPairError) -> Self { Self::InsertPair(e) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_tx() -> Transaction {
        let mut tx = Transaction { version: 2, ..Default::default() };
        tx.add_input([7; 32], 1, None, None);
        tx.add_output(vec![0x51], 1000);
        tx
    }

    #[test]
    fn round_trip() {
        let global = Global::new(unsigned_tx());
        let bytes = global.serialize_map();
        let mut r = Reader::new(&bytes);
        assert_eq!(Global::decode(&mut r).unwrap(), global);
        assert!(r.is_empty());
    }

    #[test]
    fn rejects_signed_tx() {
        let mut tx = unsigned_tx();
        tx.ins[0].script = vec![0x51];
        let global = Global::new(tx);
        let bytes = global.serialize_map();
        assert_eq!(Global::decode(&mut Reader::new(&bytes)), Err(DecodeError::UnsignedTxHasScriptSigs));
    }

    #[test]
    fn needs_unsigned_tx() {
        assert_eq!(Global::decode(&mut Reader::new(&[0x00])), Err(DecodeError::MustHaveUnsignedTx));
    }

    #[test]
    fn rejects_other_versions() {
        let mut global = Global::new(unsigned_tx());
        global.version = Some(2);
        let bytes = global.serialize_map();
        assert_eq!(Global::decode(&mut Reader::new(&bytes)), Err(DecodeError::UnsupportedVersion(2)));
    }

    #[test]
    fn duplicate_key() {
        let mut bytes = Global::new(unsigned_tx()).serialize_map();
        bytes.pop();
        let again = bytes.clone();
        bytes.extend(&again[..]);
        bytes.push(0x00);
        match Global::decode(&mut Reader::new(&bytes)) {
            Err(DecodeError::InsertPair(InsertPairError::DuplicateKey(key))) =>
                assert_eq!(key.type_value, PSBT_GLOBAL_UNSIGNED_TX),
            other => panic!("unexpected {:?}", other),
        }
    }
}
