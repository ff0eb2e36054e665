// SPDX-License-Identifier: CC0-1.0

//! Implementation of the "maps" concept defined in BIP-174.
//!
//! > The Partially Signed Bitcoin Transaction (PSBT) format consists of key-value maps.
//! > ...
//! > `<global-map> := <keypair>* 0x00`
//! > `<input-map> := <keypair>* 0x00`
//! > `<output-map> := <keypair>* 0x00`
//! > ...

/// The `global-map`.
pub mod global;
/// The `input-map`.
pub mod input;
/// The `output-map`.
pub mod output;

use core::fmt;

use super::raw;
use super::serialize::{self, Serialize};
use crate::error::write_err;
use crate::prelude::*;

/// A trait that describes a PSBT key-value map.
pub(crate) trait Map {
    /// Attempt to get all key-value pairs.
    fn get_pairs(&self) -> Vec<raw::Pair>;

    /// Serialize Psbt binary map data according to BIP-174 specification.
    ///
    /// <map> := <keypair>* 0x00
    ///
    /// The separator 0x00 reads as a key of length zero, which no actual key has.
    fn serialize_map(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for pair in Map::get_pairs(self) {
            buf.extend(&pair.serialize());
        }
        buf.push(0x00_u8);
        buf
    }
}

/// Error inserting a key-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InsertPairError {
    /// Keys within key-value map should never be duplicated.
    DuplicateKey(raw::Key),
    /// Error deserializing raw value.
    Deser(serialize::Error),
    /// Key should contain data.
    InvalidKeyDataEmpty(raw::Key),
    /// Key should not contain data.
    InvalidKeyDataNotEmpty(raw::Key),
    /// Key data is not a valid public key.
    InvalidPublicKey(raw::Key),
    /// Value is not a DER signature followed by a sighash byte.
    InvalidSignature(raw::Key),
    /// Value is not a 64 or 65 byte Schnorr signature.
    InvalidTaprootSignature(raw::Key),
    /// Key data is not a well formed control block.
    InvalidControlBlock(raw::Key),
    /// The pre-image must hash to the correponding psbt hash
    HashPreimage(HashPreimageError),
}

impl fmt::Display for InsertPairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InsertPairError::*;

        match *self {
            DuplicateKey(ref key) => write!(f, "duplicate key: {}", key),
            Deser(ref e) => write_err!(f, "error deserializing raw value"; e),
            InvalidKeyDataEmpty(ref key) => write!(f, "key should contain data: {}", key),
            InvalidKeyDataNotEmpty(ref key) => write!(f, "key should not contain data: {}", key),
            InvalidPublicKey(ref key) => write!(f, "invalid public key: {}", key),
            InvalidSignature(ref key) => write!(f, "invalid ECDSA signature for key: {}", key),
            InvalidTaprootSignature(ref key) =>
                write!(f, "invalid Schnorr signature for key: {}", key),
            InvalidControlBlock(ref key) => write!(f, "invalid control block: {}", key),
            HashPreimage(ref e) => write_err!(f, "invalid hash preimage"; e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InsertPairError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InsertPairError::*;

        match *self {
            Deser(ref e) => Some(e),
            HashPreimage(ref e) => Some(e),
            DuplicateKey(_)
            | InvalidKeyDataEmpty(_)
            | InvalidKeyDataNotEmpty(_)
            | InvalidPublicKey(_)
            | InvalidSignature(_)
            | InvalidTaprootSignature(_)
            | InvalidControlBlock(_) => None,
        }
    }
}

impl From<serialize::Error> for InsertPairError {
    fn from(e: serialize::Error) -> Self { Self::Deser(e) }
}

impl From<HashPreimageError> for InsertPairError {
    fn from(e: HashPreimageError) -> Self { Self::HashPreimage(e) }
}

/// An hash and hash preimage do not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPreimageError {
    /// The hash-type causing this error.
    pub hash_type: HashType,
    /// The hash pre-image.
    pub preimage: Box<[u8]>,
    /// The hash (should equal hash of the preimage).
    pub hash: Box<[u8]>,
}

impl fmt::Display for HashPreimageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid hash preimage {} {:x} {:x}",
            self.hash_type,
            self.preimage.as_hex(),
            self.hash.as_hex()
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HashPreimageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { None }
}

/// Enum for marking invalid preimage error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum HashType {
    /// The ripemd hash algorithm.
    Ripemd,
    /// The sha-256 hash algorithm.
    Sha256,
    /// The hash-160 hash algorithm.
    Hash160,
    /// The Hash-256 hash algorithm.
    Hash256,
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HashType::*;

        match *self {
            Ripemd => f.write_str("ripemd160"),
            Sha256 => f.write_str("sha256"),
            Hash160 => f.write_str("hash160"),
            Hash256 => f.write_str("hash256"),
        }
    }
}

/// Error adding fields to a map through the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UpdateError {
    /// The field is already set.
    DuplicateField(&'static str),
    /// The map field already has an entry under one of the new keys.
    DuplicateEntry(&'static str),
    /// The new value is not well formed.
    InvalidData(&'static str),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use UpdateError::*;

        match *self {
            DuplicateField(field) => write!(f, "Can not add duplicate data: {} is already set", field),
            DuplicateEntry(field) => write!(f, "Can not add duplicate data to array: {}", field),
            InvalidData(field) => write!(f, "Invalid data for {}", field),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use UpdateError::*;

        match *self {
            DuplicateField(_) | DuplicateEntry(_) | InvalidData(_) => None,
        }
    }
}

/// An error while decoding an input or output map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Error inserting a key-value pair.
    InsertPair(InsertPairError),
    /// Error decoding a pair.
    DeserPair(serialize::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DecodeError::*;

        match *self {
            InsertPair(ref e) => write_err!(f, "error inserting a key-value pair"; e),
            DeserPair(ref e) => write_err!(f, "error decoding pair"; e),
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
        }
    }
}

impl From<InsertPairError> for DecodeError {
    fn from(e: InsertPairError) -> Self { Self::InsertPair(e) }
}

/// Returns true if `control_block` has a whole number of path hashes, at most 128 of them.
pub(crate) fn is_control_block(control_block: &[u8]) -> bool {
    control_block.len() >= 33
        && (control_block.len() - 33) % 32 == 0
        && (control_block.len() - 33) / 32 <= crate::taproot::MAX_TAPTREE_DEPTH
}

/// Returns true if `signature` is a Schnorr signature, optionally followed by a sighash byte.
pub(crate) fn is_taproot_signature(signature: &[u8]) -> bool {
    signature.len() == 64 || signature.len() == 65
}
