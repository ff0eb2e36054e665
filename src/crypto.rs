// SPDX-License-Identifier: CC0-1.0

//! Hash functions used throughout the crate.
//!
//! Thin wrappers over `bitcoin::hashes` returning plain byte arrays, plus BIP-340 tagged hashes.

use bitcoin::hashes::{hash160, ripemd160, sha256, sha256d, Hash, HashEngine};

/// RIPEMD160 of `data`.
pub fn ripemd160(data: &[u8]) -> [u8; 20] { ripemd160::Hash::hash(data).to_byte_array() }

/// SHA256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] { sha256::Hash::hash(data).to_byte_array() }

/// RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] { hash160::Hash::hash(data).to_byte_array() }

/// SHA256(SHA256(data)).
pub fn hash256(data: &[u8]) -> [u8; 32] { sha256d::Hash::hash(data).to_byte_array() }

/// The tags used with [`tagged_hash`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaggedHashPrefix {
    /// `BIP0340/challenge`
    Bip340Challenge,
    /// `BIP0340/aux`
    Bip340Aux,
    /// `BIP0340/nonce`
    Bip340Nonce,
    /// `TapLeaf`
    TapLeaf,
    /// `TapBranch`
    TapBranch,
    /// `TapSighash`
    TapSighash,
    /// `TapTweak`
    TapTweak,
}

impl TaggedHashPrefix {
    /// The tag as it is fed to SHA256.
    pub fn tag(self) -> &'static [u8] {
        use TaggedHashPrefix::*;

        match self {
            Bip340Challenge => b"BIP0340/challenge",
            Bip340Aux => b"BIP0340/aux",
            Bip340Nonce => b"BIP0340/nonce",
            TapLeaf => b"TapLeaf",
            TapBranch => b"TapBranch",
            TapSighash => b"TapSighash",
            TapTweak => b"TapTweak",
        }
    }
}

/// SHA256(SHA256(tag) || SHA256(tag) || data) as defined in BIP-340.
pub fn tagged_hash(prefix: TaggedHashPrefix, data: &[u8]) -> [u8; 32] {
    let tag = sha256::Hash::hash(prefix.tag());
    let mut engine = sha256::Hash::engine();
    engine.input(tag.as_byte_array());
    engine.input(tag.as_byte_array());
    engine.input(data);
    sha256::Hash::from_engine(engine).to_byte_array()
}
