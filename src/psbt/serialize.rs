// SPDX-License-Identifier: CC0-1.0

//! PSBT serialization.
//!
//! Traits to serialize PSBT values to and from raw bytes
//! according to the BIP-174 specification.

use core::fmt;

use bitcoin::bip32::{self, ChildNumber, DerivationPath, Fingerprint, KeySource, Xpub};

use super::map::input::TapLeafScript;
use crate::encode::{self, Reader};
use crate::error::write_err;
use crate::prelude::*;
use crate::sighash_type::SighashType;
use crate::taproot::{self, TapLeafEntry, TaprootError, Taptree};
use crate::transaction::{self, Transaction, TxOutput};

/// A taproot key origin, the leaves the key signs for and its BIP-32 source.
pub type TapKeySource = (Vec<[u8; 32]>, KeySource);

/// A trait for serializing a value as raw data for insertion into PSBT
/// key-value maps.
pub(crate) trait Serialize {
    /// Serialize a value as raw data.
    fn serialize(&self) -> Vec<u8>;
}

/// A trait for deserializing a value from raw data in PSBT key-value maps.
pub(crate) trait Deserialize: Sized {
    /// Deserialize a value from raw data.
    fn deserialize(bytes: &[u8]) -> Result<Self, Error>;
}

/// Runs `f` over all of `bytes`, failing if it leaves anything unread.
fn consume_all<T, F>(bytes: &[u8], f: F) -> Result<T, Error>
where
    F: FnOnce(&mut Reader<'_>) -> Result<T, Error>,
{
    let mut r = Reader::new(bytes);
    let value = f(&mut r)?;
    if !r.is_empty() {
        return Err(Error::PartialDataConsumption);
    }
    Ok(value)
}

impl Serialize for Vec<u8> {
    fn serialize(&self) -> Vec<u8> { self.clone() }
}

impl Deserialize for Vec<u8> {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> { Ok(bytes.to_vec()) }
}

impl<const N: usize> Serialize for [u8; N] {
    fn serialize(&self) -> Vec<u8> { self.to_vec() }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        <[u8; N]>::try_from(bytes)
            .map_err(|_| Error::InvalidLength { expected: N, got: bytes.len() })
    }
}

impl Serialize for u32 {
    fn serialize(&self) -> Vec<u8> { self.to_le_bytes().to_vec() }
}

impl Deserialize for u32 {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Ok(u32::from_le_bytes(Deserialize::deserialize(bytes)?))
    }
}

impl Serialize for SighashType {
    fn serialize(&self) -> Vec<u8> { self.to_u32().serialize() }
}

impl Deserialize for SighashType {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Ok(SighashType::from_u32(Deserialize::deserialize(bytes)?))
    }
}

impl Serialize for Transaction {
    fn serialize(&self) -> Vec<u8> { self.to_buffer() }
}

impl Deserialize for Transaction {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Transaction::from_buffer(bytes).map_err(Error::Transaction)
    }
}

impl Serialize for TxOutput {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + encode::var_slice_len(&self.script));
        buf.extend_from_slice(&self.value.to_le_bytes());
        encode::write_var_slice(&mut buf, &self.script);
        buf
    }
}

impl Deserialize for TxOutput {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        consume_all(bytes, |r| {
            let value = r.read_u64()?;
            let script = r.read_var_slice()?.to_vec();
            Ok(TxOutput { script, value })
        })
    }
}

/// Witness stacks, as in the finalized scriptWitness.
impl Serialize for Vec<Vec<u8>> {
    fn serialize(&self) -> Vec<u8> { encode::serialize_vector(self) }
}

impl Deserialize for Vec<Vec<u8>> {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        consume_all(bytes, |r| Ok(r.read_vector()?))
    }
}

impl Serialize for Xpub {
    fn serialize(&self) -> Vec<u8> { self.encode().to_vec() }
}

impl Deserialize for Xpub {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Xpub::decode(bytes).map_err(Error::Xpub)
    }
}

fn write_key_source(buf: &mut Vec<u8>, (fingerprint, path): &KeySource) {
    buf.extend_from_slice(&fingerprint.to_bytes());
    for child in path {
        buf.extend_from_slice(&u32::from(*child).to_le_bytes());
    }
}

fn read_key_source(r: &mut Reader<'_>) -> Result<KeySource, Error> {
    let rest = r.remaining();
    if rest < 4 || rest % 4 != 0 {
        return Err(Error::InvalidKeySource(rest));
    }
    let fingerprint = Fingerprint::from(r.read_array::<4>()?);
    let mut path = Vec::with_capacity(rest / 4 - 1);
    while !r.is_empty() {
        path.push(ChildNumber::from(r.read_u32()?));
    }
    Ok((fingerprint, DerivationPath::from(path)))
}

impl Serialize for KeySource {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_key_source(&mut buf, self);
        buf
    }
}

impl Deserialize for KeySource {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> { consume_all(bytes, read_key_source) }
}

impl Serialize for TapKeySource {
    fn serialize(&self) -> Vec<u8> {
        let (leaf_hashes, key_source) = self;
        let mut buf = Vec::new();
        encode::write_var_int(&mut buf, leaf_hashes.len() as u64);
        for hash in leaf_hashes {
            buf.extend_from_slice(hash);
        }
        write_key_source(&mut buf, key_source);
        buf
    }
}

impl Deserialize for TapKeySource {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        consume_all(bytes, |r| {
            let n = r.read_len()?;
            let mut leaf_hashes = Vec::with_capacity(n.min(r.remaining() / 32));
            for _ in 0..n {
                leaf_hashes.push(r.read_array::<32>()?);
            }
            Ok((leaf_hashes, read_key_source(r)?))
        })
    }
}

/// The `(x-only pubkey, leaf hash)` key of a script path signature.
impl Serialize for ([u8; 32], [u8; 32]) {
    fn serialize(&self) -> Vec<u8> { [&self.0[..], &self.1[..]].concat() }
}

impl Deserialize for ([u8; 32], [u8; 32]) {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        consume_all(bytes, |r| Ok((r.read_array()?, r.read_array()?)))
    }
}

impl Serialize for TapLeafScript {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.script.clone();
        buf.push(self.leaf_version);
        buf
    }
}

impl Deserialize for TapLeafScript {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let (leaf_version, script) = bytes.split_last().ok_or(Error::InvalidLength { expected: 1, got: 0 })?;
        if leaf_version & taproot::TAPLEAF_VERSION_MASK != *leaf_version {
            return Err(Error::TapTree(TaprootError::InvalidLeafVersion(*leaf_version)));
        }
        Ok(TapLeafScript { script: script.to_vec(), leaf_version: *leaf_version })
    }
}

/// Script trees travel as their depth-first leaf list.
impl Serialize for Taptree {
    fn serialize(&self) -> Vec<u8> {
        fn walk(tree: &Taptree, depth: u8, buf: &mut Vec<u8>) {
            match tree {
                Taptree::Leaf(leaf) => {
                    buf.push(depth);
                    buf.push(leaf.version);
                    encode::write_var_slice(buf, &leaf.output);
                }
                Taptree::Branch(left, right) => {
                    walk(left, depth.saturating_add(1), buf);
                    walk(right, depth.saturating_add(1), buf);
                }
            }
        }

        let mut buf = Vec::new();
        walk(self, 0, &mut buf);
        buf
    }
}

impl Deserialize for Taptree {
    fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let mut leaves = Vec::new();
        while !r.is_empty() {
            let depth = r.read_u8()?;
            let leaf_version = r.read_u8()?;
            let script = r.read_var_slice()?.to_vec();
            leaves.push(TapLeafEntry { depth, leaf_version, script });
        }
        taproot::tap_tree_from_list(&leaves).map_err(Error::TapTree)
    }
}

/// Ways that a PSBT value might fail to deserialize.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Reached the end of a map.
    NoMorePairs,
    /// Key of type 0xFC is not a proprietary key.
    InvalidProprietaryKey,
    /// Truncated or malformed value.
    Encode(encode::Error),
    /// Data was left over after the value was read.
    PartialDataConsumption,
    /// Fixed size value of the wrong size.
    InvalidLength {
        /// Size of the value.
        expected: usize,
        /// Size found.
        got: usize,
    },
    /// A key source must be a fingerprint followed by whole 4 byte path elements.
    InvalidKeySource(usize),
    /// Error parsing a transaction.
    Transaction(transaction::DecodeError),
    /// Error parsing an extended public key.
    Xpub(bip32::Error),
    /// Invalid script tree or leaf version.
    TapTree(TaprootError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match *self {
            NoMorePairs => f.write_str("no more key-value pairs for this psbt map"),
            InvalidProprietaryKey =>
                f.write_str("non-proprietary key type found when proprietary key was expected"),
            Encode(ref e) => write_err!(f, "malformed value"; e),
            PartialDataConsumption =>
                f.write_str("data not consumed entirely when explicitly deserializing"),
            InvalidLength { expected, got } =>
                write!(f, "invalid value length: expected {} bytes, got {}", expected, got),
            InvalidKeySource(len) => write!(f, "invalid key source length {}", len),
            Transaction(ref e) => write_err!(f, "invalid transaction"; e),
            Xpub(ref e) => write_err!(f, "invalid extended public key"; e),
            TapTree(ref e) => write_err!(f, "invalid taproot tree"; e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match *self {
            Encode(ref e) => Some(e),
            Transaction(ref e) => Some(e),
            Xpub(ref e) => Some(e),
            TapTree(ref e) => Some(e),
            NoMorePairs
            | InvalidProprietaryKey
            | PartialDataConsumption
            | InvalidLength { .. }
            | InvalidKeySource(_) => None,
        }
    }
}

impl From<encode::Error> for Error {
    fn from(e: encode::Error) -> Self { Self::Encode(e) }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use super::*;

    #[test]
    fn key_source() {
        let source: KeySource = (
            Fingerprint::from([0xd9, 0x0c, 0x6a, 0x4f]),
            DerivationPath::from_str("m/0'/0'/1'").unwrap(),
        );
        let bytes = source.serialize();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[0xd9, 0x0c, 0x6a, 0x4f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x80]);
        assert_eq!(KeySource::deserialize(&bytes).unwrap(), source);

        assert_eq!(KeySource::deserialize(&bytes[..6]), Err(Error::InvalidKeySource(6)));
    }

    #[test]
    fn witness_utxo() {
        let out = TxOutput { script: vec![0x00, 0x14], value: 50_000 };
        let bytes = out.serialize();
        assert_eq!(bytes, [0x50, 0xc3, 0, 0, 0, 0, 0, 0, 0x02, 0x00, 0x14]);
        assert_eq!(TxOutput::deserialize(&bytes).unwrap(), out);

        let mut long = bytes.clone();
        long.push(0);
        assert_eq!(TxOutput::deserialize(&long), Err(Error::PartialDataConsumption));
    }

    #[test]
    fn fixed_length() {
        assert_eq!(<[u8; 32]>::deserialize(&[0; 31]), Err(Error::InvalidLength { expected: 32, got: 31 }));
        assert_eq!(SighashType::deserialize(&[0x83, 0, 0, 0]).unwrap(), SighashType::SINGLE_ANYONECANPAY);
    }

    #[test]
    fn tap_tree_leaf_list() {
        let tree = Taptree::branch(
            Taptree::leaf(vec![0x51]),
            Taptree::branch(Taptree::leaf(vec![0x52]), Taptree::leaf(vec![0x53])),
        );
        let bytes = tree.serialize();
        assert_eq!(bytes, [1, 0xc0, 1, 0x51, 2, 0xc0, 1, 0x52, 2, 0xc0, 1, 0x53]);
        assert_eq!(Taptree::deserialize(&bytes).unwrap(), tree);

        // A lone leaf at depth 1 leaves its sibling empty.
        assert!(Taptree::deserialize(&[1, 0xc0, 1, 0x51]).is_err());
    }

    #[test]
    fn tap_leaf_script() {
        let leaf = TapLeafScript { script: vec![0x51], leaf_version: 0xc0 };
        assert_eq!(leaf.serialize(), [0x51, 0xc0]);
        assert_eq!(TapLeafScript::deserialize(&[0x51, 0xc0]).unwrap(), leaf);
        assert!(TapLeafScript::deserialize(&[0x51, 0xc1]).is_err());
    }
}
