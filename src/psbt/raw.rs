// SPDX-License-Identifier: CC0-1.0

//! Raw PSBT key-value pairs.
//!
//! Raw PSBT key-value pairs as defined at
//! <https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki>.

use core::convert::TryFrom;
use core::fmt;

use super::serialize::{self, Deserialize, Serialize};
use crate::encode::{self, Reader};
use crate::prelude::*;

/// A PSBT key in its raw byte form.
///
/// `<key> := <keylen> <keytype> <keydata>`
#[derive(Debug, PartialEq, Hash, Eq, Clone, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub struct Key {
    /// The type of this PSBT key.
    pub type_value: u8,
    /// The key data itself in raw byte form.
    pub key: Vec<u8>,
}

/// A PSBT key-value pair in its raw byte form.
///
/// `<keypair> := <key> <value>`
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub struct Pair {
    /// The key of this key-value pair.
    pub key: Key,
    /// The value data of this key-value pair in raw byte form.
    ///
    /// `<value> := <valuelen> <valuedata>`
    pub value: Vec<u8>,
}

/// Default implementation for proprietary key subtyping.
pub type ProprietaryType = u8;

/// Proprietary keys (i.e. keys starting with 0xFC byte) with their internal
/// structure according to BIP 174.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub struct ProprietaryKey<Subtype = ProprietaryType>
where
    Subtype: Copy + From<u8> + Into<u8>,
{
    /// Proprietary type prefix used for grouping together keys under some
    /// application and avoid namespace collision.
    pub prefix: Vec<u8>,
    /// Custom proprietary subtype.
    pub subtype: Subtype,
    /// Additional key bytes (like serialized public key data etc).
    pub key: Vec<u8>,
}

/// Key type of every proprietary key.
pub(crate) const PROPRIETARY_TYPE: u8 = 0xFC;

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {:#x}, key: {:x}", self.type_value, self.key.as_hex())
    }
}

impl Key {
    /// Reads a key, `Err(NoMorePairs)` if the map separator is found instead.
    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, serialize::Error> {
        let byte_size = r.read_len()?;

        if byte_size == 0 {
            return Err(serialize::Error::NoMorePairs);
        }

        let type_value = r.read_u8()?;
        let key = r.read_slice(byte_size - 1)?.to_vec();

        Ok(Key { type_value, key })
    }
}

impl Serialize for Key {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode::write_var_int(&mut buf, (self.key.len() + 1) as u64);
        buf.push(self.type_value);
        buf.extend_from_slice(&self.key);
        buf
    }
}

impl Serialize for Pair {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(self.key.serialize());
        encode::write_var_slice(&mut buf, &self.value);
        buf
    }
}

impl Pair {
    /// Reads a key-value pair, `Err(NoMorePairs)` at the end of a map.
    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, serialize::Error> {
        let key = Key::decode(r)?;
        let value = r.read_var_slice()?.to_vec();
        Ok(Pair { key, value })
    }
}

impl<Subtype> Serialize for ProprietaryKey<Subtype>
where
    Subtype: Copy + From<u8> + Into<u8>,
{
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode::write_var_slice(&mut buf, &self.prefix);
        buf.push(self.subtype.into());
        buf.extend_from_slice(&self.key);
        buf
    }
}

impl<Subtype> Deserialize for ProprietaryKey<Subtype>
where
    Subtype: Copy + From<u8> + Into<u8>,
{
    fn deserialize(bytes: &[u8]) -> Result<Self, serialize::Error> {
        let mut r = Reader::new(bytes);
        let prefix = r.read_var_slice()?.to_vec();
        let subtype = Subtype::from(r.read_u8()?);
        let key = r.rest().to_vec();

        Ok(ProprietaryKey { prefix, subtype, key })
    }
}

impl<Subtype> ProprietaryKey<Subtype>
where
    Subtype: Copy + From<u8> + Into<u8>,
{
    /// Constructs full [Key] corresponding to this proprietary key type
    pub fn to_key(&self) -> Key { Key { type_value: PROPRIETARY_TYPE, key: self.serialize() } }
}

impl<Subtype> TryFrom<Key> for ProprietaryKey<Subtype>
where
    Subtype: Copy + From<u8> + Into<u8>,
{
    type Error = serialize::Error;

    /// Constructs a [`ProprietaryKey`] from a [`Key`].
    ///
    /// # Errors
    ///
    /// Returns [`serialize::Error::InvalidProprietaryKey`] if `key` does not start with `0xFC` byte.
    fn try_from(key: Key) -> Result<Self, Self::Error> {
        if key.type_value != PROPRIETARY_TYPE {
            return Err(serialize::Error::InvalidProprietaryKey);
        }

        ProprietaryKey::deserialize(&key.key)
    }
}
