// SPDX-License-Identifier: CC0-1.0

//! Bitcoin transactions.
//!
//! Binary (de)serialization of legacy and segwit transactions, txid/wtxid, weight and the three
//! signature hash algorithms (see [`sighash`]).

pub mod sighash;

use core::fmt;

use bitcoin::hex::{DisplayHex, FromHex, HexToBytesError};

use crate::crypto;
use crate::encode::{self, Reader};
use crate::error::write_err;
use crate::prelude::*;

#[rustfmt::skip]                // Keep public re-exports separate.
pub use crate::sighash_type::{
    SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_DEFAULT, SIGHASH_INPUT_MASK, SIGHASH_NONE,
    SIGHASH_OUTPUT_MASK, SIGHASH_SINGLE,
};
pub use sighash::SighashError;

/// Sequence number of a final input.
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

const ADVANCED_TRANSACTION_MARKER: u8 = 0x00;
const ADVANCED_TRANSACTION_FLAG: u8 = 0x01;

/// A transaction input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxInput {
    /// Hash of the spent transaction, in internal byte order.
    pub hash: [u8; 32],
    /// Index of the spent output.
    pub index: u32,
    /// The scriptSig.
    pub script: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
    /// Witness stack, empty for non-segwit spends.
    pub witness: Vec<Vec<u8>>,
}

/// A transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxOutput {
    /// The scriptPubKey.
    pub script: Vec<u8>,
    /// Value in satoshis.
    pub value: u64,
}

/// A Bitcoin transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transaction {
    /// Transaction version.
    pub version: i32,
    /// Lock time.
    pub locktime: u32,
    /// Inputs.
    pub ins: Vec<TxInput>,
    /// Outputs.
    pub outs: Vec<TxOutput>,
}

impl Default for Transaction {
    fn default() -> Self { Transaction { version: 1, locktime: 0, ins: vec![], outs: vec![] } }
}

impl Transaction {
    /// Creates an empty version 1 transaction.
    pub fn new() -> Self { Self::default() }

    /// Parses a transaction, rejecting trailing bytes.
    pub fn from_buffer(buf: &[u8]) -> Result<Self, DecodeError> { Self::decode(buf, true) }

    /// Parses a transaction, ignoring anything after the lock time.
    pub fn from_buffer_lenient(buf: &[u8]) -> Result<Self, DecodeError> { Self::decode(buf, false) }

    /// Parses a hex encoded transaction.
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let buf = Vec::from_hex(s).map_err(DecodeError::Hex)?;
        Self::from_buffer(&buf)
    }

    fn decode(buf: &[u8], strict: bool) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let version = r.read_i32()?;

        let mut has_witnesses = false;
        if r.rest().len() >= 2
            && r.rest()[0] == ADVANCED_TRANSACTION_MARKER
            && r.rest()[1] == ADVANCED_TRANSACTION_FLAG
        {
            r.read_slice(2)?;
            has_witnesses = true;
        }

        let n_ins = r.read_len()?;
        let mut ins = Vec::with_capacity(n_ins.min(r.remaining() / 41));
        for _ in 0..n_ins {
            ins.push(TxInput {
                hash: r.read_array()?,
                index: r.read_u32()?,
                script: r.read_var_slice()?.to_vec(),
                sequence: r.read_u32()?,
                witness: vec![],
            });
        }

        let n_outs = r.read_len()?;
        let mut outs = Vec::with_capacity(n_outs.min(r.remaining() / 9));
        for _ in 0..n_outs {
            outs.push(TxOutput { value: r.read_u64()?, script: r.read_var_slice()?.to_vec() });
        }

        let mut tx = Transaction { version, locktime: 0, ins, outs };
        if has_witnesses {
            for input in tx.ins.iter_mut() {
                input.witness = r.read_vector()?;
            }
            if !tx.has_witnesses() {
                return Err(DecodeError::SuperfluousWitnessData);
            }
        }
        tx.locktime = r.read_u32()?;

        if strict && !r.is_empty() {
            return Err(DecodeError::UnexpectedData);
        }
        Ok(tx)
    }

    /// True if `hash` is the all zero coinbase prevout hash.
    pub fn is_coinbase_hash(hash: &[u8; 32]) -> bool { hash.iter().all(|b| *b == 0) }

    /// True if this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.ins.len() == 1 && Self::is_coinbase_hash(&self.ins[0].hash)
    }

    /// Appends an input, returning its index.
    pub fn add_input(
        &mut self,
        hash: [u8; 32],
        index: u32,
        sequence: Option<u32>,
        script: Option<Vec<u8>>,
    ) -> usize {
        self.ins.push(TxInput {
            hash,
            index,
            script: script.unwrap_or_default(),
            sequence: sequence.unwrap_or(DEFAULT_SEQUENCE),
            witness: vec![],
        });
        self.ins.len() - 1
    }

    /// Appends an output, returning its index.
    pub fn add_output(&mut self, script: Vec<u8>, value: u64) -> usize {
        self.outs.push(TxOutput { script, value });
        self.outs.len() - 1
    }

    /// True if any input carries witness data.
    pub fn has_witnesses(&self) -> bool { self.ins.iter().any(|input| !input.witness.is_empty()) }

    /// BIP-141 weight.
    pub fn weight(&self) -> usize { self.byte_length(false) * 3 + self.byte_length(true) }

    /// Weight divided by four, rounded up.
    pub fn virtual_size(&self) -> usize { (self.weight() + 3) / 4 }

    /// Serialized size, with or without witness data.
    pub fn byte_length(&self, allow_witness: bool) -> usize {
        let has_witnesses = allow_witness && self.has_witnesses();

        (if has_witnesses { 10 } else { 8 })
            + encode::var_int_len(self.ins.len() as u64)
            + encode::var_int_len(self.outs.len() as u64)
            + self.ins.iter().map(|i| 40 + encode::var_slice_len(&i.script)).sum::<usize>()
            + self.outs.iter().map(|o| 8 + encode::var_slice_len(&o.script)).sum::<usize>()
            + if has_witnesses {
                self.ins.iter().map(|i| encode::vector_len(&i.witness)).sum::<usize>()
            } else {
                0
            }
    }

    /// Serializes with witness data when present.
    pub fn to_buffer(&self) -> Vec<u8> { self.serialize(true) }

    /// Hex of [`Transaction::to_buffer`].
    pub fn to_hex(&self) -> String { self.to_buffer().to_lower_hex_string() }

    pub(crate) fn serialize(&self, allow_witness: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.byte_length(allow_witness));
        self.serialize_into(&mut buf, allow_witness);
        buf
    }

    pub(crate) fn serialize_into(&self, buf: &mut Vec<u8>, allow_witness: bool) {
        let has_witnesses = allow_witness && self.has_witnesses();

        buf.extend_from_slice(&self.version.to_le_bytes());
        if has_witnesses {
            buf.push(ADVANCED_TRANSACTION_MARKER);
            buf.push(ADVANCED_TRANSACTION_FLAG);
        }

        encode::write_var_int(buf, self.ins.len() as u64);
        for input in &self.ins {
            buf.extend_from_slice(&input.hash);
            buf.extend_from_slice(&input.index.to_le_bytes());
            encode::write_var_slice(buf, &input.script);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        encode::write_var_int(buf, self.outs.len() as u64);
        for output in &self.outs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            encode::write_var_slice(buf, &output.script);
        }

        if has_witnesses {
            for input in &self.ins {
                encode::write_vector(buf, &input.witness);
            }
        }

        buf.extend_from_slice(&self.locktime.to_le_bytes());
    }

    /// Double SHA256 of the serialization, without witnesses unless `for_witness` (wtxid).
    ///
    /// The wtxid of a coinbase transaction is all zeros.
    pub fn get_hash(&self, for_witness: bool) -> [u8; 32] {
        if for_witness && self.is_coinbase() {
            return [0u8; 32];
        }
        crypto::hash256(&self.serialize(for_witness))
    }

    /// The txid, hex encoded in display (reversed) byte order.
    pub fn get_id(&self) -> String {
        let mut hash = self.get_hash(false);
        hash.reverse();
        hash.to_lower_hex_string()
    }

    /// Replaces the scriptSig of input `index`.
    pub fn set_input_script(&mut self, index: usize, script: Vec<u8>) -> Result<(), IndexError> {
        let len = self.ins.len();
        let input = self.ins.get_mut(index).ok_or(IndexError { index, len })?;
        input.script = script;
        Ok(())
    }

    /// Replaces the witness of input `index`.
    pub fn set_witness(&mut self, index: usize, witness: Vec<Vec<u8>>) -> Result<(), IndexError> {
        let len = self.ins.len();
        let input = self.ins.get_mut(index).ok_or(IndexError { index, len })?;
        input.witness = witness;
        Ok(())
    }
}

/// Error parsing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Truncated or malformed field.
    Encode(encode::Error),
    /// Invalid hex string.
    Hex(HexToBytesError),
    /// Bytes left over after the lock time.
    UnexpectedData,
    /// Witness marker present but every witness is empty.
    SuperfluousWitnessData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DecodeError::*;

        match *self {
            Encode(ref e) => write_err!(f, "transaction decoding failed"; e),
            Hex(ref e) => write_err!(f, "invalid transaction hex"; e),
            UnexpectedData => f.write_str("Transaction has unexpected data"),
            SuperfluousWitnessData => f.write_str("Transaction has superfluous witness data"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use DecodeError::*;

        match *self {
            Encode(ref e) => Some(e),
            Hex(ref e) => Some(e),
            UnexpectedData | SuperfluousWitnessData => None,
        }
    }
}

impl From<encode::Error> for DecodeError {
    fn from(e: encode::Error) -> Self { Self::Encode(e) }
}

/// Input index out of bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexError {
    /// The requested index.
    pub index: usize,
    /// Number of inputs.
    pub len: usize,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input index {} out of bounds, transaction has {} inputs", self.index, self.len)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    // Native P2WPKH example from BIP-143, signed.
    const SEGWIT_TX: &str = "01000000000102fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f00000000494830450221008b9d1dc26ba6a9cb62127b02742fa9d754cd3bebf337f7a55d114c8e5cdd30be022040529b194ba3f9281a99f2b1c0a19c0489bc22ede944ccf4ecbab4cc618ef3ed01eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac000247304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee0121025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee635711000000";

    // The same transaction before signing.
    const UNSIGNED_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

    #[test]
    fn segwit_round_trip() {
        let tx = Transaction::from_hex(SEGWIT_TX).unwrap();
        assert!(tx.has_witnesses());
        assert_eq!(tx.ins.len(), 2);
        assert_eq!(tx.outs.len(), 2);
        assert!(tx.ins[0].witness.is_empty());
        assert_eq!(tx.ins[1].witness.len(), 2);
        assert_eq!(tx.locktime, 0x11);
        assert_eq!(tx.to_hex(), SEGWIT_TX);
    }

    #[test]
    fn legacy_round_trip() {
        let tx = Transaction::from_hex(UNSIGNED_TX).unwrap();
        assert!(!tx.has_witnesses());
        assert_eq!(tx.outs[0].value, 112_340_000);
        assert_eq!(tx.to_hex(), UNSIGNED_TX);
    }

    #[test]
    fn sizes() {
        let tx = Transaction::from_hex(SEGWIT_TX).unwrap();
        let total = SEGWIT_TX.len() / 2;
        assert_eq!(tx.byte_length(true), total);
        let base = tx.byte_length(false);
        assert_eq!(base, tx.serialize(false).len());
        assert_eq!(tx.weight(), base * 3 + total);
        assert_eq!(tx.virtual_size(), (tx.weight() + 3) / 4);
    }

    #[test]
    fn txid_ignores_witness() {
        let signed = Transaction::from_hex(SEGWIT_TX).unwrap();
        let mut stripped = signed.clone();
        stripped.ins[1].witness.clear();
        assert_eq!(signed.get_id(), stripped.get_id());
        assert_ne!(signed.get_hash(true), signed.get_hash(false));
    }

    #[test]
    fn trailing_bytes() {
        let mut buf = Vec::from_hex(UNSIGNED_TX).unwrap();
        buf.push(0x00);
        assert_eq!(Transaction::from_buffer(&buf), Err(DecodeError::UnexpectedData));
        assert!(Transaction::from_buffer_lenient(&buf).is_ok());
    }

    #[test]
    fn superfluous_witness() {
        let mut tx = Transaction::new();
        tx.add_input([1u8; 32], 0, None, None);
        tx.add_output(vec![0x51], 1000);
        let mut buf = vec![];
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&[0x00, 0x01]);
        let legacy = tx.to_buffer();
        // everything between version and locktime, then one empty witness
        buf.extend_from_slice(&legacy[4..legacy.len() - 4]);
        buf.push(0x00);
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(Transaction::from_buffer(&buf), Err(DecodeError::SuperfluousWitnessData));
    }

    #[test]
    fn truncated() {
        let buf = Vec::from_hex(UNSIGNED_TX).unwrap();
        assert!(matches!(
            Transaction::from_buffer(&buf[..buf.len() - 1]),
            Err(DecodeError::Encode(_))
        ));
    }

    #[test]
    fn coinbase() {
        let mut tx = Transaction::new();
        tx.add_input([0u8; 32], 0xffff_ffff, None, Some(vec![0x51]));
        assert!(tx.is_coinbase());
        assert_eq!(tx.get_hash(true), [0u8; 32]);
        tx.add_input([0u8; 32], 0, None, None);
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn setters() {
        let mut tx = Transaction::new();
        let vin = tx.add_input([1u8; 32], 0, Some(5), None);
        assert_eq!(tx.ins[vin].sequence, 5);
        tx.set_input_script(vin, vec![0x51]).unwrap();
        tx.set_witness(vin, vec![vec![0x01]]).unwrap();
        assert!(tx.has_witnesses());
        assert_eq!(tx.set_witness(1, vec![]), Err(IndexError { index: 1, len: 1 }));
    }
}
