// SPDX-License-Identifier: CC0-1.0

//! Signature hash algorithms.
//!
//! * Legacy, by mutating a copy of the transaction.
//! * Segwit v0 as defined in [BIP-143].
//! * Taproot (segwit v1) as defined in [BIP-341].
//!
//! [BIP-143]: <https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki>
//! [BIP-341]: <https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki>

use core::fmt;

use super::{Transaction, TxOutput};
use crate::crypto::{self, tagged_hash, TaggedHashPrefix};
use crate::encode;
use crate::prelude::*;
use crate::script::{self, opcodes::OP_CODESEPARATOR, Chunk};
use crate::sighash_type::{
    SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_DEFAULT, SIGHASH_INPUT_MASK, SIGHASH_NONE,
    SIGHASH_OUTPUT_MASK, SIGHASH_SINGLE,
};

/// Returned by the legacy algorithm when there is nothing to sign.
///
/// Signing this constant is the long standing `SIGHASH_SINGLE` bug, kept for compatibility.
pub const ONE: [u8; 32] = {
    let mut one = [0u8; 32];
    one[31] = 0x01;
    one
};

const ZERO: [u8; 32] = [0u8; 32];

/// Output written in place of the outputs preceding the signed one under `SIGHASH_SINGLE`.
const BLANK_OUTPUT_VALUE: u64 = u64::MAX;

fn write_output(buf: &mut Vec<u8>, output: &TxOutput) {
    buf.extend_from_slice(&output.value.to_le_bytes());
    encode::write_var_slice(buf, &output.script);
}

impl Transaction {
    /// Legacy signature hash of input `in_index` spending `prev_out_script`.
    ///
    /// Returns [`ONE`] if `in_index` is out of range, or for `SIGHASH_SINGLE` without a
    /// matching output.
    pub fn hash_for_signature(&self, in_index: usize, prev_out_script: &[u8], hash_type: u32) -> [u8; 32] {
        if in_index >= self.ins.len() {
            return ONE;
        }

        let our_script = match script::decompile(prev_out_script) {
            Some(chunks) => {
                let kept: Vec<Chunk> =
                    chunks.into_iter().filter(|c| *c != Chunk::Op(OP_CODESEPARATOR)).collect();
                script::compile(&kept)
            }
            None => prev_out_script.to_vec(),
        };

        let mut tx = self.clone();
        let base_type = hash_type & 0x1f;

        if base_type == SIGHASH_NONE {
            tx.outs.clear();
            for (i, input) in tx.ins.iter_mut().enumerate() {
                if i != in_index {
                    input.sequence = 0;
                }
            }
        } else if base_type == SIGHASH_SINGLE {
            if in_index >= self.outs.len() {
                return ONE;
            }
            tx.outs.truncate(in_index + 1);
            for output in tx.outs.iter_mut().take(in_index) {
                *output = TxOutput { script: vec![], value: BLANK_OUTPUT_VALUE };
            }
            for (i, input) in tx.ins.iter_mut().enumerate() {
                if i != in_index {
                    input.sequence = 0;
                }
            }
        }

        if hash_type & SIGHASH_ANYONECANPAY != 0 {
            let mut input = tx.ins.swap_remove(in_index);
            input.script = our_script;
            tx.ins = vec![input];
        } else {
            for input in tx.ins.iter_mut() {
                input.script.clear();
            }
            tx.ins[in_index].script = our_script;
        }

        let mut buf = Vec::with_capacity(tx.byte_length(false) + 4);
        tx.serialize_into(&mut buf, false);
        buf.extend_from_slice(&hash_type.to_le_bytes());
        crypto::hash256(&buf)
    }

    /// BIP-143 signature hash of input `in_index`, `script_code` being the script executed.
    pub fn hash_for_witness_v0(
        &self,
        in_index: usize,
        script_code: &[u8],
        value: u64,
        hash_type: u32,
    ) -> Result<[u8; 32], SighashError> {
        let input = self
            .ins
            .get(in_index)
            .ok_or(SighashError::InputIndex { index: in_index, len: self.ins.len() })?;
        let base_type = hash_type & 0x1f;
        let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;

        let mut hash_prevouts = ZERO;
        let mut hash_sequence = ZERO;
        let mut hash_outputs = ZERO;

        if !anyone_can_pay {
            let mut buf = Vec::with_capacity(36 * self.ins.len());
            for txin in &self.ins {
                buf.extend_from_slice(&txin.hash);
                buf.extend_from_slice(&txin.index.to_le_bytes());
            }
            hash_prevouts = crypto::hash256(&buf);
        }

        if !anyone_can_pay && base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
            let mut buf = Vec::with_capacity(4 * self.ins.len());
            for txin in &self.ins {
                buf.extend_from_slice(&txin.sequence.to_le_bytes());
            }
            hash_sequence = crypto::hash256(&buf);
        }

        if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
            let mut buf = Vec::new();
            for output in &self.outs {
                write_output(&mut buf, output);
            }
            hash_outputs = crypto::hash256(&buf);
        } else if base_type == SIGHASH_SINGLE && in_index < self.outs.len() {
            let mut buf = Vec::new();
            write_output(&mut buf, &self.outs[in_index]);
            hash_outputs = crypto::hash256(&buf);
        }

        let mut buf = Vec::with_capacity(156 + encode::var_slice_len(script_code));
        buf.extend_from_slice(&(self.version as u32).to_le_bytes());
        buf.extend_from_slice(&hash_prevouts);
        buf.extend_from_slice(&hash_sequence);
        buf.extend_from_slice(&input.hash);
        buf.extend_from_slice(&input.index.to_le_bytes());
        encode::write_var_slice(&mut buf, script_code);
        buf.extend_from_slice(&value.to_le_bytes());
        buf.extend_from_slice(&input.sequence.to_le_bytes());
        buf.extend_from_slice(&hash_outputs);
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf.extend_from_slice(&hash_type.to_le_bytes());
        Ok(crypto::hash256(&buf))
    }

    /// BIP-341 signature hash of input `in_index`.
    ///
    /// `prev_out_scripts` and `values` describe every output spent by this transaction. A
    /// `leaf_hash` selects a script path spend, `annex` is the witness annex including its
    /// `0x50` prefix.
    pub fn hash_for_witness_v1(
        &self,
        in_index: usize,
        prev_out_scripts: &[Vec<u8>],
        values: &[u64],
        hash_type: u32,
        leaf_hash: Option<&[u8; 32]>,
        annex: Option<&[u8]>,
    ) -> Result<[u8; 32], SighashError> {
        if values.len() != self.ins.len() || prev_out_scripts.len() != self.ins.len() {
            return Err(SighashError::PrevoutsLength);
        }
        if in_index >= self.ins.len() {
            return Err(SighashError::InputIndex { index: in_index, len: self.ins.len() });
        }
        if !matches!(hash_type, 0x00..=0x03 | 0x81..=0x83) {
            return Err(SighashError::InvalidHashType(hash_type));
        }

        let output_type =
            if hash_type == SIGHASH_DEFAULT { SIGHASH_ALL } else { hash_type & SIGHASH_OUTPUT_MASK };
        let anyone_can_pay = hash_type & SIGHASH_INPUT_MASK == SIGHASH_ANYONECANPAY;
        let is_none = output_type == SIGHASH_NONE;
        let is_single = output_type == SIGHASH_SINGLE;

        if is_single && in_index >= self.outs.len() {
            return Err(SighashError::SingleWithoutOutput { index: in_index });
        }

        let mut msg = Vec::with_capacity(
            175 + 37 + 32 + encode::var_slice_len(&prev_out_scripts[in_index]),
        );
        // Epoch.
        msg.push(0x00);
        msg.push(hash_type as u8);
        msg.extend_from_slice(&self.version.to_le_bytes());
        msg.extend_from_slice(&self.locktime.to_le_bytes());

        if !anyone_can_pay {
            let mut prevouts = Vec::with_capacity(36 * self.ins.len());
            let mut sequences = Vec::with_capacity(4 * self.ins.len());
            for txin in &self.ins {
                prevouts.extend_from_slice(&txin.hash);
                prevouts.extend_from_slice(&txin.index.to_le_bytes());
                sequences.extend_from_slice(&txin.sequence.to_le_bytes());
            }
            let amounts: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            let mut script_pubkeys = Vec::new();
            for script in prev_out_scripts {
                encode::write_var_slice(&mut script_pubkeys, script);
            }

            msg.extend_from_slice(&crypto::sha256(&prevouts));
            msg.extend_from_slice(&crypto::sha256(&amounts));
            msg.extend_from_slice(&crypto::sha256(&script_pubkeys));
            msg.extend_from_slice(&crypto::sha256(&sequences));
        }

        if !(is_none || is_single) {
            let mut outputs = Vec::new();
            for output in &self.outs {
                write_output(&mut outputs, output);
            }
            msg.extend_from_slice(&crypto::sha256(&outputs));
        }

        let spend_type = if leaf_hash.is_some() { 2u8 } else { 0 } + if annex.is_some() { 1 } else { 0 };
        msg.push(spend_type);

        if anyone_can_pay {
            let input = &self.ins[in_index];
            msg.extend_from_slice(&input.hash);
            msg.extend_from_slice(&input.index.to_le_bytes());
            msg.extend_from_slice(&values[in_index].to_le_bytes());
            encode::write_var_slice(&mut msg, &prev_out_scripts[in_index]);
            msg.extend_from_slice(&input.sequence.to_le_bytes());
        } else {
            msg.extend_from_slice(&(in_index as u32).to_le_bytes());
        }

        if let Some(annex) = annex {
            let mut buf = Vec::with_capacity(encode::var_slice_len(annex));
            encode::write_var_slice(&mut buf, annex);
            msg.extend_from_slice(&crypto::sha256(&buf));
        }

        if is_single {
            let mut buf = Vec::new();
            write_output(&mut buf, &self.outs[in_index]);
            msg.extend_from_slice(&crypto::sha256(&buf));
        }

        if let Some(leaf_hash) = leaf_hash {
            msg.extend_from_slice(leaf_hash);
            // Key version.
            msg.push(0x00);
            // No OP_CODESEPARATOR executed.
            msg.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        }

        Ok(tagged_hash(TaggedHashPrefix::TapSighash, &msg))
    }
}

/// Error computing a segwit signature hash.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SighashError {
    /// Input index out of range.
    InputIndex {
        /// Requested index.
        index: usize,
        /// Number of inputs.
        len: usize,
    },
    /// Prevout scripts or values not supplied for every input.
    PrevoutsLength,
    /// Not one of the hash types defined by BIP-341.
    InvalidHashType(u32),
    /// `SIGHASH_SINGLE` for an input without an output at the same index.
    SingleWithoutOutput {
        /// Index of the signed input.
        index: usize,
    },
}

impl fmt::Display for SighashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SighashError::*;

        match *self {
            InputIndex { index, len } =>
                write!(f, "input index {} out of bounds, transaction has {} inputs", index, len),
            PrevoutsLength => f.write_str("Must supply prevout script and value for all inputs"),
            InvalidHashType(t) => write!(f, "invalid taproot sighash type: {:#x}", t),
            SingleWithoutOutput { index } =>
                write!(f, "SIGHASH_SINGLE for input {} without a corresponding output", index),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SighashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use SighashError::*;

        match *self {
            InputIndex { .. } | PrevoutsLength | InvalidHashType(_) | SingleWithoutOutput { .. } =>
                None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::hex::{DisplayHex, FromHex};
    use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
    use bitcoin::{Amount, ScriptBuf};

    use super::*;
    use crate::sighash_type::SIGHASH_ANYONECANPAY as ACP;

    const UNSIGNED_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn as_bitcoin(tx: &Transaction) -> bitcoin::Transaction {
        bitcoin::consensus::deserialize(&tx.to_buffer()).unwrap()
    }

    /// Three inputs, two outputs.
    fn sample_tx() -> Transaction {
        let mut tx = Transaction::new();
        tx.version = 2;
        tx.locktime = 500_000;
        tx.add_input([0x11; 32], 0, Some(0xffff_fffe), None);
        tx.add_input([0x22; 32], 1, Some(0xffff_fffd), None);
        tx.add_input([0x33; 32], 2, None, None);
        tx.add_output(hex("0014751e76e8199196d454941c45d1b3a323f1433bd6"), 50_000);
        tx.add_output(hex("76a914751e76e8199196d454941c45d1b3a323f1433bd688ac"), 70_000);
        tx
    }

    #[test]
    fn bip143_native_p2wpkh() {
        let tx = Transaction::from_hex(UNSIGNED_TX).unwrap();
        let script_code = hex("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac");
        let hash = tx.hash_for_witness_v0(1, &script_code, 600_000_000, SIGHASH_ALL).unwrap();
        assert_eq!(
            hash.to_lower_hex_string(),
            "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
        );
    }

    #[test]
    fn legacy_matches_rust_bitcoin() {
        let tx = sample_tx();
        let btc = as_bitcoin(&tx);
        let cache = SighashCache::new(&btc);
        let spk = hex("76a914751e76e8199196d454941c45d1b3a323f1433bd688ac");
        let script = ScriptBuf::from_bytes(spk.clone());

        for hash_type in [SIGHASH_ALL, SIGHASH_NONE, SIGHASH_SINGLE] {
            for hash_type in [hash_type, hash_type | ACP] {
                for in_index in 0..2 {
                    let ours = tx.hash_for_signature(in_index, &spk, hash_type);
                    let theirs = cache.legacy_signature_hash(in_index, &script, hash_type).unwrap();
                    assert_eq!(ours, theirs.to_byte_array(), "type {:#x} input {}", hash_type, in_index);
                }
            }
        }
    }

    #[test]
    fn legacy_single_bug() {
        let tx = sample_tx();
        let spk = hex("51");
        assert_eq!(tx.hash_for_signature(2, &spk, SIGHASH_SINGLE), ONE);
        assert_eq!(tx.hash_for_signature(3, &spk, SIGHASH_ALL), ONE);
        assert_ne!(tx.hash_for_signature(2, &spk, SIGHASH_ALL), ONE);
    }

    #[test]
    fn legacy_strips_codeseparator() {
        let tx = sample_tx();
        let with = hex("ab51");
        let without = hex("51");
        assert_eq!(
            tx.hash_for_signature(0, &with, SIGHASH_ALL),
            tx.hash_for_signature(0, &without, SIGHASH_ALL)
        );
    }

    #[test]
    fn taproot_key_spend_matches_rust_bitcoin() {
        let tx = sample_tx();
        let btc = as_bitcoin(&tx);
        let scripts = vec![
            hex("5120aa0000000000000000000000000000000000000000000000000000000000000b"),
            hex("0014751e76e8199196d454941c45d1b3a323f1433bd6"),
            hex("5120bb0000000000000000000000000000000000000000000000000000000000000c"),
        ];
        let values = vec![10_000u64, 80_000, 40_000];
        let txouts: Vec<bitcoin::TxOut> = scripts
            .iter()
            .zip(&values)
            .map(|(s, v)| bitcoin::TxOut {
                value: Amount::from_sat(*v),
                script_pubkey: ScriptBuf::from_bytes(s.clone()),
            })
            .collect();
        let prevouts = Prevouts::All(&txouts);
        let mut cache = SighashCache::new(&btc);

        for (hash_type, tap) in [
            (0x00, TapSighashType::Default),
            (0x01, TapSighashType::All),
            (0x02, TapSighashType::None),
            (0x03, TapSighashType::Single),
            (0x81, TapSighashType::AllPlusAnyoneCanPay),
            (0x82, TapSighashType::NonePlusAnyoneCanPay),
            (0x83, TapSighashType::SinglePlusAnyoneCanPay),
        ] {
            for in_index in 0..2 {
                let ours = tx
                    .hash_for_witness_v1(in_index, &scripts, &values, hash_type, None, None)
                    .unwrap();
                let theirs =
                    cache.taproot_key_spend_signature_hash(in_index, &prevouts, tap).unwrap();
                assert_eq!(ours, theirs.to_byte_array(), "type {:#x} input {}", hash_type, in_index);
            }
        }
    }

    #[test]
    fn taproot_script_spend_matches_rust_bitcoin() {
        use bitcoin::taproot::TapLeafHash;

        let tx = sample_tx();
        let btc = as_bitcoin(&tx);
        let scripts = vec![
            hex("5120aa0000000000000000000000000000000000000000000000000000000000000b"),
            hex("5120bb0000000000000000000000000000000000000000000000000000000000000c"),
            hex("5120cc0000000000000000000000000000000000000000000000000000000000000d"),
        ];
        let values = vec![1u64, 2, 3];
        let txouts: Vec<bitcoin::TxOut> = scripts
            .iter()
            .zip(&values)
            .map(|(s, v)| bitcoin::TxOut {
                value: Amount::from_sat(*v),
                script_pubkey: ScriptBuf::from_bytes(s.clone()),
            })
            .collect();
        let leaf_hash = [0x42u8; 32];
        let mut cache = SighashCache::new(&btc);
        let theirs = cache
            .taproot_script_spend_signature_hash(
                1,
                &Prevouts::All(&txouts),
                TapLeafHash::from_byte_array(leaf_hash),
                TapSighashType::Default,
            )
            .unwrap();
        let ours =
            tx.hash_for_witness_v1(1, &scripts, &values, SIGHASH_DEFAULT, Some(&leaf_hash), None).unwrap();
        assert_eq!(ours, theirs.to_byte_array());
    }

    #[test]
    fn taproot_errors() {
        let tx = sample_tx();
        let scripts = vec![vec![0x51]; 3];
        let values = vec![1u64; 3];
        assert_eq!(
            tx.hash_for_witness_v1(0, &scripts[..2], &values, 0, None, None),
            Err(SighashError::PrevoutsLength)
        );
        assert_eq!(
            tx.hash_for_witness_v1(0, &scripts, &values, 0x04, None, None),
            Err(SighashError::InvalidHashType(0x04))
        );
        assert_eq!(
            tx.hash_for_witness_v1(2, &scripts, &values, SIGHASH_SINGLE, None, None),
            Err(SighashError::SingleWithoutOutput { index: 2 })
        );
        // the annex changes the message
        let plain = tx.hash_for_witness_v1(0, &scripts, &values, 0, None, None).unwrap();
        let annexed = tx.hash_for_witness_v1(0, &scripts, &values, 0, None, Some(&[0x50])).unwrap();
        assert_ne!(plain, annexed);
    }
}
