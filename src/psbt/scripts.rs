// SPDX-License-Identifier: CC0-1.0

//! Resolving the script an input or output actually executes.

use super::error::InputScriptError;
use crate::address;
use crate::classify;
use crate::crypto::{hash160, sha256};
use crate::prelude::*;
use crate::script::{self, Chunk};

/// How the executed script is wrapped by the scriptPubKey.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Wrapping {
    Raw,
    P2sh,
    P2wsh,
    P2shP2wsh,
}

impl Wrapping {
    pub(crate) fn prefix(self) -> &'static str {
        match self {
            Wrapping::Raw => "",
            Wrapping::P2sh => "p2sh-",
            Wrapping::P2wsh => "p2wsh-",
            Wrapping::P2shP2wsh => "p2sh-p2wsh-",
        }
    }

    pub(crate) fn is_wsh(self) -> bool { matches!(self, Wrapping::P2wsh | Wrapping::P2shP2wsh) }
}

/// Resolves the script executed when spending `script`, checking each layer hashes to the one
/// wrapping it.
pub(crate) fn meaningful_script<'a>(
    script: &'a [u8],
    index: usize,
    io_type: &'static str,
    redeem_script: Option<&'a [u8]>,
    witness_script: Option<&'a [u8]>,
) -> Result<(&'a [u8], Wrapping), InputScriptError> {
    let is_p2sh = classify::is_p2sh_output(script);
    let is_p2sh_p2wsh = is_p2sh && redeem_script.map_or(false, classify::is_p2wsh_output);
    let is_p2wsh = classify::is_p2wsh_output(script);

    let redeem = match (is_p2sh, redeem_script) {
        (true, None) => return Err(InputScriptError::MissingRedeemScript),
        (_, redeem) => redeem,
    };
    let witness = match (is_p2wsh || is_p2sh_p2wsh, witness_script) {
        (true, None) => return Err(InputScriptError::MissingWitnessScript),
        (_, witness) => witness,
    };

    match (redeem, witness) {
        (Some(redeem), Some(witness)) if is_p2sh_p2wsh => {
            check_redeem_script(index, io_type, script, redeem)?;
            check_witness_script(index, io_type, redeem, witness)?;
            check_invalid_p2wsh(witness)?;
            Ok((witness, Wrapping::P2shP2wsh))
        }
        (_, Some(witness)) if is_p2wsh => {
            check_witness_script(index, io_type, script, witness)?;
            check_invalid_p2wsh(witness)?;
            Ok((witness, Wrapping::P2wsh))
        }
        (Some(redeem), _) if is_p2sh => {
            check_redeem_script(index, io_type, script, redeem)?;
            Ok((redeem, Wrapping::P2sh))
        }
        _ => Ok((script, Wrapping::Raw)),
    }
}

fn check_redeem_script(
    index: usize,
    io_type: &'static str,
    script: &[u8],
    redeem: &[u8],
) -> Result<(), InputScriptError> {
    if address::p2sh_script(&hash160(redeem)) != script {
        return Err(InputScriptError::ScriptMismatch { script: "Redeem script", io_type, index });
    }
    Ok(())
}

fn check_witness_script(
    index: usize,
    io_type: &'static str,
    script: &[u8],
    witness: &[u8],
) -> Result<(), InputScriptError> {
    if address::witness_script(0x00, &sha256(witness)) != script {
        return Err(InputScriptError::ScriptMismatch { script: "Witness script", io_type, index });
    }
    Ok(())
}

/// Witness scripts may not be P2WPKH or P2SH themselves.
pub(crate) fn check_invalid_p2wsh(witness: &[u8]) -> Result<(), InputScriptError> {
    if classify::is_p2wpkh_output(witness) || classify::is_p2sh_output(witness) {
        return Err(InputScriptError::Nesting);
    }
    Ok(())
}

/// Script type names used by the finalizer and [`super::Psbt::get_input_type`].
pub(crate) fn classify_script(script: &[u8]) -> &'static str {
    use classify::ScriptType::*;

    match classify::output(script) {
        P2WPKH => "witnesspubkeyhash",
        P2PKH => "pubkeyhash",
        P2MS => "multisig",
        P2PK => "pubkey",
        P2TR => "taproot",
        _ => "nonstandard",
    }
}

/// Position of the first push in `script` that is `pubkey`, its hash160 or its x-only form.
pub(crate) fn pubkey_position_in_script(pubkey: &[u8], script: &[u8]) -> Option<usize> {
    let pubkey_hash = hash160(pubkey);
    let x_only = if pubkey.len() == 33 { &pubkey[1..33] } else { pubkey };
    let chunks = script::decompile(script)?;

    chunks.iter().position(|chunk| match chunk {
        Chunk::Push(data) =>
            data.as_slice() == pubkey || data.as_slice() == &pubkey_hash[..] || data.as_slice() == x_only,
        Chunk::Op(_) => false,
    })
}

pub(crate) fn pubkey_in_script(pubkey: &[u8], script: &[u8]) -> bool {
    pubkey_position_in_script(pubkey, script).is_some()
}

/// The redeem script pushed last by a finalized scriptSig.
pub(crate) fn redeem_from_final_script_sig(final_script_sig: &[u8]) -> Option<Vec<u8>> {
    let chunks = script::decompile(final_script_sig)?;
    let last = chunks.last()?.data()?;
    if is_pubkey_like(last) || script::is_canonical_script_signature(last) {
        return None;
    }
    script::decompile(last)?;
    Some(last.to_vec())
}

/// The witness script found last in a finalized witness.
pub(crate) fn redeem_from_final_witness(final_script_witness: &[Vec<u8>]) -> Option<Vec<u8>> {
    let last = final_script_witness.last()?;
    if is_pubkey_like(last) {
        return None;
    }
    script::decompile(last)?;
    Some(last.clone())
}

fn is_pubkey_like(buf: &[u8]) -> bool { buf.len() == 33 && script::is_canonical_pubkey(buf) }

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    const PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn p2pk(pubkey: &[u8]) -> Vec<u8> { script::compile(&[Chunk::push(pubkey), Chunk::Op(0xac)]) }

    #[test]
    fn raw_script() {
        let script = p2pk(&hex(PUBKEY));
        let (meaningful, wrapping) = meaningful_script(&script, 0, "input", None, None).unwrap();
        assert_eq!(meaningful, &script[..]);
        assert_eq!(wrapping, Wrapping::Raw);
    }

    #[test]
    fn p2sh_p2wsh() {
        let witness_script = p2pk(&hex(PUBKEY));
        let redeem = address::witness_script(0x00, &sha256(&witness_script));
        let spk = address::p2sh_script(&hash160(&redeem));
        let (meaningful, wrapping) =
            meaningful_script(&spk, 1, "input", Some(&redeem), Some(&witness_script)).unwrap();
        assert_eq!(meaningful, &witness_script[..]);
        assert_eq!(wrapping, Wrapping::P2shP2wsh);
        assert_eq!(wrapping.prefix(), "p2sh-p2wsh-");
    }

    #[test]
    fn missing_and_mismatched_scripts() {
        let witness_script = p2pk(&hex(PUBKEY));
        let spk = address::p2sh_script(&hash160(&witness_script));
        assert_eq!(
            meaningful_script(&spk, 0, "input", None, None),
            Err(InputScriptError::MissingRedeemScript)
        );
        let wrong = vec![0x51];
        assert_eq!(
            meaningful_script(&spk, 3, "output", Some(&wrong), None),
            Err(InputScriptError::ScriptMismatch { script: "Redeem script", io_type: "output", index: 3 })
        );
        assert_eq!(
            InputScriptError::ScriptMismatch { script: "Redeem script", io_type: "output", index: 3 }
                .to_string(),
            "Redeem script for output #3 doesn't match the scriptPubKey in the prevout"
        );

        let wsh = address::witness_script(0x00, &sha256(&witness_script));
        assert_eq!(
            meaningful_script(&wsh, 0, "input", None, None),
            Err(InputScriptError::MissingWitnessScript)
        );
    }

    #[test]
    fn refuses_nested_p2wpkh() {
        let p2wpkh = address::witness_script(0x00, &hash160(&hex(PUBKEY)));
        let wsh = address::witness_script(0x00, &sha256(&p2wpkh));
        assert_eq!(
            meaningful_script(&wsh, 0, "input", None, Some(&p2wpkh)),
            Err(InputScriptError::Nesting)
        );
    }

    #[test]
    fn finds_pubkey_forms() {
        let pubkey = hex(PUBKEY);
        assert_eq!(pubkey_position_in_script(&pubkey, &p2pk(&pubkey)), Some(0));
        let p2pkh = address::p2pkh_script(&hash160(&pubkey));
        assert_eq!(pubkey_position_in_script(&pubkey, &p2pkh), Some(2));
        let p2tr = address::witness_script(0x51, &pubkey[1..]);
        assert!(pubkey_in_script(&pubkey, &p2tr));
        assert!(!pubkey_in_script(&pubkey, &[0x51]));
    }

    #[test]
    fn recovers_redeem_scripts() {
        let pubkey = hex(PUBKEY);
        let redeem = p2pk(&pubkey);
        let script_sig = script::compile(&[Chunk::push(vec![]), Chunk::push(redeem.clone())]);
        assert_eq!(redeem_from_final_script_sig(&script_sig), Some(redeem.clone()));
        assert_eq!(redeem_from_final_witness(&[vec![1; 71], redeem.clone()]), Some(redeem));
        assert_eq!(redeem_from_final_witness(&[vec![1; 71], pubkey]), None);
    }
}
