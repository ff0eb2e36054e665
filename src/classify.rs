// SPDX-License-Identifier: CC0-1.0

//! Script classification.
//!
//! Each classifier walks an ordered list of `(predicate, ScriptType)` pairs and returns the first
//! match. Segwit templates are tried before legacy ones, specific templates before the
//! catch-all [`ScriptType::NonStandard`].

use core::fmt;

use crate::prelude::*;
use crate::script::opcodes::*;
use crate::script::{self, Chunk};

/// The standard script templates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptType {
    /// Pay to witness public key hash.
    P2WPKH,
    /// Pay to witness script hash.
    P2WSH,
    /// Pay to taproot.
    P2TR,
    /// Pay to public key hash.
    P2PKH,
    /// Pay to script hash.
    P2SH,
    /// Bare multisig.
    P2MS,
    /// Pay to public key.
    P2PK,
    /// Segwit coinbase witness commitment.
    WitnessCommitment,
    /// `OP_RETURN` data carrier.
    NullData,
    /// Anything else.
    NonStandard,
}

impl ScriptType {
    /// The conventional lowercase name of this template.
    pub fn as_str(&self) -> &'static str {
        use ScriptType::*;

        match *self {
            P2WPKH => "witnesspubkeyhash",
            P2WSH => "witnessscripthash",
            P2TR => "taproot",
            P2PKH => "pubkeyhash",
            P2SH => "scripthash",
            P2MS => "multisig",
            P2PK => "pubkey",
            WitnessCommitment => "witnesscommitment",
            NullData => "nulldata",
            NonStandard => "nonstandard",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Header of a segwit witness commitment, following the `OP_RETURN`.
const WITNESS_COMMITMENT_HEADER: [u8; 5] = [0x24, 0xaa, 0x21, 0xa9, 0xed];

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn is_p2pkh_output(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

/// `OP_HASH160 <20> OP_EQUAL`
pub fn is_p2sh_output(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// `OP_0 <20>`
pub fn is_p2wpkh_output(script: &[u8]) -> bool {
    script.len() == 22 && script[0] == OP_0 && script[1] == 0x14
}

/// `OP_0 <32>`
pub fn is_p2wsh_output(script: &[u8]) -> bool {
    script.len() == 34 && script[0] == OP_0 && script[1] == 0x20
}

/// `OP_1 <32>`
pub fn is_p2tr_output(script: &[u8]) -> bool {
    script.len() == 34 && script[0] == OP_1 && script[1] == 0x20
}

/// `<pubkey> OP_CHECKSIG`
pub fn is_p2pk_output(chunks: &[Chunk]) -> bool {
    match chunks {
        [Chunk::Push(pubkey), Chunk::Op(OP_CHECKSIG)] => script::is_canonical_pubkey(pubkey),
        _ => false,
    }
}

/// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
///
/// With `allow_incomplete` the public keys are not checked.
pub fn is_p2ms_output(chunks: &[Chunk], allow_incomplete: bool) -> bool {
    if chunks.len() < 4 || chunks[chunks.len() - 1] != Chunk::Op(OP_CHECKMULTISIG) {
        return false;
    }
    let (m, n) = match (&chunks[0], &chunks[chunks.len() - 2]) {
        (Chunk::Op(m), Chunk::Op(n)) => (i32::from(*m) - i32::from(OP_INT_BASE), i32::from(*n) - i32::from(OP_INT_BASE)),
        _ => return false,
    };
    if m <= 0 || n > 16 || m > n || n as usize != chunks.len() - 3 {
        return false;
    }
    if allow_incomplete {
        return true;
    }
    chunks[1..chunks.len() - 2]
        .iter()
        .all(|c| c.data().map_or(false, script::is_canonical_pubkey))
}

/// `OP_RETURN 0x24aa21a9ed <commitment>`
pub fn is_witness_commitment_output(script: &[u8]) -> bool {
    script.len() > 37 && script[0] == OP_RETURN && script[1..6] == WITNESS_COMMITMENT_HEADER
}

/// `OP_RETURN ...`
pub fn is_null_data_output(script: &[u8]) -> bool { script.len() > 1 && script[0] == OP_RETURN }

fn is_signature(chunk: &Chunk) -> bool { chunk.data().map_or(false, script::is_canonical_script_signature) }

fn is_partial_signature(chunk: &Chunk) -> bool { *chunk == Chunk::Op(OP_0) || is_signature(chunk) }

/// `<sig> <pubkey>`
pub fn is_p2pkh_input(chunks: &[Chunk]) -> bool {
    match chunks {
        [sig, Chunk::Push(pubkey)] => is_signature(sig) && script::is_canonical_pubkey(pubkey),
        _ => false,
    }
}

/// `<sig>`
pub fn is_p2pk_input(chunks: &[Chunk]) -> bool {
    match chunks {
        [sig] => is_signature(sig),
        _ => false,
    }
}

/// `OP_0 <sig>...`
///
/// With `allow_incomplete` an `OP_0` placeholder may stand in for any signature.
pub fn is_p2ms_input(chunks: &[Chunk], allow_incomplete: bool) -> bool {
    if chunks.len() < 2 || chunks[0] != Chunk::Op(OP_0) {
        return false;
    }
    if allow_incomplete {
        chunks[1..].iter().all(is_partial_signature)
    } else {
        chunks[1..].iter().all(is_signature)
    }
}

/// `<scriptSig pushes> <redeem script>`
pub fn is_p2sh_input(chunks: &[Chunk], allow_incomplete: bool) -> bool {
    let (redeem, script_sig) = match chunks.split_last() {
        Some((Chunk::Push(redeem), script_sig)) => (redeem, script_sig),
        _ => return false,
    };
    let redeem_chunks = match script::decompile(redeem) {
        Some(chunks) => chunks,
        None => return false,
    };
    if !script::is_push_only(script_sig) {
        return false;
    }
    if script_sig.is_empty() {
        return is_p2wsh_output(redeem) || is_p2wpkh_output(redeem);
    }
    is_inner_input(script_sig, redeem, &redeem_chunks, allow_incomplete)
}

/// True if `script_sig` satisfies one of the templates that may sit inside P2SH or P2WSH.
fn is_inner_input(
    script_sig: &[Chunk],
    redeem: &[u8],
    redeem_chunks: &[Chunk],
    allow_incomplete: bool,
) -> bool {
    (is_p2pkh_input(script_sig) && is_p2pkh_output(redeem))
        || (is_p2ms_input(script_sig, allow_incomplete) && is_p2ms_output(redeem_chunks, false))
        || (is_p2pk_input(script_sig) && is_p2pk_output(redeem_chunks))
}

/// `[<sig>, <compressed pubkey>]`
pub fn is_p2wpkh_witness(chunks: &[Chunk]) -> bool {
    match chunks {
        [sig, Chunk::Push(pubkey)] =>
            is_signature(sig) && pubkey.len() == 33 && script::is_canonical_pubkey(pubkey),
        _ => false,
    }
}

/// `[<items>..., <witness script>]`
pub fn is_p2wsh_witness(chunks: &[Chunk], allow_incomplete: bool) -> bool {
    let (witness_script, stack) = match chunks.split_last() {
        Some((Chunk::Push(witness_script), stack)) => (witness_script, stack),
        _ => return false,
    };
    let ws_chunks = match script::decompile(witness_script) {
        Some(chunks) if !chunks.is_empty() => chunks,
        _ => return false,
    };
    is_inner_input(stack, witness_script, &ws_chunks, allow_incomplete)
}

/// Classifies an output script.
///
/// A script that does not decompile is [`ScriptType::NonStandard`].
pub fn output(script: &[u8]) -> ScriptType {
    const BYTE_CHECKS: [(fn(&[u8]) -> bool, ScriptType); 5] = [
        (is_p2wpkh_output, ScriptType::P2WPKH),
        (is_p2wsh_output, ScriptType::P2WSH),
        (is_p2tr_output, ScriptType::P2TR),
        (is_p2pkh_output, ScriptType::P2PKH),
        (is_p2sh_output, ScriptType::P2SH),
    ];

    if let Some((_, t)) = BYTE_CHECKS.iter().find(|(check, _)| check(script)) {
        return *t;
    }

    let chunks = match script::decompile(script) {
        Some(chunks) => chunks,
        None => return ScriptType::NonStandard,
    };
    if is_p2ms_output(&chunks, false) {
        return ScriptType::P2MS;
    }
    if is_p2pk_output(&chunks) {
        return ScriptType::P2PK;
    }
    if is_witness_commitment_output(script) {
        return ScriptType::WitnessCommitment;
    }
    if is_null_data_output(script) {
        return ScriptType::NullData;
    }
    ScriptType::NonStandard
}

/// Classifies a scriptSig, `None` if it does not decompile.
pub fn input(script: &[u8], allow_incomplete: bool) -> Option<ScriptType> {
    let chunks = script::decompile(script)?;
    Some(input_chunks(&chunks, allow_incomplete))
}

pub(crate) fn input_chunks(chunks: &[Chunk], allow_incomplete: bool) -> ScriptType {
    if is_p2pkh_input(chunks) {
        ScriptType::P2PKH
    } else if is_p2sh_input(chunks, allow_incomplete) {
        ScriptType::P2SH
    } else if is_p2ms_input(chunks, allow_incomplete) {
        ScriptType::P2MS
    } else if is_p2pk_input(chunks) {
        ScriptType::P2PK
    } else {
        ScriptType::NonStandard
    }
}

/// Classifies a witness stack.
pub fn witness(stack: &[Vec<u8>], allow_incomplete: bool) -> ScriptType {
    let chunks = witness_to_chunks(stack);
    if is_p2wpkh_witness(&chunks) {
        ScriptType::P2WPKH
    } else if is_p2wsh_witness(&chunks, allow_incomplete) {
        ScriptType::P2WSH
    } else {
        ScriptType::NonStandard
    }
}

/// Views witness items as script chunks, with the minimal push rules applied.
pub(crate) fn witness_to_chunks(stack: &[Vec<u8>]) -> Vec<Chunk> {
    let compiled = script::compile(&stack.iter().cloned().map(Chunk::Push).collect::<Vec<_>>());
    // Recompiling pushes of known length always decompiles.
    script::decompile(&compiled).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    const PUBKEY: &str = "030000000000000000000000000000000000000000000000000000000000000001";
    const SIG: &str = "304402207515cf147d201f411092e6be5a64a6006f9308fad7b2a8fdaab22cd86ce764c202200974b8aca7bf51dbf54150d3884e1ae04f675637b926ec33bf75939446f6ca2801";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn asm(s: &str) -> Vec<u8> { script::from_asm(s).unwrap() }

    #[test]
    fn outputs() {
        let pkh = asm("OP_DUP OP_HASH160 aa0000000000000000000000000000000000000b OP_EQUALVERIFY OP_CHECKSIG");
        assert_eq!(output(&pkh), ScriptType::P2PKH);
        let sh = asm("OP_HASH160 aa0000000000000000000000000000000000000b OP_EQUAL");
        assert_eq!(output(&sh), ScriptType::P2SH);
        let wpkh = asm("OP_0 aa0000000000000000000000000000000000000b");
        assert_eq!(output(&wpkh), ScriptType::P2WPKH);
        let wsh = asm("OP_0 aa0000000000000000000000000000000000000000000000000000000000000b");
        assert_eq!(output(&wsh), ScriptType::P2WSH);
        let tr = asm("OP_1 aa0000000000000000000000000000000000000000000000000000000000000b");
        assert_eq!(output(&tr), ScriptType::P2TR);
        let pk = asm(&format!("{} OP_CHECKSIG", PUBKEY));
        assert_eq!(output(&pk), ScriptType::P2PK);
        let ms = asm(&format!("OP_1 {} {} OP_2 OP_CHECKMULTISIG", PUBKEY, PUBKEY));
        assert_eq!(output(&ms), ScriptType::P2MS);
        let data = asm("OP_RETURN deadbeef");
        assert_eq!(output(&data), ScriptType::NullData);
        let commitment = asm(
            "OP_RETURN aa21a9ed0000000000000000000000000000000000000000000000000000000000000000",
        );
        assert_eq!(output(&commitment), ScriptType::WitnessCommitment);
        assert_eq!(output(&[OP_NOP]), ScriptType::NonStandard);
        assert_eq!(output(&[0x02, 0xaa]), ScriptType::NonStandard);
    }

    #[test]
    fn multisig_bounds() {
        let ms = asm(&format!("OP_3 {} {} OP_2 OP_CHECKMULTISIG", PUBKEY, PUBKEY));
        assert_eq!(output(&ms), ScriptType::NonStandard);
        let ms = asm(&format!("OP_0 {} OP_1 OP_CHECKMULTISIG", PUBKEY));
        assert_eq!(output(&ms), ScriptType::NonStandard);
        let ms = asm(&format!("OP_1 {} OP_2 OP_CHECKMULTISIG", PUBKEY));
        assert_eq!(output(&ms), ScriptType::NonStandard);
    }

    #[test]
    fn inputs() {
        let pkh = asm(&format!("{} {}", SIG, PUBKEY));
        assert_eq!(input(&pkh, false), Some(ScriptType::P2PKH));
        let pk = asm(SIG);
        assert_eq!(input(&pk, false), Some(ScriptType::P2PK));
        let ms = asm(&format!("OP_0 {} {}", SIG, SIG));
        assert_eq!(input(&ms, false), Some(ScriptType::P2MS));

        let incomplete = asm(&format!("OP_0 OP_0 {}", SIG));
        assert_eq!(input(&incomplete, false), Some(ScriptType::NonStandard));
        assert_eq!(input(&incomplete, true), Some(ScriptType::P2MS));

        let redeem = asm(&format!("{} OP_CHECKSIG", PUBKEY));
        let mut sh = pk.clone();
        sh.extend(script::compile(&[Chunk::push(redeem)]));
        assert_eq!(input(&sh, false), Some(ScriptType::P2SH));

        assert_eq!(input(&[0x05], false), None);
    }

    #[test]
    fn witnesses() {
        let wpkh = vec![hex(SIG), hex(PUBKEY)];
        assert_eq!(witness(&wpkh, false), ScriptType::P2WPKH);

        let ws = asm(&format!("OP_1 {} {} OP_2 OP_CHECKMULTISIG", PUBKEY, PUBKEY));
        let wsh = vec![vec![], hex(SIG), ws.clone()];
        assert_eq!(witness(&wsh, false), ScriptType::P2WSH);

        let incomplete = vec![vec![], vec![], ws];
        assert_eq!(witness(&incomplete, false), ScriptType::NonStandard);
        assert_eq!(witness(&incomplete, true), ScriptType::P2WSH);
    }
}
