// SPDX-License-Identifier: CC0-1.0

//! Bitcoin Script.
//!
//! Scripts are handled as plain byte vectors. This module converts between the compiled bytes,
//! a stream of [`Chunk`]s and the human readable ASM form.
//!
//! Data pushes always follow the minimal push policy (BIP-62 rule 3): a one byte push of
//! `0x01 ..= 0x10` or `0x81` is represented by the matching small integer opcode, both when
//! compiling and when decompiling.

pub mod num;
pub mod opcodes;
pub mod signature;

use core::fmt;

use bitcoin::hex::{DisplayHex, FromHex};

use crate::prelude::*;
use opcodes::{OP_0, OP_1, OP_16, OP_1NEGATE, OP_INT_BASE, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

pub use signature::is_defined_hash_type;

/// Secp256k1 field prime, big-endian.
const EC_P: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];

/// A single element of a decompiled script.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Chunk {
    /// A non-push opcode, or a push expressed as an opcode (`OP_0`, `OP_1NEGATE`, `OP_1 ..= OP_16`).
    Op(u8),
    /// A data push.
    Push(Vec<u8>),
}

impl Chunk {
    /// Creates a data push chunk.
    pub fn push<T: Into<Vec<u8>>>(data: T) -> Self { Chunk::Push(data.into()) }

    /// Returns the pushed data, if this is a data push.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Chunk::Push(data) => Some(data),
            Chunk::Op(_) => None,
        }
    }

    /// Returns the opcode, if this is not a data push.
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Chunk::Op(op) => Some(*op),
            Chunk::Push(_) => None,
        }
    }

    /// True for data pushes and the small integer opcodes.
    pub fn is_push_only(&self) -> bool {
        match self {
            Chunk::Push(_) => true,
            Chunk::Op(op) => is_op_int(*op),
        }
    }
}

impl From<u8> for Chunk {
    fn from(op: u8) -> Self { Chunk::Op(op) }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self { Chunk::Push(data) }
}

impl From<&[u8]> for Chunk {
    fn from(data: &[u8]) -> Self { Chunk::Push(data.to_vec()) }
}

fn is_op_int(op: u8) -> bool { op == OP_0 || (OP_1..=OP_16).contains(&op) || op == OP_1NEGATE }

/// The opcode a push of `data` must be expressed as, if any.
fn as_minimal_op(data: &[u8]) -> Option<u8> {
    match data {
        [] => Some(OP_0),
        [b @ 1..=16] => Some(OP_INT_BASE + *b),
        [0x81] => Some(OP_1NEGATE),
        _ => None,
    }
}

/// Number of bytes used to encode a push of `len` bytes of data, excluding the data.
fn push_prefix_len(len: usize) -> usize {
    if len < usize::from(OP_PUSHDATA1) {
        1
    } else if len <= 0xff {
        2
    } else if len <= 0xffff {
        3
    } else {
        5
    }
}

fn write_push_prefix(buf: &mut Vec<u8>, len: usize) {
    if len < usize::from(OP_PUSHDATA1) {
        buf.push(len as u8);
    } else if len <= 0xff {
        buf.push(OP_PUSHDATA1);
        buf.push(len as u8);
    } else if len <= 0xffff {
        buf.push(OP_PUSHDATA2);
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        buf.push(OP_PUSHDATA4);
        buf.extend_from_slice(&(len as u32).to_le_bytes());
    }
}

/// Reads a push prefix at `pos`, returning `(prefix_len, data_len)`.
fn read_push_prefix(script: &[u8], pos: usize) -> Option<(usize, usize)> {
    let op = script[pos];
    match op {
        _ if op < OP_PUSHDATA1 => Some((1, usize::from(op))),
        OP_PUSHDATA1 => script.get(pos + 1).map(|len| (2, usize::from(*len))),
        OP_PUSHDATA2 => {
            let bytes = script.get(pos + 1..pos + 3)?;
            Some((3, usize::from(u16::from_le_bytes([bytes[0], bytes[1]]))))
        }
        OP_PUSHDATA4 => {
            let bytes = script.get(pos + 1..pos + 5)?;
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some((5, usize::try_from(len).ok()?))
        }
        _ => None,
    }
}

/// Compiles a chunk stream into script bytes.
pub fn compile(chunks: &[Chunk]) -> Vec<u8> {
    let size = chunks
        .iter()
        .map(|chunk| match chunk {
            Chunk::Push(data) if data.len() == 1 && as_minimal_op(data).is_some() => 1,
            Chunk::Push(data) => push_prefix_len(data.len()) + data.len(),
            Chunk::Op(_) => 1,
        })
        .sum();

    let mut buf = Vec::with_capacity(size);
    for chunk in chunks {
        match chunk {
            Chunk::Push(data) => match as_minimal_op(data) {
                Some(op) if data.len() == 1 => buf.push(op),
                _ => {
                    write_push_prefix(&mut buf, data.len());
                    buf.extend_from_slice(data);
                }
            },
            Chunk::Op(op) => buf.push(*op),
        }
    }
    debug_assert_eq!(buf.len(), size);
    buf
}

/// Decompiles script bytes into chunks, `None` if a push is truncated or overruns the script.
pub fn decompile(script: &[u8]) -> Option<Vec<Chunk>> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < script.len() {
        let op = script[pos];
        if op > OP_0 && op <= OP_PUSHDATA4 {
            let (prefix, len) = read_push_prefix(script, pos)?;
            pos += prefix;
            let data = script.get(pos..pos.checked_add(len)?)?;
            pos += len;
            match as_minimal_op(data) {
                Some(op) => chunks.push(Chunk::Op(op)),
                None => chunks.push(Chunk::Push(data.to_vec())),
            }
        } else {
            chunks.push(Chunk::Op(op));
            pos += 1;
        }
    }
    Some(chunks)
}

/// Renders chunks as ASM. Opcodes without a mnemonic are rendered as `0x` plus their hex value.
pub fn to_asm(chunks: &[Chunk]) -> String {
    let words: Vec<String> = chunks
        .iter()
        .map(|chunk| {
            let op = match chunk {
                Chunk::Push(data) => match as_minimal_op(data) {
                    Some(op) => op,
                    None => return data.to_lower_hex_string(),
                },
                Chunk::Op(op) => *op,
            };
            match opcodes::name(op) {
                Some(name) => name.to_string(),
                None => format!("0x{:02x}", op),
            }
        })
        .collect();
    words.join(" ")
}

/// Decompiles and renders script bytes as ASM.
pub fn script_to_asm(script: &[u8]) -> Option<String> { decompile(script).map(|c| to_asm(&c)) }

/// Parses ASM into chunks.
pub fn asm_to_chunks(asm: &str) -> Result<Vec<Chunk>, ScriptError> {
    asm.split_whitespace()
        .map(|word| {
            if let Some(op) = opcodes::from_name(word) {
                return Ok(Chunk::Op(op));
            }
            if let Some(hex) = word.strip_prefix("0x") {
                if hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    if let Ok(op) = u8::from_str_radix(hex, 16) {
                        if opcodes::name(op).is_none() {
                            return Ok(Chunk::Op(op));
                        }
                    }
                }
            }
            Vec::from_hex(word)
                .map(Chunk::Push)
                .map_err(|_| ScriptError::InvalidAsm(word.to_string()))
        })
        .collect()
}

/// Parses ASM and compiles it.
pub fn from_asm(asm: &str) -> Result<Vec<u8>, ScriptError> { Ok(compile(&asm_to_chunks(asm)?)) }

/// Converts a push only script into the stack it produces.
pub fn to_stack(chunks: &[Chunk]) -> Result<Vec<Vec<u8>>, ScriptError> {
    if !is_push_only(chunks) {
        return Err(ScriptError::NotPushOnly);
    }
    Ok(chunks
        .iter()
        .map(|chunk| match chunk {
            Chunk::Push(data) => data.clone(),
            Chunk::Op(OP_0) => Vec::new(),
            Chunk::Op(op) => num::encode(i64::from(*op) - i64::from(OP_INT_BASE)),
        })
        .collect())
}

/// True if every chunk is a data push or small integer.
pub fn is_push_only(chunks: &[Chunk]) -> bool { chunks.iter().all(Chunk::is_push_only) }

/// Number of chunks that are not pushes.
pub fn count_non_push_only_opcodes(chunks: &[Chunk]) -> usize {
    chunks.iter().filter(|c| !c.is_push_only()).count()
}

/// Structural public key check: prefix, length and coordinates in `1 .. p`.
///
/// No curve arithmetic is done, use [`crate::ecc::EccBackend::is_point`] for that.
pub fn is_point(p: &[u8]) -> bool {
    if p.len() < 33 {
        return false;
    }
    let in_field = |x: &[u8]| x.iter().any(|b| *b != 0) && x < &EC_P[..];

    if !in_field(&p[1..33]) {
        return false;
    }
    match (p[0], p.len()) {
        (0x02 | 0x03, 33) => true,
        (0x04, 65) => in_field(&p[33..]),
        _ => false,
    }
}

/// True if `buf` is a compressed or uncompressed SEC public key.
pub fn is_canonical_pubkey(buf: &[u8]) -> bool { is_point(buf) }

/// True if `buf` is a strict DER signature followed by a defined sighash type.
pub fn is_canonical_script_signature(buf: &[u8]) -> bool {
    match buf.split_last() {
        Some((hash_type, der)) => is_defined_hash_type(*hash_type) && signature::bip66_check(der),
        None => false,
    }
}

/// Pushes a script number, using the small integer opcodes where possible.
pub(crate) fn push_int(n: i64) -> Chunk {
    match n {
        0 => Chunk::Op(OP_0),
        -1 => Chunk::Op(OP_1NEGATE),
        1..=16 => Chunk::Op(OP_INT_BASE + n as u8),
        _ => Chunk::Push(num::encode(n)),
    }
}

/// Error decoding script data.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScriptError {
    /// Script number is longer than allowed.
    NumberOverflow,
    /// Script number has a redundant trailing byte.
    NonMinimalNumber,
    /// Word is neither an opcode mnemonic nor hex.
    InvalidAsm(String),
    /// Script contains a non-push opcode where only pushes are allowed.
    NotPushOnly,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ScriptError::*;

        match *self {
            NumberOverflow => f.write_str("script number overflow"),
            NonMinimalNumber => f.write_str("non-minimally encoded script number"),
            InvalidAsm(ref word) => write!(f, "invalid ASM word: {}", word),
            NotPushOnly => f.write_str("expected push only script"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use ScriptError::*;

        match *self {
            NumberOverflow | NonMinimalNumber | InvalidAsm(_) | NotPushOnly => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::opcodes::*;
    use super::*;

    const P2PKH_ASM: &str = "OP_DUP OP_HASH160 751e76e8199196d454941c45d1b3a323f1433bd6 OP_EQUALVERIFY OP_CHECKSIG";
    const P2PKH_HEX: &str = "76a914751e76e8199196d454941c45d1b3a323f1433bd688ac";

    #[test]
    fn asm_round_trip() {
        let script = from_asm(P2PKH_ASM).unwrap();
        assert_eq!(script.to_lower_hex_string(), P2PKH_HEX);
        assert_eq!(script_to_asm(&script).unwrap(), P2PKH_ASM);
    }

    #[test]
    fn minimal_pushes_become_opcodes() {
        let chunks = vec![Chunk::push(vec![]), Chunk::push(vec![0x05]), Chunk::push(vec![0x81])];
        assert_eq!(compile(&chunks), vec![OP_0, OP_5, OP_1NEGATE]);

        // a literal one byte push of 0x05 decompiles to OP_5
        let decompiled = decompile(&[0x01, 0x05]).unwrap();
        assert_eq!(decompiled, vec![Chunk::Op(OP_5)]);
        assert_eq!(compile(&decompiled), vec![OP_5]);
    }

    #[test]
    fn push_prefixes() {
        let data = vec![0xaa; 0x4c];
        let script = compile(&[Chunk::push(data.clone())]);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 0x4c]);

        let data = vec![0xaa; 0x100];
        let script = compile(&[Chunk::push(data.clone())]);
        assert_eq!(&script[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
        assert_eq!(decompile(&script).unwrap(), vec![Chunk::Push(data)]);

        let data = vec![0xaa; 0x1_0000];
        let script = compile(&[Chunk::push(data.clone())]);
        assert_eq!(&script[..5], &[OP_PUSHDATA4, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(decompile(&script).unwrap(), vec![Chunk::Push(data)]);
    }

    #[test]
    fn decompile_rejects_truncated() {
        assert!(decompile(&[0x02, 0xaa]).is_none());
        assert!(decompile(&[OP_PUSHDATA1]).is_none());
        assert!(decompile(&[OP_PUSHDATA2, 0x01]).is_none());
        assert!(decompile(&[OP_PUSHDATA4, 0xff, 0xff, 0xff, 0xff, 0x00]).is_none());
    }

    #[test]
    fn unknown_opcodes_render_as_hex() {
        let asm = script_to_asm(&[0xbb, OP_CHECKSIG]).unwrap();
        assert_eq!(asm, "0xbb OP_CHECKSIG");
        assert_eq!(from_asm(&asm).unwrap(), vec![0xbb, OP_CHECKSIG]);
    }

    #[test]
    fn invalid_asm() {
        assert_eq!(from_asm("OP_DUP zz"), Err(ScriptError::InvalidAsm("zz".to_string())));
        assert_eq!(from_asm("abc"), Err(ScriptError::InvalidAsm("abc".to_string())));
    }

    #[test]
    fn stack_from_pushes() {
        let chunks = decompile(&from_asm("OP_0 OP_1NEGATE OP_16 deadbeef").unwrap()).unwrap();
        let stack = to_stack(&chunks).unwrap();
        assert_eq!(stack, vec![vec![], vec![0x81], vec![0x10], vec![0xde, 0xad, 0xbe, 0xef]]);

        let chunks = decompile(&from_asm(P2PKH_ASM).unwrap()).unwrap();
        assert_eq!(to_stack(&chunks), Err(ScriptError::NotPushOnly));
        assert_eq!(count_non_push_only_opcodes(&chunks), 4);
    }

    #[test]
    fn structural_point_checks() {
        let g = Vec::from_hex("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
            .unwrap();
        assert!(is_point(&g));
        assert!(is_canonical_pubkey(&g));

        let mut bad_prefix = g.clone();
        bad_prefix[0] = 0x05;
        assert!(!is_point(&bad_prefix));

        let mut zero_x = vec![0x02];
        zero_x.extend_from_slice(&[0u8; 32]);
        assert!(!is_point(&zero_x));

        let mut x_is_p = vec![0x03];
        x_is_p.extend_from_slice(&EC_P);
        assert!(!is_point(&x_is_p));

        assert!(!is_point(&g[..32]));
    }

    #[test]
    fn canonical_script_signatures() {
        let sig = Vec::from_hex("3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb01").unwrap();
        assert!(is_canonical_script_signature(&sig));

        let mut bad = sig.clone();
        *bad.last_mut().unwrap() = 0x00;
        assert!(!is_canonical_script_signature(&bad));
        assert!(!is_canonical_script_signature(&[]));
    }

    #[test]
    fn push_int_is_minimal() {
        assert_eq!(push_int(0), Chunk::Op(OP_0));
        assert_eq!(push_int(16), Chunk::Op(OP_16));
        assert_eq!(push_int(17), Chunk::Push(vec![17]));
        assert_eq!(push_int(-1), Chunk::Op(OP_1NEGATE));
    }
}
