// SPDX-License-Identifier: CC0-1.0

//! Script signatures: a strict DER (BIP-66) ECDSA signature followed by one sighash type byte.

use core::fmt;

use crate::prelude::*;

/// A decoded script signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScriptSignature {
    /// Compact `r || s`.
    pub signature: [u8; 64],
    /// Trailing sighash type byte.
    pub hash_type: u8,
}

/// Returns true if `hash_type` is ALL, NONE or SINGLE, optionally with ANYONECANPAY.
pub fn is_defined_hash_type(hash_type: u8) -> bool {
    let modifier = hash_type & !0x80;
    modifier > 0x00 && modifier < 0x04
}

/// Strict DER check as required by BIP-66.
pub fn bip66_check(buf: &[u8]) -> bool {
    if buf.len() < 8 || buf.len() > 72 {
        return false;
    }
    if buf[0] != 0x30 || usize::from(buf[1]) != buf.len() - 2 || buf[2] != 0x02 {
        return false;
    }

    let len_r = usize::from(buf[3]);
    if len_r == 0 || 5 + len_r >= buf.len() || buf[4 + len_r] != 0x02 {
        return false;
    }
    let len_s = usize::from(buf[5 + len_r]);
    if len_s == 0 || 6 + len_r + len_s != buf.len() {
        return false;
    }

    // Negative or needlessly padded integers.
    if buf[4] & 0x80 != 0 || (len_r > 1 && buf[4] == 0x00 && buf[5] & 0x80 == 0) {
        return false;
    }
    if buf[len_r + 6] & 0x80 != 0
        || (len_s > 1 && buf[len_r + 6] == 0x00 && buf[len_r + 7] & 0x80 == 0)
    {
        return false;
    }
    true
}

/// Minimal DER integer from a 32 byte big-endian scalar.
fn to_der(x: &[u8]) -> Vec<u8> {
    let start = x.iter().position(|b| *b != 0).unwrap_or(x.len());
    let x = &x[start..];
    if x.is_empty() {
        return vec![0x00];
    }
    let mut out = Vec::with_capacity(x.len() + 1);
    if x[0] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(x);
    out
}

/// 32 byte big-endian scalar from a DER integer.
fn from_der(x: &[u8]) -> Result<[u8; 32], SignatureError> {
    let x = if x.first() == Some(&0x00) { &x[1..] } else { x };
    if x.len() > 32 {
        return Err(SignatureError::InvalidDer("integer too long"));
    }
    let mut out = [0u8; 32];
    out[32 - x.len()..].copy_from_slice(x);
    Ok(out)
}

/// DER encodes a compact signature (no sighash byte).
pub fn der_encode(signature: &[u8; 64]) -> Vec<u8> {
    let r = to_der(&signature[..32]);
    let s = to_der(&signature[32..]);
    let mut out = Vec::with_capacity(6 + r.len() + s.len());
    out.push(0x30);
    out.push((4 + r.len() + s.len()) as u8);
    out.push(0x02);
    out.push(r.len() as u8);
    out.extend_from_slice(&r);
    out.push(0x02);
    out.push(s.len() as u8);
    out.extend_from_slice(&s);
    out
}

/// Decodes a strict DER signature (no sighash byte) into compact form.
pub fn der_decode(der: &[u8]) -> Result<[u8; 64], SignatureError> {
    if !bip66_check(der) {
        return Err(SignatureError::InvalidDer("not strict DER"));
    }
    let len_r = usize::from(der[3]);
    let len_s = usize::from(der[5 + len_r]);
    let r = from_der(&der[4..4 + len_r])?;
    let s = from_der(&der[6 + len_r..6 + len_r + len_s])?;

    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&r);
    out[32..].copy_from_slice(&s);
    Ok(out)
}

/// Encodes a compact signature and sighash type as pushed in a script.
pub fn encode(signature: &[u8; 64], hash_type: u8) -> Result<Vec<u8>, SignatureError> {
    if !is_defined_hash_type(hash_type) {
        return Err(SignatureError::InvalidHashType(hash_type));
    }
    let mut out = der_encode(signature);
    out.push(hash_type);
    Ok(out)
}

/// Decodes a script signature.
pub fn decode(buf: &[u8]) -> Result<ScriptSignature, SignatureError> {
    let (hash_type, der) = match buf.split_last() {
        Some((hash_type, der)) => (*hash_type, der),
        None => return Err(SignatureError::InvalidDer("empty signature")),
    };
    if !is_defined_hash_type(hash_type) {
        return Err(SignatureError::InvalidHashType(hash_type));
    }
    Ok(ScriptSignature { signature: der_decode(der)?, hash_type })
}

/// Returns the sighash byte of an encoded ECDSA script signature without parsing it.
pub fn hash_type_of(buf: &[u8]) -> Option<u8> { buf.last().copied() }

/// Error encoding or decoding a script signature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    /// Signature is not strict DER.
    InvalidDer(&'static str),
    /// Sighash type is not one of the defined values.
    InvalidHashType(u8),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SignatureError::*;

        match *self {
            InvalidDer(s) => write!(f, "invalid DER signature: {}", s),
            InvalidHashType(t) => write!(f, "invalid hashType {}", t),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignatureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use SignatureError::*;

        match *self {
            InvalidDer(_) | InvalidHashType(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    const DER: &str = "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb01";

    #[test]
    fn decode_encode() {
        let buf = Vec::from_hex(DER).unwrap();
        let sig = decode(&buf).unwrap();
        assert_eq!(sig.hash_type, 0x01);
        assert_eq!(encode(&sig.signature, sig.hash_type).unwrap(), buf);
    }

    #[test]
    fn small_r_is_padded() {
        let mut compact = [0u8; 64];
        compact[31] = 0x01;
        compact[32] = 0x80;
        let der = der_encode(&compact);
        let mut want = vec![0x30, 0x26, 0x02, 0x01, 0x01, 0x02, 0x21, 0x00];
        want.extend_from_slice(&compact[32..]);
        assert_eq!(der, want);
        assert!(bip66_check(&der));
        assert_eq!(der_decode(&der).unwrap(), compact);
    }

    #[test]
    fn bip66_rejects_padding_and_negatives() {
        // r = 0x0001, needlessly padded
        let padded = [0x30, 0x07, 0x02, 0x02, 0x00, 0x01, 0x02, 0x01, 0x01];
        assert!(!bip66_check(&padded));
        // r = 0x81, negative
        let negative = [0x30, 0x06, 0x02, 0x01, 0x81, 0x02, 0x01, 0x01];
        assert!(!bip66_check(&negative));
        let ok = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];
        assert!(bip66_check(&ok));
    }

    #[test]
    fn undefined_hash_types() {
        assert!(is_defined_hash_type(0x01));
        assert!(is_defined_hash_type(0x83));
        assert!(!is_defined_hash_type(0x00));
        assert!(!is_defined_hash_type(0x04));
        assert!(!is_defined_hash_type(0x80));

        let mut buf = Vec::from_hex(DER).unwrap();
        *buf.last_mut().unwrap() = 0x04;
        assert_eq!(decode(&buf), Err(SignatureError::InvalidHashType(0x04)));
    }
}
