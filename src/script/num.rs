// SPDX-License-Identifier: CC0-1.0

//! Script numbers: little-endian, sign and magnitude, minimally encoded.

use crate::prelude::*;
use crate::script::ScriptError;

/// Decodes a script number of at most `max_len` bytes.
///
/// With `minimal` set, encodings carrying a redundant trailing byte are rejected.
pub fn decode(buf: &[u8], max_len: usize, minimal: bool) -> Result<i64, ScriptError> {
    let len = buf.len();
    if len == 0 {
        return Ok(0);
    }
    if len > max_len || len > 8 {
        return Err(ScriptError::NumberOverflow);
    }
    if minimal && buf[len - 1] & 0x7f == 0 && (len <= 1 || buf[len - 2] & 0x80 == 0) {
        return Err(ScriptError::NonMinimalNumber);
    }

    let mut result: i64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        result |= i64::from(*byte) << (8 * i);
    }
    if buf[len - 1] & 0x80 != 0 {
        Ok(-(result & !(0x80_i64 << (8 * (len - 1)))))
    } else {
        Ok(result)
    }
}

/// Encodes `n` as a minimal script number.
pub fn encode(n: i64) -> Vec<u8> {
    let negative = n < 0;
    let mut value = n.unsigned_abs();
    let mut buf = Vec::with_capacity(9);
    while value > 0 {
        buf.push((value & 0xff) as u8);
        value >>= 8;
    }
    if let Some(last) = buf.last_mut() {
        if *last & 0x80 != 0 {
            buf.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        assert_eq!(encode(0), Vec::<u8>::new());
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(-1), vec![0x81]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x00]);
        assert_eq!(encode(-128), vec![0x80, 0x80]);
        assert_eq!(encode(255), vec![0xff, 0x00]);
        assert_eq!(encode(256), vec![0x00, 0x01]);
        assert_eq!(encode(0x7fff_ffff), vec![0xff, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn decode_inverts_encode() {
        for n in [0i64, 1, -1, 16, 17, 127, -127, 128, -128, 500_000, -2_147_483_647] {
            assert_eq!(decode(&encode(n), 4, true).unwrap(), n);
        }
    }

    #[test]
    fn rejects_non_minimal() {
        assert_eq!(decode(&[0x01, 0x00], 4, true), Err(ScriptError::NonMinimalNumber));
        assert_eq!(decode(&[0x01, 0x00], 4, false).unwrap(), 1);
        assert_eq!(decode(&[0x00], 4, true), Err(ScriptError::NonMinimalNumber));
    }

    #[test]
    fn rejects_overflow() {
        assert_eq!(decode(&[1, 2, 3, 4, 5], 4, true), Err(ScriptError::NumberOverflow));
        assert_eq!(decode(&[1, 2, 3, 4, 5], 5, true).unwrap(), 0x05_0403_0201);
    }
}
