// SPDX-License-Identifier: CC0-1.0

//! Low level buffer encoding.
//!
//! Little-endian integers, Bitcoin's compact size `VarInt`, length prefixed byte slices and
//! vectors of slices (witness stacks). Everything above the script layer is built out of these.

use core::fmt;

use crate::prelude::*;

/// A cursor over a byte slice that decodes consensus encoded values.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self { Reader { buf, offset: 0 } }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize { self.offset }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize { self.buf.len() - self.offset }

    /// Returns true if every byte has been consumed.
    pub fn is_empty(&self) -> bool { self.remaining() == 0 }

    /// Reads exactly `n` bytes.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if n > self.remaining() {
            return Err(Error::BufferTooSmall { needed: n, available: self.remaining() });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Reads a fixed size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_slice(N)?);
        Ok(arr)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, Error> { Ok(self.read_slice(1)?[0]) }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, Error> { Ok(u16::from_le_bytes(self.read_array()?)) }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, Error> { Ok(u32::from_le_bytes(self.read_array()?)) }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, Error> { Ok(i32::from_le_bytes(self.read_array()?)) }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, Error> { Ok(u64::from_le_bytes(self.read_array()?)) }

    /// Reads a compact size unsigned integer, rejecting non-minimal encodings.
    pub fn read_var_int(&mut self) -> Result<u64, Error> {
        let n = match self.read_u8()? {
            0xff => {
                let x = self.read_u64()?;
                if x < 0x1_0000_0000 {
                    return Err(Error::NonMinimalVarInt);
                }
                x
            }
            0xfe => {
                let x = self.read_u32()?;
                if x < 0x1_0000 {
                    return Err(Error::NonMinimalVarInt);
                }
                u64::from(x)
            }
            0xfd => {
                let x = self.read_u16()?;
                if x < 0xfd {
                    return Err(Error::NonMinimalVarInt);
                }
                u64::from(x)
            }
            n => u64::from(n),
        };
        Ok(n)
    }

    /// Reads a compact size and checks it against the remaining buffer.
    pub fn read_len(&mut self) -> Result<usize, Error> {
        let n = self.read_var_int()?;
        if n > self.remaining() as u64 {
            return Err(Error::BufferTooSmall { needed: n as usize, available: self.remaining() });
        }
        Ok(n as usize)
    }

    /// Reads a compact size length prefixed byte slice.
    pub fn read_var_slice(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_len()?;
        self.read_slice(len)
    }

    /// Reads a compact size prefixed vector of var slices.
    pub fn read_vector(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let count = self.read_len()?;
        let mut vector = Vec::with_capacity(count);
        for _ in 0..count {
            vector.push(self.read_var_slice()?.to_vec());
        }
        Ok(vector)
    }

    /// Returns the unconsumed tail of the buffer without advancing.
    pub fn rest(&self) -> &'a [u8] { &self.buf[self.offset..] }
}

/// Returns the number of bytes needed to encode `n` as a compact size.
pub fn var_int_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Returns the encoded length of a var slice.
pub fn var_slice_len(slice: &[u8]) -> usize { var_int_len(slice.len() as u64) + slice.len() }

/// Returns the encoded length of a vector of var slices.
pub fn vector_len(vector: &[Vec<u8>]) -> usize {
    var_int_len(vector.len() as u64) + vector.iter().map(|v| var_slice_len(v)).sum::<usize>()
}

/// Appends `n` encoded as a compact size.
pub fn write_var_int(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Appends a compact size length prefixed byte slice.
pub fn write_var_slice(buf: &mut Vec<u8>, slice: &[u8]) {
    write_var_int(buf, slice.len() as u64);
    buf.extend_from_slice(slice);
}

/// Appends a compact size prefixed vector of var slices.
pub fn write_vector(buf: &mut Vec<u8>, vector: &[Vec<u8>]) {
    write_var_int(buf, vector.len() as u64);
    for item in vector {
        write_var_slice(buf, item);
    }
}

/// Encodes a witness stack the way it appears in a serialized transaction.
pub fn serialize_vector(vector: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector_len(vector));
    write_vector(&mut buf, vector);
    buf
}

/// Error decoding a consensus encoded buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Tried to read past the end of the buffer.
    BufferTooSmall {
        /// Bytes the read needed.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },
    /// A compact size was not minimally encoded.
    NonMinimalVarInt,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match *self {
            BufferTooSmall { needed, available } =>
                write!(f, "buffer too small: needed {} bytes, {} available", needed, available),
            NonMinimalVarInt => f.write_str("non-minimal varint"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match *self {
            BufferTooSmall { .. } | NonMinimalVarInt => None,
        }
    }
}
