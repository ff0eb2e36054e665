// SPDX-License-Identifier: CC0-1.0

//! Address codec.
//!
//! Base58check for P2PKH and P2SH, bech32 for segwit version 0 and bech32m for version 1 and up.

use core::fmt;

use bech32::{FromBase32, ToBase32, Variant};
use bitcoin::base58;
use bitcoin::hex::DisplayHex;

use crate::classify;
use crate::error::write_err;
use crate::network::Network;
use crate::prelude::*;
use crate::script::opcodes::{OP_0, OP_1, OP_16, OP_2, OP_INT_BASE};

/// Lowest witness version without a dedicated template.
const FUTURE_SEGWIT_MIN_VERSION: u8 = 2;
/// Highest witness version.
const FUTURE_SEGWIT_MAX_VERSION: u8 = 16;
const FUTURE_SEGWIT_MIN_SIZE: usize = 2;
const FUTURE_SEGWIT_MAX_SIZE: usize = 40;

/// A decoded base58check address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Base58CheckResult {
    /// 20 byte hash.
    pub hash: [u8; 20],
    /// Network version byte.
    pub version: u8,
}

/// A decoded bech32 or bech32m address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bech32Result {
    /// Witness version.
    pub version: u8,
    /// Human readable part.
    pub prefix: String,
    /// Witness program.
    pub data: Vec<u8>,
}

/// Decodes a base58check address into its version byte and hash.
pub fn from_base58_check(address: &str) -> Result<Base58CheckResult, AddressError> {
    let payload = base58::decode_check(address).map_err(AddressError::Base58)?;
    if payload.len() < 21 {
        return Err(AddressError::TooShort(address.to_string()));
    }
    if payload.len() > 21 {
        return Err(AddressError::TooLong(address.to_string()));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok(Base58CheckResult { hash, version: payload[0] })
}

/// Decodes a segwit address. Version 0 must use bech32, every other version bech32m.
pub fn from_bech32(address: &str) -> Result<Bech32Result, AddressError> {
    let (prefix, words, variant) = bech32::decode(address).map_err(AddressError::Bech32)?;
    let (version, program) = match words.split_first() {
        Some((version, program)) => (version.to_u8(), program),
        None => return Err(AddressError::EmptyProgram(address.to_string())),
    };
    match (version, variant) {
        (0, Variant::Bech32) => {}
        (1..=FUTURE_SEGWIT_MAX_VERSION, Variant::Bech32m) => {}
        _ => return Err(AddressError::WrongEncoding(address.to_string())),
    }
    let data = Vec::<u8>::from_base32(program).map_err(AddressError::Bech32)?;
    Ok(Bech32Result { version, prefix, data })
}

/// Encodes a 20 byte hash with a version byte as base58check.
pub fn to_base58_check(hash: &[u8; 20], version: u8) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(hash);
    base58::encode_check(&payload)
}

/// Encodes a witness program as a segwit address.
pub fn to_bech32(data: &[u8], version: u8, prefix: &str) -> Result<String, AddressError> {
    let version = bech32::u5::try_from_u8(version).map_err(AddressError::Bech32)?;
    let mut words = vec![version];
    words.extend(data.to_base32());
    let variant = if version.to_u8() == 0 { Variant::Bech32 } else { Variant::Bech32m };
    bech32::encode(prefix, words, variant).map_err(AddressError::Bech32)
}

fn to_future_segwit_address(output: &[u8], network: &Network) -> Result<String, AddressError> {
    let no_match = || AddressError::NoMatchingAddress(output.to_lower_hex_string());
    if output.len() < 2 {
        return Err(no_match());
    }
    let data = &output[2..];
    if data.len() < FUTURE_SEGWIT_MIN_SIZE || data.len() > FUTURE_SEGWIT_MAX_SIZE {
        return Err(no_match());
    }
    if output[0] < OP_2 || output[0] > OP_16 {
        return Err(no_match());
    }
    if usize::from(output[1]) != data.len() {
        return Err(no_match());
    }
    to_bech32(data, output[0] - OP_INT_BASE, network.bech32)
}

/// Renders the address paying to `output`.
pub fn from_output_script(output: &[u8], network: &Network) -> Result<String, AddressError> {
    let hash20 = |slice: &[u8]| {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(slice);
        hash
    };

    if classify::is_p2pkh_output(output) {
        return Ok(to_base58_check(&hash20(&output[3..23]), network.pub_key_hash));
    }
    if classify::is_p2sh_output(output) {
        return Ok(to_base58_check(&hash20(&output[2..22]), network.script_hash));
    }
    if classify::is_p2wpkh_output(output) || classify::is_p2wsh_output(output) {
        return to_bech32(&output[2..], 0, network.bech32);
    }
    if classify::is_p2tr_output(output) {
        return to_bech32(&output[2..], 1, network.bech32);
    }
    to_future_segwit_address(output, network)
}

/// Returns the output script paying to `address` on `network`.
pub fn to_output_script(address: &str, network: &Network) -> Result<Vec<u8>, AddressError> {
    if let Ok(decoded) = from_base58_check(address) {
        if decoded.version == network.pub_key_hash {
            return Ok(p2pkh_script(&decoded.hash));
        }
        if decoded.version == network.script_hash {
            return Ok(p2sh_script(&decoded.hash));
        }
    } else if let Ok(decoded) = from_bech32(address) {
        if decoded.prefix != network.bech32 {
            return Err(AddressError::InvalidPrefix(address.to_string()));
        }
        match (decoded.version, decoded.data.len()) {
            (0, 20) | (0, 32) => return Ok(witness_script(OP_0, &decoded.data)),
            (1, 32) => return Ok(witness_script(OP_1, &decoded.data)),
            (v, len)
                if (FUTURE_SEGWIT_MIN_VERSION..=FUTURE_SEGWIT_MAX_VERSION).contains(&v)
                    && (FUTURE_SEGWIT_MIN_SIZE..=FUTURE_SEGWIT_MAX_SIZE).contains(&len) =>
                return Ok(witness_script(OP_INT_BASE + v, &decoded.data)),
            _ => {}
        }
    }
    Err(AddressError::NoMatchingScript(address.to_string()))
}

pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    use crate::script::opcodes::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};

    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(hash: &[u8; 20]) -> Vec<u8> {
    use crate::script::opcodes::{OP_EQUAL, OP_HASH160};

    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

/// `<version op> <program>`, the program being at most 40 bytes.
pub fn witness_script(version_op: u8, program: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + program.len());
    script.push(version_op);
    script.push(program.len() as u8);
    script.extend_from_slice(program);
    script
}

/// Error encoding or decoding an address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddressError {
    /// Base58 decoding failed.
    Base58(base58::Error),
    /// Bech32 encoding or decoding failed.
    Bech32(bech32::Error),
    /// Base58 payload is shorter than a version byte and hash.
    TooShort(String),
    /// Base58 payload is longer than a version byte and hash.
    TooLong(String),
    /// Segwit address without a witness version.
    EmptyProgram(String),
    /// Witness version and checksum variant disagree.
    WrongEncoding(String),
    /// Segwit address for a different network.
    InvalidPrefix(String),
    /// Address does not map to any output script.
    NoMatchingScript(String),
    /// Output script (hex) has no address form.
    NoMatchingAddress(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AddressError::*;

        match *self {
            Base58(ref e) => write_err!(f, "base58 decoding failed"; e),
            Bech32(ref e) => write_err!(f, "bech32 encoding failed"; e),
            TooShort(ref a) => write!(f, "{} is too short", a),
            TooLong(ref a) => write!(f, "{} is too long", a),
            EmptyProgram(ref a) => write!(f, "{} has no witness version", a),
            WrongEncoding(ref a) => write!(f, "{} uses wrong encoding", a),
            InvalidPrefix(ref a) => write!(f, "{} has an invalid prefix", a),
            NoMatchingScript(ref a) => write!(f, "{} has no matching Script", a),
            NoMatchingAddress(ref s) => write!(f, "{} has no matching Address", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AddressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use AddressError::*;

        match *self {
            Base58(ref e) => Some(e),
            Bech32(ref e) => Some(e),
            TooShort(_) | TooLong(_) | EmptyProgram(_) | WrongEncoding(_) | InvalidPrefix(_)
            | NoMatchingScript(_) | NoMatchingAddress(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;
    use crate::network::{BITCOIN, TESTNET};

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    #[test]
    fn p2pkh_round_trip() {
        let script = hex("76a914751e76e8199196d454941c45d1b3a323f1433bd688ac");
        let address = from_output_script(&script, &BITCOIN).unwrap();
        assert_eq!(address, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(to_output_script(&address, &BITCOIN).unwrap(), script);
    }

    #[test]
    fn p2wpkh_round_trip() {
        let script = hex("0014751e76e8199196d454941c45d1b3a323f1433bd6");
        let address = from_output_script(&script, &BITCOIN).unwrap();
        assert_eq!(address, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        assert_eq!(to_output_script(&address, &BITCOIN).unwrap(), script);
    }

    #[test]
    fn p2tr_uses_bech32m() {
        let address = "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0";
        let decoded = from_bech32(address).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.prefix, "bc");
        let script = to_output_script(address, &BITCOIN).unwrap();
        assert_eq!(script[0], OP_1);
        assert_eq!(from_output_script(&script, &BITCOIN).unwrap(), address);
    }

    #[test]
    fn wrong_network_prefix() {
        let err = to_output_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", &TESTNET).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4 has an invalid prefix"
        );
    }

    #[test]
    fn version_zero_with_bech32m_is_rejected() {
        // v0 program encoded with the bech32m checksum
        let address = to_bech32(&[0u8; 20], 0, "bc").unwrap();
        assert!(from_bech32(&address).is_ok());
        let err = from_bech32("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kemeawh").unwrap_err();
        assert!(matches!(err, AddressError::WrongEncoding(_) | AddressError::Bech32(_)));
    }

    #[test]
    fn future_segwit_versions() {
        let mut script = vec![OP_INT_BASE + 2, 0x02, 0xab, 0xcd];
        let address = from_output_script(&script, &BITCOIN).unwrap();
        assert_eq!(to_output_script(&address, &BITCOIN).unwrap(), script);

        script[1] = 0x03;
        let err = from_output_script(&script, &BITCOIN).unwrap_err();
        assert_eq!(err.to_string(), format!("{} has no matching Address", script.to_lower_hex_string()));
    }

    #[test]
    fn unknown_version_byte() {
        // testnet P2PKH decoded against mainnet
        let address = to_base58_check(&[0x11; 20], TESTNET.pub_key_hash);
        assert!(to_output_script(&address, &TESTNET).is_ok());
        let err = to_output_script(&address, &BITCOIN).unwrap_err();
        assert!(matches!(err, AddressError::NoMatchingScript(_)));
    }
}
