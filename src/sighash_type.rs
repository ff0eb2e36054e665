// SPDX-License-Identifier: CC0-1.0

use core::fmt;
use core::str::FromStr;

use bitcoin::sighash::{self, EcdsaSighashType, NonStandardSighashTypeError, TapSighashType};

use crate::error::write_err;
use crate::prelude::*;

/// Taproot only, commits to everything like [`SIGHASH_ALL`] without a trailing signature byte.
pub const SIGHASH_DEFAULT: u32 = 0x00;
/// Commits to all inputs and outputs.
pub const SIGHASH_ALL: u32 = 0x01;
/// Commits to all inputs and no outputs.
pub const SIGHASH_NONE: u32 = 0x02;
/// Commits to all inputs and the output with the same index as the signed input.
pub const SIGHASH_SINGLE: u32 = 0x03;
/// Modifier, commits to the signed input only.
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;
/// Bits selecting the output commitment of a taproot sighash.
pub const SIGHASH_OUTPUT_MASK: u32 = 0x03;
/// Bits selecting the input commitment of a taproot sighash.
pub const SIGHASH_INPUT_MASK: u32 = 0x80;

/// A signature hash type as stored in a PSBT input.
///
/// Both legacy/segwit v0 and taproot sighash types fit in here, which one is meant depends on
/// the input. Non-standard values are representable so that documents carrying them round trip.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub struct SighashType {
    pub(crate) inner: u32,
}

impl SighashType {
    /// `SIGHASH_DEFAULT`
    pub const DEFAULT: Self = SighashType { inner: SIGHASH_DEFAULT };
    /// `SIGHASH_ALL`
    pub const ALL: Self = SighashType { inner: SIGHASH_ALL };
    /// `SIGHASH_NONE`
    pub const NONE: Self = SighashType { inner: SIGHASH_NONE };
    /// `SIGHASH_SINGLE`
    pub const SINGLE: Self = SighashType { inner: SIGHASH_SINGLE };
    /// `SIGHASH_ALL|SIGHASH_ANYONECANPAY`
    pub const ALL_ANYONECANPAY: Self = SighashType { inner: SIGHASH_ALL | SIGHASH_ANYONECANPAY };
    /// `SIGHASH_NONE|SIGHASH_ANYONECANPAY`
    pub const NONE_ANYONECANPAY: Self = SighashType { inner: SIGHASH_NONE | SIGHASH_ANYONECANPAY };
    /// `SIGHASH_SINGLE|SIGHASH_ANYONECANPAY`
    pub const SINGLE_ANYONECANPAY: Self =
        SighashType { inner: SIGHASH_SINGLE | SIGHASH_ANYONECANPAY };

    /// Creates a [`SighashType`] from a raw `u32`, standard or not.
    pub fn from_u32(n: u32) -> SighashType { SighashType { inner: n } }

    /// The raw `u32` sighash flag.
    pub fn to_u32(self) -> u32 { self.inner }

    /// The low five bits, as used by the legacy algorithm.
    pub fn base_type(self) -> u32 { self.inner & 0x1f }

    /// True if the `ANYONECANPAY` bit is set.
    pub fn is_anyone_can_pay(self) -> bool { self.inner & SIGHASH_ANYONECANPAY != 0 }

    /// True for the six types usable with ECDSA signatures.
    pub fn is_defined_ecdsa(self) -> bool {
        matches!(self.inner, 0x01..=0x03 | 0x81..=0x83)
    }

    /// True for the seven types accepted by BIP-341.
    pub fn is_valid_taproot(self) -> bool {
        matches!(self.inner, 0x00..=0x03 | 0x81..=0x83)
    }

    /// Returns the [`EcdsaSighashType`] if this is a standard ECDSA sighash type.
    pub fn ecdsa_hash_ty(self) -> Result<EcdsaSighashType, NonStandardSighashTypeError> {
        EcdsaSighashType::from_standard(self.inner)
    }

    /// Returns the [`TapSighashType`] if this is a valid taproot sighash type.
    pub fn taproot_hash_ty(self) -> Result<TapSighashType, InvalidSighashTypeError> {
        if self.inner > 0xffu32 {
            return Err(InvalidSighashTypeError::Invalid(self.inner));
        }

        let ty = TapSighashType::from_consensus_u8(self.inner as u8)?;
        Ok(ty)
    }
}

impl Default for SighashType {
    fn default() -> Self { SighashType::ALL }
}

impl fmt::Display for SighashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.taproot_hash_ty() {
            Err(_) => write!(f, "{:#x}", self.inner),
            Ok(taproot_hash_ty) => fmt::Display::fmt(&taproot_hash_ty, f),
        }
    }
}

impl FromStr for SighashType {
    type Err = ParseSighashTypeError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accepts "SIGHASH_ALL", "SIGHASH_ALL|SIGHASH_ANYONECANPAY" etc. and raw hex.
        if let Ok(ty) = TapSighashType::from_str(s) {
            return Ok(ty.into());
        }

        if let Some(hex) = s.strip_prefix("0x") {
            if let Ok(inner) = u32::from_str_radix(hex, 16) {
                return Ok(SighashType { inner });
            }
        }

        Err(ParseSighashTypeError { unrecognized: s.to_owned() })
    }
}

impl From<u32> for SighashType {
    fn from(n: u32) -> Self { SighashType { inner: n } }
}

impl From<SighashType> for u32 {
    fn from(t: SighashType) -> Self { t.inner }
}

impl From<EcdsaSighashType> for SighashType {
    fn from(ecdsa_hash_ty: EcdsaSighashType) -> Self { SighashType { inner: ecdsa_hash_ty as u32 } }
}

impl From<TapSighashType> for SighashType {
    fn from(taproot_hash_ty: TapSighashType) -> Self {
        SighashType { inner: taproot_hash_ty as u32 }
    }
}

/// Error returned for failure during parsing one of the sighash types.
///
/// This is currently returned for unrecognized sighash strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseSighashTypeError {
    /// The unrecognized string we attempted to parse.
    pub unrecognized: String,
}

impl fmt::Display for ParseSighashTypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unrecognized SIGHASH string '{}'", self.unrecognized)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseSighashTypeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { None }
}

/// Integer is not a consensus valid taproot sighash type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidSighashTypeError {
    /// Rejected by `rust-bitcoin`.
    Bitcoin(sighash::InvalidSighashTypeError),
    /// Does not fit in a byte.
    Invalid(u32),
}

impl fmt::Display for InvalidSighashTypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InvalidSighashTypeError::*;

        match *self {
            Bitcoin(ref e) => write_err!(f, "bitcoin"; e),
            Invalid(invalid) => write!(f, "invalid sighash type {}", invalid),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidSighashTypeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InvalidSighashTypeError::*;

        match *self {
            Bitcoin(ref e) => Some(e),
            Invalid(_) => None,
        }
    }
}

impl From<sighash::InvalidSighashTypeError> for InvalidSighashTypeError {
    fn from(e: sighash::InvalidSighashTypeError) -> Self { Self::Bitcoin(e) }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use super::*;

    #[test]
    fn sighash_type_ecdsa() {
        for ecdsa in &[
            EcdsaSighashType::All,
            EcdsaSighashType::None,
            EcdsaSighashType::Single,
            EcdsaSighashType::AllPlusAnyoneCanPay,
            EcdsaSighashType::NonePlusAnyoneCanPay,
            EcdsaSighashType::SinglePlusAnyoneCanPay,
        ] {
            let sighash = SighashType::from(*ecdsa);
            let s = format!("{}", sighash);
            let back = SighashType::from_str(&s).unwrap();
            assert_eq!(back, sighash);
            assert_eq!(back.ecdsa_hash_ty().unwrap(), *ecdsa);
            assert!(back.is_defined_ecdsa());
        }
    }

    #[test]
    fn sighash_type_taproot() {
        for tap in &[
            TapSighashType::Default,
            TapSighashType::All,
            TapSighashType::None,
            TapSighashType::Single,
            TapSighashType::AllPlusAnyoneCanPay,
            TapSighashType::NonePlusAnyoneCanPay,
            TapSighashType::SinglePlusAnyoneCanPay,
        ] {
            let sighash = SighashType::from(*tap);
            let s = format!("{}", sighash);
            let back = SighashType::from_str(&s).unwrap();
            assert_eq!(back, sighash);
            assert_eq!(back.taproot_hash_ty().unwrap(), *tap);
            assert!(back.is_valid_taproot());
        }
        assert!(!SighashType::DEFAULT.is_defined_ecdsa());
    }

    #[test]
    fn sighash_type_notstd() {
        let nonstd = 0xdddddddd;
        let sighash = SighashType { inner: nonstd };
        let s = format!("{}", sighash);
        assert_eq!(s, "0xdddddddd");
        let back = SighashType::from_str(&s).unwrap();

        assert_eq!(back, sighash);
        assert_eq!(back.taproot_hash_ty(), Err(InvalidSighashTypeError::Invalid(nonstd)));
        assert!(!back.is_valid_taproot());
    }

    #[test]
    fn masks() {
        let t = SighashType::SINGLE_ANYONECANPAY;
        assert_eq!(t.base_type(), SIGHASH_SINGLE);
        assert!(t.is_anyone_can_pay());
        assert!(!SighashType::ALL.is_anyone_can_pay());
        assert!(SighashType::from_str("SIGHASH_BOGUS").is_err());
    }
}
