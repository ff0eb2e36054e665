// SPDX-License-Identifier: CC0-1.0

//! Bitcoin transaction toolkit.
//!
//! Script templates (addresses), transaction (de)serialization with segwit support, the three
//! signature hash algorithms, a legacy incremental transaction builder and the Partially Signed
//! Bitcoin Transaction format as defined in [BIP-174] with the taproot fields of [BIP-371].
//!
//! Elliptic curve operations are not hard wired, every component that needs them is handed an
//! [`EccLib`] which wraps an [`ecc::EccBackend`] that passed a known-answer self-test.
//!
//! [BIP-174]: <https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki>
//! [BIP-371]: <https://github.com/bitcoin/bips/blob/master/bip-0371.mediawiki>

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Coding conventions
#![warn(missing_docs)]
// Exclude clippy lints we don't think are valuable
#![allow(clippy::needless_question_mark)] // https://github.com/rust-bitcoin/rust-bitcoin/pull/2134

#[cfg(not(feature = "std"))]
compile_error!("the `std` feature must be enabled");

#[cfg(feature = "serde")]
#[macro_use]
extern crate actual_serde as serde;

/// Re-export of the `rust-bitcoin` crate.
pub extern crate bitcoin;

mod consts;
mod error;
#[macro_use]
mod macros;
mod sighash_type;

pub mod address;
pub mod builder;
pub mod classify;
pub mod crypto;
pub mod ecc;
pub mod encode;
pub mod keypair;
pub mod network;
pub mod payments;
pub mod psbt;
pub mod script;
pub mod signer;
pub mod taproot;
pub mod transaction;

#[rustfmt::skip]                // Keep public re-exports separate
pub use crate::{
    builder::TransactionBuilder,
    classify::ScriptType,
    ecc::EccLib,
    error::{FeeError, FundingUtxoError},
    keypair::{HdKeyPair, KeyPair},
    network::Network,
    payments::{Payment, PaymentOpts},
    psbt::{Psbt, PsbtOpts},
    sighash_type::{ParseSighashTypeError, SighashType},
    signer::{HdSigner, HdSignerAsync, Signer, SignerAsync},
    transaction::Transaction,
};

#[cfg(feature = "base64")]
mod display_from_str {
    use core::fmt::{self, Display, Formatter};
    use core::str::FromStr;

    use bitcoin::base64::display::Base64Display;
    use bitcoin::base64::prelude::{Engine as _, BASE64_STANDARD};

    use crate::error::write_err;
    use crate::psbt::{self, Psbt, PsbtOpts};

    /// Error encountered during PSBT decoding from Base64 string.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum PsbtParseError {
        /// Error in internal PSBT data structure.
        PsbtEncoding(psbt::Error),
        /// Error in PSBT Base64 encoding.
        Base64Encoding(bitcoin::base64::DecodeError),
    }

    impl Display for PsbtParseError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            use self::PsbtParseError::*;

            match *self {
                PsbtEncoding(ref e) => write_err!(f, "error in internal PSBT data structure"; e),
                Base64Encoding(ref e) => write_err!(f, "error in PSBT base64 encoding"; e),
            }
        }
    }

    impl std::error::Error for PsbtParseError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            use self::PsbtParseError::*;

            match self {
                PsbtEncoding(e) => Some(e),
                Base64Encoding(e) => Some(e),
            }
        }
    }

    impl Psbt {
        /// Serializes the PSBT and encodes it as a base64 string.
        pub fn to_base64(&self) -> String { BASE64_STANDARD.encode(self.to_buffer()) }

        /// Decodes a base64 encoded PSBT using the supplied options.
        pub fn from_base64(s: &str, opts: PsbtOpts) -> Result<Psbt, PsbtParseError> {
            let data = BASE64_STANDARD.decode(s).map_err(PsbtParseError::Base64Encoding)?;
            Psbt::from_buffer(&data, opts).map_err(PsbtParseError::PsbtEncoding)
        }
    }

    impl Display for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{}", Base64Display::new(&self.to_buffer(), &BASE64_STANDARD))
        }
    }

    impl FromStr for Psbt {
        type Err = PsbtParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> { Psbt::from_base64(s, PsbtOpts::default()) }
    }
}
#[cfg(feature = "base64")]
pub use self::display_from_str::PsbtParseError;

#[rustfmt::skip]
mod prelude {
    pub use std::{string::{String, ToString}, vec::Vec, boxed::Box, borrow::ToOwned, sync::Arc};

    pub use std::collections::{BTreeMap, BTreeSet, btree_map};

    pub use bitcoin::hex::DisplayHex;
}
