// SPDX-License-Identifier: CC0-1.0

//! Payment templates.
//!
//! Each template takes a partially filled [`Payment`] and returns it completed: every field that
//! can be derived from the supplied ones is filled in, supplied fields are kept as given. With
//! [`PaymentOpts::validate`] set every pair of supplied fields that determine the same value is
//! checked for agreement.
//!
//! Derivation runs through a per-template resolver that memoizes each derived field in a
//! [`OnceCell`](core::cell::OnceCell), evaluating its sources in a fixed priority order.
//!
//! P2SH and P2WSH wrap another payment in [`Payment::redeem`], nest templates by passing the
//! result of the inner one:
//!
//! ```
//! use bitcoin_txkit::payments::{p2ms, p2sh, p2wsh, Payment, PaymentOpts};
//! # use bitcoin_txkit::bitcoin::hex::FromHex;
//! # let pk = |s: &str| Vec::from_hex(s).unwrap();
//! let ms = p2ms(Payment {
//!     m: Some(1),
//!     pubkeys: Some(vec![pk("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")]),
//!     ..Default::default()
//! }, PaymentOpts::default())?;
//! let wsh = p2wsh(Payment { redeem: Some(Box::new(ms)), ..Default::default() }, PaymentOpts::default())?;
//! let sh = p2sh(Payment { redeem: Some(Box::new(wsh)), ..Default::default() }, PaymentOpts::default())?;
//! assert_eq!(sh.name.as_deref(), Some("p2sh-p2wsh-p2ms(1 of 1)"));
//! # Ok::<(), bitcoin_txkit::payments::PaymentError>(())
//! ```

mod embed;
mod p2ms;
mod p2pk;
mod p2pkh;
mod p2sh;
mod p2tr;
mod p2wpkh;
mod p2wsh;

use core::fmt;

use crate::address::AddressError;
use crate::error::write_err;
use crate::network::Network;
use crate::prelude::*;
use crate::script::opcodes::OP_0;
use crate::script::Chunk;
use crate::taproot::{TaprootError, Taptree};

#[rustfmt::skip]                // Keep public re-exports separate.
pub use self::{
    embed::embed,
    p2ms::p2ms,
    p2pk::p2pk,
    p2pkh::p2pkh,
    p2sh::p2sh,
    p2tr::p2tr,
    p2wpkh::p2wpkh,
    p2wsh::p2wsh,
};

/// A payment, any of the eight templates.
///
/// All fields are optional, which ones make sense depends on the template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payment {
    /// Template name, `p2sh-p2wpkh` style for nested payments.
    pub name: Option<String>,
    /// Network, mainnet if absent.
    pub network: Option<Network>,
    /// Output script (scriptPubKey).
    pub output: Option<Vec<u8>>,
    /// `OP_RETURN` data pushes.
    pub data: Option<Vec<Vec<u8>>>,
    /// Required signatures of a multisig.
    pub m: Option<usize>,
    /// Number of keys of a multisig.
    pub n: Option<usize>,
    /// Multisig public keys.
    pub pubkeys: Option<Vec<Vec<u8>>>,
    /// Input script (scriptSig).
    pub input: Option<Vec<u8>>,
    /// Multisig signatures, an empty item is an `OP_0` placeholder.
    pub signatures: Option<Vec<Vec<u8>>>,
    /// Taproot internal key, x-only.
    pub internal_pubkey: Option<Vec<u8>>,
    /// Public key, x-only for taproot.
    pub pubkey: Option<Vec<u8>>,
    /// Signature, DER plus hash type byte for ECDSA, 64 or 65 bytes for Schnorr.
    pub signature: Option<Vec<u8>>,
    /// Address string.
    pub address: Option<String>,
    /// Public key hash, script hash or taproot merkle root.
    pub hash: Option<Vec<u8>>,
    /// Wrapped payment of P2SH and P2WSH, the script path being spent for P2TR.
    pub redeem: Option<Box<Payment>>,
    /// Leaf version of a taproot redeem script.
    pub redeem_version: Option<u8>,
    /// Taproot script tree.
    pub script_tree: Option<Taptree>,
    /// Witness stack.
    pub witness: Option<Vec<Vec<u8>>>,
}

/// Options applying to every template.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PaymentOpts {
    /// Cross check supplied fields.
    pub validate: bool,
    /// Accept multisig inputs with missing signatures.
    pub allow_incomplete: bool,
}

impl Default for PaymentOpts {
    fn default() -> Self { PaymentOpts { validate: true, allow_incomplete: false } }
}

impl PaymentOpts {
    /// Options that skip validation, for trusted input.
    pub fn no_validate() -> Self { PaymentOpts { validate: false, ..Default::default() } }
}

/// Merges `candidate` into the value every supplied field must agree on.
fn agree(slot: &mut Option<Vec<u8>>, candidate: &[u8], what: &'static str) -> Result<(), PaymentError> {
    match slot {
        Some(ref v) if v.as_slice() != candidate => Err(PaymentError::Mismatch(what)),
        Some(_) => Ok(()),
        None => {
            *slot = Some(candidate.to_vec());
            Ok(())
        }
    }
}

/// Stack items of a push only chunk stream, `OP_0` becoming the empty item.
fn push_items(chunks: &[Chunk]) -> Option<Vec<Vec<u8>>> {
    chunks
        .iter()
        .map(|c| match c {
            Chunk::Push(data) => Some(data.clone()),
            Chunk::Op(OP_0) => Some(Vec::new()),
            Chunk::Op(_) => None,
        })
        .collect()
}

/// True for a 65 byte uncompressed public key.
fn is_uncompressed_pubkey(item: &[u8]) -> bool {
    item.len() == 65 && item[0] == 0x04 && crate::script::is_point(item)
}

fn check_len(field: &Option<Vec<u8>>, len: usize, what: &'static str) -> Result<(), PaymentError> {
    match field {
        Some(v) if v.len() != len => Err(PaymentError::UnexpectedType(what)),
        _ => Ok(()),
    }
}

/// Error constructing or validating a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PaymentError {
    /// None of the fields the template works from were supplied.
    NotEnoughData,
    /// A supplied field has the wrong shape, describes the expectation.
    UnexpectedType(&'static str),
    /// A supplied field is not valid for this template.
    Invalid(&'static str),
    /// Two sources of the same value disagree.
    Mismatch(&'static str),
    /// A script or witness carries an invalid signature.
    InvalidSignature(&'static str),
    /// A script or witness carries an invalid public key.
    InvalidPubkey(&'static str),
    /// The address does not decode.
    Address(AddressError),
    /// Base58 version byte does not match the network.
    VersionMismatch,
    /// Bech32 prefix does not match the network.
    PrefixMismatch,
    /// Witness version is not the one of this template.
    InvalidAddressVersion,
    /// Witness program has the wrong length for this template.
    InvalidAddressData,
    /// Redeem payment is for another network.
    NetworkMismatch,
    /// Taproot control block or tree error.
    Taproot(TaprootError),
    /// A template specific rule is violated.
    Rule(&'static str),
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PaymentError::*;

        match *self {
            NotEnoughData => f.write_str("Not enough data"),
            UnexpectedType(what) => write!(f, "Expected {}", what),
            Invalid(what) => write!(f, "{} is invalid", what),
            Mismatch(what) => write!(f, "{} mismatch", what),
            InvalidSignature(what) => write!(f, "{} has invalid signature", what),
            InvalidPubkey(what) => write!(f, "{} has invalid pubkey", what),
            Address(ref e) => write_err!(f, "invalid address"; e),
            VersionMismatch => f.write_str("Invalid version or Network mismatch"),
            PrefixMismatch => f.write_str("Invalid prefix or Network mismatch"),
            InvalidAddressVersion => f.write_str("Invalid address version"),
            InvalidAddressData => f.write_str("Invalid address data"),
            NetworkMismatch => f.write_str("Network mismatch"),
            Taproot(ref e) => write_err!(f, "taproot"; e),
            Rule(msg) => f.write_str(msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PaymentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use PaymentError::*;

        match *self {
            Address(ref e) => Some(e),
            Taproot(ref e) => Some(e),
            NotEnoughData | UnexpectedType(_) | Invalid(_) | Mismatch(_) | InvalidSignature(_)
            | InvalidPubkey(_) | VersionMismatch | PrefixMismatch | InvalidAddressVersion
            | InvalidAddressData | NetworkMismatch | Rule(_) => None,
        }
    }
}

impl From<AddressError> for PaymentError {
    fn from(e: AddressError) -> Self { Self::Address(e) }
}

impl From<TaprootError> for PaymentError {
    fn from(e: TaprootError) -> Self { Self::Taproot(e) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agree_keeps_first_value() {
        let mut slot = None;
        agree(&mut slot, &[1, 2], "Hash").unwrap();
        agree(&mut slot, &[1, 2], "Hash").unwrap();
        assert_eq!(agree(&mut slot, &[3], "Hash"), Err(PaymentError::Mismatch("Hash")));
        assert_eq!(slot, Some(vec![1, 2]));
    }

    #[test]
    fn push_items_maps_op_0() {
        let chunks = vec![Chunk::Op(OP_0), Chunk::push(vec![7])];
        assert_eq!(push_items(&chunks), Some(vec![vec![], vec![7]]));
        assert_eq!(push_items(&[Chunk::Op(0xac)]), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(PaymentError::Mismatch("Hash").to_string(), "Hash mismatch");
        assert_eq!(PaymentError::Invalid("Output").to_string(), "Output is invalid");
        assert_eq!(PaymentError::NotEnoughData.to_string(), "Not enough data");
    }
}
