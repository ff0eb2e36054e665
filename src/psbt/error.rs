// SPDX-License-Identifier: CC0-1.0

use core::fmt;

use bitcoin::hex::HexToBytesError;

use super::map::{self, global, UpdateError};
use crate::address::AddressError;
use crate::error::{write_err, FeeError, FundingUtxoError};
use crate::payments::PaymentError;
use crate::prelude::*;
use crate::script::signature::SignatureError;
use crate::signer::SignerError;
use crate::taproot::TaprootError;
use crate::transaction::SighashError;

/// An error while deserializing a PSBT.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Magic bytes for a PSBT must be the ASCII for "psbt" serialized in most
    /// significant byte order.
    InvalidMagic,
    /// The separator for a PSBT must be `0xff`.
    InvalidSeparator,
    /// Invalid hex string.
    Hex(HexToBytesError),
    /// Error decoding the global map.
    Global(global::DecodeError),
    /// Error decoding an input map.
    Input {
        /// Index of the input map.
        index: usize,
        /// The decoding error.
        error: map::DecodeError,
    },
    /// Error decoding an output map.
    Output {
        /// Index of the output map.
        index: usize,
        /// The decoding error.
        error: map::DecodeError,
    },
    /// Bytes left over after the last output map.
    UnexpectedData,
    /// Two inputs of the unsigned transaction spend the same outpoint.
    DuplicateInput,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match *self {
            InvalidMagic => f.write_str("invalid magic"),
            InvalidSeparator => f.write_str("invalid separator"),
            Hex(ref e) => write_err!(f, "invalid PSBT hex"; e),
            Global(ref e) => write_err!(f, "error decoding the global map"; e),
            Input { index, ref error } => write_err!(f, "error decoding input map #{}", index; error),
            Output { index, ref error } =>
                write_err!(f, "error decoding output map #{}", index; error),
            UnexpectedData => f.write_str("Format Error: Unexpected data after the last output map"),
            DuplicateInput => f.write_str("Duplicate input detected."),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match *self {
            Hex(ref e) => Some(e),
            Global(ref e) => Some(e),
            Input { ref error, .. } | Output { ref error, .. } => Some(error),
            InvalidMagic | InvalidSeparator | UnexpectedData | DuplicateInput => None,
        }
    }
}

impl From<global::DecodeError> for Error {
    fn from(e: global::DecodeError) -> Self { Self::Global(e) }
}

/// Input or output index out of bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IndexOutOfBoundsError {
    /// The index is out of bounds for the inputs.
    Inputs {
        /// Attempted index access.
        index: usize,
        /// Number of inputs.
        length: usize,
    },
    /// The index is out of bounds for the outputs.
    Outputs {
        /// Attempted index access.
        index: usize,
        /// Number of outputs.
        length: usize,
    },
}

impl fmt::Display for IndexOutOfBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use IndexOutOfBoundsError::*;

        match *self {
            Inputs { ref index, ref length } =>
                write!(f, "No input #{}, PSBT has {} inputs", index, length),
            Outputs { ref index, ref length } =>
                write!(f, "No output #{}, PSBT has {} outputs", index, length),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IndexOutOfBoundsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use IndexOutOfBoundsError::*;

        match *self {
            Inputs { .. } | Outputs { .. } => None,
        }
    }
}

/// An error resolving the script an input or output actually executes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InputScriptError {
    /// The spent output is not known.
    FundingUtxo(FundingUtxoError),
    /// The scriptPubKey is P2SH and no redeem script is known.
    MissingRedeemScript,
    /// The scriptPubKey or redeem script is P2WSH and no witness script is known.
    MissingWitnessScript,
    /// A redeem or witness script does not hash to the script wrapping it.
    ScriptMismatch {
        /// "Redeem script" or "Witness script".
        script: &'static str,
        /// "input" or "output".
        io_type: &'static str,
        /// Index of the input or output.
        index: usize,
    },
    /// A witness script is itself P2WPKH or P2SH.
    Nesting,
    /// Only a witness utxo is known for an input spending a non-segwit script.
    NonSegwitWitnessUtxo {
        /// Index of the input.
        index: usize,
        /// The script being spent.
        script: Vec<u8>,
    },
}

impl fmt::Display for InputScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InputScriptError::*;

        match *self {
            FundingUtxo(ref e) => write_err!(f, "Need a Utxo input item"; e),
            MissingRedeemScript => f.write_str("scriptPubkey is P2SH but redeemScript missing"),
            MissingWitnessScript =>
                f.write_str("scriptPubkey or redeemScript is P2WSH but witnessScript missing"),
            ScriptMismatch { script, io_type, index } => write!(
                f,
                "{} for {} #{} doesn't match the scriptPubKey in the prevout",
                script, io_type, index
            ),
            Nesting => f.write_str("P2WPKH or P2SH can not be contained within P2WSH"),
            NonSegwitWitnessUtxo { index, ref script } => write!(
                f,
                "Input #{} has witnessUtxo but non-segwit script: {:x}",
                index,
                script.as_hex()
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InputScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InputScriptError::*;

        match *self {
            FundingUtxo(ref e) => Some(e),
            MissingRedeemScript
            | MissingWitnessScript
            | ScriptMismatch { .. }
            | Nesting
            | NonSegwitWitnessUtxo { .. } => None,
        }
    }
}

impl From<FundingUtxoError> for InputScriptError {
    fn from(e: FundingUtxoError) -> Self { Self::FundingUtxo(e) }
}

/// An error from one of the PSBT roles other than the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PsbtError {
    /// Index out of bounds.
    IndexOutOfBounds(IndexOutOfBoundsError),
    /// The change would invalidate existing signatures.
    CannotModify,
    /// The new input spends an outpoint some other input already spends.
    DuplicateInput,
    /// Taproot and non-taproot fields given for the same input or output.
    MixedTaprootFields(&'static str),
    /// A tap leaf script does not hash up to the tap merkle root.
    TapLeafNotInTree(&'static str),
    /// The taproot fields of an output do not produce its script.
    OutputScriptMismatch,
    /// The input is not a taproot input.
    NotTaproot(usize),
    /// Error adding fields.
    Update(UpdateError),
    /// Unknown key-value pairs must use a key type this crate does not know.
    KnownKeyType(u8),
    /// The input is already finalized.
    InputFinalized(usize),
    /// No script to finalize with.
    NoScript(usize),
    /// The input script type is not supported, or not enough signatures are present.
    CannotFinalize(usize),
    /// More signatures than the script takes.
    TooManySignatures,
    /// A partial signature uses another sighash type than the input.
    SighashMismatch,
    /// Taproot inputs need a witness utxo to be finalized.
    MissingWitnessUtxo(usize),
    /// No tap script signature to finalize a taproot input with.
    NoTapScriptSignature(usize),
    /// No tap leaf has a signature.
    TapLeafSignatureNotFound(usize),
    /// Some inputs are not finalized.
    NotFinalized,
    /// The fee rate reached the maximum fee rate.
    AbsurdFee {
        /// Fee in satoshis.
        fee: u64,
        /// Fee rate in satoshis per virtual byte.
        fee_rate: u64,
        /// Virtual size of the extracted transaction.
        vsize: usize,
    },
    /// Fee calculation failed.
    Fee(FeeError),
    /// Combining documents that describe different transactions.
    CombineMismatch,
    /// The input has no signatures.
    NoSignatures,
    /// The input has no signatures by the given key.
    NoSignaturesForPubkey,
    /// A signature in the input does not belong to the script.
    KeyNotInScript(Vec<u8>),
    /// Error resolving the executed script.
    InputScript(InputScriptError),
    /// Error from a payment template.
    Payment(PaymentError),
    /// Error converting an address.
    Address(AddressError),
    /// Taproot error.
    Taproot(TaprootError),
    /// Error computing a signature hash.
    Sighash(SighashError),
    /// Malformed signature.
    Signature(SignatureError),
}

impl fmt::Display for PsbtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PsbtError::*;

        match *self {
            IndexOutOfBounds(ref e) => write_err!(f, "index out of bounds"; e),
            CannotModify => f.write_str("Can not modify transaction, signatures exist."),
            DuplicateInput => f.write_str("Duplicate input detected."),
            MixedTaprootFields(action) => write!(
                f,
                "Invalid arguments for Psbt.{}. Cannot use both taproot and non-taproot fields.",
                action
            ),
            TapLeafNotInTree(action) =>
                write!(f, "Invalid arguments for Psbt.{}. Tapleaf not part of taptree.", action),
            OutputScriptMismatch => f.write_str("Error adding output. Script or address mismatch."),
            NotTaproot(index) => write!(f, "Input #{} is not of type Taproot.", index),
            Update(ref e) => write_err!(f, "update failed"; e),
            KnownKeyType(ty) => write!(
                f,
                "Use the method for your specific key instead of addUnknownKeyVal*, key type {:#x}",
                ty
            ),
            InputFinalized(index) => write!(f, "Input #{} is already finalized", index),
            NoScript(index) => write!(f, "No script found for input #{}", index),
            CannotFinalize(index) => write!(f, "Can not finalize input #{}", index),
            TooManySignatures => f.write_str("Too many signatures"),
            SighashMismatch => f.write_str("Signature sighash does not match input sighash type"),
            MissingWitnessUtxo(index) =>
                write!(f, "Cannot finalize input #{}. Missing witness utxo.", index),
            NoTapScriptSignature(index) => write!(
                f,
                "Can not finalize taproot input #{}. No tapleaf script signature provided.",
                index
            ),
            TapLeafSignatureNotFound(index) => write!(
                f,
                "Can not finalize taproot input #{}. Signature for tapleaf script not found.",
                index
            ),
            NotFinalized => f.write_str("Not finalized"),
            AbsurdFee { fee, fee_rate, vsize } => write!(
                f,
                "Warning: You are paying around {}.{:08} in fees, which is {} satoshi per byte \
                 for a transaction with a VSize of {} bytes (segwit counted as 0.25 byte per \
                 byte). Use setMaximumFeeRate method to raise your threshold, or pass true to \
                 the first arg of extractTransaction.",
                fee / 100_000_000,
                fee % 100_000_000,
                fee_rate,
                vsize
            ),
            Fee(ref e) => write_err!(f, "fee calculation"; e),
            CombineMismatch =>
                f.write_str("Can not combine PSBTs with different unsigned transactions"),
            NoSignatures => f.write_str("No signatures to validate"),
            NoSignaturesForPubkey => f.write_str("No signatures for this pubkey"),
            KeyNotInScript(ref pubkey) =>
                write!(f, "Can not verify for this input with the key {:x}", pubkey.as_hex()),
            InputScript(ref e) => write_err!(f, "input script"; e),
            Payment(ref e) => write_err!(f, "payment"; e),
            Address(ref e) => write_err!(f, "address"; e),
            Taproot(ref e) => write_err!(f, "taproot"; e),
            Sighash(ref e) => write_err!(f, "sighash"; e),
            Signature(ref e) => write_err!(f, "signature"; e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PsbtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use PsbtError::*;

        match *self {
            IndexOutOfBounds(ref e) => Some(e),
            Update(ref e) => Some(e),
            Fee(ref e) => Some(e),
            InputScript(ref e) => Some(e),
            Payment(ref e) => Some(e),
            Address(ref e) => Some(e),
            Taproot(ref e) => Some(e),
            Sighash(ref e) => Some(e),
            Signature(ref e) => Some(e),
            CannotModify
            | DuplicateInput
            | MixedTaprootFields(_)
            | TapLeafNotInTree(_)
            | OutputScriptMismatch
            | NotTaproot(_)
            | KnownKeyType(_)
            | InputFinalized(_)
            | NoScript(_)
            | CannotFinalize(_)
            | TooManySignatures
            | SighashMismatch
            | MissingWitnessUtxo(_)
            | NoTapScriptSignature(_)
            | TapLeafSignatureNotFound(_)
            | NotFinalized
            | AbsurdFee { .. }
            | CombineMismatch
            | NoSignatures
            | NoSignaturesForPubkey
            | KeyNotInScript(_) => None,
        }
    }
}

impl From<IndexOutOfBoundsError> for PsbtError {
    fn from(e: IndexOutOfBoundsError) -> Self { Self::IndexOutOfBounds(e) }
}

impl From<UpdateError> for PsbtError {
    fn from(e: UpdateError) -> Self { Self::Update(e) }
}

impl From<FeeError> for PsbtError {
    fn from(e: FeeError) -> Self { Self::Fee(e) }
}

impl From<InputScriptError> for PsbtError {
    fn from(e: InputScriptError) -> Self { Self::InputScript(e) }
}

impl From<FundingUtxoError> for PsbtError {
    fn from(e: FundingUtxoError) -> Self { Self::InputScript(e.into()) }
}

impl From<PaymentError> for PsbtError {
    fn from(e: PaymentError) -> Self { Self::Payment(e) }
}

impl From<AddressError> for PsbtError {
    fn from(e: AddressError) -> Self { Self::Address(e) }
}

impl From<TaprootError> for PsbtError {
    fn from(e: TaprootError) -> Self { Self::Taproot(e) }
}

impl From<SighashError> for PsbtError {
    fn from(e: SighashError) -> Self { Self::Sighash(e) }
}

impl From<SignatureError> for PsbtError {
    fn from(e: SignatureError) -> Self { Self::Signature(e) }
}

/// An error while signing an input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignError {
    /// Index out of bounds.
    IndexOutOfBounds(IndexOutOfBoundsError),
    /// Finalized inputs can not be signed any more.
    InputFinalized(usize),
    /// Error resolving the executed script.
    InputScript(InputScriptError),
    /// The input sighash type is not in the allowed list.
    SighashNotAllowed(u32),
    /// The key does not appear in the script being signed.
    KeyNotInScript(Vec<u8>),
    /// The key can not sign any path of the taproot input.
    TaprootKeyNotFound {
        /// Index of the input.
        index: usize,
        /// The signer's public key.
        pubkey: Vec<u8>,
    },
    /// The input is not a taproot input.
    NotTaproot(usize),
    /// HD signing needs BIP-32 derivation paths.
    NoBip32Derivation,
    /// No BIP-32 derivation has the signer's master fingerprint.
    NoMatchingFingerprint,
    /// The derived key is not the key in the derivation entry.
    PubkeyMismatch,
    /// Every input failed to sign.
    NoInputsSigned,
    /// The signature could not be added to the input.
    Update(UpdateError),
    /// Error computing a signature hash.
    Sighash(SighashError),
    /// The signer failed.
    Signer(SignerError),
    /// The signature could not be encoded.
    Signature(SignatureError),
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SignError::*;

        match *self {
            IndexOutOfBounds(ref e) => write_err!(f, "index out of bounds"; e),
            InputFinalized(index) => write!(f, "Input #{} is already finalized", index),
            InputScript(ref e) => write_err!(f, "input script"; e),
            SighashNotAllowed(ty) => write!(
                f,
                "Sighash type is not allowed. Retry the sign method passing the sighashTypes \
                 array of whitelisted types. Sighash type: {}",
                crate::sighash_type::SighashType::from_u32(ty)
            ),
            KeyNotInScript(ref pubkey) =>
                write!(f, "Can not sign for this input with the key {:x}", pubkey.as_hex()),
            TaprootKeyNotFound { index, ref pubkey } =>
                write!(f, "Can not sign for input #{} with the key {:x}", index, pubkey.as_hex()),
            NotTaproot(index) => write!(f, "Input #{} is not of type Taproot.", index),
            NoBip32Derivation => f.write_str("Need bip32Derivation to sign with HD"),
            NoMatchingFingerprint => f.write_str(
                "Need one bip32Derivation masterFingerprint to match the HDSigner fingerprint",
            ),
            PubkeyMismatch => f.write_str("pubkey did not match bip32Derivation"),
            NoInputsSigned => f.write_str("No inputs were signed"),
            Update(ref e) => write_err!(f, "could not add signature"; e),
            Sighash(ref e) => write_err!(f, "sighash"; e),
            Signer(ref e) => write_err!(f, "signer"; e),
            Signature(ref e) => write_err!(f, "signature"; e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use SignError::*;

        match *self {
            IndexOutOfBounds(ref e) => Some(e),
            InputScript(ref e) => Some(e),
            Update(ref e) => Some(e),
            Sighash(ref e) => Some(e),
            Signer(ref e) => Some(e),
            Signature(ref e) => Some(e),
            InputFinalized(_)
            | SighashNotAllowed(_)
            | KeyNotInScript(_)
            | TaprootKeyNotFound { .. }
            | NotTaproot(_)
            | NoBip32Derivation
            | NoMatchingFingerprint
            | PubkeyMismatch
            | NoInputsSigned => None,
        }
    }
}

impl From<IndexOutOfBoundsError> for SignError {
    fn from(e: IndexOutOfBoundsError) -> Self { Self::IndexOutOfBounds(e) }
}

impl From<InputScriptError> for SignError {
    fn from(e: InputScriptError) -> Self { Self::InputScript(e) }
}

impl From<FundingUtxoError> for SignError {
    fn from(e: FundingUtxoError) -> Self { Self::InputScript(e.into()) }
}

impl From<UpdateError> for SignError {
    fn from(e: UpdateError) -> Self { Self::Update(e) }
}

impl From<SighashError> for SignError {
    fn from(e: SighashError) -> Self { Self::Sighash(e) }
}

impl From<SignerError> for SignError {
    fn from(e: SignerError) -> Self { Self::Signer(e) }
}

impl From<SignatureError> for SignError {
    fn from(e: SignatureError) -> Self { Self::Signature(e) }
}
