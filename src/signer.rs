// SPDX-License-Identifier: CC0-1.0

//! Signing capabilities.
//!
//! The builder and the PSBT signer never see private keys, they ask one of these traits for a
//! signature over a precomputed hash. The async variants exist for signers living behind a
//! long-latency boundary (hardware wallets, remote HSMs), every synchronous signer is also an
//! async one through the blanket implementations below.

use core::fmt;

use async_trait::async_trait;
use bitcoin::bip32::{self, DerivationPath, Fingerprint};

use crate::error::write_err;
use crate::network::Network;
use crate::prelude::*;

/// A single key able to produce signatures.
pub trait Signer {
    /// The SEC1 encoded public key (33 or 65 bytes).
    fn public_key(&self) -> Vec<u8>;

    /// Network the key belongs to, if known.
    fn network(&self) -> Option<Network> { None }

    /// Signs `hash` with ECDSA, returning the compact `r || s` form.
    ///
    /// `low_r` asks the signer to grind the nonce until `r` fits in 32 bytes DER.
    fn sign(&self, hash: &[u8; 32], low_r: bool) -> Result<[u8; 64], SignerError>;

    /// Signs `hash` with BIP-340 Schnorr.
    fn sign_schnorr(&self, _hash: &[u8; 32]) -> Result<[u8; 64], SignerError> {
        Err(SignerError::SchnorrUnsupported)
    }
}

/// Async version of [`Signer`].
#[async_trait]
pub trait SignerAsync: Send + Sync {
    /// The SEC1 encoded public key (33 or 65 bytes).
    fn public_key(&self) -> Vec<u8>;

    /// Network the key belongs to, if known.
    fn network(&self) -> Option<Network> { None }

    /// Signs `hash` with ECDSA, returning the compact `r || s` form.
    async fn sign(&self, hash: &[u8; 32], low_r: bool) -> Result<[u8; 64], SignerError>;

    /// Signs `hash` with BIP-340 Schnorr.
    async fn sign_schnorr(&self, _hash: &[u8; 32]) -> Result<[u8; 64], SignerError> {
        Err(SignerError::SchnorrUnsupported)
    }
}

#[async_trait]
impl<T: Signer + Send + Sync> SignerAsync for T {
    fn public_key(&self) -> Vec<u8> { Signer::public_key(self) }

    fn network(&self) -> Option<Network> { Signer::network(self) }

    async fn sign(&self, hash: &[u8; 32], low_r: bool) -> Result<[u8; 64], SignerError> {
        Signer::sign(self, hash, low_r)
    }

    async fn sign_schnorr(&self, hash: &[u8; 32]) -> Result<[u8; 64], SignerError> {
        Signer::sign_schnorr(self, hash)
    }
}

/// The root of a BIP-32 tree, signs after deriving the child named by a PSBT derivation.
pub trait HdSigner {
    /// The derived child key.
    type Child: Signer;

    /// Fingerprint of the master key, matched against BIP-32 derivation entries.
    fn fingerprint(&self) -> Fingerprint;

    /// Derives the key at `path`, relative to the master.
    fn derive_path(&self, path: &DerivationPath) -> Result<Self::Child, SignerError>;
}

/// Async version of [`HdSigner`].
#[async_trait]
pub trait HdSignerAsync: Send + Sync {
    /// The derived child key.
    type Child: SignerAsync;

    /// Fingerprint of the master key, matched against BIP-32 derivation entries.
    fn fingerprint(&self) -> Fingerprint;

    /// Derives the key at `path`, relative to the master.
    async fn derive_path(&self, path: &DerivationPath) -> Result<Self::Child, SignerError>;
}

#[async_trait]
impl<T> HdSignerAsync for T
where
    T: HdSigner + Send + Sync,
    T::Child: Send + Sync,
{
    type Child = <T as HdSigner>::Child;

    fn fingerprint(&self) -> Fingerprint { HdSigner::fingerprint(self) }

    async fn derive_path(&self, path: &DerivationPath) -> Result<Self::Child, SignerError> {
        HdSigner::derive_path(self, path)
    }
}

/// Error produced by a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignerError {
    /// The key can not sign, it only holds a public key.
    MissingPrivateKey,
    /// The ECC backend failed to produce a signature.
    Ecc,
    /// This signer does not do Schnorr.
    SchnorrUnsupported,
    /// BIP-32 derivation failed.
    Bip32(bip32::Error),
    /// An external signer failed.
    External(String),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SignerError::*;

        match *self {
            MissingPrivateKey => f.write_str("Missing private key"),
            Ecc => f.write_str("ecc backend failed to sign"),
            SchnorrUnsupported => f.write_str("signer does not produce schnorr signatures"),
            Bip32(ref e) => write_err!(f, "bip32 derivation"; e),
            External(ref msg) => write!(f, "external signer: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use SignerError::*;

        match *self {
            Bip32(ref e) => Some(e),
            MissingPrivateKey | Ecc | SchnorrUnsupported | External(_) => None,
        }
    }
}

impl From<bip32::Error> for SignerError {
    fn from(e: bip32::Error) -> Self { Self::Bip32(e) }
}
