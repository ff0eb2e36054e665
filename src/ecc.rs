// SPDX-License-Identifier: CC0-1.0

//! The elliptic curve capability.
//!
//! Nothing in this crate does curve arithmetic directly. Components that need it are handed an
//! [`EccLib`], a cheaply clonable handle around any [`EccBackend`] implementation. A backend is
//! checked against a fixed table of known answers when the handle is created so a broken
//! implementation is rejected before it can produce a single bad signature.

use core::fmt;
use core::ops::Deref;

use bitcoin::hex::FromHex;
use bitcoin::secp256k1::{
    ecdsa, schnorr, All, Keypair, Message, PublicKey, Scalar, Secp256k1, SecretKey,
    XOnlyPublicKey,
};

use crate::prelude::*;

/// Result of tweaking an x-only public key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct XOnlyTweakResult {
    /// Parity of the Y coordinate of the tweaked point (0 even, 1 odd).
    pub parity: u8,
    /// X coordinate of the tweaked point.
    pub x_only_pubkey: [u8; 32],
}

/// Curve operations required by payments, taproot, the builder and the PSBT signer.
///
/// Points are SEC1 encoded (33 or 65 bytes) unless named x-only (32 bytes), scalars are 32 byte
/// big-endian. Operations that can not produce a result (invalid input, point at infinity) return
/// `None`.
pub trait EccBackend {
    /// Returns true if `p` is a valid compressed or uncompressed curve point.
    fn is_point(&self, p: &[u8]) -> bool;

    /// Returns true if `p` is the X coordinate of a curve point.
    fn is_x_only_point(&self, p: &[u8]) -> bool;

    /// Returns true if `d` is a valid private key, `0 < d < n`.
    fn is_private(&self, d: &[u8]) -> bool;

    /// Computes `d * G`.
    fn point_from_scalar(&self, d: &[u8], compressed: bool) -> Option<Vec<u8>>;

    /// Re-encodes a point.
    fn point_compress(&self, p: &[u8], compressed: bool) -> Option<Vec<u8>>;

    /// Computes `P + tweak * G`.
    fn point_add_scalar(&self, p: &[u8], tweak: &[u8], compressed: bool) -> Option<Vec<u8>>;

    /// Computes `lift_x(p) + tweak * G`.
    fn x_only_point_add_tweak(&self, p: &[u8], tweak: &[u8]) -> Option<XOnlyTweakResult>;

    /// Computes `d + tweak mod n`.
    fn private_add(&self, d: &[u8], tweak: &[u8]) -> Option<[u8; 32]>;

    /// Computes `n - d`.
    fn private_negate(&self, d: &[u8]) -> Option<[u8; 32]>;

    /// Deterministic low-S ECDSA, returns the compact `r || s` form.
    fn sign(&self, hash: &[u8; 32], d: &[u8]) -> Option<[u8; 64]>;

    /// ECDSA with `extra_entropy` mixed into the RFC-6979 nonce.
    ///
    /// Backends without support return `None` when asked for extra entropy, which disables
    /// low-R grinding.
    fn sign_with_entropy(
        &self,
        hash: &[u8; 32],
        d: &[u8],
        extra_entropy: Option<&[u8; 32]>,
    ) -> Option<[u8; 64]> {
        match extra_entropy {
            None => self.sign(hash, d),
            Some(_) => None,
        }
    }

    /// BIP-340 Schnorr signature.
    fn sign_schnorr(&self, hash: &[u8; 32], d: &[u8], aux_rand: Option<&[u8; 32]>)
        -> Option<[u8; 64]>;

    /// Verifies a compact ECDSA signature, `strict` rejects high-S signatures.
    fn verify(&self, hash: &[u8; 32], q: &[u8], signature: &[u8; 64], strict: bool) -> bool;

    /// Verifies a BIP-340 signature against an x-only key.
    fn verify_schnorr(&self, hash: &[u8; 32], q: &[u8], signature: &[u8; 64]) -> bool;
}

/// The default backend, libsecp256k1 through `bitcoin::secp256k1`.
pub struct Secp256k1Backend {
    secp: Secp256k1<All>,
}

impl Secp256k1Backend {
    /// Creates a backend with a fresh signing and verification context.
    pub fn new() -> Self { Secp256k1Backend { secp: Secp256k1::new() } }
}

impl Default for Secp256k1Backend {
    fn default() -> Self { Self::new() }
}

fn scalar(tweak: &[u8]) -> Option<Scalar> {
    let bytes: [u8; 32] = tweak.try_into().ok()?;
    Scalar::from_be_bytes(bytes).ok()
}

fn encode_point(pk: &PublicKey, compressed: bool) -> Vec<u8> {
    if compressed {
        pk.serialize().to_vec()
    } else {
        pk.serialize_uncompressed().to_vec()
    }
}

impl EccBackend for Secp256k1Backend {
    fn is_point(&self, p: &[u8]) -> bool {
        (p.len() == 33 || p.len() == 65) && PublicKey::from_slice(p).is_ok()
    }

    fn is_x_only_point(&self, p: &[u8]) -> bool {
        p.len() == 32 && XOnlyPublicKey::from_slice(p).is_ok()
    }

    fn is_private(&self, d: &[u8]) -> bool { d.len() == 32 && SecretKey::from_slice(d).is_ok() }

    fn point_from_scalar(&self, d: &[u8], compressed: bool) -> Option<Vec<u8>> {
        let sk = SecretKey::from_slice(d).ok()?;
        Some(encode_point(&PublicKey::from_secret_key(&self.secp, &sk), compressed))
    }

    fn point_compress(&self, p: &[u8], compressed: bool) -> Option<Vec<u8>> {
        let pk = PublicKey::from_slice(p).ok()?;
        Some(encode_point(&pk, compressed))
    }

    fn point_add_scalar(&self, p: &[u8], tweak: &[u8], compressed: bool) -> Option<Vec<u8>> {
        let pk = PublicKey::from_slice(p).ok()?;
        let tweaked = pk.add_exp_tweak(&self.secp, &scalar(tweak)?).ok()?;
        Some(encode_point(&tweaked, compressed))
    }

    fn x_only_point_add_tweak(&self, p: &[u8], tweak: &[u8]) -> Option<XOnlyTweakResult> {
        let xonly = XOnlyPublicKey::from_slice(p).ok()?;
        let (tweaked, parity) = xonly.add_tweak(&self.secp, &scalar(tweak)?).ok()?;
        Some(XOnlyTweakResult { parity: parity.to_u8(), x_only_pubkey: tweaked.serialize() })
    }

    fn private_add(&self, d: &[u8], tweak: &[u8]) -> Option<[u8; 32]> {
        let sk = SecretKey::from_slice(d).ok()?;
        Some(sk.add_tweak(&scalar(tweak)?).ok()?.secret_bytes())
    }

    fn private_negate(&self, d: &[u8]) -> Option<[u8; 32]> {
        let sk = SecretKey::from_slice(d).ok()?;
        Some(sk.negate().secret_bytes())
    }

    fn sign(&self, hash: &[u8; 32], d: &[u8]) -> Option<[u8; 64]> {
        let sk = SecretKey::from_slice(d).ok()?;
        let msg = Message::from_digest(*hash);
        Some(self.secp.sign_ecdsa(&msg, &sk).serialize_compact())
    }

    fn sign_with_entropy(
        &self,
        hash: &[u8; 32],
        d: &[u8],
        extra_entropy: Option<&[u8; 32]>,
    ) -> Option<[u8; 64]> {
        let sk = SecretKey::from_slice(d).ok()?;
        let msg = Message::from_digest(*hash);
        let sig = match extra_entropy {
            Some(noncedata) => self.secp.sign_ecdsa_with_noncedata(&msg, &sk, noncedata),
            None => self.secp.sign_ecdsa(&msg, &sk),
        };
        Some(sig.serialize_compact())
    }

    fn sign_schnorr(
        &self,
        hash: &[u8; 32],
        d: &[u8],
        aux_rand: Option<&[u8; 32]>,
    ) -> Option<[u8; 64]> {
        let sk = SecretKey::from_slice(d).ok()?;
        let keypair = Keypair::from_secret_key(&self.secp, &sk);
        let msg = Message::from_digest(*hash);
        let sig = match aux_rand {
            Some(aux) => self.secp.sign_schnorr_with_aux_rand(&msg, &keypair, aux),
            None => self.secp.sign_schnorr_no_aux_rand(&msg, &keypair),
        };
        let bytes: &[u8; 64] = sig.as_ref();
        Some(*bytes)
    }

    fn verify(&self, hash: &[u8; 32], q: &[u8], signature: &[u8; 64], strict: bool) -> bool {
        let (pk, mut sig) =
            match (PublicKey::from_slice(q), ecdsa::Signature::from_compact(signature)) {
                (Ok(pk), Ok(sig)) => (pk, sig),
                _ => return false,
            };
        if !strict {
            sig.normalize_s();
        }
        self.secp.verify_ecdsa(&Message::from_digest(*hash), &sig, &pk).is_ok()
    }

    fn verify_schnorr(&self, hash: &[u8; 32], q: &[u8], signature: &[u8; 64]) -> bool {
        let (pk, sig) =
            match (XOnlyPublicKey::from_slice(q), schnorr::Signature::from_slice(signature)) {
                (Ok(pk), Ok(sig)) => (pk, sig),
                _ => return false,
            };
        self.secp.verify_schnorr(&sig, &Message::from_digest(*hash), &pk).is_ok()
    }
}

/// A validated, shareable handle to an [`EccBackend`].
#[derive(Clone)]
pub struct EccLib {
    backend: Arc<dyn EccBackend + Send + Sync>,
}

impl EccLib {
    /// Wraps `backend` after running it against the known-answer table.
    pub fn new<B: EccBackend + Send + Sync + 'static>(backend: B) -> Result<Self, EccError> {
        verify_ecc(&backend)?;
        Ok(EccLib { backend: Arc::new(backend) })
    }

    /// Handle to the bundled libsecp256k1 backend.
    ///
    /// The bundled backend is covered by this module's tests so the self-test is skipped.
    pub fn secp256k1() -> Self { EccLib { backend: Arc::new(Secp256k1Backend::new()) } }
}

impl Default for EccLib {
    fn default() -> Self { Self::secp256k1() }
}

impl Deref for EccLib {
    type Target = dyn EccBackend + Send + Sync;

    fn deref(&self) -> &Self::Target { &*self.backend }
}

impl fmt::Debug for EccLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("EccLib") }
}

const G_COMPRESSED: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const G_UNCOMPRESSED: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
const G_X: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const TWO_G_COMPRESSED: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
const TWO_G_X: &str = "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
const ZERO: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const TWO: &str = "0000000000000000000000000000000000000000000000000000000000000002";
const N_LESS_1: &str = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140";
const N: &str = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";
const P: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";

fn hex(s: &'static str) -> Result<Vec<u8>, EccError> {
    Vec::from_hex(s).map_err(|_| EccError::SelfTest("test vector"))
}

fn check(ok: bool, name: &'static str) -> Result<(), EccError> {
    if ok {
        Ok(())
    } else {
        Err(EccError::SelfTest(name))
    }
}

/// Runs `ecc` against the known-answer table, fails on the first disagreement.
pub fn verify_ecc(ecc: &dyn EccBackend) -> Result<(), EccError> {
    let g = hex(G_COMPRESSED)?;
    let g_uncompressed = hex(G_UNCOMPRESSED)?;
    let g_x = hex(G_X)?;
    let two_g = hex(TWO_G_COMPRESSED)?;
    let one = hex(ONE)?;
    let n_less_1 = hex(N_LESS_1)?;

    check(!ecc.is_private(&hex(ZERO)?), "isPrivate(0)")?;
    check(ecc.is_private(&one), "isPrivate(1)")?;
    check(ecc.is_private(&n_less_1), "isPrivate(n - 1)")?;
    check(!ecc.is_private(&hex(N)?), "isPrivate(n)")?;
    check(!ecc.is_private(&one[1..]), "isPrivate(short)")?;

    check(ecc.is_point(&g), "isPoint(G)")?;
    check(ecc.is_point(&g_uncompressed), "isPoint(G uncompressed)")?;
    let mut off_curve = vec![0x02];
    off_curve.extend_from_slice(&hex(P)?);
    check(!ecc.is_point(&off_curve), "isPoint(x = p)")?;
    let mut bad_prefix = g.clone();
    bad_prefix[0] = 0x05;
    check(!ecc.is_point(&bad_prefix), "isPoint(bad prefix)")?;
    check(!ecc.is_point(&g_x), "isPoint(x-only)")?;

    check(ecc.is_x_only_point(&g_x), "isXOnlyPoint(G)")?;
    check(!ecc.is_x_only_point(&hex(P)?), "isXOnlyPoint(p)")?;

    check(ecc.point_from_scalar(&one, true) == Some(g.clone()), "pointFromScalar(1)")?;
    check(
        ecc.point_from_scalar(&one, false) == Some(g_uncompressed.clone()),
        "pointFromScalar(1, uncompressed)",
    )?;
    check(ecc.point_from_scalar(&hex(TWO)?, true) == Some(two_g.clone()), "pointFromScalar(2)")?;
    check(ecc.point_from_scalar(&hex(ZERO)?, true).is_none(), "pointFromScalar(0)")?;

    check(ecc.point_compress(&g_uncompressed, true) == Some(g.clone()), "pointCompress(G)")?;
    check(
        ecc.point_compress(&g, false) == Some(g_uncompressed.clone()),
        "pointCompress(G, uncompressed)",
    )?;

    check(ecc.point_add_scalar(&g, &one, true) == Some(two_g), "pointAddScalar(G, 1)")?;
    check(ecc.point_add_scalar(&g, &n_less_1, true).is_none(), "pointAddScalar(G, n - 1)")?;

    let two_g_x = hex(TWO_G_X)?;
    let tweaked = ecc.x_only_point_add_tweak(&g_x, &one);
    check(
        tweaked.map(|t| (t.parity, t.x_only_pubkey.to_vec())) == Some((0, two_g_x)),
        "xOnlyPointAddTweak(G, 1)",
    )?;

    check(ecc.private_add(&one, &one).map(|d| d.to_vec()) == Some(hex(TWO)?), "privateAdd(1, 1)")?;
    check(ecc.private_negate(&one).map(|d| d.to_vec()) == Some(n_less_1), "privateNegate(1)")?;

    let hash = crate::crypto::sha256(b"known answer");
    let other = crate::crypto::sha256(b"other answer");
    let sig = ecc.sign(&hash, &one).ok_or(EccError::SelfTest("sign"))?;
    check(ecc.verify(&hash, &g, &sig, true), "verify")?;
    check(!ecc.verify(&other, &g, &sig, true), "verify(wrong hash)")?;

    let sig = ecc.sign_schnorr(&hash, &one, None).ok_or(EccError::SelfTest("signSchnorr"))?;
    check(ecc.verify_schnorr(&hash, &g_x, &sig), "verifySchnorr")?;
    check(!ecc.verify_schnorr(&other, &g_x, &sig), "verifySchnorr(wrong hash)")?;

    Ok(())
}

/// Error from the ECC layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EccError {
    /// The backend disagreed with a known answer.
    SelfTest(&'static str),
}

impl fmt::Display for EccError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use EccError::*;

        match *self {
            SelfTest(name) => write!(f, "ecc library invalid: failed known answer test {}", name),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EccError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use EccError::*;

        match *self {
            SelfTest(_) => None,
        }
    }
}
