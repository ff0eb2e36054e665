// SPDX-License-Identifier: CC0-1.0

//! Key pairs usable as [`Signer`]s.
//!
//! [`KeyPair`] is a single secp256k1 key (or only its public half), [`HdKeyPair`] is a BIP-32
//! master key that hands out [`KeyPair`]s for the derivation paths found in a PSBT.

use core::fmt;

use bitcoin::base58;
use bitcoin::bip32::{DerivationPath, Fingerprint, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1};

use crate::ecc::EccLib;
use crate::error::write_err;
use crate::network::{self, Network};
use crate::prelude::*;
use crate::signer::{HdSigner, Signer, SignerError};
use crate::taproot;

/// Options used when creating a [`KeyPair`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyPairOpts {
    /// Serialize the public key compressed.
    pub compressed: bool,
    /// Network, selects the WIF version byte.
    pub network: Network,
}

impl Default for KeyPairOpts {
    fn default() -> Self { KeyPairOpts { compressed: true, network: network::BITCOIN } }
}

/// A secp256k1 key pair, the private half is optional.
#[derive(Clone)]
pub struct KeyPair {
    ecc: EccLib,
    private_key: Option<[u8; 32]>,
    public_key: Vec<u8>,
    compressed: bool,
    network: Network,
}

impl KeyPair {
    /// Creates a key pair from a 32 byte private key.
    pub fn from_private_key(ecc: &EccLib, d: &[u8], opts: KeyPairOpts) -> Result<Self, KeyPairError> {
        if !ecc.is_private(d) {
            return Err(KeyPairError::InvalidPrivateKey);
        }
        let public_key =
            ecc.point_from_scalar(d, opts.compressed).ok_or(KeyPairError::InvalidPrivateKey)?;
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(d);

        Ok(KeyPair {
            ecc: ecc.clone(),
            private_key: Some(private_key),
            public_key,
            compressed: opts.compressed,
            network: opts.network,
        })
    }

    /// Creates a verify-only key pair from a SEC1 encoded public key.
    ///
    /// The key keeps its own encoding, `opts.compressed` is ignored.
    pub fn from_public_key(ecc: &EccLib, q: &[u8], opts: KeyPairOpts) -> Result<Self, KeyPairError> {
        if !ecc.is_point(q) {
            return Err(KeyPairError::InvalidPublicKey);
        }
        Ok(KeyPair {
            ecc: ecc.clone(),
            private_key: None,
            public_key: q.to_vec(),
            compressed: q.len() == 33,
            network: opts.network,
        })
    }

    /// Decodes a WIF private key, the version byte must belong to one of `networks`.
    pub fn from_wif(ecc: &EccLib, wif: &str, networks: &[Network]) -> Result<Self, KeyPairError> {
        let payload = base58::decode_check(wif).map_err(KeyPairError::Base58)?;
        let (d, compressed) = match payload.len() {
            33 => (&payload[1..33], false),
            34 if payload[33] == 0x01 => (&payload[1..33], true),
            34 => return Err(KeyPairError::InvalidCompressionFlag),
            len => return Err(KeyPairError::InvalidWifLength(len)),
        };
        let network = networks
            .iter()
            .find(|n| n.wif == payload[0])
            .copied()
            .ok_or(KeyPairError::UnknownWifVersion(payload[0]))?;

        Self::from_private_key(ecc, d, KeyPairOpts { compressed, network })
    }

    /// Encodes the private key as WIF.
    pub fn to_wif(&self) -> Result<String, KeyPairError> {
        let d = self.private_key.ok_or(KeyPairError::MissingPrivateKey)?;
        let mut payload = Vec::with_capacity(34);
        payload.push(self.network.wif);
        payload.extend_from_slice(&d);
        if self.compressed {
            payload.push(0x01);
        }
        Ok(base58::encode_check(&payload))
    }

    /// The private key, if this key pair holds one.
    pub fn private_key(&self) -> Option<&[u8; 32]> { self.private_key.as_ref() }

    /// The SEC1 encoded public key.
    pub fn public_key(&self) -> &[u8] { &self.public_key }

    /// The public key without its parity byte.
    pub fn x_only_public_key(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.public_key[1..33]);
        x
    }

    /// True if the public key serializes to 33 bytes.
    pub fn compressed(&self) -> bool { self.compressed }

    /// The network this key belongs to.
    pub fn network(&self) -> Network { self.network }

    /// Signs `hash` with ECDSA, see [`Signer::sign`].
    pub fn sign(&self, hash: &[u8; 32], low_r: bool) -> Result<[u8; 64], SignerError> {
        let d = self.private_key.as_ref().ok_or(SignerError::MissingPrivateKey)?;
        let mut sig = self.ecc.sign(hash, d).ok_or(SignerError::Ecc)?;
        if low_r {
            let mut extra_entropy = [0u8; 32];
            let mut counter = 0u64;
            while sig[0] > 0x7f {
                counter += 1;
                extra_entropy[..8].copy_from_slice(&counter.to_le_bytes());
                match self.ecc.sign_with_entropy(hash, d, Some(&extra_entropy)) {
                    Some(s) => sig = s,
                    None => break,
                }
            }
        }
        Ok(sig)
    }

    /// Signs `hash` with BIP-340 Schnorr.
    pub fn sign_schnorr(&self, hash: &[u8; 32]) -> Result<[u8; 64], SignerError> {
        let d = self.private_key.as_ref().ok_or(SignerError::MissingPrivateKey)?;
        self.ecc.sign_schnorr(hash, d, None).ok_or(SignerError::Ecc)
    }

    /// Verifies a compact ECDSA signature over `hash`.
    pub fn verify(&self, hash: &[u8; 32], signature: &[u8; 64]) -> bool {
        self.ecc.verify(hash, &self.public_key, signature, false)
    }

    /// Verifies a Schnorr signature over `hash` against the x-only public key.
    pub fn verify_schnorr(&self, hash: &[u8; 32], signature: &[u8; 64]) -> bool {
        self.ecc.verify_schnorr(hash, &self.x_only_public_key(), signature)
    }

    /// Applies the BIP-341 key path tweak, `tweak` being the TapTweak hash.
    ///
    /// The private key is negated first if its public key has an odd Y, so that the result signs
    /// for the tweaked x-only output key.
    pub fn tweak(&self, tweak: &[u8; 32]) -> Result<KeyPair, KeyPairError> {
        match self.private_key {
            Some(d) => {
                let has_odd_y = self.public_key[0] == 0x03
                    || (self.public_key[0] == 0x04 && self.public_key[64] & 1 == 1);
                let d = if has_odd_y {
                    self.ecc.private_negate(&d).ok_or(KeyPairError::Tweak)?
                } else {
                    d
                };
                let tweaked = self.ecc.private_add(&d, tweak).ok_or(KeyPairError::Tweak)?;
                Self::from_private_key(
                    &self.ecc,
                    &tweaked,
                    KeyPairOpts { compressed: true, network: self.network },
                )
            }
            None => {
                let res = self
                    .ecc
                    .x_only_point_add_tweak(&self.x_only_public_key(), tweak)
                    .ok_or(KeyPairError::Tweak)?;
                let mut q = Vec::with_capacity(33);
                q.push(0x02 | res.parity);
                q.extend_from_slice(&res.x_only_pubkey);
                Self::from_public_key(&self.ecc, &q, KeyPairOpts { compressed: true, network: self.network })
            }
        }
    }

    /// The key pair that signs for a P2TR output built from this internal key.
    pub fn tap_tweak(&self, merkle_root: Option<&[u8; 32]>) -> Result<KeyPair, KeyPairError> {
        let t = taproot::tap_tweak_hash(&self.x_only_public_key(), merkle_root);
        self.tweak(&t)
    }
}

impl Signer for KeyPair {
    fn public_key(&self) -> Vec<u8> { self.public_key.clone() }

    fn network(&self) -> Option<Network> { Some(self.network) }

    fn sign(&self, hash: &[u8; 32], low_r: bool) -> Result<[u8; 64], SignerError> {
        KeyPair::sign(self, hash, low_r)
    }

    fn sign_schnorr(&self, hash: &[u8; 32]) -> Result<[u8; 64], SignerError> {
        KeyPair::sign_schnorr(self, hash)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key.to_lower_hex_string())
            .field("has_private_key", &self.private_key.is_some())
            .field("compressed", &self.compressed)
            .finish()
    }
}

/// A BIP-32 master key.
#[derive(Clone)]
pub struct HdKeyPair {
    ecc: EccLib,
    secp: Secp256k1<All>,
    xpriv: Xpriv,
}

impl HdKeyPair {
    /// Wraps an extended private key.
    pub fn new(ecc: &EccLib, xpriv: Xpriv) -> Self {
        HdKeyPair { ecc: ecc.clone(), secp: Secp256k1::new(), xpriv }
    }

    /// Creates the master key of `seed`.
    pub fn from_seed(
        ecc: &EccLib,
        seed: &[u8],
        network: bitcoin::Network,
    ) -> Result<Self, SignerError> {
        let xpriv = Xpriv::new_master(network, seed)?;
        Ok(Self::new(ecc, xpriv))
    }

    /// The wrapped extended private key.
    pub fn xpriv(&self) -> &Xpriv { &self.xpriv }

    /// The compressed public key of the master.
    pub fn public_key(&self) -> Vec<u8> {
        self.xpriv.private_key.public_key(&self.secp).serialize().to_vec()
    }

    fn network(&self) -> Network {
        match self.xpriv.network {
            bitcoin::Network::Bitcoin => network::BITCOIN,
            bitcoin::Network::Regtest => network::REGTEST,
            _ => network::TESTNET,
        }
    }
}

impl HdSigner for HdKeyPair {
    type Child = KeyPair;

    fn fingerprint(&self) -> Fingerprint { self.xpriv.fingerprint(&self.secp) }

    fn derive_path(&self, path: &DerivationPath) -> Result<KeyPair, SignerError> {
        let child = self.xpriv.derive_priv(&self.secp, path)?;
        KeyPair::from_private_key(
            &self.ecc,
            &child.private_key.secret_bytes(),
            KeyPairOpts { compressed: true, network: self.network() },
        )
        .map_err(|_| SignerError::Ecc)
    }
}

impl fmt::Debug for HdKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeyPair").field("fingerprint", &HdSigner::fingerprint(self)).finish()
    }
}

/// Error creating or using a [`KeyPair`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyPairError {
    /// Private key not in range `[1, n)`.
    InvalidPrivateKey,
    /// Not a point on the curve.
    InvalidPublicKey,
    /// WIF string is not valid base58check.
    Base58(base58::Error),
    /// WIF payload has the wrong length.
    InvalidWifLength(usize),
    /// WIF compression flag is not `0x01`.
    InvalidCompressionFlag,
    /// WIF version byte matches none of the given networks.
    UnknownWifVersion(u8),
    /// Operation needs the private key.
    MissingPrivateKey,
    /// Tweaking produced an invalid key.
    Tweak,
}

impl fmt::Display for KeyPairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use KeyPairError::*;

        match *self {
            InvalidPrivateKey => f.write_str("Private key not in range [1, n)"),
            InvalidPublicKey => f.write_str("Expected isPoint"),
            Base58(ref e) => write_err!(f, "invalid WIF"; e),
            InvalidWifLength(len) => write!(f, "invalid WIF payload length {}", len),
            InvalidCompressionFlag => f.write_str("Invalid compression flag"),
            UnknownWifVersion(v) => write!(f, "Unknown network version {:#04x}", v),
            MissingPrivateKey => f.write_str("Missing private key"),
            Tweak => f.write_str("Cannot tweak key"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KeyPairError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use KeyPairError::*;

        match *self {
            Base58(ref e) => Some(e),
            InvalidPrivateKey | InvalidPublicKey | InvalidWifLength(_) | InvalidCompressionFlag
            | UnknownWifVersion(_) | MissingPrivateKey | Tweak => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use bitcoin::hex::FromHex;

    use super::*;
    use crate::network::{BITCOIN, TESTNET};

    fn one() -> [u8; 32] {
        let mut d = [0u8; 32];
        d[31] = 1;
        d
    }

    #[test]
    fn wif_round_trip() {
        let ecc = EccLib::default();
        // Private key 1, compressed, mainnet.
        let wif = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
        let kp = KeyPair::from_wif(&ecc, wif, &[BITCOIN, TESTNET]).unwrap();
        assert_eq!(kp.private_key(), Some(&one()));
        assert!(kp.compressed());
        assert_eq!(
            kp.public_key().to_lower_hex_string(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(kp.to_wif().unwrap(), wif);

        assert_eq!(
            KeyPair::from_wif(&ecc, wif, &[TESTNET]).unwrap_err(),
            KeyPairError::UnknownWifVersion(0x80)
        );
    }

    #[test]
    fn rejects_bad_keys() {
        let ecc = EccLib::default();
        assert_eq!(
            KeyPair::from_private_key(&ecc, &[0u8; 32], KeyPairOpts::default()).unwrap_err(),
            KeyPairError::InvalidPrivateKey
        );
        // x equal to the field prime is not a coordinate.
        let mut off_curve = vec![0x02];
        off_curve.extend(
            Vec::from_hex("fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f")
                .unwrap(),
        );
        assert_eq!(
            KeyPair::from_public_key(&ecc, &off_curve, KeyPairOpts::default()).unwrap_err(),
            KeyPairError::InvalidPublicKey
        );
        let mut bad_prefix =
            KeyPair::from_private_key(&ecc, &[1; 32], KeyPairOpts::default()).unwrap().public_key().to_vec();
        bad_prefix[0] = 0x05;
        assert_eq!(
            KeyPair::from_public_key(&ecc, &bad_prefix, KeyPairOpts::default()).unwrap_err(),
            KeyPairError::InvalidPublicKey
        );
        // A valid point, even an unusual looking one, is accepted.
        assert!(KeyPair::from_public_key(&ecc, &[0x02; 33], KeyPairOpts::default()).is_ok());
    }

    #[test]
    fn sign_and_verify() {
        let ecc = EccLib::default();
        let kp = KeyPair::from_private_key(&ecc, &[0x42; 32], KeyPairOpts::default()).unwrap();
        let hash = crate::crypto::sha256(b"message");

        let sig = kp.sign(&hash, false).unwrap();
        assert!(kp.verify(&hash, &sig));

        let low_r = kp.sign(&hash, true).unwrap();
        assert!(low_r[0] < 0x80);
        assert!(kp.verify(&hash, &low_r));

        let schnorr = kp.sign_schnorr(&hash).unwrap();
        assert!(kp.verify_schnorr(&hash, &schnorr));

        let public = KeyPair::from_public_key(&ecc, kp.public_key(), KeyPairOpts::default()).unwrap();
        assert!(public.verify(&hash, &sig));
        assert_eq!(public.sign(&hash, false), Err(SignerError::MissingPrivateKey));
    }

    #[test]
    fn tweaked_private_and_public_agree() {
        let ecc = EccLib::default();
        let kp = KeyPair::from_private_key(&ecc, &[0x07; 32], KeyPairOpts::default()).unwrap();
        let public = KeyPair::from_public_key(&ecc, kp.public_key(), KeyPairOpts::default()).unwrap();

        let tweaked = kp.tap_tweak(None).unwrap();
        let tweaked_public = public.tap_tweak(None).unwrap();
        assert_eq!(tweaked.x_only_public_key(), tweaked_public.x_only_public_key());

        let expected = taproot::tweak_key(&ecc, &kp.x_only_public_key(), None).unwrap();
        assert_eq!(tweaked.x_only_public_key(), expected.x_only_pubkey);

        let hash = crate::crypto::sha256(b"key path");
        let sig = tweaked.sign_schnorr(&hash).unwrap();
        assert!(ecc.verify_schnorr(&hash, &expected.x_only_pubkey, &sig));
    }

    #[test]
    fn hd_derivation() {
        let ecc = EccLib::default();
        let seed = Vec::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = HdKeyPair::from_seed(&ecc, &seed, bitcoin::Network::Bitcoin).unwrap();
        // BIP-32 test vector 1.
        assert_eq!(HdSigner::fingerprint(&master).to_string(), "3442193e");

        let path = DerivationPath::from_str("m/0'").unwrap();
        let child = master.derive_path(&path).unwrap();
        assert_eq!(
            child.public_key().to_lower_hex_string(),
            "035a784662a4a20a65bf6aab9ae98a6c068a81c52e4b032c0fb5400c706cfccc56"
        );
    }
}
