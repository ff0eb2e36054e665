// SPDX-License-Identifier: CC0-1.0

//! Pay to witness public key hash.

use core::cell::OnceCell;

use super::{agree, check_len, Payment, PaymentError, PaymentOpts};
use crate::address::{self, Bech32Result};
use crate::crypto::hash160;
use crate::network::{self, Network};
use crate::prelude::*;
use crate::script::opcodes::OP_0;
use crate::script::{self, Chunk};

struct Resolver<'a> {
    a: &'a Payment,
    network: Network,
    decoded: Option<Bech32Result>,
    pubkey: OnceCell<Option<Vec<u8>>>,
    hash: OnceCell<Option<Vec<u8>>>,
}

impl<'a> Resolver<'a> {
    fn pubkey(&self) -> Option<&Vec<u8>> {
        self.pubkey
            .get_or_init(|| match self.a.pubkey {
                Some(ref pubkey) => Some(pubkey.clone()),
                None => self.a.witness.as_ref()?.get(1).cloned(),
            })
            .as_ref()
    }

    fn hash(&self) -> Option<&Vec<u8>> {
        self.hash
            .get_or_init(|| {
                if let Some(ref output) = self.a.output {
                    return output.get(2..22).map(<[u8]>::to_vec);
                }
                if let Some(ref decoded) = self.decoded {
                    return Some(decoded.data.clone());
                }
                self.pubkey().map(|pk| hash160(pk).to_vec())
            })
            .as_ref()
    }

    fn witness(&self) -> Option<Vec<Vec<u8>>> {
        let pubkey = self.a.pubkey.as_ref()?;
        let signature = self.a.signature.as_ref()?;
        Some(vec![signature.clone(), pubkey.clone()])
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let a = self.a;
        let mut hash = None;

        if let Some(ref decoded) = self.decoded {
            if decoded.prefix != self.network.bech32 {
                return Err(PaymentError::PrefixMismatch);
            }
            if decoded.version != 0 {
                return Err(PaymentError::InvalidAddressVersion);
            }
            if decoded.data.len() != 20 {
                return Err(PaymentError::InvalidAddressData);
            }
            hash = Some(decoded.data.clone());
        }
        if let Some(ref h) = a.hash {
            agree(&mut hash, h, "Hash")?;
        }
        if let Some(ref output) = a.output {
            if output[0] != OP_0 || output[1] != 0x14 {
                return Err(PaymentError::Invalid("Output"));
            }
            agree(&mut hash, &output[2..22], "Hash")?;
        }
        if let Some(ref pubkey) = a.pubkey {
            agree(&mut hash, &hash160(pubkey), "Hash")?;
            if !script::is_point(pubkey) || pubkey.len() != 33 {
                return Err(PaymentError::Rule("Invalid pubkey for p2wpkh"));
            }
        }
        if let Some(ref witness) = a.witness {
            if witness.len() != 2 {
                return Err(PaymentError::Invalid("Witness"));
            }
            if !script::is_canonical_script_signature(&witness[0]) {
                return Err(PaymentError::InvalidSignature("Witness"));
            }
            if !script::is_point(&witness[1]) || witness[1].len() != 33 {
                return Err(PaymentError::InvalidPubkey("Witness"));
            }
            if a.signature.as_ref().map_or(false, |s| *s != witness[0]) {
                return Err(PaymentError::Mismatch("Signature"));
            }
            if a.pubkey.as_ref().map_or(false, |p| *p != witness[1]) {
                return Err(PaymentError::Mismatch("Pubkey"));
            }
            agree(&mut hash, &hash160(&witness[1]), "Hash")?;
        }
        Ok(())
    }
}

/// Pay to witness public key hash, works from `address`, `hash`, `output`, `pubkey` or
/// `witness`.
pub fn p2wpkh(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.address.is_none()
        && a.hash.is_none()
        && a.output.is_none()
        && a.pubkey.is_none()
        && a.witness.is_none()
    {
        return Err(PaymentError::NotEnoughData);
    }
    check_len(&a.hash, 20, "hash of 20 bytes")?;
    check_len(&a.output, 22, "output of 22 bytes")?;
    check_len(&a.input, 0, "empty input")?;
    if a.pubkey.as_deref().map_or(false, |p| !script::is_point(p)) {
        return Err(PaymentError::UnexpectedType("pubkey to be a point"));
    }
    if a.signature.as_deref().map_or(false, |s| !script::is_canonical_script_signature(s)) {
        return Err(PaymentError::UnexpectedType("canonical script signature"));
    }

    let network = a.network.unwrap_or(network::BITCOIN);
    let decoded = a.address.as_deref().map(address::from_bech32).transpose()?;
    let resolver = Resolver {
        a: &a,
        network,
        decoded,
        pubkey: OnceCell::new(),
        hash: OnceCell::new(),
    };

    if opts.validate {
        resolver.validate()?;
    }

    let hash = resolver.hash().cloned();
    let witness = a.witness.clone().or_else(|| resolver.witness());
    let address = match (&a.address, &hash) {
        (Some(address), _) => Some(address.clone()),
        (None, Some(h)) => Some(address::to_bech32(h, 0, network.bech32)?),
        (None, None) => None,
    };

    Ok(Payment {
        name: Some("p2wpkh".to_owned()),
        network: Some(network),
        address,
        output: a
            .output
            .clone()
            .or_else(|| hash.as_ref().map(|h| script::compile(&[Chunk::Op(OP_0), Chunk::push(h.clone())]))),
        pubkey: resolver.pubkey().cloned(),
        signature: a.signature.clone().or_else(|| a.witness.as_ref()?.first().cloned()),
        input: a.input.clone().or_else(|| witness.as_ref().map(|_| Vec::new())),
        hash: a.hash.clone().or(hash),
        witness,
        ..a.clone()
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    const PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const SIGNATURE: &str = "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb01";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    #[test]
    fn from_pubkey() {
        let p = p2wpkh(Payment { pubkey: Some(hex(PUBKEY)), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(p.address.as_deref(), Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"));
        assert_eq!(p.output, Some(hex("0014751e76e8199196d454941c45d1b3a323f1433bd6")));
        assert!(p.witness.is_none());
        assert!(p.input.is_none());
    }

    #[test]
    fn from_witness() {
        let witness = vec![hex(SIGNATURE), hex(PUBKEY)];
        let p = p2wpkh(Payment { witness: Some(witness), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(p.pubkey, Some(hex(PUBKEY)));
        assert_eq!(p.signature, Some(hex(SIGNATURE)));
        assert_eq!(p.input, Some(vec![]));
        assert_eq!(p.address.as_deref(), Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"));
    }

    #[test]
    fn rejects() {
        let p = p2wpkh(
            Payment {
                address: Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_owned()),
                network: Some(network::TESTNET),
                ..Default::default()
            },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::PrefixMismatch));

        let mut uncompressed = vec![0x04];
        uncompressed.extend_from_slice(&[0x11; 64]);
        let p = p2wpkh(Payment { pubkey: Some(uncompressed), ..Default::default() }, PaymentOpts::default());
        assert_eq!(p, Err(PaymentError::Rule("Invalid pubkey for p2wpkh")));

        let p = p2wpkh(
            Payment { witness: Some(vec![hex(SIGNATURE)]), ..Default::default() },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::Invalid("Witness")));
    }
}
