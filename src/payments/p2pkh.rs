// SPDX-License-Identifier: CC0-1.0

//! Pay to public key hash.

use core::cell::OnceCell;

use super::{agree, check_len, Payment, PaymentError, PaymentOpts};
use crate::address::{self, Base58CheckResult};
use crate::crypto::hash160;
use crate::network::{self, Network};
use crate::prelude::*;
use crate::script::opcodes::*;
use crate::script::{self, Chunk};

struct Resolver<'a> {
    a: &'a Payment,
    network: Network,
    decoded: Option<Base58CheckResult>,
    chunks: Option<Vec<Chunk>>,
    pubkey: OnceCell<Option<Vec<u8>>>,
    hash: OnceCell<Option<[u8; 20]>>,
}

impl<'a> Resolver<'a> {
    fn pubkey(&self) -> Option<&Vec<u8>> {
        self.pubkey
            .get_or_init(|| {
                if let Some(ref pubkey) = self.a.pubkey {
                    return Some(pubkey.clone());
                }
                self.chunks.as_ref()?.get(1)?.data().map(<[u8]>::to_vec)
            })
            .as_ref()
    }

    fn signature(&self) -> Option<Vec<u8>> {
        self.chunks.as_ref()?.first()?.data().map(<[u8]>::to_vec)
    }

    fn hash(&self) -> Option<&[u8; 20]> {
        self.hash
            .get_or_init(|| {
                if let Some(ref output) = self.a.output {
                    return output.get(3..23).and_then(|h| h.try_into().ok());
                }
                if let Some(ref decoded) = self.decoded {
                    return Some(decoded.hash);
                }
                self.pubkey().map(|pk| hash160(pk))
            })
            .as_ref()
    }

    fn output(&self) -> Option<Vec<u8>> {
        let hash = self.hash()?;
        Some(script::compile(&[
            Chunk::Op(OP_DUP),
            Chunk::Op(OP_HASH160),
            Chunk::push(hash.to_vec()),
            Chunk::Op(OP_EQUALVERIFY),
            Chunk::Op(OP_CHECKSIG),
        ]))
    }

    fn address(&self) -> Option<String> {
        self.hash().map(|hash| address::to_base58_check(hash, self.network.pub_key_hash))
    }

    fn input(&self) -> Option<Vec<u8>> {
        let pubkey = self.a.pubkey.as_ref()?;
        let signature = self.a.signature.as_ref()?;
        Some(script::compile(&[Chunk::push(signature.clone()), Chunk::push(pubkey.clone())]))
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let a = self.a;
        let mut hash = None;

        if let Some(ref decoded) = self.decoded {
            if decoded.version != self.network.pub_key_hash {
                return Err(PaymentError::VersionMismatch);
            }
            hash = Some(decoded.hash.to_vec());
        }
        if let Some(ref h) = a.hash {
            agree(&mut hash, h, "Hash")?;
        }
        if let Some(ref output) = a.output {
            if output[0] != OP_DUP
                || output[1] != OP_HASH160
                || output[2] != 0x14
                || output[23] != OP_EQUALVERIFY
                || output[24] != OP_CHECKSIG
            {
                return Err(PaymentError::Invalid("Output"));
            }
            agree(&mut hash, &output[3..23], "Hash")?;
        }
        if let Some(ref pubkey) = a.pubkey {
            agree(&mut hash, &hash160(pubkey), "Hash")?;
        }
        if a.input.is_some() {
            let chunks = match self.chunks {
                Some(ref chunks) if chunks.len() == 2 => chunks,
                _ => return Err(PaymentError::Invalid("Input")),
            };
            let signature = chunks[0].data().unwrap_or_default();
            let pubkey = chunks[1].data().unwrap_or_default();
            if !script::is_canonical_script_signature(signature) {
                return Err(PaymentError::InvalidSignature("Input"));
            }
            if !script::is_point(pubkey) {
                return Err(PaymentError::InvalidPubkey("Input"));
            }
            if a.signature.as_deref().map_or(false, |s| s != signature) {
                return Err(PaymentError::Mismatch("Signature"));
            }
            if a.pubkey.as_deref().map_or(false, |p| p != pubkey) {
                return Err(PaymentError::Mismatch("Pubkey"));
            }
            agree(&mut hash, &hash160(pubkey), "Hash")?;
        }
        Ok(())
    }
}

/// Pay to public key hash, works from `address`, `hash`, `output`, `pubkey` or `input`.
pub fn p2pkh(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.address.is_none()
        && a.hash.is_none()
        && a.output.is_none()
        && a.pubkey.is_none()
        && a.input.is_none()
    {
        return Err(PaymentError::NotEnoughData);
    }
    check_len(&a.hash, 20, "hash of 20 bytes")?;
    check_len(&a.output, 25, "output of 25 bytes")?;
    if a.pubkey.as_deref().map_or(false, |p| !script::is_point(p)) {
        return Err(PaymentError::UnexpectedType("pubkey to be a point"));
    }
    if a.signature.as_deref().map_or(false, |s| !script::is_canonical_script_signature(s)) {
        return Err(PaymentError::UnexpectedType("canonical script signature"));
    }

    let decoded = a.address.as_deref().map(address::from_base58_check).transpose()?;
    let chunks = a.input.as_deref().and_then(script::decompile);
    let resolver = Resolver {
        a: &a,
        network: a.network.unwrap_or(network::BITCOIN),
        decoded,
        chunks,
        pubkey: OnceCell::new(),
        hash: OnceCell::new(),
    };

    if opts.validate {
        resolver.validate()?;
    }

    let input = a.input.clone().or_else(|| resolver.input());
    let payment = Payment {
        name: Some("p2pkh".to_owned()),
        network: Some(resolver.network),
        address: a.address.clone().or_else(|| resolver.address()),
        hash: a.hash.clone().or_else(|| resolver.hash().map(|h| h.to_vec())),
        output: a.output.clone().or_else(|| resolver.output()),
        pubkey: resolver.pubkey().cloned(),
        signature: a.signature.clone().or_else(|| resolver.signature()),
        witness: a.witness.clone().or_else(|| input.as_ref().map(|_| Vec::new())),
        input,
        ..a.clone()
    };
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    const PUBKEY: &str = "030000000000000000000000000000000000000000000000000000000000000001";
    const SIGNATURE: &str = "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb01";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    #[test]
    fn from_pubkey() {
        let pubkey = hex("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798");
        let p = p2pkh(Payment { pubkey: Some(pubkey.clone()), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(p.address.as_deref(), Some("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"));
        assert_eq!(p.hash, Some(hash160(&pubkey).to_vec()));
        assert_eq!(
            script::script_to_asm(p.output.as_ref().unwrap()).unwrap(),
            "OP_DUP OP_HASH160 751e76e8199196d454941c45d1b3a323f1433bd6 OP_EQUALVERIFY OP_CHECKSIG"
        );

        let back = p2pkh(Payment { output: p.output.clone(), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(back.hash, p.hash);
        assert_eq!(back.address, p.address);
    }

    #[test]
    fn from_input() {
        let sig = hex(SIGNATURE);
        let input = script::compile(&[Chunk::push(sig.clone()), Chunk::push(hex(PUBKEY))]);
        let p = p2pkh(Payment { input: Some(input), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(p.pubkey, Some(hex(PUBKEY)));
        assert_eq!(p.signature, Some(sig));
        assert_eq!(p.hash, Some(hash160(&hex(PUBKEY)).to_vec()));
        assert_eq!(p.witness, Some(vec![]));
    }

    #[test]
    fn builds_input_from_signature_and_pubkey() {
        let sig = hex(SIGNATURE);
        let p = p2pkh(
            Payment { pubkey: Some(hex(PUBKEY)), signature: Some(sig.clone()), ..Default::default() },
            PaymentOpts::default(),
        )
        .unwrap();
        let chunks = script::decompile(p.input.as_ref().unwrap()).unwrap();
        assert_eq!(chunks, vec![Chunk::Push(sig), Chunk::Push(hex(PUBKEY))]);
    }

    #[test]
    fn rejects() {
        assert_eq!(p2pkh(Payment::default(), PaymentOpts::default()), Err(PaymentError::NotEnoughData));

        let p = p2pkh(
            Payment { pubkey: Some(hex(PUBKEY)), hash: Some(vec![0u8; 20]), ..Default::default() },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::Mismatch("Hash")));

        let mut output = vec![0u8; 25];
        output[0] = OP_DUP;
        let p = p2pkh(Payment { output: Some(output), ..Default::default() }, PaymentOpts::default());
        assert_eq!(p, Err(PaymentError::Invalid("Output")));

        let testnet = address::to_base58_check(&[0u8; 20], network::TESTNET.pub_key_hash);
        let p = p2pkh(Payment { address: Some(testnet), ..Default::default() }, PaymentOpts::default());
        assert_eq!(p, Err(PaymentError::VersionMismatch));
    }

    #[test]
    fn no_validate_still_derives() {
        let p = p2pkh(
            Payment { pubkey: Some(hex(PUBKEY)), hash: Some(vec![0u8; 20]), ..Default::default() },
            PaymentOpts::no_validate(),
        )
        .unwrap();
        // supplied hash wins
        assert_eq!(p.hash, Some(vec![0u8; 20]));
    }
}
