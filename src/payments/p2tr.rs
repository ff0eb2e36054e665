// SPDX-License-Identifier: CC0-1.0

//! Pay to taproot (BIP-341).

use core::cell::OnceCell;

use super::{check_len, Payment, PaymentError, PaymentOpts};
use crate::address::{self, Bech32Result};
use crate::ecc::EccLib;
use crate::network;
use crate::prelude::*;
use crate::script::opcodes::OP_1;
use crate::script::{self, Chunk};
use crate::taproot::{
    self, HashTree, Tapleaf, TaprootError, LEAF_VERSION_TAPSCRIPT, MAX_TAPTREE_DEPTH,
    TAPLEAF_VERSION_MASK,
};

/// First byte of an annex, the optional last witness item.
const ANNEX_PREFIX: u8 = 0x50;

/// True for a BIP-340 signature, optionally followed by a non-default sighash type.
pub(crate) fn is_schnorr_signature(sig: &[u8]) -> bool {
    match sig.len() {
        64 => true,
        65 => matches!(sig[64], 0x01..=0x03 | 0x81..=0x83),
        _ => false,
    }
}

struct Resolver<'a> {
    a: &'a Payment,
    ecc: &'a EccLib,
    decoded: Option<Bech32Result>,
    /// Witness without annex.
    witness: Option<Vec<Vec<u8>>>,
    hash_tree: Option<HashTree>,
    hash: OnceCell<Option<[u8; 32]>>,
    pubkey: OnceCell<Option<Vec<u8>>>,
}

impl<'a> Resolver<'a> {
    /// Script path witness split into stack, script and control block.
    fn script_path(&self) -> Option<(&[Vec<u8>], &Vec<u8>, &Vec<u8>)> {
        let witness = self.witness.as_ref()?;
        let (control_block, rest) = witness.split_last()?;
        let (script, stack) = rest.split_last()?;
        Some((stack, script, control_block))
    }

    fn hash(&self) -> Option<&[u8; 32]> {
        self.hash
            .get_or_init(|| {
                if let Some(ref tree) = self.hash_tree {
                    return Some(*tree.hash());
                }
                if let Some(h) = self.a.hash.as_deref().and_then(|h| <[u8; 32]>::try_from(h).ok()) {
                    return Some(h);
                }
                let (_, script, control_block) = self.script_path()?;
                let leaf_version = control_block.first()? & TAPLEAF_VERSION_MASK;
                let leaf = Tapleaf { output: script.clone(), version: leaf_version };
                taproot::root_hash_from_path(control_block, &leaf.hash()).ok()
            })
            .as_ref()
    }

    fn internal_pubkey(&self) -> Option<Vec<u8>> {
        if let Some(ref internal) = self.a.internal_pubkey {
            return Some(internal.clone());
        }
        let (_, _, control_block) = self.script_path()?;
        control_block.get(1..33).map(<[u8]>::to_vec)
    }

    fn pubkey(&self) -> Option<&Vec<u8>> {
        self.pubkey
            .get_or_init(|| {
                if let Some(ref pubkey) = self.a.pubkey {
                    return Some(pubkey.clone());
                }
                if let Some(ref output) = self.a.output {
                    return Some(output[2..].to_vec());
                }
                if let Some(ref decoded) = self.decoded {
                    return Some(decoded.data.clone());
                }
                let internal = self.internal_pubkey()?;
                let tweaked = taproot::tweak_key(self.ecc, &internal, self.hash())?;
                Some(tweaked.x_only_pubkey.to_vec())
            })
            .as_ref()
    }

    fn redeem_version(&self) -> u8 {
        self.a
            .redeem_version
            .or_else(|| self.a.redeem.as_ref().and_then(|r| r.redeem_version))
            .unwrap_or(LEAF_VERSION_TAPSCRIPT)
    }

    /// The script path being spent, as carried by the witness.
    fn redeem(&self) -> Option<Payment> {
        let (stack, script, control_block) = self.script_path()?;
        Some(Payment {
            output: Some(script.clone()),
            witness: Some(stack.to_vec()),
            redeem_version: control_block.first().map(|b| b & TAPLEAF_VERSION_MASK),
            ..Default::default()
        })
    }

    fn signature(&self) -> Option<Vec<u8>> {
        match self.witness {
            Some(ref witness) if witness.len() == 1 => Some(witness[0].clone()),
            _ => None,
        }
    }

    fn witness_from_parts(&self) -> Option<Vec<Vec<u8>>> {
        if let (Some(tree), Some(redeem), Some(internal)) =
            (&self.hash_tree, &self.a.redeem, &self.a.internal_pubkey)
        {
            if let Some(ref output) = redeem.output {
                let version = self.redeem_version();
                let leaf = Tapleaf { output: output.clone(), version };
                let path = taproot::find_script_path(tree, &leaf.hash())?;
                let internal: [u8; 32] = internal.as_slice().try_into().ok()?;
                let tweaked = taproot::tweak_key(self.ecc, &internal, Some(tree.hash()))?;
                let control_block = taproot::control_block(version, tweaked.parity, &internal, &path);

                let mut stack = redeem.witness.clone().unwrap_or_default();
                stack.push(output.clone());
                stack.push(control_block);
                return Some(stack);
            }
        }
        self.a.signature.as_ref().map(|sig| vec![sig.clone()])
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let a = self.a;
        let mut pubkey: Option<Vec<u8>> = None;
        let mut merge = |candidate: &[u8]| -> Result<(), PaymentError> {
            match pubkey {
                Some(ref p) if p.as_slice() != candidate => Err(PaymentError::Mismatch("Pubkey")),
                _ => {
                    pubkey = Some(candidate.to_vec());
                    Ok(())
                }
            }
        };

        if let Some(ref decoded) = self.decoded {
            let network = a.network.unwrap_or(network::BITCOIN);
            if decoded.prefix != network.bech32 {
                return Err(PaymentError::PrefixMismatch);
            }
            if decoded.version != 1 {
                return Err(PaymentError::InvalidAddressVersion);
            }
            if decoded.data.len() != 32 {
                return Err(PaymentError::InvalidAddressData);
            }
            merge(decoded.data.as_slice())?;
        }
        if let Some(ref p) = a.pubkey {
            merge(p.as_slice())?;
        }
        if let Some(ref output) = a.output {
            if output[0] != OP_1 || output[1] != 0x20 {
                return Err(PaymentError::Invalid("Output"));
            }
            merge(&output[2..])?;
        }
        if let Some(ref internal) = a.internal_pubkey {
            let tweaked = taproot::tweak_key(self.ecc, internal, self.hash())
                .ok_or(PaymentError::Rule("Invalid internalPubkey for p2tr"))?;
            merge(&tweaked.x_only_pubkey[..])?;
        }
        if let Some(ref p) = pubkey {
            if !self.ecc.is_x_only_point(p) {
                return Err(PaymentError::Rule("Invalid pubkey for p2tr"));
            }
        }

        if let (Some(h), Some(tree)) = (&a.hash, &self.hash_tree) {
            if h.as_slice() != tree.hash() {
                return Err(PaymentError::Mismatch("Hash"));
            }
        }

        if let (Some(output), Some(tree)) = (a.redeem.as_ref().and_then(|r| r.output.as_ref()), &self.hash_tree) {
            let leaf = Tapleaf { output: output.clone(), version: self.redeem_version() };
            if taproot::find_script_path(tree, &leaf.hash()).is_none() {
                return Err(PaymentError::Rule("Redeem script not in tree"));
            }
        }

        if let (Some(given), Some(derived)) = (&a.redeem, self.redeem()) {
            if given.redeem_version.map_or(false, |v| Some(v) != derived.redeem_version) {
                return Err(PaymentError::Mismatch("Redeem.redeemVersion and witness"));
            }
            if let Some(ref output) = given.output {
                if script::decompile(output).map_or(true, |c| c.is_empty()) {
                    return Err(PaymentError::Invalid("Redeem.output"));
                }
                if derived.output.as_ref() != Some(output) {
                    return Err(PaymentError::Mismatch("Redeem.output and witness"));
                }
            }
            if given.witness.is_some() && given.witness != derived.witness {
                return Err(PaymentError::Mismatch("Redeem.witness and witness"));
            }
        }

        match self.witness {
            Some(ref witness) if witness.len() == 1 => {
                if !is_schnorr_signature(&witness[0]) {
                    return Err(PaymentError::InvalidSignature("Witness"));
                }
                if a.signature.as_ref().map_or(false, |s| *s != witness[0]) {
                    return Err(PaymentError::Mismatch("Signature"));
                }
            }
            Some(_) => self.validate_script_path(a, pubkey.as_deref())?,
            None => {}
        }
        Ok(())
    }

    fn validate_script_path(&self, a: &Payment, pubkey: Option<&[u8]>) -> Result<(), PaymentError> {
        let (_, script, control_block) = match self.script_path() {
            Some(parts) => parts,
            None => return Ok(()),
        };
        let len = control_block.len();
        if len < 33 {
            return Err(TaprootError::ControlBlockTooSmall(len).into());
        }
        if (len - 33) % 32 != 0 {
            return Err(TaprootError::InvalidControlBlockLength(len).into());
        }
        let m = (len - 33) / 32;
        if m > MAX_TAPTREE_DEPTH {
            return Err(TaprootError::ScriptPathTooLong(m).into());
        }

        let internal = &control_block[1..33];
        if a.internal_pubkey.as_deref().map_or(false, |p| p != internal) {
            return Err(PaymentError::Mismatch("Internal pubkey"));
        }
        if !self.ecc.is_x_only_point(internal) {
            return Err(PaymentError::Rule("Invalid internalPubkey for p2tr witness"));
        }

        let leaf = Tapleaf { output: script.clone(), version: control_block[0] & TAPLEAF_VERSION_MASK };
        let root = taproot::root_hash_from_path(control_block, &leaf.hash())?;
        let output_key = taproot::tweak_key(self.ecc, internal, Some(&root))
            .ok_or(PaymentError::Rule("Invalid outputKey for p2tr witness"))?;
        if pubkey.map_or(false, |p| p != output_key.x_only_pubkey) {
            return Err(PaymentError::Rule("Pubkey mismatch for p2tr witness"));
        }
        if output_key.parity != control_block[0] & 1 {
            return Err(PaymentError::Rule("Incorrect parity"));
        }
        Ok(())
    }
}

/// Pay to taproot, works from `address`, `output`, `pubkey`, `internal_pubkey` or a witness.
///
/// Key tweaking and point checks go through `ecc`.
pub fn p2tr(a: Payment, opts: PaymentOpts, ecc: &EccLib) -> Result<Payment, PaymentError> {
    if a.address.is_none()
        && a.output.is_none()
        && a.pubkey.is_none()
        && a.internal_pubkey.is_none()
        && a.witness.as_ref().map_or(true, |w| w.len() < 2)
    {
        return Err(PaymentError::NotEnoughData);
    }
    check_len(&a.input, 0, "empty input")?;
    check_len(&a.output, 34, "output of 34 bytes")?;
    check_len(&a.internal_pubkey, 32, "internalPubkey of 32 bytes")?;
    check_len(&a.hash, 32, "hash of 32 bytes")?;
    check_len(&a.pubkey, 32, "pubkey of 32 bytes")?;
    if a.signature.as_ref().map_or(false, |s| s.len() != 64 && s.len() != 65) {
        return Err(PaymentError::UnexpectedType("signature of 64 or 65 bytes"));
    }

    let network = a.network.unwrap_or(network::BITCOIN);
    let decoded = a.address.as_deref().map(address::from_bech32).transpose()?;
    let witness = a.witness.as_ref().filter(|w| !w.is_empty()).map(|w| match w.split_last() {
        Some((last, rest)) if w.len() >= 2 && last.first() == Some(&ANNEX_PREFIX) => rest.to_vec(),
        _ => w.clone(),
    });
    let resolver = Resolver {
        a: &a,
        ecc,
        decoded,
        witness,
        hash_tree: a.script_tree.as_ref().map(taproot::to_hash_tree),
        hash: OnceCell::new(),
        pubkey: OnceCell::new(),
    };

    if opts.validate {
        resolver.validate()?;
    }

    let pubkey = resolver.pubkey().cloned();
    let address = match (&a.address, &pubkey) {
        (Some(address), _) => Some(address.clone()),
        (None, Some(p)) => Some(address::to_bech32(p, 1, network.bech32)?),
        (None, None) => None,
    };
    let output = a
        .output
        .clone()
        .or_else(|| pubkey.as_ref().map(|p| script::compile(&[Chunk::Op(OP_1), Chunk::push(p.clone())])));

    Ok(Payment {
        name: Some("p2tr".to_owned()),
        network: Some(network),
        address,
        output,
        hash: resolver.hash().map(|h| h.to_vec()),
        internal_pubkey: resolver.internal_pubkey(),
        signature: a.signature.clone().or_else(|| resolver.signature()),
        redeem: a.redeem.clone().or_else(|| resolver.redeem().map(Box::new)),
        redeem_version: Some(resolver.redeem_version()),
        witness: a.witness.clone().or_else(|| resolver.witness_from_parts()),
        pubkey,
        ..a.clone()
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;
    use crate::taproot::Taptree;

    // BIP-86 m/86'/0'/0'/0/0
    const INTERNAL: &str = "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";
    const OUTPUT_KEY: &str = "a60869f0dbcf1dc659c9cecbaf8050135ea9e8cdc487053f1dc6880949dc684c";
    const ADDRESS: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn tree() -> Taptree {
        Taptree::branch(
            Taptree::leaf(hex("20387671353e273264c495656e27e39ba899ea8fee3bb69fb2a680e22093447d48ac")),
            Taptree::branch(
                Taptree::leaf(vec![OP_1]),
                Taptree::leaf(hex("2079be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798ac")),
            ),
        )
    }

    #[test]
    fn key_path_from_internal_pubkey() {
        let ecc = EccLib::default();
        let p = p2tr(
            Payment { internal_pubkey: Some(hex(INTERNAL)), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        assert_eq!(p.pubkey, Some(hex(OUTPUT_KEY)));
        assert_eq!(p.address.as_deref(), Some(ADDRESS));
        let mut output = vec![OP_1, 0x20];
        output.extend_from_slice(&hex(OUTPUT_KEY));
        assert_eq!(p.output, Some(output.clone()));
        assert!(p.hash.is_none());

        let back = p2tr(Payment { address: Some(ADDRESS.to_owned()), ..Default::default() }, PaymentOpts::default(), &ecc)
            .unwrap();
        assert_eq!(back.output, Some(output));
    }

    #[test]
    fn key_path_signature() {
        let ecc = EccLib::default();
        let sig = vec![0x11; 64];
        let p = p2tr(
            Payment { pubkey: Some(hex(OUTPUT_KEY)), signature: Some(sig.clone()), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        assert_eq!(p.witness, Some(vec![sig.clone()]));

        let back = p2tr(
            Payment { output: p.output.clone(), witness: Some(vec![sig.clone()]), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        assert_eq!(back.signature, Some(sig));
    }

    #[test]
    fn script_path_round_trip() {
        let ecc = EccLib::default();
        let leaf_script = vec![OP_1];
        let p = p2tr(
            Payment {
                internal_pubkey: Some(hex(INTERNAL)),
                script_tree: Some(tree()),
                redeem: Some(Box::new(Payment { output: Some(leaf_script.clone()), ..Default::default() })),
                ..Default::default()
            },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        assert_eq!(p.hash, Some(taproot::compute_mast_root(&tree()).to_vec()));
        let witness = p.witness.clone().unwrap();
        assert_eq!(witness.len(), 2);
        assert_eq!(witness[0], leaf_script);
        assert_eq!(witness[1].len(), 33 + 2 * 32);

        let from_witness = p2tr(Payment { witness: Some(witness.clone()), ..Default::default() }, PaymentOpts::default(), &ecc)
            .unwrap();
        assert_eq!(from_witness.pubkey, p.pubkey);
        assert_eq!(from_witness.internal_pubkey, Some(hex(INTERNAL)));
        assert_eq!(from_witness.hash, p.hash);
        let redeem = from_witness.redeem.unwrap();
        assert_eq!(redeem.output, Some(leaf_script));
        assert_eq!(redeem.redeem_version, Some(LEAF_VERSION_TAPSCRIPT));

        // annex is ignored
        let mut with_annex = witness.clone();
        with_annex.push(vec![ANNEX_PREFIX, 1, 2]);
        let annexed = p2tr(Payment { witness: Some(with_annex), ..Default::default() }, PaymentOpts::default(), &ecc)
            .unwrap();
        assert_eq!(annexed.pubkey, p.pubkey);
    }

    #[test]
    fn rejects() {
        let ecc = EccLib::default();
        let p = p2tr(
            Payment {
                internal_pubkey: Some(hex(INTERNAL)),
                script_tree: Some(tree()),
                redeem: Some(Box::new(Payment { output: Some(vec![0x52]), ..Default::default() })),
                ..Default::default()
            },
            PaymentOpts::default(),
            &ecc,
        );
        assert_eq!(p, Err(PaymentError::Rule("Redeem script not in tree")));

        let p = p2tr(
            Payment { internal_pubkey: Some(hex(INTERNAL)), pubkey: Some(vec![0x11; 32]), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        );
        assert_eq!(p, Err(PaymentError::Mismatch("Pubkey")));

        let bad_cb = vec![vec![OP_1], vec![LEAF_VERSION_TAPSCRIPT; 40]];
        let p = p2tr(Payment { witness: Some(bad_cb), ..Default::default() }, PaymentOpts::default(), &ecc);
        assert_eq!(p, Err(PaymentError::Taproot(TaprootError::InvalidControlBlockLength(40))));

        let p = p2tr(
            Payment { pubkey: Some(hex(OUTPUT_KEY)), witness: Some(vec![vec![0x11; 65]]), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        );
        assert_eq!(p, Err(PaymentError::InvalidSignature("Witness")));

        assert_eq!(p2tr(Payment::default(), PaymentOpts::default(), &ecc), Err(PaymentError::NotEnoughData));
    }

    #[test]
    fn flips_parity_bit() {
        let ecc = EccLib::default();
        let p = p2tr(
            Payment {
                internal_pubkey: Some(hex(INTERNAL)),
                script_tree: Some(tree()),
                redeem: Some(Box::new(Payment { output: Some(vec![OP_1]), ..Default::default() })),
                ..Default::default()
            },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        let mut witness = p.witness.unwrap();
        witness[1][0] ^= 1;
        let p = p2tr(Payment { witness: Some(witness), ..Default::default() }, PaymentOpts::default(), &ecc);
        assert_eq!(p, Err(PaymentError::Rule("Incorrect parity")));
    }
}
