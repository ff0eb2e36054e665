// SPDX-License-Identifier: CC0-1.0

//! Pay to witness script hash.

use core::cell::OnceCell;

use super::{agree, check_len, is_uncompressed_pubkey, push_items, Payment, PaymentError, PaymentOpts};
use crate::address::{self, Bech32Result};
use crate::crypto::sha256;
use crate::network::{self, Network};
use crate::prelude::*;
use crate::script::opcodes::OP_0;
use crate::script::{self, Chunk};

/// Largest witness script spendable through P2WSH.
const MAX_WITNESS_SCRIPT_SIZE: usize = 3600;
/// Most non-push opcodes a witness script may contain.
const MAX_OPS_PER_SCRIPT: usize = 201;

struct Resolver<'a> {
    a: &'a Payment,
    network: Network,
    decoded: Option<Bech32Result>,
    redeem: OnceCell<Option<Payment>>,
    hash: OnceCell<Option<[u8; 32]>>,
}

impl<'a> Resolver<'a> {
    /// The redeem payment carried by the witness, script last.
    fn redeem_from_witness(&self) -> Option<&Payment> {
        self.redeem
            .get_or_init(|| {
                let witness = self.a.witness.as_ref()?;
                let (script, stack) = witness.split_last()?;
                Some(Payment {
                    network: Some(self.network),
                    output: Some(script.clone()),
                    input: Some(Vec::new()),
                    witness: Some(stack.to_vec()),
                    ..Default::default()
                })
            })
            .as_ref()
    }

    fn redeem(&self) -> Option<&Payment> {
        match self.a.redeem {
            Some(ref redeem) => Some(redeem),
            None => self.redeem_from_witness(),
        }
    }

    fn hash(&self) -> Option<&[u8; 32]> {
        self.hash
            .get_or_init(|| {
                if let Some(ref output) = self.a.output {
                    return output.get(2..34).and_then(|h| h.try_into().ok());
                }
                if let Some(ref decoded) = self.decoded {
                    return decoded.data.as_slice().try_into().ok();
                }
                self.redeem()?.output.as_ref().map(|o| sha256(o))
            })
            .as_ref()
    }

    /// Redeem input turned into witness stack items, for a redeem built with a scriptSig.
    fn redeem_input_stack(&self) -> Option<Vec<Vec<u8>>> {
        let redeem = self.a.redeem.as_ref()?;
        let input = redeem.input.as_ref().filter(|i| !i.is_empty())?;
        redeem.output.as_ref().filter(|o| !o.is_empty())?;
        push_items(&script::decompile(input)?)
    }

    fn witness(&self) -> Option<Vec<Vec<u8>>> {
        let redeem = self.a.redeem.as_ref()?;
        let output = redeem.output.as_ref()?;
        let mut stack = match self.redeem_input_stack() {
            Some(stack) => stack,
            None => redeem.witness.clone()?,
        };
        stack.push(output.clone());
        Some(stack)
    }

    fn name(&self) -> String {
        match self.redeem().and_then(|r| r.name.as_deref()) {
            Some(inner) => format!("p2wsh-{}", inner),
            None => "p2wsh".to_owned(),
        }
    }

    fn check_redeem(&self, redeem: &Payment, hash: &mut Option<Vec<u8>>) -> Result<(), PaymentError> {
        let a = self.a;
        if redeem.network.map_or(false, |n| n != self.network) {
            return Err(PaymentError::NetworkMismatch);
        }
        let has_input = redeem.input.as_ref().map_or(false, |i| !i.is_empty());
        let has_witness = redeem.witness.as_ref().map_or(false, |w| !w.is_empty());
        if has_input && has_witness {
            return Err(PaymentError::Rule("Ambiguous witness source"));
        }

        let mut output_chunks = Vec::new();
        if let Some(ref output) = redeem.output {
            output_chunks = match script::decompile(output) {
                Some(chunks) if !chunks.is_empty() => chunks,
                _ => return Err(PaymentError::Invalid("Redeem.output")),
            };
            if output.len() > MAX_WITNESS_SCRIPT_SIZE {
                return Err(PaymentError::Rule(
                    "Redeem.output unspendable if larger than 3600 bytes",
                ));
            }
            if script::count_non_push_only_opcodes(&output_chunks) > MAX_OPS_PER_SCRIPT {
                return Err(PaymentError::Rule(
                    "Redeem.output unspendable with more than 201 non-push ops",
                ));
            }
            agree(hash, &sha256(output), "Hash")?;
        }

        let mut input_chunks = Vec::new();
        if let Some(ref input) = redeem.input {
            input_chunks = match script::decompile(input) {
                Some(chunks) if script::is_push_only(&chunks) => chunks,
                _ => return Err(PaymentError::Rule("Non push-only scriptSig")),
            };
        }

        if let (Some(witness), Some(redeem_witness)) = (&a.witness, &redeem.witness) {
            if witness != redeem_witness {
                return Err(PaymentError::Mismatch("Witness and redeem.witness"));
            }
        }

        let uncompressed = |chunks: &[Chunk]| chunks.iter().any(|c| c.data().map_or(false, is_uncompressed_pubkey));
        if uncompressed(&input_chunks) || uncompressed(&output_chunks) {
            return Err(PaymentError::Rule("redeem.input or redeem.output contains uncompressed pubkey"));
        }
        Ok(())
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
            if decoded.data.len() != 32 {
                return Err(PaymentError::InvalidAddressData);
            }
            hash = Some(decoded.data.clone());
        }
        if let Some(ref h) = a.hash {
            agree(&mut hash, h, "Hash")?;
        }
        if let Some(ref output) = a.output {
            if output[0] != OP_0 || output[1] != 0x20 {
                return Err(PaymentError::Invalid("Output"));
            }
            agree(&mut hash, &output[2..34], "Hash")?;
        }
        if let Some(ref redeem) = a.redeem {
            self.check_redeem(redeem, &mut hash)?;
        }

        if let Some((script, _)) = a.witness.as_ref().and_then(|w| w.split_last()) {
            if a.redeem.as_ref().and_then(|r| r.output.as_ref()).map_or(false, |o| o != script) {
                return Err(PaymentError::Mismatch("Witness and redeem.output"));
            }
            let in_script = script::decompile(script).map_or(false, |chunks| {
                chunks.iter().any(|c| c.data().map_or(false, is_uncompressed_pubkey))
            });
            if in_script || a.witness.iter().flatten().any(|item| is_uncompressed_pubkey(item)) {
                return Err(PaymentError::Rule("Witness contains uncompressed pubkey"));
            }
        }
        Ok(())
    }
}

/// Pay to witness script hash, works from `address`, `hash`, `output`, `redeem` or `witness`.
///
/// A redeem payment built with an input script, such as a signed multisig, has its input moved
/// into the witness stack.
pub fn p2wsh(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.address.is_none()
        && a.hash.is_none()
        && a.output.is_none()
        && a.redeem.is_none()
        && a.witness.is_none()
    {
        return Err(PaymentError::NotEnoughData);
    }
    check_len(&a.hash, 32, "hash of 32 bytes")?;
    check_len(&a.output, 34, "output of 34 bytes")?;
    check_len(&a.input, 0, "empty input")?;

    let network =
        a.network.or_else(|| a.redeem.as_ref().and_then(|r| r.network)).unwrap_or(network::BITCOIN);
    let decoded = a.address.as_deref().map(address::from_bech32).transpose()?;
    let resolver = Resolver {
        a: &a,
        network,
        decoded,
        redeem: OnceCell::new(),
        hash: OnceCell::new(),
    };

    if opts.validate {
        resolver.validate()?;
    }

    let hash = resolver.hash().copied();
    let witness = a.witness.clone().or_else(|| resolver.witness());
    let redeem = match (&a.redeem, resolver.redeem_input_stack()) {
        (Some(redeem), Some(stack)) => Some(Box::new(Payment {
            input: Some(Vec::new()),
            witness: Some(stack),
            ..(**redeem).clone()
        })),
        (Some(redeem), None) => Some(redeem.clone()),
        (None, _) => resolver.redeem_from_witness().cloned().map(Box::new),
    };
    let address = match (&a.address, &hash) {
        (Some(address), _) => Some(address.clone()),
        (None, Some(h)) => Some(address::to_bech32(h, 0, network.bech32)?),
        (None, None) => None,
    };

    Ok(Payment {
        name: Some(resolver.name()),
        network: Some(network),
        address,
        hash: a.hash.clone().or_else(|| hash.map(|h| h.to_vec())),
        output: a
            .output
            .clone()
            .or_else(|| hash.map(|h| script::compile(&[Chunk::Op(OP_0), Chunk::push(h.to_vec())]))),
        input: a.input.clone().or_else(|| witness.as_ref().map(|_| Vec::new())),
        redeem,
        witness,
        ..a.clone()
    })
}
