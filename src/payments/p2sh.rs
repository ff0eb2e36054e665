// SPDX-License-Identifier: CC0-1.0

//! Pay to script hash.

use core::cell::OnceCell;

use super::{agree, check_len, Payment, PaymentError, PaymentOpts};
use crate::address::{self, Base58CheckResult};
use crate::crypto::hash160;
use crate::network::{self, Network};
use crate::prelude::*;
use crate::script::opcodes::*;
use crate::script::{self, Chunk};

/// Largest redeem script spendable through P2SH.
const MAX_REDEEM_SCRIPT_SIZE: usize = 520;
/// Most non-push opcodes a redeem script may contain.
const MAX_OPS_PER_SCRIPT: usize = 201;

struct Resolver<'a> {
    a: &'a Payment,
    network: Network,
    decoded: Option<Base58CheckResult>,
    chunks: Option<Vec<Chunk>>,
    redeem: OnceCell<Option<Payment>>,
    hash: OnceCell<Option<[u8; 20]>>,
}

impl<'a> Resolver<'a> {
    /// The redeem payment carried by the input script.
    fn redeem_from_input(&self) -> Option<&Payment> {
        self.redeem
            .get_or_init(|| {
                let chunks = self.chunks.as_ref()?;
                let (last, rest) = chunks.split_last()?;
                let output = match last {
                    Chunk::Push(data) => data.clone(),
                    Chunk::Op(OP_0) => Vec::new(),
                    Chunk::Op(_) => return None,
                };
                Some(Payment {
                    network: Some(self.network),
                    output: Some(output),
                    input: Some(script::compile(rest)),
                    witness: Some(self.a.witness.clone().unwrap_or_default()),
                    ..Default::default()
                })
            })
            .as_ref()
    }

    fn redeem(&self) -> Option<&Payment> {
        match self.a.redeem {
            Some(ref redeem) => Some(redeem),
            None => self.redeem_from_input(),
        }
    }

    fn hash(&self) -> Option<&[u8; 20]> {
        self.hash
            .get_or_init(|| {
                if let Some(ref output) = self.a.output {
                    return output.get(2..22).and_then(|h| h.try_into().ok());
                }
                if let Some(ref decoded) = self.decoded {
                    return Some(decoded.hash);
                }
                self.redeem()?.output.as_ref().map(|o| hash160(o))
            })
            .as_ref()
    }

    fn output(&self) -> Option<Vec<u8>> {
        let hash = self.hash()?;
        Some(script::compile(&[
            Chunk::Op(OP_HASH160),
            Chunk::push(hash.to_vec()),
            Chunk::Op(OP_EQUAL),
        ]))
    }

    fn input(&self) -> Option<Vec<u8>> {
        let redeem = self.a.redeem.as_ref()?;
        let redeem_input = redeem.input.as_ref()?;
        let redeem_output = redeem.output.as_ref()?;
        let mut chunks = script::decompile(redeem_input)?;
        chunks.push(Chunk::push(redeem_output.clone()));
        Some(script::compile(&chunks))
    }

    fn witness(&self, input: Option<&Vec<u8>>) -> Option<Vec<Vec<u8>>> {
        if let Some(witness) = self.redeem().and_then(|r| r.witness.clone()) {
            return Some(witness);
        }
        input.map(|_| Vec::new())
    }

    fn name(&self) -> String {
        match self.redeem().and_then(|r| r.name.as_deref()) {
            Some(inner) => format!("p2sh-{}", inner),
            None => "p2sh".to_owned(),
        }
    }

    fn check_redeem(&self, redeem: &Payment, hash: &mut Option<Vec<u8>>) -> Result<(), PaymentError> {
        if let Some(ref output) = redeem.output {
            let chunks = match script::decompile(output) {
                Some(chunks) if !chunks.is_empty() => chunks,
                _ => return Err(PaymentError::Rule("Redeem.output too short")),
            };
            if output.len() > MAX_REDEEM_SCRIPT_SIZE {
                return Err(PaymentError::Rule(
                    "Redeem.output unspendable if larger than 520 bytes",
                ));
            }
            if script::count_non_push_only_opcodes(&chunks) > MAX_OPS_PER_SCRIPT {
                return Err(PaymentError::Rule(
                    "Redeem.output unspendable with more than 201 non-push ops",
                ));
            }
            agree(hash, &hash160(output), "Hash")?;
        }

        if let Some(ref input) = redeem.input {
            let has_input = !input.is_empty();
            let has_witness = redeem.witness.as_ref().map_or(false, |w| !w.is_empty());
            if !has_input && !has_witness {
                return Err(PaymentError::Rule("Empty input"));
            }
            if has_input && has_witness {
                return Err(PaymentError::Rule("Input and witness provided"));
            }
            if has_input {
                let push_only = script::decompile(input).map_or(false, |c| script::is_push_only(&c));
                if !push_only {
                    return Err(PaymentError::Rule("Non push-only scriptSig"));
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let a = self.a;
        let mut hash = None;

        if let Some(ref decoded) = self.decoded {
            if decoded.version != self.network.script_hash {
                return Err(PaymentError::VersionMismatch);
            }
            hash = Some(decoded.hash.to_vec());
        }
        if let Some(ref h) = a.hash {
            agree(&mut hash, h, "Hash")?;
        }
        if let Some(ref output) = a.output {
            if output[0] != OP_HASH160 || output[1] != 0x14 || output[22] != OP_EQUAL {
                return Err(PaymentError::Invalid("Output"));
            }
            agree(&mut hash, &output[2..22], "Hash")?;
        }

        if a.input.is_some() {
            if self.chunks.as_ref().map_or(true, |c| c.is_empty()) {
                return Err(PaymentError::Rule("Input too short"));
            }
            let redeem = self.redeem_from_input().ok_or(PaymentError::Invalid("Input"))?;
            self.check_redeem(redeem, &mut hash)?;
        }

        if let Some(ref redeem) = a.redeem {
            if redeem.network.map_or(false, |n| n != self.network) {
                return Err(PaymentError::NetworkMismatch);
            }
            if a.input.is_some() {
                if let Some(derived) = self.redeem_from_input() {
                    if redeem.output.is_some() && redeem.output != derived.output {
                        return Err(PaymentError::Mismatch("Redeem.output"));
                    }
                    if redeem.input.is_some() && redeem.input != derived.input {
                        return Err(PaymentError::Mismatch("Redeem.input"));
                    }
                }
            }
            self.check_redeem(redeem, &mut hash)?;
        }

        if let (Some(witness), Some(redeem_witness)) =
            (&a.witness, a.redeem.as_ref().and_then(|r| r.witness.as_ref()))
        {
            if witness != redeem_witness {
                return Err(PaymentError::Mismatch("Witness and redeem.witness"));
            }
        }
        Ok(())
    }
}

/// Pay to script hash, works from `address`, `hash`, `output`, `redeem` or `input`.
pub fn p2sh(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.address.is_none()
        && a.hash.is_none()
        && a.output.is_none()
        && a.redeem.is_none()
        && a.input.is_none()
    {
        return Err(PaymentError::NotEnoughData);
    }
    check_len(&a.hash, 20, "hash of 20 bytes")?;
    check_len(&a.output, 23, "output of 23 bytes")?;

    let network =
        a.network.or_else(|| a.redeem.as_ref().and_then(|r| r.network)).unwrap_or(network::BITCOIN);
    let decoded = a.address.as_deref().map(address::from_base58_check).transpose()?;
    let chunks = a.input.as_deref().and_then(script::decompile);
    let resolver = Resolver {
        a: &a,
        network,
        decoded,
        chunks,
        redeem: OnceCell::new(),
        hash: OnceCell::new(),
    };

    if opts.validate {
        resolver.validate()?;
    }

    let hash = resolver.hash().copied();
    let input = a.input.clone().or_else(|| resolver.input());
    Ok(Payment {
        name: Some(resolver.name()),
        network: Some(network),
        address: a
            .address
            .clone()
            .or_else(|| hash.map(|h| address::to_base58_check(&h, network.script_hash))),
        hash: a.hash.clone().or_else(|| hash.map(|h| h.to_vec())),
        output: a.output.clone().or_else(|| resolver.output()),
        redeem: a.redeem.clone().or_else(|| resolver.redeem_from_input().cloned().map(Box::new)),
        witness: a.witness.clone().or_else(|| resolver.witness(input.as_ref())),
        input,
        ..a.clone()
    })
}
