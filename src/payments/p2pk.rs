// SPDX-License-Identifier: CC0-1.0

//! Pay to public key.

use super::{Payment, PaymentError, PaymentOpts};
use crate::network;
use crate::prelude::*;
use crate::script::opcodes::OP_CHECKSIG;
use crate::script::{self, Chunk};

/// Pay to public key, works from `output`, `pubkey`, `input` or `signature`.
pub fn p2pk(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.input.is_none() && a.output.is_none() && a.pubkey.is_none() && a.signature.is_none() {
        return Err(PaymentError::NotEnoughData);
    }
    if a.pubkey.as_deref().map_or(false, |p| !script::is_point(p)) {
        return Err(PaymentError::UnexpectedType("pubkey to be a point"));
    }
    if a.signature.as_deref().map_or(false, |s| !script::is_canonical_script_signature(s)) {
        return Err(PaymentError::UnexpectedType("canonical script signature"));
    }

    let chunks = a.input.as_deref().and_then(script::decompile);

    let output = a.output.clone().or_else(|| {
        let pubkey = a.pubkey.as_ref()?;
        Some(script::compile(&[Chunk::push(pubkey.clone()), Chunk::Op(OP_CHECKSIG)]))
    });
    let pubkey = a.pubkey.clone().or_else(|| {
        let output = a.output.as_ref()?;
        (output.len() > 2).then(|| output[1..output.len() - 1].to_vec())
    });
    let signature = a
        .signature
        .clone()
        .or_else(|| chunks.as_ref()?.first()?.data().map(<[u8]>::to_vec));
    let input = a
        .input
        .clone()
        .or_else(|| a.signature.as_ref().map(|s| script::compile(&[Chunk::push(s.clone())])));

    if opts.validate {
        if let Some(ref out) = a.output {
            if out.last() != Some(&OP_CHECKSIG) {
                return Err(PaymentError::Invalid("Output"));
            }
            let derived = if out.len() > 2 { &out[1..out.len() - 1] } else { &[][..] };
            if !script::is_point(derived) || usize::from(out[0]) != derived.len() {
                return Err(PaymentError::Invalid("Output pubkey"));
            }
            if a.pubkey.as_deref().map_or(false, |p| p != derived) {
                return Err(PaymentError::Mismatch("Pubkey"));
            }
        }
        if let (Some(_), Some(given)) = (&a.signature, &a.input) {
            if input.as_ref() != Some(given) {
                return Err(PaymentError::Mismatch("Signature"));
            }
        }
        if a.input.is_some() {
            match chunks {
                Some(ref chunks) if chunks.len() == 1 => {
                    if !chunks[0].data().map_or(false, script::is_canonical_script_signature) {
                        return Err(PaymentError::InvalidSignature("Input"));
                    }
                }
                _ => return Err(PaymentError::Invalid("Input")),
            }
        }
    }

    Ok(Payment {
        name: Some("p2pk".to_owned()),
        network: Some(a.network.unwrap_or(network::BITCOIN)),
        witness: a.witness.clone().or_else(|| input.as_ref().map(|_| Vec::new())),
        output,
        pubkey,
        signature,
        input,
        ..a
    })
}
