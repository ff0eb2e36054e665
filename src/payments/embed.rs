// SPDX-License-Identifier: CC0-1.0

//! `OP_RETURN` data carrier.

use super::{Payment, PaymentError, PaymentOpts};
use crate::network;
use crate::prelude::*;
use crate::script::opcodes::OP_RETURN;
use crate::script::{self, Chunk};

/// Data carried after `OP_RETURN`, `None` if `output` holds anything but pushes there.
fn pushed_data(output: &[u8]) -> Option<Vec<Vec<u8>>> {
    let chunks = script::decompile(output)?;
    if chunks.first() != Some(&Chunk::Op(OP_RETURN)) {
        return None;
    }
    chunks[1..].iter().map(|c| c.data().map(<[u8]>::to_vec)).collect()
}

/// Unspendable `OP_RETURN` output, works from `output` or `data`.
pub fn embed(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.data.is_none() && a.output.is_none() {
        return Err(PaymentError::NotEnoughData);
    }

    let data = match a.output {
        Some(ref output) => pushed_data(output),
        None => None,
    };

    if opts.validate {
        if a.output.is_some() {
            let derived = data.as_ref().ok_or(PaymentError::Invalid("Output"))?;
            if a.data.as_ref().map_or(false, |d| d != derived) {
                return Err(PaymentError::Mismatch("Data"));
            }
        }
    }

    let output = a.output.clone().or_else(|| {
        let mut chunks = vec![Chunk::Op(OP_RETURN)];
        chunks.extend(a.data.as_ref()?.iter().cloned().map(Chunk::Push));
        Some(script::compile(&chunks))
    });

    Ok(Payment {
        name: Some("embed".to_owned()),
        network: Some(a.network.unwrap_or(network::BITCOIN)),
        data: a.data.clone().or(data),
        output,
        ..a
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let data = vec![b"hello".to_vec(), b"world".to_vec()];
        let p = embed(Payment { data: Some(data.clone()), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        let output = p.output.unwrap();
        assert_eq!(output[0], OP_RETURN);
        assert_eq!(script::script_to_asm(&output).unwrap(), "OP_RETURN 68656c6c6f 776f726c64");

        let back = embed(Payment { output: Some(output), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(back.data, Some(data));
        assert_eq!(back.name.as_deref(), Some("embed"));
    }

    #[test]
    fn rejects() {
        let p = embed(Payment { output: Some(vec![0x51, 0x01, 0xff]), ..Default::default() }, PaymentOpts::default());
        assert_eq!(p, Err(PaymentError::Invalid("Output")));

        let output = script::compile(&[Chunk::Op(OP_RETURN), Chunk::push(vec![1, 2])]);
        let p = embed(
            Payment { output: Some(output), data: Some(vec![vec![3]]), ..Default::default() },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::Mismatch("Data")));
        assert_eq!(embed(Payment::default(), PaymentOpts::default()), Err(PaymentError::NotEnoughData));
    }
}
