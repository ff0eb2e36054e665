// SPDX-License-Identifier: CC0-1.0

//! Bare multisig, `m` of `n` public keys.

use core::cell::OnceCell;

use super::{push_items, Payment, PaymentError, PaymentOpts};
use crate::network;
use crate::prelude::*;
use crate::script::opcodes::*;
use crate::script::{self, Chunk};

/// `m`, `n` and the public keys of a decoded multisig output.
#[derive(Clone, Debug)]
struct Decoded {
    m: i32,
    n: i32,
    pubkeys: Vec<Vec<u8>>,
    chunks: Vec<Chunk>,
}

fn decode(output: &[u8]) -> Option<Decoded> {
    let chunks = script::decompile(output)?;
    if chunks.len() < 3 {
        return None;
    }
    let small_int = |c: &Chunk| c.opcode().map(|op| i32::from(op) - i32::from(OP_INT_BASE));
    let m = small_int(&chunks[0]).unwrap_or(-1);
    let n = small_int(&chunks[chunks.len() - 2]).unwrap_or(-1);
    let pubkeys = chunks[1..chunks.len() - 2]
        .iter()
        .map(|c| c.data().map(<[u8]>::to_vec).unwrap_or_default())
        .collect();
    Some(Decoded { m, n, pubkeys, chunks })
}

struct Resolver<'a> {
    a: &'a Payment,
    opts: PaymentOpts,
    decoded: OnceCell<Option<Decoded>>,
}

impl<'a> Resolver<'a> {
    fn decoded(&self) -> Option<&Decoded> {
        self.decoded.get_or_init(|| decode(self.a.output.as_ref()?)).as_ref()
    }

    fn pubkeys(&self) -> Option<Vec<Vec<u8>>> {
        if let Some(ref pubkeys) = self.a.pubkeys {
            return Some(pubkeys.clone());
        }
        self.decoded().map(|d| d.pubkeys.clone())
    }

    fn m(&self) -> Option<usize> {
        if let Some(m) = self.a.m {
            return Some(m);
        }
        self.decoded().and_then(|d| usize::try_from(d.m).ok())
    }

    fn n(&self) -> Option<usize> { self.pubkeys().map(|p| p.len()) }

    fn output(&self) -> Option<Vec<u8>> {
        let m = self.a.m?;
        let pubkeys = self.a.pubkeys.as_ref()?;
        let mut chunks = Vec::with_capacity(pubkeys.len() + 3);
        chunks.push(script::push_int(m as i64));
        chunks.extend(pubkeys.iter().cloned().map(Chunk::Push));
        chunks.push(script::push_int(pubkeys.len() as i64));
        chunks.push(Chunk::Op(OP_CHECKMULTISIG));
        Some(script::compile(&chunks))
    }

    fn signatures(&self) -> Option<Vec<Vec<u8>>> {
        let chunks = script::decompile(self.a.input.as_ref()?)?;
        push_items(chunks.get(1..)?)
    }

    fn input(&self) -> Option<Vec<u8>> {
        let signatures = self.a.signatures.as_ref()?;
        let mut chunks = vec![Chunk::Op(OP_0)];
        chunks.extend(signatures.iter().cloned().map(Chunk::Push));
        Some(script::compile(&chunks))
    }

    fn is_acceptable_signature(&self, sig: &[u8]) -> bool {
        script::is_canonical_script_signature(sig) || (self.opts.allow_incomplete && sig.is_empty())
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let a = self.a;
        let mut m = a.m;

        if a.output.is_some() {
            let d = self.decoded().ok_or(PaymentError::Invalid("Output"))?;
            let last = d.chunks.len() - 1;
            if d.chunks[0].opcode().is_none()
                || d.chunks[last - 1].opcode().is_none()
                || d.chunks[last] != Chunk::Op(OP_CHECKMULTISIG)
            {
                return Err(PaymentError::Invalid("Output"));
            }
            if d.m <= 0 || d.n > 16 || d.m > d.n || d.n as usize != d.chunks.len() - 3 {
                return Err(PaymentError::Invalid("Output"));
            }
            if !d.pubkeys.iter().all(|p| script::is_point(p)) {
                return Err(PaymentError::Invalid("Output"));
            }
            if a.m.map_or(false, |m| m as i32 != d.m) {
                return Err(PaymentError::Mismatch("m"));
            }
            if a.n.map_or(false, |n| n as i32 != d.n) {
                return Err(PaymentError::Mismatch("n"));
            }
            m = Some(d.m as usize);
        }

        if let Some(ref pubkeys) = a.pubkeys {
            if a.n.map_or(false, |n| n != pubkeys.len()) {
                return Err(PaymentError::Mismatch("Pubkey count"));
            }
            if m == Some(0) {
                return Err(PaymentError::Invalid("m"));
            }
            if let Some(m) = m {
                if pubkeys.len() < m {
                    return Err(PaymentError::Rule("Pubkey count cannot be less than m"));
                }
            }
            if pubkeys.len() > 16 {
                return Err(PaymentError::Rule("Pubkey count cannot be more than 16"));
            }
        }

        if let (Some(signatures), Some(m)) = (&a.signatures, m) {
            if signatures.len() < m && !self.opts.allow_incomplete {
                return Err(PaymentError::Rule("Not enough signatures provided"));
            }
            if signatures.len() > m {
                return Err(PaymentError::Rule("Too many signatures provided"));
            }
        }

        if let Some(ref input) = a.input {
            if input.first() != Some(&OP_0) {
                return Err(PaymentError::Invalid("Input"));
            }
            let signatures = self.signatures().unwrap_or_default();
            if signatures.is_empty() || !signatures.iter().all(|s| self.is_acceptable_signature(s)) {
                return Err(PaymentError::InvalidSignature("Input"));
            }
            if a.signatures.as_ref().map_or(false, |s| *s != signatures) {
                return Err(PaymentError::Mismatch("Signature"));
            }
            if let Some(m) = a.m {
                if m != signatures.len() && !self.opts.allow_incomplete {
                    return Err(PaymentError::Mismatch("Signature count"));
                }
            }
        }
        Ok(())
    }
}

/// Multisig, works from `output`, `m` with `pubkeys`, `input` or `signatures`.
///
/// With [`PaymentOpts::allow_incomplete`] set signatures may be missing, an empty item standing
/// in for each one not yet collected.
pub fn p2ms(a: Payment, opts: PaymentOpts) -> Result<Payment, PaymentError> {
    if a.input.is_none()
        && a.output.is_none()
        && !(a.pubkeys.is_some() && a.m.is_some())
        && a.signatures.is_none()
    {
        return Err(PaymentError::NotEnoughData);
    }
    if a.pubkeys.as_ref().map_or(false, |p| !p.iter().all(|k| script::is_point(k))) {
        return Err(PaymentError::UnexpectedType("pubkeys to be points"));
    }

    let resolver = Resolver { a: &a, opts, decoded: OnceCell::new() };
    if a.signatures.as_ref().map_or(false, |s| !s.iter().all(|s| resolver.is_acceptable_signature(s)))
    {
        return Err(PaymentError::UnexpectedType("signatures to be canonical"));
    }

    if opts.validate {
        resolver.validate()?;
    }

    let m = resolver.m();
    let n = a.n.or_else(|| resolver.n());
    let input = a.input.clone().or_else(|| resolver.input());
    let name = match (m, n) {
        (Some(m), Some(n)) if m > 0 && n > 0 => Some(format!("p2ms({} of {})", m, n)),
        _ => Some("p2ms".to_owned()),
    };

    Ok(Payment {
        name,
        network: Some(a.network.unwrap_or(network::BITCOIN)),
        output: a.output.clone().or_else(|| resolver.output()),
        m,
        n,
        pubkeys: resolver.pubkeys(),
        signatures: a.signatures.clone().or_else(|| resolver.signatures()),
        witness: a.witness.clone().or_else(|| input.as_ref().map(|_| Vec::new())),
        input,
        ..a.clone()
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;

    const PUBKEYS: [&str; 3] = [
        "030000000000000000000000000000000000000000000000000000000000000001",
        "030000000000000000000000000000000000000000000000000000000000000002",
        "030000000000000000000000000000000000000000000000000000000000000003",
    ];
    const SIGNATURE: &str = "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb01";

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn pubkeys() -> Vec<Vec<u8>> { PUBKEYS.iter().map(|s| hex(s)).collect() }

    #[test]
    fn output_round_trip() {
        let p = p2ms(
            Payment { m: Some(2), pubkeys: Some(pubkeys()), ..Default::default() },
            PaymentOpts::default(),
        )
        .unwrap();
        assert_eq!(p.name.as_deref(), Some("p2ms(2 of 3)"));
        assert_eq!(p.n, Some(3));
        let output = p.output.unwrap();
        assert_eq!(
            script::script_to_asm(&output).unwrap(),
            format!("OP_2 {} {} {} OP_3 OP_CHECKMULTISIG", PUBKEYS[0], PUBKEYS[1], PUBKEYS[2])
        );

        let back = p2ms(Payment { output: Some(output), ..Default::default() }, PaymentOpts::default())
            .unwrap();
        assert_eq!(back.m, Some(2));
        assert_eq!(back.n, Some(3));
        assert_eq!(back.pubkeys, Some(pubkeys()));
    }

    #[test]
    fn every_m_of_n() {
        let keys: Vec<Vec<u8>> = (1..=16u8)
            .map(|i| {
                let mut k = vec![0x02];
                k.extend_from_slice(&[0u8; 31]);
                k.push(i);
                k
            })
            .collect();
        for n in 1..=16usize {
            for m in 1..=n {
                let p = p2ms(
                    Payment { m: Some(m), pubkeys: Some(keys[..n].to_vec()), ..Default::default() },
                    PaymentOpts::default(),
                )
                .unwrap();
                let back = p2ms(Payment { output: p.output, ..Default::default() }, PaymentOpts::default())
                    .unwrap();
                assert_eq!((back.m, back.n), (Some(m), Some(n)));
                assert_eq!(back.pubkeys.as_deref(), Some(&keys[..n]));
            }
        }
    }

    #[test]
    fn incomplete_signatures() {
        let base = p2ms(
            Payment { m: Some(2), pubkeys: Some(pubkeys()), ..Default::default() },
            PaymentOpts::default(),
        )
        .unwrap();
        let partial = Payment {
            output: base.output.clone(),
            signatures: Some(vec![hex(SIGNATURE)]),
            ..Default::default()
        };

        assert_eq!(
            p2ms(partial.clone(), PaymentOpts::default()),
            Err(PaymentError::Rule("Not enough signatures provided"))
        );

        let opts = PaymentOpts { allow_incomplete: true, ..Default::default() };
        let p = p2ms(partial, opts).unwrap();
        assert_eq!(p.m, Some(2));
        assert_eq!(p.signatures.as_ref().map(Vec::len), Some(1));

        // placeholders survive the input round trip
        let p = p2ms(
            Payment {
                output: base.output.clone(),
                signatures: Some(vec![Vec::new(), hex(SIGNATURE)]),
                ..Default::default()
            },
            opts,
        )
        .unwrap();
        let back = p2ms(Payment { input: p.input, output: base.output, ..Default::default() }, opts)
            .unwrap();
        assert_eq!(back.signatures, Some(vec![Vec::new(), hex(SIGNATURE)]));
    }

    #[test]
    fn rejects() {
        let p = p2ms(
            Payment { m: Some(4), pubkeys: Some(pubkeys()), ..Default::default() },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::Rule("Pubkey count cannot be less than m")));

        let p = p2ms(
            Payment {
                m: Some(2),
                n: Some(2),
                pubkeys: Some(pubkeys()),
                ..Default::default()
            },
            PaymentOpts::default(),
        );
        assert_eq!(p, Err(PaymentError::Mismatch("Pubkey count")));

        let output = script::compile(&[
            Chunk::Op(OP_3),
            Chunk::push(hex(PUBKEYS[0])),
            Chunk::push(hex(PUBKEYS[1])),
            Chunk::Op(OP_2),
            Chunk::Op(OP_CHECKMULTISIG),
        ]);
        let p = p2ms(Payment { output: Some(output), ..Default::default() }, PaymentOpts::default());
        assert_eq!(p, Err(PaymentError::Invalid("Output")));
    }
}
