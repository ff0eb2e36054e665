// SPDX-License-Identifier: CC0-1.0

//! Consistency rules for the taproot fields of [BIP-371].
//!
//! [BIP-371]: <https://github.com/bitcoin/bips/blob/master/bip-0371.mediawiki>

use super::error::PsbtError;
use super::map::input::{Input, TapLeafScript};
use super::map::output::Output;
use crate::ecc::EccLib;
use crate::payments::{self, Payment, PaymentOpts};
use crate::taproot;

/// Checks the fields of `new` can be added to `current`.
///
/// When `current` and `new` are the same map the check is on that map alone.
pub(crate) fn check_input_fields(
    current: &Input,
    new: &Input,
    action: &'static str,
) -> Result<(), PsbtError> {
    let bad_fields = (current.is_taproot() && new.has_non_taproot_fields())
        || (current.has_non_taproot_fields() && new.is_taproot());
    let mixed = new.is_taproot() && new.has_non_taproot_fields();
    if bad_fields || mixed {
        return Err(PsbtError::MixedTaprootFields(action));
    }

    match (new.tap_merkle_root, current.tap_merkle_root) {
        (Some(ref root), _) => {
            let in_tree = new
                .tap_leaf_scripts
                .iter()
                .chain(current.tap_leaf_scripts.iter())
                .all(|(cb, leaf)| is_tap_leaf_in_tree(cb, leaf, root));
            if !in_tree {
                return Err(PsbtError::TapLeafNotInTree(action));
            }
        }
        (None, Some(ref root)) =>
            if !new.tap_leaf_scripts.iter().all(|(cb, leaf)| is_tap_leaf_in_tree(cb, leaf, root)) {
                return Err(PsbtError::TapLeafNotInTree(action));
            },
        (None, None) => {}
    }
    Ok(())
}

fn is_tap_leaf_in_tree(control_block: &[u8], leaf: &TapLeafScript, merkle_root: &[u8; 32]) -> bool {
    taproot::root_hash_from_path(control_block, &leaf.leaf_hash())
        .map_or(false, |root| &root == merkle_root)
}

/// Checks the fields of `new` can be added to `current`, `script` being the output script.
pub(crate) fn check_output_fields(
    current: &Output,
    new: &Output,
    script: &[u8],
    ecc: &EccLib,
    action: &'static str,
) -> Result<(), PsbtError> {
    let bad_fields = (current.is_taproot(script) && new.has_non_taproot_fields())
        || (current.has_non_taproot_fields() && new.is_taproot(script));
    let mixed = new.is_taproot(script) && new.has_non_taproot_fields();
    if bad_fields || mixed {
        return Err(PsbtError::MixedTaprootFields(action));
    }

    if new.tap_tree.is_none() && new.tap_internal_key.is_none() {
        return Ok(());
    }
    let internal_key = new.tap_internal_key.or(current.tap_internal_key);
    let tap_tree = new.tap_tree.as_ref().or(current.tap_tree.as_ref());
    if let Some(internal_key) = internal_key {
        let payment = payments::p2tr(
            Payment {
                internal_pubkey: Some(internal_key.to_vec()),
                script_tree: tap_tree.cloned(),
                ..Default::default()
            },
            PaymentOpts::default(),
            ecc,
        )?;
        if payment.output.as_deref() != Some(script) {
            return Err(PsbtError::OutputScriptMismatch);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taproot::{Tapleaf, Taptree};

    fn leaf_input() -> (Input, [u8; 32]) {
        let leaf = TapLeafScript { script: vec![0x51], leaf_version: 0xc0 };
        let sibling = Tapleaf::new(vec![0x52]).hash();
        let root = taproot::tap_branch_hash(&leaf.leaf_hash(), &sibling);
        let control_block = taproot::control_block(0xc0, 0, &[2; 32], &[sibling]);
        let mut input = Input::default();
        input.tap_leaf_scripts.insert(control_block, leaf);
        (input, root)
    }

    #[test]
    fn mixed_fields() {
        let taproot = Input { tap_internal_key: Some([1; 32]), ..Default::default() };
        let legacy = Input { redeem_script: Some(vec![0x51]), ..Default::default() };
        assert_eq!(
            check_input_fields(&taproot, &legacy, "updateInput"),
            Err(PsbtError::MixedTaprootFields("updateInput"))
        );
        assert_eq!(
            check_input_fields(&legacy, &taproot, "updateInput"),
            Err(PsbtError::MixedTaprootFields("updateInput"))
        );
        assert!(check_input_fields(&Input::default(), &legacy, "addInput").is_ok());
    }

    #[test]
    fn leaf_must_be_in_tree() {
        let (input, root) = leaf_input();
        let with_root = Input { tap_merkle_root: Some(root), ..Default::default() };
        assert!(check_input_fields(&input, &with_root, "updateInput").is_ok());
        assert!(check_input_fields(&with_root, &input, "updateInput").is_ok());

        let wrong_root = Input { tap_merkle_root: Some([9; 32]), ..Default::default() };
        assert_eq!(
            check_input_fields(&input, &wrong_root, "updateInput"),
            Err(PsbtError::TapLeafNotInTree("updateInput"))
        );
    }

    #[test]
    fn output_must_match_script() {
        let ecc = EccLib::default();
        // BIP-86 m/86'/0'/0'/0/0
        let internal: [u8; 32] = [
            0xcc, 0x8a, 0x4b, 0xc6, 0x4d, 0x89, 0x7b, 0xdd, 0xc5, 0xfb, 0xc2, 0xf6, 0x70, 0xf7,
            0xa8, 0xba, 0x0b, 0x38, 0x67, 0x79, 0x10, 0x6c, 0xf1, 0x22, 0x3c, 0x6f, 0xc5, 0xd7,
            0xcd, 0x6f, 0xc1, 0x15,
        ];
        let payment = payments::p2tr(
            Payment { internal_pubkey: Some(internal.to_vec()), ..Default::default() },
            PaymentOpts::default(),
            &ecc,
        )
        .unwrap();
        let script = payment.output.unwrap();

        let output = Output { tap_internal_key: Some(internal), ..Default::default() };
        assert!(check_output_fields(&Output::default(), &output, &script, &ecc, "addOutput").is_ok());

        let with_tree = Output {
            tap_internal_key: Some(internal),
            tap_tree: Some(Taptree::leaf(vec![0x51])),
            ..Default::default()
        };
        assert_eq!(
            check_output_fields(&Output::default(), &with_tree, &script, &ecc, "addOutput"),
            Err(PsbtError::OutputScriptMismatch)
        );

        let legacy = Output { witness_script: Some(vec![0x51]), ..Default::default() };
        assert_eq!(
            check_output_fields(&Output::default(), &legacy, &script, &ecc, "addOutput"),
            Err(PsbtError::MixedTaprootFields("addOutput"))
        );
    }
}
