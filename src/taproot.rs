// SPDX-License-Identifier: CC0-1.0

//! Taproot primitives (BIP-341).
//!
//! Tap leaf and branch hashing, the MAST built over a binary script tree, output key tweaking
//! and the inclusion proofs carried in control blocks.

use core::fmt;

use crate::crypto::{tagged_hash, TaggedHashPrefix};
use crate::ecc::{EccLib, XOnlyTweakResult};
use crate::encode;
use crate::prelude::*;

/// Leaf version of BIP-342 tapscript.
pub const LEAF_VERSION_TAPSCRIPT: u8 = 0xc0;

/// Mask applied to the first control block byte to get the leaf version.
pub const TAPLEAF_VERSION_MASK: u8 = 0xfe;

/// Maximum depth of a script tree, and so the maximum number of hashes in a control block.
pub const MAX_TAPTREE_DEPTH: usize = 128;

/// A script in a taproot script tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub struct Tapleaf {
    /// The leaf script.
    pub output: Vec<u8>,
    /// Leaf version, [`LEAF_VERSION_TAPSCRIPT`] unless a future version is in use.
    pub version: u8,
}

impl Tapleaf {
    /// Creates a tapscript leaf.
    pub fn new(output: Vec<u8>) -> Self { Tapleaf { output, version: LEAF_VERSION_TAPSCRIPT } }

    /// Creates a leaf with an explicit version, which must have its lowest bit clear.
    pub fn with_version(output: Vec<u8>, version: u8) -> Result<Self, TaprootError> {
        if version & TAPLEAF_VERSION_MASK != version {
            return Err(TaprootError::InvalidLeafVersion(version));
        }
        Ok(Tapleaf { output, version })
    }

    /// The BIP-341 leaf hash of this leaf.
    pub fn hash(&self) -> [u8; 32] { tapleaf_hash(self) }
}

/// A binary script tree, not necessarily balanced.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(crate = "actual_serde"))]
pub enum Taptree {
    /// A single script.
    Leaf(Tapleaf),
    /// Two subtrees.
    Branch(Box<Taptree>, Box<Taptree>),
}

impl Taptree {
    /// Creates a leaf node.
    pub fn leaf(output: Vec<u8>) -> Self { Taptree::Leaf(Tapleaf::new(output)) }

    /// Creates a branch node.
    pub fn branch(left: Taptree, right: Taptree) -> Self {
        Taptree::Branch(Box::new(left), Box::new(right))
    }

    /// Visits every leaf, left to right.
    pub fn leaves(&self) -> Vec<&Tapleaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Tapleaf>) {
        match self {
            Taptree::Leaf(leaf) => leaves.push(leaf),
            Taptree::Branch(left, right) => {
                left.collect_leaves(leaves);
                right.collect_leaves(leaves);
            }
        }
    }
}

impl From<Tapleaf> for Taptree {
    fn from(leaf: Tapleaf) -> Self { Taptree::Leaf(leaf) }
}

/// A script tree with every node replaced by its hash. Children of a branch are sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashTree {
    /// A leaf hash.
    Leaf {
        /// Tap leaf hash.
        hash: [u8; 32],
    },
    /// A branch hash and its two children, smaller hash first.
    Branch {
        /// Tap branch hash.
        hash: [u8; 32],
        /// Child with the smaller hash.
        left: Box<HashTree>,
        /// Child with the larger hash.
        right: Box<HashTree>,
    },
}

impl HashTree {
    /// The hash of this node.
    pub fn hash(&self) -> &[u8; 32] {
        match self {
            HashTree::Leaf { hash } | HashTree::Branch { hash, .. } => hash,
        }
    }
}

/// `TapLeaf` tagged hash of `version || compact_size(len) || script`.
pub fn tapleaf_hash(leaf: &Tapleaf) -> [u8; 32] {
    let mut data = Vec::with_capacity(1 + encode::var_slice_len(&leaf.output));
    data.push(leaf.version);
    encode::write_var_slice(&mut data, &leaf.output);
    tagged_hash(TaggedHashPrefix::TapLeaf, &data)
}

/// `TapBranch` tagged hash of the two children, smaller first.
pub fn tap_branch_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    tagged_hash(TaggedHashPrefix::TapBranch, &data)
}

/// `TapTweak` tagged hash of an x-only key and optional merkle root.
pub fn tap_tweak_hash(pubkey: &[u8; 32], merkle_root: Option<&[u8; 32]>) -> [u8; 32] {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(pubkey);
    if let Some(root) = merkle_root {
        data.extend_from_slice(root);
    }
    tagged_hash(TaggedHashPrefix::TapTweak, &data)
}

/// Hashes every node of `tree`.
pub fn to_hash_tree(tree: &Taptree) -> HashTree {
    match tree {
        Taptree::Leaf(leaf) => HashTree::Leaf { hash: tapleaf_hash(leaf) },
        Taptree::Branch(a, b) => {
            let (a, b) = (to_hash_tree(a), to_hash_tree(b));
            let (left, right) = if a.hash() <= b.hash() { (a, b) } else { (b, a) };
            HashTree::Branch {
                hash: tap_branch_hash(left.hash(), right.hash()),
                left: Box::new(left),
                right: Box::new(right),
            }
        }
    }
}

/// The merkle root committed to by `tree`.
pub fn compute_mast_root(tree: &Taptree) -> [u8; 32] { *to_hash_tree(tree).hash() }

/// Sibling hashes from the leaf with hash `leaf_hash` up to the root, `None` if absent.
pub fn find_script_path(node: &HashTree, leaf_hash: &[u8; 32]) -> Option<Vec<[u8; 32]>> {
    match node {
        HashTree::Leaf { hash } => (hash == leaf_hash).then(Vec::new),
        HashTree::Branch { left, right, .. } => {
            if let Some(mut path) = find_script_path(left, leaf_hash) {
                path.push(*right.hash());
                return Some(path);
            }
            let mut path = find_script_path(right, leaf_hash)?;
            path.push(*left.hash());
            Some(path)
        }
    }
}

/// Recomputes the merkle root from a control block and the hash of the leaf it proves.
pub fn root_hash_from_path(
    control_block: &[u8],
    leaf_hash: &[u8; 32],
) -> Result<[u8; 32], TaprootError> {
    if control_block.len() < 33 {
        return Err(TaprootError::ControlBlockTooSmall(control_block.len()));
    }
    let mut k = *leaf_hash;
    for sibling in control_block[33..].chunks_exact(32) {
        let mut e = [0u8; 32];
        e.copy_from_slice(sibling);
        k = tap_branch_hash(&k, &e);
    }
    Ok(k)
}

/// Builds a control block: leaf version with output key parity, internal key, sibling path.
pub fn control_block(
    leaf_version: u8,
    parity: u8,
    internal_pubkey: &[u8; 32],
    path: &[[u8; 32]],
) -> Vec<u8> {
    let mut cb = Vec::with_capacity(33 + 32 * path.len());
    cb.push(leaf_version | (parity & 1));
    cb.extend_from_slice(internal_pubkey);
    for hash in path {
        cb.extend_from_slice(hash);
    }
    cb
}

/// Tweaks an x-only key with an optional merkle root, `None` if `pubkey` is not on the curve.
pub fn tweak_key(
    ecc: &EccLib,
    pubkey: &[u8],
    merkle_root: Option<&[u8; 32]>,
) -> Option<XOnlyTweakResult> {
    let pubkey: [u8; 32] = pubkey.try_into().ok()?;
    let tweak = tap_tweak_hash(&pubkey, merkle_root);
    ecc.x_only_point_add_tweak(&pubkey, &tweak)
}

/// A leaf of the depth-first leaf list used to serialize script trees in PSBT outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapLeafEntry {
    /// Depth of the leaf, 0 for a tree that is a single leaf.
    pub depth: u8,
    /// Leaf version.
    pub leaf_version: u8,
    /// Leaf script.
    pub script: Vec<u8>,
}

/// Flattens `tree` into its depth-first leaf list.
pub fn tap_tree_to_list(tree: &Taptree) -> Result<Vec<TapLeafEntry>, TaprootError> {
    fn walk(tree: &Taptree, depth: usize, out: &mut Vec<TapLeafEntry>) -> Result<(), TaprootError> {
        if depth > MAX_TAPTREE_DEPTH {
            return Err(TaprootError::MaxDepthExceeded);
        }
        match tree {
            Taptree::Leaf(leaf) => out.push(TapLeafEntry {
                depth: depth as u8,
                leaf_version: leaf.version,
                script: leaf.output.clone(),
            }),
            Taptree::Branch(left, right) => {
                walk(left, depth + 1, out)?;
                walk(right, depth + 1, out)?;
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(tree, 0, &mut out)?;
    Ok(out)
}

/// A tree under construction, with holes where no leaf was placed yet.
enum Partial {
    Empty,
    Leaf(Tapleaf),
    Branch(Box<Partial>, Box<Partial>),
}

impl Partial {
    /// Places `leaf` at its depth in the leftmost free slot, returning false if there is none.
    fn insert(&mut self, entry: &TapLeafEntry, depth: usize) -> Result<bool, TaprootError> {
        if depth > MAX_TAPTREE_DEPTH {
            return Err(TaprootError::MaxDepthExceeded);
        }
        if usize::from(entry.depth) == depth {
            if let Partial::Empty = self {
                *self = Partial::Leaf(Tapleaf::with_version(entry.script.clone(), entry.leaf_version)?);
                return Ok(true);
            }
            return Ok(false);
        }
        match self {
            Partial::Leaf(_) => Ok(false),
            Partial::Empty => {
                let mut branch =
                    Partial::Branch(Box::new(Partial::Empty), Box::new(Partial::Empty));
                let placed = branch.insert(entry, depth)?;
                if placed {
                    *self = branch;
                }
                Ok(placed)
            }
            Partial::Branch(left, right) => {
                if left.insert(entry, depth + 1)? {
                    return Ok(true);
                }
                right.insert(entry, depth + 1)
            }
        }
    }

    fn complete(self) -> Result<Taptree, TaprootError> {
        match self {
            Partial::Empty => Err(TaprootError::IncompleteTree),
            Partial::Leaf(leaf) => Ok(Taptree::Leaf(leaf)),
            Partial::Branch(left, right) =>
                Ok(Taptree::branch(left.complete()?, right.complete()?)),
        }
    }
}

/// Rebuilds a script tree from its depth-first leaf list.
pub fn tap_tree_from_list(leaves: &[TapLeafEntry]) -> Result<Taptree, TaprootError> {
    let mut tree = Partial::Empty;
    for entry in leaves {
        if !tree.insert(entry, 0)? {
            return Err(TaprootError::NoRoomForLeaf);
        }
    }
    tree.complete()
}

/// Taproot error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaprootError {
    /// Control block shorter than the 33 byte header.
    ControlBlockTooSmall(usize),
    /// Control block path is not a whole number of hashes.
    InvalidControlBlockLength(usize),
    /// Control block path longer than [`MAX_TAPTREE_DEPTH`].
    ScriptPathTooLong(usize),
    /// Leaf version has the parity bit set.
    InvalidLeafVersion(u8),
    /// Tree deeper than [`MAX_TAPTREE_DEPTH`].
    MaxDepthExceeded,
    /// Leaf list has a leaf that fits nowhere.
    NoRoomForLeaf,
    /// Leaf list leaves part of the tree empty.
    IncompleteTree,
}

impl fmt::Display for TaprootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TaprootError::*;

        match *self {
            ControlBlockTooSmall(len) => write!(
                f,
                "The control-block length is too small. Got {}, expected min 33.",
                len
            ),
            InvalidControlBlockLength(len) =>
                write!(f, "The control-block length of {} is incorrect!", len),
            ScriptPathTooLong(m) =>
                write!(f, "The script path is too long. Got {}, expected max 128.", m),
            InvalidLeafVersion(v) => write!(f, "invalid leaf version: {:#04x}", v),
            MaxDepthExceeded => f.write_str("Max taptree depth exceeded."),
            NoRoomForLeaf => f.write_str("No room left to insert tapleaf in tree"),
            IncompleteTree => f.write_str("leaf list does not describe a complete tree"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TaprootError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use TaprootError::*;

        match *self {
            ControlBlockTooSmall(_) | InvalidControlBlockLength(_) | ScriptPathTooLong(_)
            | InvalidLeafVersion(_) | MaxDepthExceeded | NoRoomForLeaf | IncompleteTree => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::{DisplayHex, FromHex};

    use super::*;

    fn hex(s: &str) -> Vec<u8> { Vec::from_hex(s).unwrap() }

    fn two_leaf_tree() -> Taptree {
        Taptree::branch(
            Taptree::leaf(hex("20387671353e273264c495656e27e39ba899ea8fee3bb69fb2a680e22093447d48ac")),
            Taptree::Leaf(Tapleaf::with_version(hex("06424950333431"), 0xfa).unwrap()),
        )
    }

    fn three_leaf_tree() -> Taptree {
        Taptree::branch(
            Taptree::leaf(vec![0x51]),
            Taptree::branch(Taptree::leaf(vec![0x52]), Taptree::leaf(vec![0x53])),
        )
    }

    #[test]
    fn key_path_only_tweak() {
        let ecc = EccLib::default();
        let internal = hex("d6889cb081036e0faefa3a35157ad71086b123b2b144b649798b494c300a961d");
        let tweaked = tweak_key(&ecc, &internal, None).unwrap();
        assert_eq!(
            tweaked.x_only_pubkey.to_lower_hex_string(),
            "53a1f6e454df1aa2776a2814a721372d6258050de330b3c6d10ee8f4e0dda343"
        );
    }

    #[test]
    fn single_leaf_tree() {
        let ecc = EccLib::default();
        let tree =
            Taptree::leaf(hex("20d85a959b0290bf19bb89ed43c916be835475d013da4b362117393e25a48229b8ac"));
        let root = compute_mast_root(&tree);
        assert_eq!(
            root.to_lower_hex_string(),
            "5b75adecf53548f3ec6ad7d78383bf84cc57b55a3127c72b9a2481752dd88b21"
        );
        let internal = hex("187791b6f712a8ea41c8ecdd0ee77fab3e85263b37e1ec18a3651926b3a6cf27");
        let tweaked = tweak_key(&ecc, &internal, Some(&root)).unwrap();
        assert_eq!(
            tweaked.x_only_pubkey.to_lower_hex_string(),
            "147c9c57132f6e7ecddba9800bb0c4449251c92a1e60371ee77557b6620f3ea3"
        );
    }

    #[test]
    fn two_leaf_tree_root() {
        let ecc = EccLib::default();
        let tree = two_leaf_tree();
        let leaves = tree.leaves();
        assert_eq!(
            leaves[0].hash().to_lower_hex_string(),
            "8ad69ec7cf41c2a4001fd1f738bf1e505ce2277acdcaa63fe4765192497f47a7"
        );
        assert_eq!(
            leaves[1].hash().to_lower_hex_string(),
            "f224a923cd0021ab202ab139cc56802ddb92dcfc172b9212261a539df79a112a"
        );
        let root = compute_mast_root(&tree);
        assert_eq!(
            root.to_lower_hex_string(),
            "6c2dc106ab816b73f9d07e3cd1ef2c8c1256f519748e0813e4edd2405d277bef"
        );
        let internal = hex("ee4fe085983462a184015d1f782d6a5f8b9c2b60130aff050ce221ecf3786592");
        let tweaked = tweak_key(&ecc, &internal, Some(&root)).unwrap();
        assert_eq!(
            tweaked.x_only_pubkey.to_lower_hex_string(),
            "712447206d7a5238acc7ff53fbe94a3b64539ad291c7cdbc490b7577e4b17df5"
        );
    }

    #[test]
    fn root_is_independent_of_sibling_order() {
        let tree = three_leaf_tree();
        let mirrored = Taptree::branch(
            Taptree::branch(Taptree::leaf(vec![0x53]), Taptree::leaf(vec![0x52])),
            Taptree::leaf(vec![0x51]),
        );
        assert_eq!(compute_mast_root(&tree), compute_mast_root(&mirrored));
    }

    #[test]
    fn every_leaf_path_reconstructs_root() {
        let tree = three_leaf_tree();
        let hash_tree = to_hash_tree(&tree);
        let root = compute_mast_root(&tree);

        for leaf in tree.leaves() {
            let leaf_hash = leaf.hash();
            let path = find_script_path(&hash_tree, &leaf_hash).unwrap();
            let cb = control_block(leaf.version, 0, &[0x02; 32], &path);
            assert_eq!(root_hash_from_path(&cb, &leaf_hash).unwrap(), root);
        }
        assert!(find_script_path(&hash_tree, &[0u8; 32]).is_none());
    }

    #[test]
    fn short_control_block() {
        assert_eq!(
            root_hash_from_path(&[0xc0; 32], &[0u8; 32]),
            Err(TaprootError::ControlBlockTooSmall(32))
        );
    }

    #[test]
    fn invalid_tweak_input() {
        let ecc = EccLib::default();
        assert!(tweak_key(&ecc, &[0u8; 31], None).is_none());
        // x = 5 is not on the curve
        let mut x = [0u8; 32];
        x[31] = 5;
        assert!(tweak_key(&ecc, &x, None).is_none());
    }

    #[test]
    fn leaf_list_round_trip() {
        let tree = three_leaf_tree();
        let list = tap_tree_to_list(&tree).unwrap();
        assert_eq!(list.iter().map(|l| l.depth).collect::<Vec<_>>(), vec![1, 2, 2]);
        assert_eq!(tap_tree_from_list(&list).unwrap(), tree);

        let single = Taptree::leaf(vec![0x51]);
        let list = tap_tree_to_list(&single).unwrap();
        assert_eq!(list[0].depth, 0);
        assert_eq!(tap_tree_from_list(&list).unwrap(), single);
    }

    #[test]
    fn bad_leaf_lists() {
        let leaf = |depth| TapLeafEntry { depth, leaf_version: LEAF_VERSION_TAPSCRIPT, script: vec![0x51] };
        assert_eq!(tap_tree_from_list(&[leaf(1)]), Err(TaprootError::IncompleteTree));
        assert_eq!(tap_tree_from_list(&[leaf(0), leaf(0)]), Err(TaprootError::NoRoomForLeaf));
        assert_eq!(tap_tree_from_list(&[]), Err(TaprootError::IncompleteTree));

        let odd = TapLeafEntry { depth: 0, leaf_version: 0xc1, script: vec![] };
        assert_eq!(tap_tree_from_list(&[odd]), Err(TaprootError::InvalidLeafVersion(0xc1)));
    }
}
