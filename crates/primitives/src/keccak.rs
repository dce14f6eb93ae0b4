//! Keccak-256 helpers and the zero-subtree hash table.

use once_cell::sync::Lazy;
use tiny_keccak::{Hasher, Keccak};

use crate::consts::{LEAF_SIZE, MEM_TREE_HEIGHT};

/// Computes the Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Computes the parent node hash `keccak256(left || right)`.
#[must_use]
pub fn keccak_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Computes the 4-byte Solidity function selector for `signature`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Roots of all-zero subtrees of the memory tree, indexed by height.
///
/// `ZERO_HASHES[0]` is the hash of a zero leaf; `ZERO_HASHES[MEM_TREE_HEIGHT]`
/// is the root of a fully empty memory.
pub static ZERO_HASHES: Lazy<[[u8; 32]; MEM_TREE_HEIGHT + 1]> = Lazy::new(|| {
    let mut hashes = [[0u8; 32]; MEM_TREE_HEIGHT + 1];
    hashes[0] = keccak256(&[0u8; LEAF_SIZE]);
    for depth in 0..MEM_TREE_HEIGHT {
        hashes[depth + 1] = keccak_pair(&hashes[depth], &hashes[depth]);
    }
    hashes
});

/// The root of an all-zero subtree at the given height.
#[must_use]
pub fn zero_hash(height: usize) -> [u8; 32] {
    ZERO_HASHES[height]
}
