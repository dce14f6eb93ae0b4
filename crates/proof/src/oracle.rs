//! The witness-backed memory view of the slow evaluator.
//!
//! The view never materializes the memory tree. Access proofs are ingested
//! into a node-preimage map (`parent hash -> (left, right)`); reads walk down
//! from the current memory root, writes re-fold the path and advance the
//! root. Zero-subtree hashes short-circuit to zero data, so untouched
//! regions need no witness entries.

use hashbrown::HashMap;

use fpvm_executor::{MemoryError, StepMemory};
use fpvm_primitives::{
    consts::{LEAF_SIZE, MEM_TREE_HEIGHT},
    keccak256, keccak_pair, ZERO_HASHES,
};

use crate::{merkle::AccessProof, witness::WitnessError};

/// A Merkle view of memory, fed by access proofs and consumed through the
/// [`StepMemory`] seam.
#[derive(Debug, Clone)]
pub struct WitnessMemoryView {
    root: [u8; 32],
    nodes: HashMap<[u8; 32], ([u8; 32], [u8; 32])>,
    leaves: HashMap<[u8; 32], [u8; LEAF_SIZE]>,
}

impl WitnessMemoryView {
    /// Creates an empty view rooted at the pre-state memory root.
    #[must_use]
    pub fn new(root: [u8; 32]) -> Self {
        Self { root, nodes: HashMap::new(), leaves: HashMap::new() }
    }

    /// The current memory root, reflecting all committed writes.
    #[must_use]
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Ingests one access proof, folding it against the pre-state root.
    ///
    /// Every node on the path becomes known to the view; a proof that does
    /// not fold to the root is rejected as [`WitnessError::ProofRootMismatch`].
    pub fn ingest(&mut self, proof: &AccessProof) -> Result<(), WitnessError> {
        if proof.siblings.len() != MEM_TREE_HEIGHT {
            return Err(WitnessError::TruncatedProof(proof.siblings.len() * 32));
        }
        let mut node = keccak256(&proof.leaf);
        let mut path = Vec::with_capacity(MEM_TREE_HEIGHT);
        self.leaves.insert(node, proof.leaf);
        for (depth, sibling) in proof.siblings.iter().enumerate() {
            let (left, right) = if (proof.index >> depth) & 1 == 1 {
                (*sibling, node)
            } else {
                (node, *sibling)
            };
            node = keccak_pair(&left, &right);
            path.push((node, (left, right)));
        }
        if node != self.root {
            return Err(WitnessError::ProofRootMismatch { index: proof.index });
        }
        for (parent, children) in path {
            self.nodes.insert(parent, children);
        }
        Ok(())
    }

    /// The children of `node` at the given height, expanding zero subtrees
    /// virtually.
    fn children(
        &self,
        node: [u8; 32],
        height: usize,
        index: u64,
    ) -> Result<([u8; 32], [u8; 32]), MemoryError> {
        if node == ZERO_HASHES[height] {
            return Ok((ZERO_HASHES[height - 1], ZERO_HASHES[height - 1]));
        }
        self.nodes
            .get(&node)
            .copied()
            .ok_or(MemoryError::MissingNode { index, depth: height - 1 })
    }
}

impl StepMemory for WitnessMemoryView {
    fn read_leaf(&mut self, index: u64) -> Result<[u8; LEAF_SIZE], MemoryError> {
        let mut node = self.root;
        for depth in (0..MEM_TREE_HEIGHT).rev() {
            let (left, right) = self.children(node, depth + 1, index)?;
            node = if (index >> depth) & 1 == 1 { right } else { left };
        }
        if node == ZERO_HASHES[0] {
            return Ok([0u8; LEAF_SIZE]);
        }
        self.leaves.get(&node).copied().ok_or(MemoryError::UncoveredLeaf { index })
    }

    fn write_leaf(&mut self, index: u64, leaf: [u8; LEAF_SIZE]) -> Result<(), MemoryError> {
        // Walk down once to learn the current siblings of the path.
        let mut siblings = [[0u8; 32]; MEM_TREE_HEIGHT];
        let mut node = self.root;
        for depth in (0..MEM_TREE_HEIGHT).rev() {
            let (left, right) = self.children(node, depth + 1, index)?;
            if (index >> depth) & 1 == 1 {
                siblings[depth] = left;
                node = right;
            } else {
                siblings[depth] = right;
                node = left;
            }
        }

        // Re-fold bottom-up with the new leaf; the refreshed path nodes keep
        // later reads of shared ancestors answerable.
        let mut node = keccak256(&leaf);
        self.leaves.insert(node, leaf);
        for (depth, sibling) in siblings.iter().enumerate() {
            let (left, right) = if (index >> depth) & 1 == 1 {
                (*sibling, node)
            } else {
                (node, *sibling)
            };
            node = keccak_pair(&left, &right);
            self.nodes.insert(node, (left, right));
        }
        self.root = node;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fpvm_executor::{Memory, MemoryExt};

    use super::*;
    use crate::merkle::{memory_root, open_all};

    fn view_of(memory: &Memory, indices: &[u64]) -> WitnessMemoryView {
        let mut view = WitnessMemoryView::new(memory_root(memory));
        for proof in open_all(memory, indices) {
            view.ingest(&proof).unwrap();
        }
        view
    }

    #[test]
    fn reads_replay_the_proven_leaves() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 0xdead_beef).unwrap();
        memory.write_u64(0x20_0000, 0xcafe).unwrap();

        let mut view = view_of(&memory, &[0x1000 >> 6, 0x20_0000 >> 6]);
        assert_eq!(view.read_u64(0x1000).unwrap(), 0xdead_beef);
        assert_eq!(view.read_u64(0x20_0000).unwrap(), 0xcafe);
    }

    #[test]
    fn zero_subtrees_read_as_zero_without_proofs() {
        let mut view = WitnessMemoryView::new(ZERO_HASHES[MEM_TREE_HEIGHT]);
        assert_eq!(view.read_u64(0x7_0000).unwrap(), 0);
    }

    #[test]
    fn neighboring_zero_leaves_are_readable_through_a_proof() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 1).unwrap();
        let mut view = view_of(&memory, &[0x1000 >> 6]);
        // Leaf 0 was never written: the walk bottoms out in zero subtrees
        // hanging off the proven path.
        assert_eq!(view.read_u64(0).unwrap(), 0);
    }

    #[test]
    fn unproven_nonzero_leaf_is_rejected() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 1).unwrap();
        memory.write_u64(0x10000, 2).unwrap();
        // Only the first leaf is proven; the second is a non-zero sibling
        // subtree the view cannot open.
        let mut view = view_of(&memory, &[0x1000 >> 6]);
        assert!(matches!(
            view.read_leaf(0x10000 >> 6),
            Err(MemoryError::MissingNode { index, .. }) if index == 0x10000 >> 6
        ));
    }

    #[test]
    fn writes_track_the_concrete_root() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 1).unwrap();
        memory.write_u64(0x1040, 2).unwrap();

        let mut view = view_of(&memory, &[0x1000 >> 6, 0x1040 >> 6]);

        // Mirror the same mutations on both backends.
        memory.write_u64(0x1000, 0x999).unwrap();
        view.write_u64(0x1000, 0x999).unwrap();
        memory.write_u64(0x1044, 0xabcd).unwrap();
        view.write_u64(0x1044, 0xabcd).unwrap();

        assert_eq!(view.root(), memory_root(&memory));
        assert_eq!(view.read_u64(0x1044).unwrap(), 0xabcd);
    }

    #[test]
    fn writes_to_fresh_zero_leaves_extend_the_tree() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 1).unwrap();
        let mut view = view_of(&memory, &[0x1000 >> 6]);

        // The sibling leaf inside the same 128-byte subtree is zero; writing
        // it only needs the already-proven path.
        memory.write_u64(0x1040, 7).unwrap();
        view.write_u64(0x1040, 7).unwrap();
        assert_eq!(view.root(), memory_root(&memory));
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 1).unwrap();
        let root = memory_root(&memory);
        let mut proof = open_all(&memory, &[0x1000 >> 6]).remove(0);
        proof.leaf[0] ^= 1;

        let mut view = WitnessMemoryView::new(root);
        assert!(matches!(
            view.ingest(&proof),
            Err(WitnessError::ProofRootMismatch { .. })
        ));
    }
}
