//! Merkleization of the VM state.
//!
//! The state root commits to two subtrees: a fixed-layout scalar subtree and
//! the sparse memory tree of height [`MEM_TREE_HEIGHT`] over 64-byte leaves.
//! Nothing here holds node objects; trees are folded on demand from the flat
//! leaf store, level by level.

use hashbrown::HashMap;

use fpvm_executor::{Memory, VmState};
use fpvm_primitives::{
    consts::{
        u64_to_bytes32, ACCESS_PROOF_SIZE, LEAF_SIZE, MEM_TREE_HEIGHT, SCALAR_TREE_HEIGHT,
        SCALAR_TREE_WIDTH,
    },
    keccak256, keccak_pair, ZERO_HASHES,
};

use crate::witness::WitnessError;

/// One entry of the step witness: a touched leaf and its authentication path
/// against the pre-state memory root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessProof {
    /// The leaf index (`address >> 6`).
    pub index: u64,
    /// The 64-byte leaf value in the pre-state.
    pub leaf: [u8; LEAF_SIZE],
    /// Sibling hashes from the leaf level to just below the root.
    pub siblings: Vec<[u8; 32]>,
}

impl AccessProof {
    /// Folds the entry to the memory root it authenticates against.
    #[must_use]
    pub fn fold(&self) -> [u8; 32] {
        let mut node = keccak256(&self.leaf);
        for (depth, sibling) in self.siblings.iter().enumerate() {
            node = if (self.index >> depth) & 1 == 1 {
                keccak_pair(sibling, &node)
            } else {
                keccak_pair(&node, sibling)
            };
        }
        node
    }

    /// Appends the wire encoding (`index || leaf || siblings`) to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.leaf);
        for sibling in &self.siblings {
            out.extend_from_slice(sibling);
        }
    }

    /// Decodes one wire entry.
    pub fn decode(bytes: &[u8]) -> Result<Self, WitnessError> {
        if bytes.len() != ACCESS_PROOF_SIZE {
            return Err(WitnessError::TruncatedProof(bytes.len()));
        }
        let index = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let mut leaf = [0u8; LEAF_SIZE];
        leaf.copy_from_slice(&bytes[8..8 + LEAF_SIZE]);
        let siblings = bytes[8 + LEAF_SIZE..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();
        Ok(Self { index, leaf, siblings })
    }
}

/// Computes the sparse memory tree root over the allocated leaves.
#[must_use]
pub fn memory_root(memory: &Memory) -> [u8; 32] {
    let mut level: HashMap<u64, [u8; 32]> =
        memory.leaves().map(|(index, leaf)| (index, keccak256(leaf))).collect();
    for depth in 0..MEM_TREE_HEIGHT {
        let mut next = HashMap::with_capacity(level.len() / 2 + 1);
        for &index in level.keys() {
            let parent = index >> 1;
            if next.contains_key(&parent) {
                continue;
            }
            let left = level.get(&(parent << 1)).copied().unwrap_or(ZERO_HASHES[depth]);
            let right =
                level.get(&((parent << 1) | 1)).copied().unwrap_or(ZERO_HASHES[depth]);
            next.insert(parent, keccak_pair(&left, &right));
        }
        level = next;
    }
    level.get(&0).copied().unwrap_or(ZERO_HASHES[MEM_TREE_HEIGHT])
}

/// Opens authentication paths for `indices` against the memory's current
/// tree. The levels are folded once and shared by all openings.
#[must_use]
pub fn open_all(memory: &Memory, indices: &[u64]) -> Vec<AccessProof> {
    let mut levels: Vec<HashMap<u64, [u8; 32]>> = Vec::with_capacity(MEM_TREE_HEIGHT);
    let mut level: HashMap<u64, [u8; 32]> =
        memory.leaves().map(|(index, leaf)| (index, keccak256(leaf))).collect();
    for depth in 0..MEM_TREE_HEIGHT {
        let mut next = HashMap::with_capacity(level.len() / 2 + 1);
        for &index in level.keys() {
            let parent = index >> 1;
            if next.contains_key(&parent) {
                continue;
            }
            let left = level.get(&(parent << 1)).copied().unwrap_or(ZERO_HASHES[depth]);
            let right =
                level.get(&((parent << 1) | 1)).copied().unwrap_or(ZERO_HASHES[depth]);
            next.insert(parent, keccak_pair(&left, &right));
        }
        levels.push(level);
        level = next;
    }

    indices
        .iter()
        .map(|&index| {
            let siblings = (0..MEM_TREE_HEIGHT)
                .map(|depth| {
                    let sibling = (index >> depth) ^ 1;
                    levels[depth].get(&sibling).copied().unwrap_or(ZERO_HASHES[depth])
                })
                .collect();
            AccessProof { index, leaf: memory.leaf_untracked(index), siblings }
        })
        .collect()
}

/// Lays the scalars out as the ordered leaves of the scalar subtree.
fn scalar_leaves<M>(state: &VmState<M>) -> [[u8; 32]; SCALAR_TREE_WIDTH] {
    let mut leaves = [[0u8; 32]; SCALAR_TREE_WIDTH];
    leaves[0] = u64_to_bytes32(state.pc);
    leaves[1][30] = u8::from(state.exited);
    leaves[1][31] = state.exit_code;
    leaves[2] = u64_to_bytes32(state.step);
    leaves[3] = u64_to_bytes32(state.heap);
    leaves[4] = u64_to_bytes32(state.load_reservation);
    leaves[5] = *state.preimage_key.as_bytes();
    leaves[6] = u64_to_bytes32(state.preimage_offset);
    for (i, reg) in state.registers.iter().enumerate() {
        leaves[7 + i] = u64_to_bytes32(*reg);
    }
    leaves
}

/// Folds the scalar subtree root. The padding leaves are zero-valued, so an
/// absent scalar is indistinguishable from an explicit zero.
#[must_use]
pub fn scalar_root<M>(state: &VmState<M>) -> [u8; 32] {
    let mut nodes: Vec<[u8; 32]> =
        scalar_leaves(state).iter().map(|leaf| keccak256(leaf)).collect();
    for _ in 0..SCALAR_TREE_HEIGHT {
        nodes = nodes.chunks_exact(2).map(|pair| keccak_pair(&pair[0], &pair[1])).collect();
    }
    nodes[0]
}

/// Combines the scalar subtree with a memory root into the state root.
#[must_use]
pub fn state_root<M>(state: &VmState<M>, mem_root: &[u8; 32]) -> [u8; 32] {
    keccak_pair(&scalar_root(state), mem_root)
}

/// Fully recomputes the state root of a concrete state.
#[must_use]
pub fn merkleize(state: &VmState<Memory>) -> [u8; 32] {
    state_root(state, &memory_root(&state.memory))
}
