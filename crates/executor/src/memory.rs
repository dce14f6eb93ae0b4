//! The paged binary memory model.
//!
//! Memory is a flat store of 64-byte leaves keyed by leaf index
//! (`address >> 6`), per the Merkle tree's leaf geometry. Absent leaves read
//! as zero and writes allocate lazily. Every byte-level access — from either
//! evaluator — routes through the [`StepMemory`] trait, so the fast
//! evaluator's touched-leaf order and the slow evaluator's witness
//! consumption order are identical by construction.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fpvm_primitives::consts::{LEAF_SIZE, LOG_LEAF_SIZE};

/// Failures of a memory backend.
///
/// The concrete [`Memory`] never fails; the witness-backed view of the slow
/// evaluator fails when an access is not covered by the step witness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The leaf is not covered by the supplied witness.
    #[error("memory leaf {index:#x} is not covered by the step witness")]
    UncoveredLeaf {
        /// The leaf index of the failing access.
        index: u64,
    },

    /// A node on the leaf's path has no known pre-image in the witness.
    #[error("witness node at depth {depth} on the path to leaf {index:#x} is unknown")]
    MissingNode {
        /// The leaf index of the failing access.
        index: u64,
        /// The depth (from the leaves) at which the walk got stuck.
        depth: usize,
    },
}

/// The memory seam between the evaluators.
///
/// The fast evaluator instantiates it with [`Memory`]; the slow evaluator
/// with the witness view. Implementations must serve absent leaves as zeros
/// where their backing data allows it.
pub trait StepMemory {
    /// Reads the 64-byte leaf at `index`.
    fn read_leaf(&mut self, index: u64) -> Result<[u8; LEAF_SIZE], MemoryError>;

    /// Replaces the 64-byte leaf at `index`.
    fn write_leaf(&mut self, index: u64, leaf: [u8; LEAF_SIZE]) -> Result<(), MemoryError>;
}

/// Little-endian byte-level access on top of any [`StepMemory`].
///
/// Unaligned access is permitted everywhere; an access that crosses a leaf
/// boundary touches the lower-indexed leaf first.
pub trait MemoryExt: StepMemory {
    /// Reads `N` bytes starting at `addr`.
    fn read_bytes<const N: usize>(&mut self, addr: u64) -> Result<[u8; N], MemoryError> {
        let index = addr >> LOG_LEAF_SIZE;
        let offset = (addr as usize) & (LEAF_SIZE - 1);
        let mut out = [0u8; N];
        if offset + N <= LEAF_SIZE {
            let leaf = self.read_leaf(index)?;
            out.copy_from_slice(&leaf[offset..offset + N]);
        } else {
            let split = LEAF_SIZE - offset;
            let low = self.read_leaf(index)?;
            let high = self.read_leaf(index + 1)?;
            out[..split].copy_from_slice(&low[offset..]);
            out[split..].copy_from_slice(&high[..N - split]);
        }
        Ok(out)
    }

    /// Writes `N` bytes starting at `addr`, preserving neighboring bytes.
    fn write_bytes<const N: usize>(
        &mut self,
        addr: u64,
        bytes: [u8; N],
    ) -> Result<(), MemoryError> {
        let index = addr >> LOG_LEAF_SIZE;
        let offset = (addr as usize) & (LEAF_SIZE - 1);
        if offset + N <= LEAF_SIZE {
            let mut leaf = self.read_leaf(index)?;
            leaf[offset..offset + N].copy_from_slice(&bytes);
            self.write_leaf(index, leaf)?;
        } else {
            let split = LEAF_SIZE - offset;
            let mut low = self.read_leaf(index)?;
            let mut high = self.read_leaf(index + 1)?;
            low[offset..].copy_from_slice(&bytes[..split]);
            high[..N - split].copy_from_slice(&bytes[split..]);
            self.write_leaf(index, low)?;
            self.write_leaf(index + 1, high)?;
        }
        Ok(())
    }

    /// Reads a byte at `addr`.
    fn read_u8(&mut self, addr: u64) -> Result<u8, MemoryError> {
        Ok(self.read_bytes::<1>(addr)?[0])
    }

    /// Reads a little-endian `u16` at `addr`.
    fn read_u16(&mut self, addr: u64) -> Result<u16, MemoryError> {
        Ok(u16::from_le_bytes(self.read_bytes(addr)?))
    }

    /// Reads a little-endian `u32` at `addr`.
    fn read_u32(&mut self, addr: u64) -> Result<u32, MemoryError> {
        Ok(u32::from_le_bytes(self.read_bytes(addr)?))
    }

    /// Reads a little-endian `u64` at `addr`.
    fn read_u64(&mut self, addr: u64) -> Result<u64, MemoryError> {
        Ok(u64::from_le_bytes(self.read_bytes(addr)?))
    }

    /// Writes a byte at `addr`.
    fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), MemoryError> {
        self.write_bytes(addr, [value])
    }

    /// Writes a little-endian `u16` at `addr`.
    fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), MemoryError> {
        self.write_bytes(addr, value.to_le_bytes())
    }

    /// Writes a little-endian `u32` at `addr`.
    fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(addr, value.to_le_bytes())
    }

    /// Writes a little-endian `u64` at `addr`.
    fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(addr, value.to_le_bytes())
    }
}

impl<M: StepMemory + ?Sized> MemoryExt for M {}

/// The concrete memory of the fast evaluator.
///
/// Leaves are allocated lazily and never reclaimed during a run. The touched
/// list records the distinct leaves accessed since the last
/// [`Memory::clear_touched`], in first-touch order; it is the access list the
/// step witness is built from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    #[serde(
        serialize_with = "serialize_leaves",
        deserialize_with = "deserialize_leaves"
    )]
    leaves: HashMap<u64, [u8; LEAF_SIZE]>,
    #[serde(skip)]
    touched: Vec<u64>,
    #[serde(skip)]
    touched_set: HashSet<u64>,
}

/// Serializes the leaf map as a sequence of `(index, bytes)` pairs.
///
/// `serde`'s built-in array support tops out at length 32, short of
/// [`LEAF_SIZE`]; this carries each leaf as a `Vec<u8>` on the wire instead.
fn serialize_leaves<S>(
    leaves: &HashMap<u64, [u8; LEAF_SIZE]>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(leaves.len()))?;
    for (index, leaf) in leaves {
        seq.serialize_element(&(*index, leaf.as_slice()))?;
    }
    seq.end()
}

fn deserialize_leaves<'de, D>(deserializer: D) -> Result<HashMap<u64, [u8; LEAF_SIZE]>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let items: Vec<(u64, Vec<u8>)> = Vec::deserialize(deserializer)?;
    let mut leaves = HashMap::with_capacity(items.len());
    for (index, bytes) in items {
        let leaf: [u8; LEAF_SIZE] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("leaf is not LEAF_SIZE bytes"))?;
        leaves.insert(index, leaf);
    }
    Ok(leaves)
}

impl Memory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, index: u64) {
        if self.touched_set.insert(index) {
            self.touched.push(index);
        }
    }

    /// The distinct leaves touched since the last step boundary, in
    /// first-touch order.
    #[must_use]
    pub fn touched_leaves(&self) -> &[u64] {
        &self.touched
    }

    /// Resets the touched-leaf list at a step boundary.
    pub fn clear_touched(&mut self) {
        self.touched.clear();
        self.touched_set.clear();
    }

    /// Iterates over the allocated leaves.
    pub fn leaves(&self) -> impl Iterator<Item = (u64, &[u8; LEAF_SIZE])> {
        self.leaves.iter().map(|(index, leaf)| (*index, leaf))
    }

    /// The number of allocated leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Reads a leaf without recording a touch. Used by the Merkleizer and
    /// witness collection, which must not perturb the access list.
    #[must_use]
    pub fn leaf_untracked(&self, index: u64) -> [u8; LEAF_SIZE] {
        self.leaves.get(&index).copied().unwrap_or([0u8; LEAF_SIZE])
    }

    /// Writes a byte range without recording touches. Used by the ELF loader
    /// to install the program image before execution starts.
    pub fn set_range_untracked(&mut self, addr: u64, data: &[u8]) {
        let mut pos = 0usize;
        while pos < data.len() {
            let index = (addr + pos as u64) >> LOG_LEAF_SIZE;
            let offset = ((addr + pos as u64) as usize) & (LEAF_SIZE - 1);
            let n = (LEAF_SIZE - offset).min(data.len() - pos);
            let leaf = self.leaves.entry(index).or_insert([0u8; LEAF_SIZE]);
            leaf[offset..offset + n].copy_from_slice(&data[pos..pos + n]);
            pos += n;
        }
    }
}

impl StepMemory for Memory {
    fn read_leaf(&mut self, index: u64) -> Result<[u8; LEAF_SIZE], MemoryError> {
        self.touch(index);
        Ok(self.leaves.get(&index).copied().unwrap_or([0u8; LEAF_SIZE]))
    }

    fn write_leaf(&mut self, index: u64, leaf: [u8; LEAF_SIZE]) -> Result<(), MemoryError> {
        self.touch(index);
        self.leaves.insert(index, leaf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn unmapped_reads_are_zero() {
        let mut memory = Memory::new();
        assert_eq!(memory.read_u64(0).unwrap(), 0);
        assert_eq!(memory.read_u8(u64::MAX - 8).unwrap(), 0);
        assert_eq!(memory.leaf_count(), 0);
    }

    #[test]
    fn write_preserves_neighbors() {
        let mut memory = Memory::new();
        memory.write_u64(0x1000, 0x1122_3344_5566_7788).unwrap();
        memory.write_u8(0x1003, 0xff).unwrap();
        assert_eq!(memory.read_u64(0x1000).unwrap(), 0x1122_3344_ff66_7788);
    }

    #[test]
    fn boundary_crossing_access() {
        let mut memory = Memory::new();
        // 0x103c..0x1044 spans the leaves at indices 0x40 and 0x41.
        memory.write_u64(0x103c, 0xdead_beef_cafe_babe).unwrap();
        assert_eq!(memory.read_u64(0x103c).unwrap(), 0xdead_beef_cafe_babe);
        assert_eq!(memory.read_u32(0x103c).unwrap(), 0xcafe_babe);
        assert_eq!(memory.read_u32(0x1040).unwrap(), 0xdead_beef);
    }

    #[test]
    fn touched_list_dedups_in_first_touch_order() {
        let mut memory = Memory::new();
        memory.read_u8(0x80).unwrap();
        memory.write_u64(0x0, 7).unwrap();
        memory.read_u8(0x81).unwrap();
        memory.write_u64(0x3e, 1).unwrap();
        assert_eq!(memory.touched_leaves(), &[2, 0, 1]);
        memory.clear_touched();
        assert!(memory.touched_leaves().is_empty());
    }

    #[test]
    fn untracked_writes_do_not_touch() {
        let mut memory = Memory::new();
        memory.set_range_untracked(0x100, &[1, 2, 3, 4]);
        assert!(memory.touched_leaves().is_empty());
        assert_eq!(memory.read_u32(0x100).unwrap(), 0x0403_0201);
    }

    proptest! {
        #[test]
        fn read_u64_assembles_bytes(addr in 0u64..1 << 20, value: u64) {
            let mut memory = Memory::new();
            memory.write_u64(addr, value).unwrap();
            let mut assembled = 0u64;
            for k in 0..8 {
                assembled |= u64::from(memory.read_u8(addr + k).unwrap()) << (8 * k);
            }
            prop_assert_eq!(assembled, value);
        }

        #[test]
        fn u16_u32_round_trip(addr in 0u64..1 << 20, half: u16, word: u32) {
            let mut memory = Memory::new();
            memory.write_u16(addr, half).unwrap();
            prop_assert_eq!(memory.read_u16(addr).unwrap(), half);
            memory.write_u32(addr + 2, word).unwrap();
            prop_assert_eq!(memory.read_u32(addr + 2).unwrap(), word);
            prop_assert_eq!(memory.read_u16(addr).unwrap(), half);
        }
    }
}
