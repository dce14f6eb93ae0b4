//! Constants describing the VM's memory geometry and sandbox interface.

/// The size of a Merkle memory leaf in bytes.
pub const LEAF_SIZE: usize = 64;

/// The log2 size of a Merkle memory leaf.
pub const LOG_LEAF_SIZE: usize = 6;

/// The height of the memory subtree: 64-bit byte addressing over 64-byte
/// leaves leaves `64 - 6 = 58` levels of branching.
pub const MEM_TREE_HEIGHT: usize = 58;

/// The size of an instruction in bytes.
pub const INSTRUCTION_WORD_SIZE: usize = 4;

/// The log2 page size (in bytes) used by the `brk`/`mmap` allocator.
pub const LOG_PAGE_SIZE: usize = 12;

/// The size of an allocator page in bytes.
pub const PAGE_SIZE: u64 = 1 << LOG_PAGE_SIZE;

/// The size of the canonical scalar state serialization in bytes.
///
/// `mem_root (32) + preimage_key (32) + preimage_offset (8) + pc (8) +
/// exit_code (1) + exited (1) + step (8) + heap (8) + load_reservation (8) +
/// 32 registers (256)`.
pub const STATE_WITNESS_SIZE: usize = 362;

/// The number of populated leaves in the scalar subtree.
pub const SCALAR_LEAF_COUNT: usize = 39;

/// The scalar subtree is padded to this power-of-two leaf count.
pub const SCALAR_TREE_WIDTH: usize = 64;

/// The depth of the (padded) scalar subtree.
pub const SCALAR_TREE_HEIGHT: usize = 6;

/// The byte size of one memory access entry in the step witness:
/// `leaf_index (8) + leaf (64) + MEM_TREE_HEIGHT sibling hashes (32 each)`.
pub const ACCESS_PROOF_SIZE: usize = 8 + LEAF_SIZE + MEM_TREE_HEIGHT * 32;

/// File descriptors wired to the pre-image oracle transport.
pub mod fd {
    /// Standard input. Reads return EOF.
    pub const FD_STDIN: u64 = 0;

    /// Standard output. Writes are acknowledged and discarded.
    pub const FD_STDOUT: u64 = 1;

    /// Standard error. Writes are acknowledged and discarded.
    pub const FD_STDERR: u64 = 2;

    /// Hint responses. Reads are acknowledged without transferring bytes.
    pub const FD_HINT_READ: u64 = 3;

    /// Hint requests. Writes are acknowledged and discarded; hints are
    /// advisory and never affect the state root.
    pub const FD_HINT_WRITE: u64 = 4;

    /// Pre-image data, served in 32-byte windows at the VM's current
    /// `(preimage_key, preimage_offset)`.
    pub const FD_PREIMAGE_READ: u64 = 5;

    /// Pre-image key register. Writes shift the 32-byte key accumulator.
    pub const FD_PREIMAGE_WRITE: u64 = 6;
}

/// Errno values returned by the syscall shim.
pub mod errno {
    /// Bad file descriptor.
    pub const EBADF: u64 = 9;

    /// Invalid argument.
    pub const EINVAL: u64 = 22;

    /// Function not implemented.
    pub const ENOSYS: u64 = 38;
}

/// Encodes a `u64` into the trailing 8 bytes of a 32-byte big-endian word.
#[must_use]
pub fn u64_to_bytes32(v: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&v.to_be_bytes());
    out
}

/// Decodes a `u64` from the trailing 8 bytes of a 32-byte big-endian word.
#[must_use]
pub fn bytes32_to_u64(bytes: &[u8; 32]) -> u64 {
    u64::from_be_bytes(bytes[24..].try_into().unwrap())
}
