//! The VM state and its canonical serialization.

use std::{
    fs::File,
    io::{Seek, Write},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fpvm_primitives::{consts::STATE_WITNESS_SIZE, PreimageKey};

use crate::{memory::Memory, register::Register};

/// Errors decoding a canonical state serialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateDecodeError {
    /// The byte length does not match the fixed layout.
    #[error("state witness must be {STATE_WITNESS_SIZE} bytes, got {0}")]
    InvalidLength(usize),

    /// The exited flag byte is neither 0 nor 1.
    #[error("invalid exited flag byte {0}")]
    InvalidExitedFlag(u8),
}

/// Holds the data describing the current state of a program's execution.
///
/// The state is generic over its memory backend: the fast evaluator uses the
/// concrete [`Memory`], the slow evaluator a witness-backed view. Everything
/// else — the scalars — is identical between the two, which is what makes a
/// single interpreter serve both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmState<M> {
    /// The program counter.
    pub pc: u64,

    /// Whether the program has exited. Terminal: a step on an exited state is
    /// a no-op and leaves the state root unchanged.
    pub exited: bool,

    /// The exit code, valid only once `exited` is set.
    pub exit_code: u8,

    /// Monotonic counter of executed steps.
    pub step: u64,

    /// The `brk`/`mmap` allocation watermark.
    pub heap: u64,

    /// LR/SC scaffolding. Unused by the supported instruction set, but kept
    /// in the state layout for root compatibility.
    pub load_reservation: u64,

    /// The general-purpose registers. `registers[0]` is forced to zero by the
    /// accessors.
    pub registers: [u64; 32],

    /// The pre-image key remembered across a multi-step oracle read.
    pub preimage_key: PreimageKey,

    /// The offset into the current pre-image stream.
    pub preimage_offset: u64,

    /// The memory the instructions operate over.
    pub memory: M,
}

impl<M> VmState<M> {
    /// Creates a zeroed state over the given memory backend.
    pub fn new(memory: M) -> Self {
        Self {
            pc: 0,
            exited: false,
            exit_code: 0,
            step: 0,
            heap: 0,
            load_reservation: 0,
            registers: [0u64; 32],
            preimage_key: PreimageKey::default(),
            preimage_offset: 0,
            memory,
        }
    }

    /// Reads a register; `x0` always reads zero.
    #[inline]
    #[must_use]
    pub fn reg(&self, register: Register) -> u64 {
        if register == Register::X0 {
            0
        } else {
            self.registers[register as usize]
        }
    }

    /// Writes a register; writes to `x0` are discarded.
    #[inline]
    pub fn set_reg(&mut self, register: Register, value: u64) {
        if register != Register::X0 {
            self.registers[register as usize] = value;
        }
    }

    /// Rebinds the state to a different memory backend, keeping the scalars.
    pub fn with_memory<N>(self, memory: N) -> VmState<N> {
        VmState {
            pc: self.pc,
            exited: self.exited,
            exit_code: self.exit_code,
            step: self.step,
            heap: self.heap,
            load_reservation: self.load_reservation,
            registers: self.registers,
            preimage_key: self.preimage_key,
            preimage_offset: self.preimage_offset,
            memory,
        }
    }

    /// Encodes the scalar half of the state in its canonical fixed layout,
    /// carrying the memory root computed by the caller.
    #[must_use]
    pub fn encode_scalars(&self, mem_root: &[u8; 32]) -> [u8; STATE_WITNESS_SIZE] {
        let mut out = [0u8; STATE_WITNESS_SIZE];
        out[0..32].copy_from_slice(mem_root);
        out[32..64].copy_from_slice(self.preimage_key.as_bytes());
        out[64..72].copy_from_slice(&self.preimage_offset.to_be_bytes());
        out[72..80].copy_from_slice(&self.pc.to_be_bytes());
        out[80] = self.exit_code;
        out[81] = u8::from(self.exited);
        out[82..90].copy_from_slice(&self.step.to_be_bytes());
        out[90..98].copy_from_slice(&self.heap.to_be_bytes());
        out[98..106].copy_from_slice(&self.load_reservation.to_be_bytes());
        for (i, reg) in self.registers.iter().enumerate() {
            out[106 + i * 8..114 + i * 8].copy_from_slice(&reg.to_be_bytes());
        }
        out
    }

    /// Decodes a canonical state serialization onto the given memory backend,
    /// returning the state and the memory root it carries.
    pub fn decode_scalars(
        bytes: &[u8],
        memory: M,
    ) -> Result<(Self, [u8; 32]), StateDecodeError> {
        if bytes.len() != STATE_WITNESS_SIZE {
            return Err(StateDecodeError::InvalidLength(bytes.len()));
        }
        let be_u64 = |range: std::ops::Range<usize>| {
            u64::from_be_bytes(bytes[range].try_into().unwrap())
        };
        let mut mem_root = [0u8; 32];
        mem_root.copy_from_slice(&bytes[0..32]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[32..64]);

        let exited = match bytes[81] {
            0 => false,
            1 => true,
            other => return Err(StateDecodeError::InvalidExitedFlag(other)),
        };

        let mut registers = [0u64; 32];
        for (i, reg) in registers.iter_mut().enumerate() {
            *reg = be_u64(106 + i * 8..114 + i * 8);
        }

        let state = Self {
            pc: be_u64(72..80),
            exited,
            exit_code: bytes[80],
            step: be_u64(82..90),
            heap: be_u64(90..98),
            load_reservation: be_u64(98..106),
            registers,
            preimage_key: PreimageKey::from_bytes(key),
            preimage_offset: be_u64(64..72),
            memory,
        };
        Ok((state, mem_root))
    }
}

impl VmState<Memory> {
    /// Save the state snapshot to a file.
    pub fn save(&self, file: &mut File) -> std::io::Result<()> {
        let mut writer = std::io::BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.seek(std::io::SeekFrom::Start(0))?;
        Ok(())
    }

    /// Load a state snapshot previously written by [`VmState::save`].
    pub fn load(file: &mut File) -> std::io::Result<Self> {
        let reader = std::io::BufReader::new(file);
        bincode::deserialize_from(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
