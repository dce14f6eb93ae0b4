//! The decoded instruction model.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::{opcode::Opcode, register::Register};

/// A decoded RV64IM instruction.
///
/// Operands carry either a register index or a sign-extended immediate; the
/// `imm_b`/`imm_c` flags say which. Immediates are sign-extended to 64 bits
/// at decode time so execution never re-extends them.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Instruction {
    /// The operation to execute.
    pub opcode: Opcode,
    /// The first operand: `rd` for most formats, `rs1` for branches, `rs2`
    /// for stores.
    pub op_a: u8,
    /// The second operand.
    pub op_b: u64,
    /// The third operand.
    pub op_c: u64,
    /// Whether the second operand is an immediate value.
    pub imm_b: bool,
    /// Whether the third operand is an immediate value.
    pub imm_c: bool,
}

impl Instruction {
    /// Create a new [`Instruction`].
    #[must_use]
    pub const fn new(
        opcode: Opcode,
        op_a: u8,
        op_b: u64,
        op_c: u64,
        imm_b: bool,
        imm_c: bool,
    ) -> Self {
        Self { opcode, op_a, op_b, op_c, imm_b, imm_c }
    }

    /// Returns if the instruction is an ALU instruction.
    #[must_use]
    #[inline]
    pub const fn is_alu_instruction(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::ADD
                | Opcode::ADDI
                | Opcode::SUB
                | Opcode::XOR
                | Opcode::OR
                | Opcode::AND
                | Opcode::SLL
                | Opcode::SRL
                | Opcode::SRA
                | Opcode::SLT
                | Opcode::SLTU
                | Opcode::MUL
                | Opcode::MULH
                | Opcode::MULHU
                | Opcode::MULHSU
                | Opcode::DIV
                | Opcode::DIVU
                | Opcode::REM
                | Opcode::REMU
                | Opcode::ADDW
                | Opcode::SUBW
                | Opcode::MULW
                | Opcode::DIVW
                | Opcode::DIVUW
                | Opcode::REMW
                | Opcode::REMUW
                | Opcode::SLLW
                | Opcode::SRLW
                | Opcode::SRAW
        )
    }

    /// Returns if the instruction is a memory load instruction.
    #[must_use]
    #[inline]
    pub const fn is_memory_load_instruction(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::LB
                | Opcode::LH
                | Opcode::LW
                | Opcode::LBU
                | Opcode::LHU
                | Opcode::LWU
                | Opcode::LD
        )
    }

    /// Returns if the instruction is a memory store instruction.
    #[must_use]
    #[inline]
    pub const fn is_memory_store_instruction(&self) -> bool {
        matches!(self.opcode, Opcode::SB | Opcode::SH | Opcode::SW | Opcode::SD)
    }

    /// Returns if the instruction is a branch instruction.
    #[must_use]
    #[inline]
    pub const fn is_branch_instruction(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::BEQ | Opcode::BNE | Opcode::BLT | Opcode::BGE | Opcode::BLTU | Opcode::BGEU
        )
    }

    /// Returns if the instruction is a jump instruction.
    #[must_use]
    #[inline]
    pub const fn is_jump_instruction(&self) -> bool {
        matches!(self.opcode, Opcode::JAL | Opcode::JALR)
    }

    /// Returns if the instruction is a U-type instruction.
    #[must_use]
    #[inline]
    pub const fn is_utype_instruction(&self) -> bool {
        matches!(self.opcode, Opcode::AUIPC | Opcode::LUI)
    }

    /// Returns if the instruction is a CSR stub.
    #[must_use]
    #[inline]
    pub const fn is_csr_instruction(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::CSRRW
                | Opcode::CSRRS
                | Opcode::CSRRC
                | Opcode::CSRRWI
                | Opcode::CSRRSI
                | Opcode::CSRRCI
        )
    }

    /// Returns if the instruction is a memory-ordering fence.
    #[must_use]
    #[inline]
    pub const fn is_fence_instruction(&self) -> bool {
        matches!(self.opcode, Opcode::FENCE | Opcode::FENCE_I)
    }

    /// Decode the [`Instruction`] in the I-type format.
    #[inline]
    #[must_use]
    pub fn i_type(&self) -> (Register, Register, u64) {
        (Register::from_u8(self.op_a), Register::from_u8(self.op_b as u8), self.op_c)
    }

    /// Decode the [`Instruction`] in the S-type format: `(rs2, rs1, imm)`.
    #[inline]
    #[must_use]
    pub fn s_type(&self) -> (Register, Register, u64) {
        (Register::from_u8(self.op_a), Register::from_u8(self.op_b as u8), self.op_c)
    }

    /// Decode the [`Instruction`] in the B-type format: `(rs1, rs2, imm)`.
    #[inline]
    #[must_use]
    pub fn b_type(&self) -> (Register, Register, u64) {
        (Register::from_u8(self.op_a), Register::from_u8(self.op_b as u8), self.op_c)
    }

    /// Decode the [`Instruction`] in the J-type format: `(rd, imm)`.
    #[inline]
    #[must_use]
    pub fn j_type(&self) -> (Register, u64) {
        (Register::from_u8(self.op_a), self.op_b)
    }

    /// Decode the [`Instruction`] in the U-type format: `(rd, imm)`.
    #[inline]
    #[must_use]
    pub fn u_type(&self) -> (Register, u64) {
        (Register::from_u8(self.op_a), self.op_b)
    }
}

impl Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mnemonic = self.opcode.mnemonic();
        let op_a_formatted = format!("%x{}", self.op_a);
        let op_b_formatted = if self.imm_b {
            format!("{}", self.op_b as i64)
        } else {
            format!("%x{}", self.op_b)
        };
        let op_c_formatted = if self.imm_c {
            format!("{}", self.op_c as i64)
        } else {
            format!("%x{}", self.op_c)
        };

        let width = 10;
        write!(
            f,
            "{mnemonic:<width$} {op_a_formatted:<width$} {op_b_formatted:<width$} {op_c_formatted:<width$}"
        )
    }
}
