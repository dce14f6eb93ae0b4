//! The instruction-level step function.
//!
//! One interpreter serves both evaluators: it is generic over the
//! [`StepMemory`] seam, so the fast evaluator runs it over the concrete
//! [`Memory`] and the slow evaluator over a Merkle-witness view. Everything
//! the interpreter does is a pure function of `(state, preimage oracle)`.

use std::num::Wrapping;

use thiserror::Error;
use tracing::trace;

use fpvm_primitives::{PreimageError, PreimageReader};

use crate::{
    decode::decode,
    memory::{Memory, MemoryError, MemoryExt, StepMemory},
    register::Register,
    state::VmState,
    syscall,
    Instruction, Opcode,
};

/// Max u64 value.
pub const M64: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// The program-counter increment of every non-branching instruction.
pub const PC_INC: u64 = 4;

/// Errors that a step can throw.
///
/// Every error here is fatal to the step: it indicates an unsupported program
/// or a malformed witness, never a recoverable guest-level condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The word at `pc` decodes to nothing in the supported coverage
    /// (RV64IM + Zifencei + the Zicsr stubs).
    #[error("unsupported instruction {word:#010x} at pc {pc:#x}")]
    Unsupported {
        /// The fetched instruction word.
        word: u32,
        /// The program counter it was fetched from.
        pc: u64,
    },

    /// The program counter lost its 4-byte alignment.
    #[error("program counter {0:#x} is not 4-byte aligned")]
    UnalignedPc(u64),

    /// A memory access could not be served by the backend.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A pre-image failure that must abort the step.
    #[error(transparent)]
    Preimage(#[from] PreimageError),
}

/// Executes a single instruction, mutating `state` in place.
///
/// A step on an exited state is a complete no-op: the state (and therefore
/// its root) is unchanged.
pub fn step<M: StepMemory, P: PreimageReader + ?Sized>(
    state: &mut VmState<M>,
    oracle: &mut P,
) -> Result<(), ExecutionError> {
    if state.exited {
        return Ok(());
    }
    if state.pc % PC_INC != 0 {
        return Err(ExecutionError::UnalignedPc(state.pc));
    }

    let word = state.memory.read_u32(state.pc)?;
    let instruction =
        decode(word).ok_or(ExecutionError::Unsupported { word, pc: state.pc })?;
    trace!(pc = state.pc, step = state.step, ?instruction, "execute");

    execute_instruction(state, &instruction, oracle)?;
    state.step += 1;
    Ok(())
}

/// Execute the given instruction over the current state.
fn execute_instruction<M: StepMemory, P: PreimageReader + ?Sized>(
    state: &mut VmState<M>,
    instruction: &Instruction,
    oracle: &mut P,
) -> Result<(), ExecutionError> {
    let mut next_pc = state.pc.wrapping_add(PC_INC);

    if instruction.is_alu_instruction() {
        execute_alu(state, instruction);
    } else if instruction.is_memory_load_instruction() {
        execute_load(state, instruction)?;
    } else if instruction.is_memory_store_instruction() {
        execute_store(state, instruction)?;
    } else if instruction.is_branch_instruction() {
        execute_branch(state, instruction, &mut next_pc);
    } else if instruction.is_jump_instruction() {
        next_pc = execute_jump(state, instruction);
    } else if instruction.is_utype_instruction() {
        let (rd, imm) = instruction.u_type();
        let a = if instruction.opcode == Opcode::AUIPC {
            state.pc.wrapping_add(imm)
        } else {
            imm
        };
        state.set_reg(rd, a);
    } else if instruction.opcode == Opcode::ECALL {
        syscall::dispatch(state, oracle)?;
    } else if instruction.opcode == Opcode::EBREAK {
        // Debug trap: terminate deterministically.
        state.exited = true;
        state.exit_code = 2;
    } else if instruction.is_csr_instruction() {
        // Zicsr stub: reads observe 0, writes are dropped.
        let rd = Register::from_u8(instruction.op_a);
        state.set_reg(rd, 0);
    } else if instruction.is_fence_instruction() {
        // Single hart over coherent memory: nothing to order.
    } else {
        unreachable!("decoded instruction without an execution class: {instruction:?}");
    }

    state.pc = next_pc;
    Ok(())
}

/// Resolves the ALU operand values: `(rd, b, c)`.
fn alu_rr<M>(state: &VmState<M>, instruction: &Instruction) -> (Register, u64, u64) {
    let rd = Register::from_u8(instruction.op_a);
    let b = if instruction.imm_b {
        instruction.op_b
    } else {
        state.reg(Register::from_u8(instruction.op_b as u8))
    };
    let c = if instruction.imm_c {
        instruction.op_c
    } else {
        state.reg(Register::from_u8(instruction.op_c as u8))
    };
    (rd, b, c)
}

/// Execute an ALU instruction.
#[allow(clippy::too_many_lines)]
fn execute_alu<M>(state: &mut VmState<M>, instruction: &Instruction) {
    let (rd, b, c) = alu_rr(state, instruction);
    let a = match instruction.opcode {
        Opcode::ADD | Opcode::ADDI => (Wrapping(b) + Wrapping(c)).0,
        Opcode::SUB => (Wrapping(b) - Wrapping(c)).0,
        Opcode::XOR => b ^ c,
        Opcode::OR => b | c,
        Opcode::AND => b & c,
        Opcode::SLL => b << (c & 0x3f),
        Opcode::SRL => b >> (c & 0x3f),
        Opcode::SRA => ((b as i64) >> (c & 0x3f)) as u64,
        Opcode::SLT => u64::from((b as i64) < (c as i64)),
        Opcode::SLTU => u64::from(b < c),
        Opcode::MUL => (Wrapping(b as i64) * Wrapping(c as i64)).0 as u64,
        Opcode::MULH => (((b as i64) as i128).wrapping_mul((c as i64) as i128) >> 64) as u64,
        Opcode::MULHU => ((u128::from(b) * u128::from(c)) >> 64) as u64,
        Opcode::MULHSU => ((((b as i64) as i128) * (c as i128)) >> 64) as u64,
        Opcode::DIV => {
            if c == 0 {
                M64
            } else {
                (b as i64).wrapping_div(c as i64) as u64
            }
        }
        Opcode::DIVU => {
            if c == 0 {
                M64
            } else {
                b / c
            }
        }
        Opcode::REM => {
            if c == 0 {
                b
            } else {
                (b as i64).wrapping_rem(c as i64) as u64
            }
        }
        Opcode::REMU => {
            if c == 0 {
                b
            } else {
                b % c
            }
        }
        // RV64 word variants: operate on the low 32 bits, sign-extend.
        Opcode::ADDW => (Wrapping(b as i32) + Wrapping(c as i32)).0 as i64 as u64,
        Opcode::SUBW => (Wrapping(b as i32) - Wrapping(c as i32)).0 as i64 as u64,
        Opcode::MULW => (Wrapping(b as i32) * Wrapping(c as i32)).0 as i64 as u64,
        Opcode::DIVW => {
            if c as i32 == 0 {
                M64
            } else {
                (b as i32).wrapping_div(c as i32) as i64 as u64
            }
        }
        Opcode::DIVUW => {
            if c as u32 == 0 {
                M64
            } else {
                ((b as u32 / c as u32) as i32) as i64 as u64
            }
        }
        Opcode::REMW => {
            if c as i32 == 0 {
                (b as i32) as u64
            } else {
                (b as i32).wrapping_rem(c as i32) as i64 as u64
            }
        }
        Opcode::REMUW => {
            if c as u32 == 0 {
                (b as i32) as u64
            } else {
                (((b as u32) % (c as u32)) as i32) as i64 as u64
            }
        }
        Opcode::SLLW => (((b as u32) << (c & 0x1f)) as i32) as i64 as u64,
        Opcode::SRLW => (((b as u32) >> (c & 0x1f)) as i32) as i64 as u64,
        Opcode::SRAW => ((b as i32) >> (c & 0x1f)) as i64 as u64,
        _ => unreachable!(),
    };
    state.set_reg(rd, a);
}

/// Execute a load instruction.
fn execute_load<M: StepMemory>(
    state: &mut VmState<M>,
    instruction: &Instruction,
) -> Result<(), ExecutionError> {
    let (rd, rs1, imm) = instruction.i_type();
    let addr = state.reg(rs1).wrapping_add(imm);
    let a = match instruction.opcode {
        Opcode::LB => state.memory.read_u8(addr)? as i8 as i64 as u64,
        Opcode::LH => state.memory.read_u16(addr)? as i16 as i64 as u64,
        Opcode::LW => state.memory.read_u32(addr)? as i32 as i64 as u64,
        Opcode::LBU => u64::from(state.memory.read_u8(addr)?),
        Opcode::LHU => u64::from(state.memory.read_u16(addr)?),
        Opcode::LWU => u64::from(state.memory.read_u32(addr)?),
        Opcode::LD => state.memory.read_u64(addr)?,
        _ => unreachable!(),
    };
    state.set_reg(rd, a);
    Ok(())
}

/// Execute a store instruction.
fn execute_store<M: StepMemory>(
    state: &mut VmState<M>,
    instruction: &Instruction,
) -> Result<(), ExecutionError> {
    let (rs2, rs1, imm) = instruction.s_type();
    let addr = state.reg(rs1).wrapping_add(imm);
    let value = state.reg(rs2);
    match instruction.opcode {
        Opcode::SB => state.memory.write_u8(addr, value as u8)?,
        Opcode::SH => state.memory.write_u16(addr, value as u16)?,
        Opcode::SW => state.memory.write_u32(addr, value as u32)?,
        Opcode::SD => state.memory.write_u64(addr, value)?,
        _ => unreachable!(),
    }
    Ok(())
}

/// Execute a branch instruction, updating `next_pc` when taken.
fn execute_branch<M>(state: &VmState<M>, instruction: &Instruction, next_pc: &mut u64) {
    let (rs1, rs2, imm) = instruction.b_type();
    let a = state.reg(rs1);
    let b = state.reg(rs2);
    let branch = match instruction.opcode {
        Opcode::BEQ => a == b,
        Opcode::BNE => a != b,
        Opcode::BLT => (a as i64) < (b as i64),
        Opcode::BGE => (a as i64) >= (b as i64),
        Opcode::BLTU => a < b,
        Opcode::BGEU => a >= b,
        _ => unreachable!(),
    };
    if branch {
        *next_pc = state.pc.wrapping_add(imm);
    }
}

/// Execute a jump instruction, returning the jump target.
fn execute_jump<M>(state: &mut VmState<M>, instruction: &Instruction) -> u64 {
    match instruction.opcode {
        Opcode::JAL => {
            let (rd, imm) = instruction.j_type();
            let next_pc = state.pc.wrapping_add(imm);
            state.set_reg(rd, state.pc.wrapping_add(PC_INC));
            next_pc
        }
        Opcode::JALR => {
            let (rd, rs1, imm) = instruction.i_type();
            // Read rs1 before linking: rd and rs1 may alias.
            let next_pc = state.reg(rs1).wrapping_add(imm) & !1_u64;
            state.set_reg(rd, state.pc.wrapping_add(PC_INC));
            next_pc
        }
        _ => unreachable!(),
    }
}

/// Runs the fast evaluator until exit or `max_steps`, returning the number of
/// steps executed.
pub fn run<P: PreimageReader + ?Sized>(
    state: &mut VmState<Memory>,
    oracle: &mut P,
    max_steps: u64,
) -> Result<u64, ExecutionError> {
    let mut steps = 0;
    while steps < max_steps && !state.exited {
        state.memory.clear_touched();
        step(state, oracle)?;
        steps += 1;
    }
    Ok(steps)
}
