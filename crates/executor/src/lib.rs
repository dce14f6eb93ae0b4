//! The concrete RV64IM interpreter of the fault-proof VM.
//!
//! This crate owns the instruction semantics. The [`executor::step`] function
//! is generic over the [`memory::StepMemory`] seam: instantiated with the
//! concrete [`memory::Memory`] it is the fast evaluator; the proof crate
//! instantiates it with a Merkle-witness view to obtain the slow evaluator
//! with bit-identical behavior.

#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![warn(missing_docs)]

pub mod decode;
mod elf;
mod executor;
mod instruction;
pub mod memory;
mod opcode;
mod register;
mod state;
pub mod syscall;

pub use decode::decode;
pub use elf::load_elf;
pub use executor::{run, step, ExecutionError, M64, PC_INC};
pub use instruction::Instruction;
pub use memory::{Memory, MemoryError, MemoryExt, StepMemory};
pub use opcode::Opcode;
pub use register::Register;
pub use state::{StateDecodeError, VmState};
pub use syscall::SyscallCode;
