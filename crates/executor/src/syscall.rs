//! The minimal Linux RV64 syscall shim.
//!
//! A system call is invoked by the `ecall` instruction with the syscall
//! number in `a7` and arguments in `a0..a5`; the result goes back in `a0`.
//! The sandbox has no real file system or clock: the only stateful
//! descriptors are the pre-image oracle transport, everything else is
//! acknowledged or rejected deterministically.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use fpvm_primitives::{
    consts::{errno, fd, PAGE_SIZE},
    PreimageError, PreimageReader,
};

use crate::{
    executor::ExecutionError,
    memory::{MemoryExt, StepMemory},
    register::Register,
    state::VmState,
};

/// System calls handled by the shim, keyed by their Linux RV64 numbers.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u64)]
pub enum SyscallCode {
    /// Manipulate a file descriptor. Sandbox: 0 for known fds.
    FCNTL = 25,

    /// Open a file. Sandbox: there is nothing to open.
    OPENAT = 56,

    /// Close a file descriptor. Sandbox: 0 for known fds.
    CLOSE = 57,

    /// Read from a file descriptor; only the pre-image fd carries data.
    READ = 63,

    /// Write to a file descriptor; feeds the pre-image key and hint streams.
    WRITE = 64,

    /// Poll file descriptors. Sandbox: nothing to wait for.
    PPOLL = 73,

    /// Terminate the program.
    EXIT = 93,

    /// Terminate all threads; identical to `EXIT` on a single hart.
    EXIT_GROUP = 94,

    /// Read a clock. Sandbox: time does not exist.
    CLOCK_GETTIME = 113,

    /// Yield the processor. Sandbox: there is no other hart.
    SCHED_YIELD = 124,

    /// Process id.
    GETPID = 172,

    /// Real user id.
    GETUID = 174,

    /// Effective user id.
    GETEUID = 175,

    /// Real group id.
    GETGID = 176,

    /// Effective group id.
    GETEGID = 177,

    /// Thread id.
    GETTID = 178,

    /// Move the program break.
    BRK = 214,

    /// Map anonymous memory by bumping the heap watermark.
    MMAP = 222,
}

impl SyscallCode {
    /// Maps a syscall number to its code.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            25 => Some(SyscallCode::FCNTL),
            56 => Some(SyscallCode::OPENAT),
            57 => Some(SyscallCode::CLOSE),
            63 => Some(SyscallCode::READ),
            64 => Some(SyscallCode::WRITE),
            73 => Some(SyscallCode::PPOLL),
            93 => Some(SyscallCode::EXIT),
            94 => Some(SyscallCode::EXIT_GROUP),
            113 => Some(SyscallCode::CLOCK_GETTIME),
            124 => Some(SyscallCode::SCHED_YIELD),
            172 => Some(SyscallCode::GETPID),
            174 => Some(SyscallCode::GETUID),
            175 => Some(SyscallCode::GETEUID),
            176 => Some(SyscallCode::GETGID),
            177 => Some(SyscallCode::GETEGID),
            178 => Some(SyscallCode::GETTID),
            214 => Some(SyscallCode::BRK),
            222 => Some(SyscallCode::MMAP),
            _ => None,
        }
    }
}

/// The highest file descriptor the sandbox knows about.
const MAX_KNOWN_FD: u64 = fd::FD_PREIMAGE_WRITE;

#[inline]
fn neg_errno(code: u64) -> u64 {
    (-(code as i64)) as u64
}

#[inline]
fn page_align_up(value: u64) -> u64 {
    value.wrapping_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Dispatches the `ecall` at the current state.
///
/// Returns `Ok` with `a0` updated per the syscall, or an error for the
/// pre-image failures that must abort the step.
pub(crate) fn dispatch<M: StepMemory, P: PreimageReader + ?Sized>(
    state: &mut VmState<M>,
    oracle: &mut P,
) -> Result<(), ExecutionError> {
    let number = state.reg(Register::X17);
    let a0 = state.reg(Register::X10);
    let a1 = state.reg(Register::X11);
    let a2 = state.reg(Register::X12);
    let a4 = state.reg(Register::X14);

    let Some(code) = SyscallCode::from_u64(number) else {
        trace!(number, "unimplemented syscall");
        state.set_reg(Register::X10, neg_errno(errno::ENOSYS));
        return Ok(());
    };
    trace!(?code, a0, a1, a2, "syscall");

    let ret = match code {
        SyscallCode::EXIT | SyscallCode::EXIT_GROUP => {
            state.exited = true;
            state.exit_code = (a0 & 0xff) as u8;
            debug!(exit_code = state.exit_code, step = state.step, "program exited");
            a0
        }
        SyscallCode::BRK => {
            if a0 != 0 {
                state.heap = a0;
            }
            state.heap
        }
        SyscallCode::MMAP => mmap(state, a0, a1, a4),
        SyscallCode::READ => read(state, oracle, a0, a1, a2)?,
        SyscallCode::WRITE => write(state, a0, a1, a2)?,
        SyscallCode::FCNTL | SyscallCode::CLOSE => {
            if a0 <= MAX_KNOWN_FD {
                0
            } else {
                neg_errno(errno::EBADF)
            }
        }
        SyscallCode::OPENAT => neg_errno(errno::EBADF),
        SyscallCode::PPOLL
        | SyscallCode::CLOCK_GETTIME
        | SyscallCode::SCHED_YIELD
        | SyscallCode::GETPID
        | SyscallCode::GETUID
        | SyscallCode::GETEUID
        | SyscallCode::GETGID
        | SyscallCode::GETEGID
        | SyscallCode::GETTID => 0,
    };
    state.set_reg(Register::X10, ret);
    Ok(())
}

/// Anonymous bump allocation: the heap watermark advances by the page-aligned
/// length and the previous watermark is returned. File-backed mappings do not
/// exist in the sandbox.
fn mmap<M>(state: &mut VmState<M>, addr: u64, length: u64, fd_arg: u64) -> u64 {
    if fd_arg as i64 != -1 {
        return neg_errno(errno::EINVAL);
    }
    if addr == 0 {
        let mapped = state.heap;
        state.heap = state.heap.wrapping_add(page_align_up(length));
        mapped
    } else {
        // Fixed-address request: the memory is already addressable.
        addr
    }
}

fn read<M: StepMemory, P: PreimageReader + ?Sized>(
    state: &mut VmState<M>,
    oracle: &mut P,
    fd_arg: u64,
    buf: u64,
    count: u64,
) -> Result<u64, ExecutionError> {
    match fd_arg {
        fd::FD_PREIMAGE_READ => {
            let part = match oracle.part(state.preimage_key, state.preimage_offset) {
                Ok(part) => part,
                // A window past the stream end is a recoverable caller bug.
                Err(PreimageError::PartOffsetOOB { .. }) => {
                    return Ok(neg_errno(errno::EINVAL))
                }
                Err(err) => return Err(err.into()),
            };
            let n = count.min(part.len as u64);
            for i in 0..n {
                state.memory.write_u8(buf.wrapping_add(i), part.data[i as usize])?;
            }
            state.preimage_offset += n;
            Ok(n)
        }
        // Hint responses carry no data; acknowledge the full read.
        fd::FD_HINT_READ => Ok(count),
        _ => Ok(0),
    }
}

fn write<M: StepMemory>(
    state: &mut VmState<M>,
    fd_arg: u64,
    buf: u64,
    count: u64,
) -> Result<u64, ExecutionError> {
    match fd_arg {
        // Program output and hints are absorbed; both are advisory.
        fd::FD_STDOUT | fd::FD_STDERR | fd::FD_HINT_WRITE => Ok(count),
        fd::FD_PREIMAGE_WRITE => {
            // Shift the accumulated key left byte-for-byte; the client writes
            // 32 bytes in total before reading, which leaves exactly the new
            // key in the register. A fresh key restarts the stream.
            let mut key = *state.preimage_key.as_bytes();
            for i in 0..count {
                let byte = state.memory.read_u8(buf.wrapping_add(i))?;
                key.copy_within(1..32, 0);
                key[31] = byte;
            }
            state.preimage_key = key.into();
            state.preimage_offset = 0;
            Ok(count)
        }
        _ => Ok(neg_errno(errno::EBADF)),
    }
}
