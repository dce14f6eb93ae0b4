//! ELF program loading.
//!
//! Translates a 64-bit little-endian RISC-V ELF image into an initial
//! [`VmState`]: every `PT_LOAD` segment's file bytes land at its virtual
//! address (the `memsz` tail past `filesz` stays zero, which the zero-default
//! memory already provides), `pc` is the entry point, and the heap watermark
//! starts at the first page above the loaded image.

use elf::{
    abi::{EM_RISCV, ET_EXEC, PT_LOAD},
    endian::LittleEndian,
    file::Class,
    ElfBytes,
};
use tracing::debug;

use fpvm_primitives::consts::{INSTRUCTION_WORD_SIZE, PAGE_SIZE};

use crate::{memory::Memory, state::VmState};

/// Parse an ELF image into an initial VM state.
///
/// # Errors
///
/// This function may return an error if the image is not a valid 64-bit
/// little-endian RISC-V executable.
pub fn load_elf(input: &[u8]) -> eyre::Result<VmState<Memory>> {
    let elf = ElfBytes::<LittleEndian>::minimal_parse(input)?;

    // Some sanity checks to make sure that the image is what we execute.
    if elf.ehdr.class != Class::ELF64 {
        eyre::bail!("must be a 64-bit elf");
    } else if elf.ehdr.e_machine != EM_RISCV {
        eyre::bail!("must be a riscv machine");
    } else if elf.ehdr.e_type != ET_EXEC {
        eyre::bail!("must be executable");
    }

    let entry = elf.ehdr.e_entry;
    if entry == 0 || entry % INSTRUCTION_WORD_SIZE as u64 != 0 {
        eyre::bail!("invalid entrypoint: {entry:#x}");
    }

    let segments = elf.segments().ok_or_else(|| eyre::eyre!("failed to get segments"))?;

    let mut state = VmState::new(Memory::new());
    let mut image_end = 0u64;

    for segment in segments.iter() {
        if segment.p_type != PT_LOAD {
            continue;
        }
        let vaddr = segment.p_vaddr;
        let filesz = segment.p_filesz;
        let memsz = segment.p_memsz;
        if filesz > memsz {
            eyre::bail!("segment file size {filesz} exceeds memory size {memsz}");
        }
        let end = vaddr
            .checked_add(memsz)
            .ok_or_else(|| eyre::eyre!("address overflow in segment"))?;

        let offset = usize::try_from(segment.p_offset)?;
        let len = usize::try_from(filesz)?;
        let bytes = input
            .get(offset..offset + len)
            .ok_or_else(|| eyre::eyre!("segment data out of bounds"))?;

        debug!(vaddr, filesz, memsz, flags = segment.p_flags, "loading segment");
        state.memory.set_range_untracked(vaddr, bytes);
        image_end = image_end.max(end);
    }

    state.pc = entry;
    state.heap = image_end.wrapping_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    state.memory.clear_touched();

    debug!(pc = state.pc, heap = state.heap, leaves = state.memory.leaf_count(), "loaded elf");
    Ok(state)
}
