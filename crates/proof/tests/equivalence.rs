//! Lockstep equivalence between the fast and slow evaluators.
//!
//! Every program here is driven one step at a time: the witness is collected
//! from the concrete pre-state, the slow evaluator replays it, and the
//! resulting root must match a full recomputation of the mutated concrete
//! state. Any divergence in instruction semantics, access ordering, or
//! Merkle folding fails these tests.

use fpvm_executor::{step, Memory, MemoryExt, Register, VmState};
use fpvm_primitives::{consts::fd, MapOracle, PreimageReader};
use fpvm_proof::{merkleize, slow_step, step_witness};

const OP_IMM: u32 = 0b001_0011;
const OP: u32 = 0b011_0011;
const LOAD: u32 = 0b000_0011;
const STORE: u32 = 0b010_0011;
const BRANCH: u32 = 0b110_0011;
const ECALL: u32 = 0x0000_0073;

fn i_type(op: u32, funct3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | op
}

fn r_type(op: u32, funct7: u32, funct3: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | op
}

fn s_type(funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | STORE
}

fn b_type(funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 1) << 7)
        | BRANCH
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(OP_IMM, 0b000, rd, rs1, imm)
}

fn exit_sequence(code: i32) -> Vec<u32> {
    vec![addi(17, 0, 93), addi(10, 0, code), ECALL]
}

/// A state with `program` installed at `pc = 0x1000`.
fn state_with(program: &[u32]) -> VmState<Memory> {
    let mut state = VmState::new(Memory::new());
    state.pc = 0x1000;
    for (i, word) in program.iter().enumerate() {
        state.memory.set_range_untracked(0x1000 + i as u64 * 4, &word.to_le_bytes());
    }
    state
}

/// Runs both evaluators side by side until exit, asserting root equality
/// after every step. Mirrors how the dispute-game driver uses the VM.
fn lockstep<P: PreimageReader>(
    state: &mut VmState<Memory>,
    oracle: &mut P,
    max_steps: usize,
) {
    let mut pre_root = merkleize(state);
    for i in 0..max_steps {
        let witness = step_witness(state, oracle).expect("witness collection failed");
        let post_root = slow_step(pre_root, &witness).expect("slow step failed");

        state.memory.clear_touched();
        step(state, oracle).expect("fast step failed");
        let fast_root = merkleize(state);

        assert_eq!(
            post_root, fast_root,
            "slow root diverged from fast root at step {i} (pc {:#x})",
            state.pc
        );
        pre_root = fast_root;
        if state.exited {
            return;
        }
    }
    panic!("ran out of steps");
}

#[test]
fn arithmetic_loop() {
    // acc = 10 + 9 + ... + 1, then exit(0).
    let mut program = vec![
        addi(1, 0, 10),                // x1 = 10
        addi(2, 0, 0),                 // x2 = 0
        r_type(OP, 0, 0b000, 2, 2, 1), // loop: add x2, x2, x1
        addi(1, 1, -1),                // addi x1, x1, -1
        b_type(0b001, 1, 0, -8),       // bne x1, x0, loop
    ];
    program.extend(exit_sequence(0));
    let mut state = state_with(&program);

    lockstep(&mut state, &mut MapOracle::new(), 100);
    assert!(state.exited);
    assert_eq!(state.exit_code, 0);
    assert_eq!(state.reg(Register::X2), 55);
}

#[test]
fn memory_traffic_across_leaves() {
    let mut program = vec![
        addi(1, 0, 0x7c),                 // x1 = 0x7c: 8 bytes straddle two leaves
        addi(2, 0, -2),                   // x2 = 0xffff...fffe
        s_type(0b011, 1, 2, 0),           // sd x2, 0(x1)
        i_type(LOAD, 0b011, 3, 1, 0),     // ld x3, 0(x1)
        i_type(LOAD, 0b000, 4, 1, 1),     // lb x4, 1(x1)
        s_type(0b000, 1, 3, 64),          // sb x3, 64(x1)
        i_type(LOAD, 0b010, 5, 1, -4),    // lw x5, -4(x1)
        s_type(0b010, 1, 5, 124),         // sw x5, 124(x1)
    ];
    program.extend(exit_sequence(0));
    let mut state = state_with(&program);

    lockstep(&mut state, &mut MapOracle::new(), 100);
    assert_eq!(state.reg(Register::X3), u64::MAX - 1);
}

#[test]
fn division_and_word_ops() {
    let mut program = vec![
        addi(1, 0, -7),
        addi(2, 0, 0),
        r_type(OP, 1, 0b100, 3, 1, 2),           // div x3, x1, x2 (by zero)
        r_type(OP, 1, 0b111, 4, 1, 2),           // remu x4, x1, x2 (by zero)
        r_type(0b011_1011, 1, 0b000, 5, 1, 1),   // mulw x5, x1, x1
        r_type(0b011_1011, 0b0100000, 0b000, 6, 1, 2), // subw x6, x1, x2
        r_type(OP, 1, 0b001, 7, 1, 1),           // mulh x7, x1, x1
    ];
    program.extend(exit_sequence(0));
    let mut state = state_with(&program);

    lockstep(&mut state, &mut MapOracle::new(), 100);
    assert_eq!(state.reg(Register::X3), u64::MAX);
    assert_eq!(state.reg(Register::X4), (-7i64) as u64);
    assert_eq!(state.reg(Register::X5), 49);
}

#[test]
fn preimage_read_through_both_evaluators() {
    let mut oracle = MapOracle::new();
    let key = oracle.insert_keccak256(vec![0xab; 37]);

    let mut program = vec![
        // write(fd=6, buf=0x100, count=32): submit the key.
        addi(17, 0, 64),
        addi(10, 0, fd::FD_PREIMAGE_WRITE as i32),
        addi(11, 0, 0x100),
        addi(12, 0, 32),
        ECALL,
        // read(fd=5, buf=0x200, count=32): pull the first window.
        addi(17, 0, 63),
        addi(10, 0, fd::FD_PREIMAGE_READ as i32),
        addi(11, 0, 0x200),
        addi(12, 0, 32),
        ECALL,
        // read(fd=5, buf=0x220, count=32): pull the remainder.
        addi(17, 0, 63),
        addi(10, 0, fd::FD_PREIMAGE_READ as i32),
        addi(11, 0, 0x220),
        addi(12, 0, 32),
        ECALL,
    ];
    program.extend(exit_sequence(0));
    let mut state = state_with(&program);
    state.memory.set_range_untracked(0x100, key.as_bytes());

    lockstep(&mut state, &mut oracle, 100);

    // The stream is the 8-byte big-endian length followed by the value.
    assert_eq!(state.memory.read_bytes::<8>(0x200).unwrap(), 37u64.to_be_bytes());
    assert_eq!(state.memory.read_bytes::<24>(0x208).unwrap(), [0xab; 24]);
    assert_eq!(state.memory.read_bytes::<13>(0x220).unwrap(), [0xab; 13]);
    assert_eq!(state.preimage_offset, 45);
    assert_eq!(state.preimage_key, key);
}

#[test]
fn heap_syscalls_in_lockstep() {
    let mut program = vec![
        addi(17, 0, 214), // brk(0)
        addi(10, 0, 0),
        ECALL,
        addi(17, 0, 222), // mmap(0, 0x1234, _, _, -1, _)
        addi(10, 0, 0),
        addi(11, 0, 0x712),
        addi(14, 0, -1),
        ECALL,
        addi(17, 0, 113), // clock_gettime: stubbed to 0
        ECALL,
        addi(17, 0, 1000), // unknown syscall: -ENOSYS, keeps running
        ECALL,
    ];
    program.extend(exit_sequence(1));
    let mut state = state_with(&program);
    state.heap = 0x4000_0000;

    lockstep(&mut state, &mut MapOracle::new(), 100);
    assert!(state.exited);
    assert_eq!(state.exit_code, 1);
    assert_eq!(state.heap, 0x4000_1000);
}

#[test]
fn exited_state_steps_are_root_stable() {
    let mut state = state_with(&exit_sequence(7));
    let mut oracle = MapOracle::new();
    lockstep(&mut state, &mut oracle, 10);
    assert!(state.exited);

    // Once exited, a step is a no-op in both evaluators: root unchanged.
    let root = merkleize(&state);
    for _ in 0..3 {
        let witness = step_witness(&state, &mut oracle).unwrap();
        assert_eq!(slow_step(root, &witness).unwrap(), root);
        state.memory.clear_touched();
        step(&mut state, &mut oracle).unwrap();
        assert_eq!(merkleize(&state), root);
    }
}

#[test]
fn untouched_memory_is_unchanged() {
    // Property: a step only moves bytes inside its touched leaves.
    let mut program = vec![s_type(0b011, 1, 2, 0)]; // sd x2, 0(x1)
    program.extend(exit_sequence(0));
    let mut state = state_with(&program);
    state.set_reg(Register::X1, 0x8000);
    state.set_reg(Register::X2, 0x1234_5678);
    state.memory.set_range_untracked(0x9000, &[0xee; 64]);

    let mut oracle = MapOracle::new();
    state.memory.clear_touched();
    step(&mut state, &mut oracle).unwrap();

    let touched = state.memory.touched_leaves().to_vec();
    assert!(touched.contains(&(0x8000 >> 6)));
    assert!(!touched.contains(&(0x9000 >> 6)));
    assert_eq!(state.memory.read_bytes::<64>(0x9000).unwrap(), [0xee; 64]);
}

#[test]
fn root_is_a_function_of_state_alone() {
    // Two states built through different access patterns but with identical
    // contents produce identical roots.
    let mut a = VmState::new(Memory::new());
    a.pc = 0x1000;
    a.memory.write_u64(0x2000, 5).unwrap();
    a.memory.write_u8(0x3000, 9).unwrap();

    let mut b = VmState::new(Memory::new());
    b.pc = 0x1000;
    b.memory.write_u8(0x3000, 9).unwrap();
    b.memory.write_u8(0x2000, 5).unwrap();
    for i in 1..8 {
        b.memory.write_u8(0x2000 + i, 0).unwrap();
    }

    assert_eq!(merkleize(&a), merkleize(&b));
}
