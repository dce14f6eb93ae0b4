//! RISC-V ISA suite harness.
//!
//! Runs the `rv64ui-p` and `rv64um-p` test ELFs (built with the patched test
//! environment that reports pass/fail through the exit syscall) through both
//! evaluators. The suites are external build artifacts; when the directory is
//! absent the harness skips rather than fails.

use std::path::{Path, PathBuf};

use fpvm_executor::{load_elf, run, step, Memory, VmState};
use fpvm_primitives::MapOracle;
use fpvm_proof::{merkleize, slow_step, step_witness};

const MAX_STEPS: u64 = 10_000;

fn suite_dir(category: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../tests/riscv-tests").join(category)
}

fn for_each_suite(category: &str, run_one: impl Fn(&Path)) {
    let dir = suite_dir(category);
    if !dir.exists() {
        eprintln!("missing tests: {} (skipping)", dir.display());
        return;
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
        .expect("failed to read test suite dir")
        .map(|entry| entry.expect("failed to read dir entry").path())
        .filter(|path| {
            path.is_file() && path.extension().map_or(true, |ext| ext != "dump")
        })
        .collect();
    assert!(!entries.is_empty(), "expected at least one test suite binary");
    entries.sort();

    for path in entries {
        run_one(&path);
    }
}

fn load_suite(path: &Path) -> VmState<Memory> {
    let image = std::fs::read(path).expect("failed to read test ELF");
    load_elf(&image).expect("must load test suite ELF binary")
}

fn check_exit(state: &VmState<Memory>, path: &Path) {
    assert!(state.exited, "{}: ran out of steps", path.display());
    assert_eq!(
        state.exit_code,
        0,
        "{}: failed at test case {}",
        path.display(),
        state.exit_code >> 1
    );
}

fn run_fast_suite(path: &Path) {
    let mut state = load_suite(path);
    run(&mut state, &mut MapOracle::new(), MAX_STEPS).expect("fast execution failed");
    check_exit(&state, path);
}

fn run_slow_suite(path: &Path) {
    let mut state = load_suite(path);
    let mut oracle = MapOracle::new();
    let mut pre_root = merkleize(&state);

    for _ in 0..MAX_STEPS {
        let witness = step_witness(&state, &mut oracle).expect("witness collection failed");
        let post_root = slow_step(pre_root, &witness).expect("slow step failed");

        state.memory.clear_touched();
        step(&mut state, &mut oracle).expect("fast step failed");
        let fast_root = merkleize(&state);

        assert_eq!(
            post_root,
            fast_root,
            "{}: slow state must match fast state at step {} (pc {:#x})",
            path.display(),
            state.step,
            state.pc,
        );
        pre_root = fast_root;

        if state.exited {
            break;
        }
    }
    check_exit(&state, path);
}

#[test]
fn rv64ui_p_fast() {
    for_each_suite("rv64ui-p", run_fast_suite);
}

#[test]
fn rv64um_p_fast() {
    for_each_suite("rv64um-p", run_fast_suite);
}

#[test]
fn rv64ui_p_slow() {
    for_each_suite("rv64ui-p", run_slow_suite);
}

#[test]
fn rv64um_p_slow() {
    for_each_suite("rv64um-p", run_slow_suite);
}
