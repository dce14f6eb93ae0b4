//! The witness-driven slow evaluator.
//!
//! `slow_step` is the executable specification of the on-chain verifier: a
//! pure function from `(pre-state root, step witness)` to the post-state
//! root. It runs the exact same interpreter as the fast evaluator, just over
//! the Merkle-witness memory view, so the two agree bit-for-bit or the
//! witness is rejected.

use tracing::trace;

use fpvm_executor::{step, Memory, VmState};
use fpvm_primitives::consts::ACCESS_PROOF_SIZE;

use crate::{
    merkle::{state_root, AccessProof},
    oracle::WitnessMemoryView,
    witness::{StepWitness, WitnessError, WitnessOracle},
};

/// Replays one step against `pre_root`, returning the post-state root.
///
/// # Errors
///
/// Fails with a [`WitnessError`] when the witness does not authenticate
/// against `pre_root`, does not cover the step's memory accesses, or the
/// replayed instruction itself is unsupported. All failures are fatal; the
/// dispute game retries with a better witness, not this function.
pub fn slow_step(pre_root: [u8; 32], witness: &StepWitness) -> Result<[u8; 32], WitnessError> {
    // Authenticate the scalar half of the witness.
    let (pre_state, mem_root) = VmState::decode_scalars(&witness.state, ())?;
    if state_root(&pre_state, &mem_root) != pre_root {
        return Err(WitnessError::StateRootMismatch);
    }

    // Authenticate and ingest the memory access proofs.
    if witness.mem_proof.len() % ACCESS_PROOF_SIZE != 0 {
        return Err(WitnessError::TruncatedProof(witness.mem_proof.len()));
    }
    let mut view = WitnessMemoryView::new(mem_root);
    for chunk in witness.mem_proof.chunks_exact(ACCESS_PROOF_SIZE) {
        view.ingest(&AccessProof::decode(chunk)?)?;
    }

    // Replay the step over the witness view.
    let mut state = pre_state.with_memory(view);
    let mut oracle = WitnessOracle::new(witness);
    step(&mut state, &mut oracle)?;

    let post_root = state_root(&state, &state.memory.root());
    trace!(step = state.step, pc = state.pc, "slow step replayed");
    Ok(post_root)
}

/// Convenience for harnesses: fully recomputes the root of a concrete state.
///
/// Identical to [`crate::merkle::merkleize`]; re-exported here so the two
/// evaluators are driven from one module in lockstep tests.
#[must_use]
pub fn fast_root(state: &VmState<Memory>) -> [u8; 32] {
    crate::merkle::merkleize(state)
}
