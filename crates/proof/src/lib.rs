//! Merkleization, witness handling, and the slow evaluator of the
//! fault-proof VM.
//!
//! The fast evaluator (in `fpvm-executor`) mutates a concrete state; this
//! crate commits that state to a Keccak-256 Merkle root, collects per-step
//! witnesses, and replays them with [`slow::slow_step`] — the pure
//! `(pre_root, witness) -> post_root` function an on-chain verifier mirrors.

#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![warn(missing_docs)]

pub mod merkle;
pub mod oracle;
pub mod slow;
pub mod witness;

pub use merkle::{memory_root, merkleize, scalar_root, state_root, AccessProof};
pub use oracle::WitnessMemoryView;
pub use slow::{fast_root, slow_step};
pub use witness::{step_witness, StepWitness, WitnessError, WitnessOracle};
