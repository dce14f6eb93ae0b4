//! The step witness and its ABI-stable encodings.
//!
//! A [`StepWitness`] carries everything the on-chain verifier needs to
//! re-execute one step: the canonical scalar serialization of the pre-state,
//! the memory access proofs, and — when the step reads the oracle — the
//! pre-image behind the read.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fpvm_executor::{
    step, ExecutionError, Memory, StateDecodeError, VmState,
};
use fpvm_primitives::{
    consts::{bytes32_to_u64, u64_to_bytes32, ACCESS_PROOF_SIZE},
    keccak::selector,
    KeyType, PreimageError, PreimageKey, PreimageReader,
};

use crate::merkle::{memory_root, open_all};

/// The 4-byte selector of `step(bytes,bytes,bytes32)`.
pub static STEP_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("step(bytes,bytes,bytes32)"));

/// The 4-byte selector of
/// `cheatLocalKey(uint256,bytes32,bytes32,uint256,bytes32)`.
pub static CHEAT_LOCAL_KEY_SELECTOR: Lazy<[u8; 4]> =
    Lazy::new(|| selector("cheatLocalKey(uint256,bytes32,bytes32,uint256,bytes32)"));

/// The 4-byte selector of `loadKeccak256PreimagePart(uint256,bytes)`.
pub static LOAD_KECCAK256_PREIMAGE_PART_SELECTOR: Lazy<[u8; 4]> =
    Lazy::new(|| selector("loadKeccak256PreimagePart(uint256,bytes)"));

/// Failures of witness construction, validation, or replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WitnessError {
    /// The scalar witness does not hash to the claimed pre-state root.
    #[error("state witness does not hash to the pre-state root")]
    StateRootMismatch,

    /// An access proof does not fold to the pre-state memory root.
    #[error("access proof for leaf {index:#x} does not fold to the memory root")]
    ProofRootMismatch {
        /// The leaf index of the failing entry.
        index: u64,
    },

    /// The memory proof blob is not a whole number of access entries.
    #[error("memory proof length {0} is not a multiple of the access entry size")]
    TruncatedProof(usize),

    /// The step input does not start with the `step` selector.
    #[error("step input selector mismatch")]
    SelectorMismatch,

    /// The step input is shorter than its own offsets claim.
    #[error("step input truncated at byte {0}")]
    TruncatedInput(usize),

    /// The witness carries no pre-image to prove.
    #[error("witness has no pre-image to prove")]
    NoPreimage,

    /// The scalar witness itself is malformed.
    #[error(transparent)]
    State(#[from] StateDecodeError),

    /// The replayed step failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The witness pre-image key is unusable.
    #[error(transparent)]
    Preimage(#[from] PreimageError),
}

/// The witness of a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepWitness {
    /// The canonical scalar serialization of the pre-state.
    pub state: Vec<u8>,

    /// Concatenated access proofs, one per touched leaf, in touch order.
    pub mem_proof: Vec<u8>,

    /// The pre-image key read during the step; zeroed when no pre-image is
    /// accessed.
    pub preimage_key: PreimageKey,

    /// The pre-image value, including the 8-byte length prefix.
    pub preimage_value: Vec<u8>,

    /// The stream offset the step read at.
    pub preimage_offset: u64,
}

impl StepWitness {
    /// Whether the witnessed step reads a pre-image.
    #[must_use]
    pub fn has_preimage(&self) -> bool {
        !self.preimage_key.is_zero()
    }

    /// Encodes the `step(bytes,bytes,bytes32)` call data for the on-chain
    /// verifier.
    #[must_use]
    pub fn encode_step_input(&self, local_context: &[u8; 32]) -> Vec<u8> {
        let state_padding = (32 - self.state.len() % 32) % 32;
        let proof_padding = (32 - self.mem_proof.len() % 32) % 32;

        let mut input = Vec::with_capacity(
            4 + 32 * 5 + self.state.len() + state_padding + self.mem_proof.len() + proof_padding,
        );
        input.extend_from_slice(&*STEP_SELECTOR);
        // Head: state offset, proof offset, local context.
        input.extend_from_slice(&u64_to_bytes32(32 * 3));
        input.extend_from_slice(&u64_to_bytes32(
            32 * 3 + 32 + (self.state.len() + state_padding) as u64,
        ));
        input.extend_from_slice(local_context);
        // Tail: length-prefixed, zero-padded byte strings.
        input.extend_from_slice(&u64_to_bytes32(self.state.len() as u64));
        input.extend_from_slice(&self.state);
        input.extend_from_slice(&vec![0u8; state_padding]);
        input.extend_from_slice(&u64_to_bytes32(self.mem_proof.len() as u64));
        input.extend_from_slice(&self.mem_proof);
        input.extend_from_slice(&vec![0u8; proof_padding]);
        input
    }

    /// Decodes `step(bytes,bytes,bytes32)` call data back into
    /// `(state, proof, local_context)`.
    pub fn decode_step_input(
        input: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, [u8; 32]), WitnessError> {
        let word = |pos: usize| -> Result<u64, WitnessError> {
            let bytes: &[u8; 32] = input
                .get(pos..pos + 32)
                .ok_or(WitnessError::TruncatedInput(pos))?
                .try_into()
                .unwrap();
            Ok(bytes32_to_u64(bytes))
        };
        let byte_string = |head: u64| -> Result<Vec<u8>, WitnessError> {
            let pos = 4 + head as usize;
            let len = word(pos)? as usize;
            Ok(input
                .get(pos + 32..pos + 32 + len)
                .ok_or(WitnessError::TruncatedInput(pos + 32))?
                .to_vec())
        };

        if input.get(..4) != Some(&STEP_SELECTOR[..]) {
            return Err(WitnessError::SelectorMismatch);
        }
        let state_offset = word(4)?;
        let proof_offset = word(4 + 32)?;
        let local_context: [u8; 32] = input
            .get(4 + 64..4 + 96)
            .ok_or(WitnessError::TruncatedInput(4 + 64))?
            .try_into()
            .unwrap();

        Ok((byte_string(state_offset)?, byte_string(proof_offset)?, local_context))
    }

    /// Encodes the pre-image oracle call that makes the witnessed pre-image
    /// part available on-chain before the step is executed.
    pub fn encode_preimage_oracle_input(
        &self,
        local_context: &[u8; 32],
    ) -> Result<Vec<u8>, WitnessError> {
        if self.preimage_key.is_zero() || self.preimage_value.len() < 8 {
            return Err(WitnessError::NoPreimage);
        }

        match self.preimage_key.key_type()? {
            KeyType::Local => {
                // Bootstrap data has no on-chain preparation path yet, so the
                // witness cheats it straight into the oracle.
                let mut input = Vec::new();
                input.extend_from_slice(&*CHEAT_LOCAL_KEY_SELECTOR);
                input.extend_from_slice(&u64_to_bytes32(self.preimage_offset));
                input.extend_from_slice(self.preimage_key.as_bytes());
                let mut part = [0u8; 32];
                let tail =
                    self.preimage_value.get(self.preimage_offset as usize..).unwrap_or(&[]);
                let n = tail.len().min(32);
                part[..n].copy_from_slice(&tail[..n]);
                input.extend_from_slice(&part);
                input.extend_from_slice(&u64_to_bytes32(self.preimage_value.len() as u64 - 8));
                input.extend_from_slice(local_context);
                Ok(input)
            }
            KeyType::Keccak256 => {
                let mut input = Vec::new();
                input.extend_from_slice(&*LOAD_KECCAK256_PREIMAGE_PART_SELECTOR);
                input.extend_from_slice(&u64_to_bytes32(self.preimage_offset));
                // partOffset, then the calldata offset of the bytes argument.
                input.extend_from_slice(&u64_to_bytes32(32 + 32));
                input.extend_from_slice(&u64_to_bytes32(self.preimage_value.len() as u64 - 8));
                input.extend_from_slice(&self.preimage_value[8..]);
                Ok(input)
            }
        }
    }
}

/// Wraps an oracle to remember which pre-image a step actually read.
struct RecordingOracle<'a, P: ?Sized> {
    inner: &'a mut P,
    last: Option<(PreimageKey, Vec<u8>)>,
}

impl<P: PreimageReader + ?Sized> PreimageReader for RecordingOracle<'_, P> {
    fn preimage(&mut self, key: PreimageKey) -> Result<Vec<u8>, PreimageError> {
        let value = self.inner.preimage(key)?;
        self.last = Some((key, value.clone()));
        Ok(value)
    }
}

/// Builds the witness for the next step of `state`.
///
/// The step is executed on a scratch copy to discover the access list and
/// any pre-image read; `state` itself is left untouched.
pub fn step_witness<P: PreimageReader + ?Sized>(
    state: &VmState<Memory>,
    oracle: &mut P,
) -> Result<StepWitness, ExecutionError> {
    let mut scratch = state.clone();
    scratch.memory.clear_touched();
    let mut recorder = RecordingOracle { inner: oracle, last: None };
    step(&mut scratch, &mut recorder)?;
    let touched = scratch.memory.touched_leaves();

    let mem_root = memory_root(&state.memory);
    let mut mem_proof = Vec::with_capacity(touched.len() * ACCESS_PROOF_SIZE);
    for proof in open_all(&state.memory, touched) {
        proof.encode_into(&mut mem_proof);
    }

    let (preimage_key, preimage_value) = match recorder.last {
        Some((key, value)) => {
            let mut prefixed = Vec::with_capacity(8 + value.len());
            prefixed.extend_from_slice(&(value.len() as u64).to_be_bytes());
            prefixed.extend_from_slice(&value);
            (key, prefixed)
        }
        None => (PreimageKey::default(), Vec::new()),
    };

    Ok(StepWitness {
        state: state.encode_scalars(&mem_root).to_vec(),
        mem_proof,
        preimage_key,
        preimage_value,
        preimage_offset: state.preimage_offset,
    })
}

/// The slow evaluator's oracle: the single pre-image carried by the witness.
#[derive(Debug, Clone)]
pub struct WitnessOracle {
    key: PreimageKey,
    value: Vec<u8>,
}

impl WitnessOracle {
    /// Builds the oracle from the witness fields.
    #[must_use]
    pub fn new(witness: &StepWitness) -> Self {
        Self { key: witness.preimage_key, value: witness.preimage_value.clone() }
    }
}

impl PreimageReader for WitnessOracle {
    fn preimage(&mut self, key: PreimageKey) -> Result<Vec<u8>, PreimageError> {
        if key.is_zero() || key != self.key || self.value.len() < 8 {
            return Err(PreimageError::PreimageMissing(key));
        }
        Ok(self.value[8..].to_vec())
    }
}
