//! Primitive types and constants shared by the fault-proof VM crates.

#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]

pub mod consts;
pub mod keccak;
pub mod preimage;

pub use keccak::{keccak256, keccak_pair, zero_hash, ZERO_HASHES};
pub use preimage::{
    KeyType, MapOracle, PreimageError, PreimageKey, PreimagePart, PreimageReader,
};
