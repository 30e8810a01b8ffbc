//! Low-level signature aggregation primitives for the ratchet consensus layer.
//!
//! This crate defines an algorithm-agnostic interface for same-message
//! signature aggregation. The consensus layer builds its stake-weighted
//! aggregation on top of this interface without committing to a specific
//! signature scheme.
//!
//! # Design Notes
//!
//! - The interface is index-based: signers are addressed by their position
//!   `0..n` in the public-key list supplied at construction. Mapping from
//!   consensus identities to indices happens one layer up, in
//!   `ratchet-consensus`.
//! - `trusted_add` performs no cryptographic verification; `aggregate`
//!   performs a final validity check of the combined signature as a safety
//!   net against unverified contributions.
//! - `ToySha3Aggregation` is a deterministic test backend and is
//!   **NOT FOR PRODUCTION USE**.

pub mod aggregation;

pub use aggregation::{
    toy_sign, AggregationBackendError, PublicKeyBytes, SignatureAggregation, ToySha3Aggregation,
    TOY_SIG_LEN,
};
