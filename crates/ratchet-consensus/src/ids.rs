//! Identity types for the consensus layer.
//!
//! This module defines the canonical identifiers used across consensus
//! messages: replica identities and content-addressed block identifiers.

use std::fmt;

use sha3::{Digest, Sha3_256};

/// One round of the consensus protocol. Strictly increasing; view 0 is
/// reserved for the genesis block, which has no proposer.
pub type View = u64;

/// A canonical replica identity in the consensus layer.
///
/// Distinct from any transport-level peer identifier; this is the identity
/// that appears in votes, timeouts, and certificates.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct ReplicaId(pub u64);

impl ReplicaId {
    /// Create a new `ReplicaId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        ReplicaId(id)
    }

    /// Get the raw `u64` value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ReplicaId {
    fn from(id: u64) -> Self {
        ReplicaId(id)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica_{}", self.0)
    }
}

/// Content hash identifying a block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// The all-zero identifier, used for the genesis sentinel.
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    /// Create a block identifier from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        BlockId(bytes)
    }

    /// Hash arbitrary bytes into a block identifier.
    pub fn hash_of(bytes: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(bytes);
        BlockId(hasher.finalize().into())
    }

    /// Borrow the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short hex prefix is enough to tell blocks apart in logs.
        write!(f, "{}", &hex::encode(self.0)[..12])
    }
}
