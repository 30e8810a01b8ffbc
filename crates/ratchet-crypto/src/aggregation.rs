//! Index-based same-message signature aggregation.
//!
//! This module provides the [`SignatureAggregation`] trait plus a
//! deterministic SHA3-based backend for tests and local networks.
//!
//! An aggregation instance is scoped to exactly one message and one signer
//! set. Signers are addressed by index into the public-key list given at
//! construction; the trait is agnostic of identities and stake weights.

use std::collections::BTreeMap;
use std::fmt;

use sha3::{Digest, Sha3_256};

/// A signer's public key as opaque bytes.
///
/// This type carries no algorithm-specific semantics and makes no size
/// guarantees; interpretation is up to the aggregation backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    /// Create a public key from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        PublicKeyBytes(bytes)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Errors surfaced by an aggregation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationBackendError {
    /// The public-key list supplied at construction was empty.
    EmptyKeyList,
    /// A public key at the given index could not be decoded.
    MalformedKey(usize),
    /// The signer index is outside `0..n`.
    InvalidSignerIndex(usize),
    /// A signature for this index was already added.
    DuplicateIndex(usize),
    /// The signature bytes have an invalid encoding or length.
    MalformedSignature,
    /// No signatures have been collected, nothing to aggregate.
    NothingToAggregate,
    /// The combined signature failed the final validity check.
    InvalidAggregate,
}

impl fmt::Display for AggregationBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationBackendError::EmptyKeyList => write!(f, "public key list is empty"),
            AggregationBackendError::MalformedKey(idx) => {
                write!(f, "malformed public key at index {}", idx)
            }
            AggregationBackendError::InvalidSignerIndex(idx) => {
                write!(f, "signer index {} out of range", idx)
            }
            AggregationBackendError::DuplicateIndex(idx) => {
                write!(f, "signature for index {} already added", idx)
            }
            AggregationBackendError::MalformedSignature => write!(f, "malformed signature bytes"),
            AggregationBackendError::NothingToAggregate => {
                write!(f, "no signatures collected")
            }
            AggregationBackendError::InvalidAggregate => {
                write!(f, "aggregated signature failed validity check")
            }
        }
    }
}

impl std::error::Error for AggregationBackendError {}

/// Same-message signature aggregation over an indexed signer set.
///
/// One instance covers one aggregation task: a fixed message, a fixed
/// domain-separation tag, and a fixed list of authorized public keys.
///
/// `trusted_add` stores a contribution without verifying it; callers that
/// need verification use `verify` first. `aggregate` re-checks the combined
/// signature so that invalid contributions slipped in through `trusted_add`
/// are caught before the aggregate leaves the process.
pub trait SignatureAggregation: Send + Sync + Sized {
    /// Construct an aggregation instance for one message.
    ///
    /// # Errors
    ///
    /// - `EmptyKeyList` if `public_keys` is empty
    /// - `MalformedKey` if a key cannot be decoded by this backend
    fn new(
        message: &[u8],
        domain_tag: &[u8],
        public_keys: &[PublicKeyBytes],
    ) -> Result<Self, AggregationBackendError>;

    /// Number of authorized signers.
    fn len(&self) -> usize;

    /// True if the signer set is empty (cannot happen after construction).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify a single signature against the stored message and the key at
    /// `signer_index`. Read-only; touches only construction-time data.
    ///
    /// Returns `Ok(false)` for a well-formed but cryptographically invalid
    /// signature; errors only on out-of-range indices or malformed input.
    fn verify(&self, signer_index: usize, signature: &[u8])
        -> Result<bool, AggregationBackendError>;

    /// Store a signature for `signer_index` without verifying it.
    ///
    /// # Errors
    ///
    /// - `InvalidSignerIndex` if the index is out of range
    /// - `DuplicateIndex` if this index already contributed
    /// - `MalformedSignature` if the bytes cannot be decoded
    fn trusted_add(
        &mut self,
        signer_index: usize,
        signature: &[u8],
    ) -> Result<(), AggregationBackendError>;

    /// Combine all collected signatures.
    ///
    /// Returns the contributing signer indices (ascending) and the
    /// aggregated signature bytes. Performs a final validity check of the
    /// combined signature and fails with `InvalidAggregate` if it does not
    /// verify against the collected signer subset.
    fn aggregate(&self) -> Result<(Vec<usize>, Vec<u8>), AggregationBackendError>;
}

pub const TOY_SIG_LEN: usize = 32;

/// Deterministic SHA3-based aggregation backend.
///
/// **NOT FOR PRODUCTION USE.** A "signature" from signer `i` is
/// `sha3_256(domain_tag || message || pk_i)`, and the aggregate is the
/// XOR-fold of the member signatures. The scheme has no cryptographic
/// strength; its value is that every step of the real aggregation flow
/// (per-signer verification, duplicate rejection, final aggregate check)
/// is exercised with honest pass/fail behavior.
#[derive(Debug)]
pub struct ToySha3Aggregation {
    message: Vec<u8>,
    domain_tag: Vec<u8>,
    public_keys: Vec<PublicKeyBytes>,
    collected: BTreeMap<usize, [u8; TOY_SIG_LEN]>,
}

impl ToySha3Aggregation {
    /// The signature signer `index` is expected to produce for the stored
    /// message. Exposed so tests can produce valid contributions.
    pub fn expected_signature(&self, index: usize) -> Option<[u8; TOY_SIG_LEN]> {
        let pk = self.public_keys.get(index)?;
        Some(toy_sign(&self.domain_tag, &self.message, pk))
    }
}

/// Compute the toy signature for a (tag, message, key) triple.
pub fn toy_sign(domain_tag: &[u8], message: &[u8], pk: &PublicKeyBytes) -> [u8; TOY_SIG_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(domain_tag);
    hasher.update(message);
    hasher.update(pk.as_bytes());
    hasher.finalize().into()
}

fn xor_fold(acc: &mut [u8; TOY_SIG_LEN], sig: &[u8; TOY_SIG_LEN]) {
    for (a, b) in acc.iter_mut().zip(sig.iter()) {
        *a ^= b;
    }
}

impl SignatureAggregation for ToySha3Aggregation {
    fn new(
        message: &[u8],
        domain_tag: &[u8],
        public_keys: &[PublicKeyBytes],
    ) -> Result<Self, AggregationBackendError> {
        if public_keys.is_empty() {
            return Err(AggregationBackendError::EmptyKeyList);
        }
        for (idx, pk) in public_keys.iter().enumerate() {
            if pk.as_bytes().is_empty() {
                return Err(AggregationBackendError::MalformedKey(idx));
            }
        }
        Ok(ToySha3Aggregation {
            message: message.to_vec(),
            domain_tag: domain_tag.to_vec(),
            public_keys: public_keys.to_vec(),
            collected: BTreeMap::new(),
        })
    }

    fn len(&self) -> usize {
        self.public_keys.len()
    }

    fn verify(
        &self,
        signer_index: usize,
        signature: &[u8],
    ) -> Result<bool, AggregationBackendError> {
        let pk = self
            .public_keys
            .get(signer_index)
            .ok_or(AggregationBackendError::InvalidSignerIndex(signer_index))?;
        if signature.len() != TOY_SIG_LEN {
            return Ok(false);
        }
        let expected = toy_sign(&self.domain_tag, &self.message, pk);
        Ok(signature == expected)
    }

    fn trusted_add(
        &mut self,
        signer_index: usize,
        signature: &[u8],
    ) -> Result<(), AggregationBackendError> {
        if signer_index >= self.public_keys.len() {
            return Err(AggregationBackendError::InvalidSignerIndex(signer_index));
        }
        if self.collected.contains_key(&signer_index) {
            return Err(AggregationBackendError::DuplicateIndex(signer_index));
        }
        let sig: [u8; TOY_SIG_LEN] = signature
            .try_into()
            .map_err(|_| AggregationBackendError::MalformedSignature)?;
        self.collected.insert(signer_index, sig);
        Ok(())
    }

    fn aggregate(&self) -> Result<(Vec<usize>, Vec<u8>), AggregationBackendError> {
        if self.collected.is_empty() {
            return Err(AggregationBackendError::NothingToAggregate);
        }

        let mut agg = [0u8; TOY_SIG_LEN];
        for sig in self.collected.values() {
            xor_fold(&mut agg, sig);
        }

        // Final validity check: the fold of the collected signatures must
        // equal the fold of the expected signatures for the same subset.
        // trusted_add accepts unverified bytes, so this is where garbage
        // contributions are caught.
        let mut expected = [0u8; TOY_SIG_LEN];
        for (&idx, _) in self.collected.iter() {
            let sig = toy_sign(&self.domain_tag, &self.message, &self.public_keys[idx]);
            xor_fold(&mut expected, &sig);
        }
        if agg != expected {
            return Err(AggregationBackendError::InvalidAggregate);
        }

        Ok((self.collected.keys().copied().collect(), agg.to_vec()))
    }
}
