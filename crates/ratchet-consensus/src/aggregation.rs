//! Stake-weighted signature aggregation.
//!
//! [`WeightedSignatureAggregator`] wraps an index-based
//! [`SignatureAggregation`] backend and adds the consensus-level concerns:
//! mapping replica identities to signer indices, tracking the accumulated
//! stake weight, and rejecting duplicate contributions.
//!
//! One aggregator instance covers exactly one aggregation task (one
//! message, one signer set). Reuse across rounds is a caller error and is
//! not enforced here.
//!
//! # Concurrency
//!
//! `trusted_add`, `verify`, `total_weight`, and `aggregate` may be called
//! concurrently from multiple threads. The accumulated weight and the
//! collected-signer set are guarded by a single lock so the two can never
//! observably diverge.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use ratchet_crypto::{AggregationBackendError, PublicKeyBytes, SignatureAggregation};

use crate::ids::ReplicaId;

/// A signer's stake weight and index into the backend's key list.
#[derive(Debug, Clone, Copy)]
struct SignerInfo {
    weight: u64,
    index: usize,
}

/// Errors from aggregator construction, verification, and aggregation.
#[derive(Debug)]
pub enum AggregationError {
    /// The signer identity is not an authorized participant.
    InvalidSigner(ReplicaId),
    /// The signer is authorized but the signature is cryptographically
    /// invalid.
    InvalidSignature(ReplicaId),
    /// The identity list and key list lengths differ.
    LengthMismatch { identities: usize, keys: usize },
    /// Unexpected failure in the underlying aggregation primitive.
    Backend(AggregationBackendError),
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::InvalidSigner(id) => {
                write!(f, "{} is not an authorized signer", id)
            }
            AggregationError::InvalidSignature(id) => {
                write!(f, "invalid signature from {}", id)
            }
            AggregationError::LengthMismatch { identities, keys } => write!(
                f,
                "identity list length {} and key list length {} do not match",
                identities, keys
            ),
            AggregationError::Backend(err) => write!(f, "aggregation backend: {}", err),
        }
    }
}

impl std::error::Error for AggregationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregationError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AggregationBackendError> for AggregationError {
    fn from(err: AggregationBackendError) -> Self {
        AggregationError::Backend(err)
    }
}

/// Rejected `trusted_add` call. Every variant carries the total weight the
/// aggregator held at rejection time, so callers can keep tracking quorum
/// progress on the error path too.
#[derive(Debug)]
pub enum AddSignatureError {
    /// The signer identity is not an authorized participant.
    InvalidSigner {
        /// The rejected signer.
        signer: ReplicaId,
        /// Accumulated weight, unchanged by the rejection.
        total_weight: u64,
    },
    /// This signer already contributed; the weight was counted once.
    DuplicatedEntry {
        /// The duplicate signer.
        signer: ReplicaId,
        /// Accumulated weight, unchanged by the rejection.
        total_weight: u64,
    },
    /// The underlying aggregation primitive rejected the contribution.
    Backend {
        /// Accumulated weight, unchanged by the rejection.
        total_weight: u64,
        /// The backend failure.
        source: AggregationBackendError,
    },
}

impl AddSignatureError {
    /// The total weight collected before the rejected call.
    pub fn total_weight(&self) -> u64 {
        match self {
            AddSignatureError::InvalidSigner { total_weight, .. }
            | AddSignatureError::DuplicatedEntry { total_weight, .. }
            | AddSignatureError::Backend { total_weight, .. } => *total_weight,
        }
    }

    /// True if the rejection was a duplicate contribution.
    pub fn is_duplicated_entry(&self) -> bool {
        matches!(self, AddSignatureError::DuplicatedEntry { .. })
    }
}

impl fmt::Display for AddSignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddSignatureError::InvalidSigner { signer, .. } => {
                write!(f, "{} is not an authorized signer", signer)
            }
            AddSignatureError::DuplicatedEntry { signer, .. } => {
                write!(f, "{} already contributed a signature", signer)
            }
            AddSignatureError::Backend { source, .. } => {
                write!(f, "aggregation backend: {}", source)
            }
        }
    }
}

impl std::error::Error for AddSignatureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AddSignatureError::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// State mutated while collecting contributions. Kept behind one lock so
/// weight and membership stay consistent under concurrent adds.
#[derive(Debug)]
struct CollectorState<A> {
    backend: A,
    total_weight: u64,
    collected: HashSet<ReplicaId>,
}

/// Maps identity-addressed, stake-weighted contributions onto an
/// index-based aggregation backend.
#[derive(Debug)]
pub struct WeightedSignatureAggregator<A> {
    /// All authorized signers, in backend index order. Construction-time
    /// data, never mutated.
    ids: Vec<ReplicaId>,
    /// Identity to (weight, index) lookup. Construction-time data.
    id_to_info: HashMap<ReplicaId, SignerInfo>,
    state: RwLock<CollectorState<A>>,
}

impl<A: SignatureAggregation> WeightedSignatureAggregator<A> {
    /// Build an aggregator for one message.
    ///
    /// `signers` lists every authorized participant with its stake weight;
    /// `public_keys` must be the corresponding keys in the same order.
    ///
    /// # Errors
    ///
    /// - `LengthMismatch` if the two lists differ in length
    /// - `Backend` if the key list is empty or a key is malformed
    pub fn new(
        signers: &[(ReplicaId, u64)],
        public_keys: &[PublicKeyBytes],
        message: &[u8],
        domain_tag: &[u8],
    ) -> Result<Self, AggregationError> {
        if signers.len() != public_keys.len() {
            return Err(AggregationError::LengthMismatch {
                identities: signers.len(),
                keys: public_keys.len(),
            });
        }

        let backend = A::new(message, domain_tag, public_keys)?;

        let mut ids = Vec::with_capacity(signers.len());
        let mut id_to_info = HashMap::with_capacity(signers.len());
        for (index, &(id, weight)) in signers.iter().enumerate() {
            ids.push(id);
            id_to_info.insert(id, SignerInfo { weight, index });
        }

        Ok(WeightedSignatureAggregator {
            ids,
            id_to_info,
            state: RwLock::new(CollectorState {
                backend,
                total_weight: 0,
                collected: HashSet::new(),
            }),
        })
    }

    /// Verify a signature under the stored message and the signer's key.
    ///
    /// Pure lookup plus verification against construction-time data; safe
    /// to call concurrently with `trusted_add`.
    ///
    /// # Errors
    ///
    /// - `InvalidSigner` if the identity is not an authorized participant
    /// - `InvalidSignature` if the signature does not verify
    /// - `Backend` on unexpected primitive failures
    pub fn verify(&self, signer_id: ReplicaId, sig: &[u8]) -> Result<(), AggregationError> {
        let info = self
            .id_to_info
            .get(&signer_id)
            .ok_or(AggregationError::InvalidSigner(signer_id))?;

        let valid = self.state.read().backend.verify(info.index, sig)?;
        if !valid {
            return Err(AggregationError::InvalidSignature(signer_id));
        }
        Ok(())
    }

    /// Add a signature without verifying it, counting the signer's stake
    /// weight toward the total. "Trusted" because the caller either already
    /// verified the signature or accepts that `aggregate` will catch
    /// invalid contributions later.
    ///
    /// Returns the new accumulated weight on success. On rejection the
    /// error carries the unchanged accumulated weight.
    pub fn trusted_add(
        &self,
        signer_id: ReplicaId,
        sig: &[u8],
    ) -> Result<u64, AddSignatureError> {
        let Some(info) = self.id_to_info.get(&signer_id) else {
            return Err(AddSignatureError::InvalidSigner {
                signer: signer_id,
                total_weight: self.total_weight(),
            });
        };

        // Single exclusive region for the backend add, the collected set,
        // and the weight total: a contribution is either fully recorded or
        // not recorded at all.
        let mut state = self.state.write();
        if state.collected.contains(&signer_id) {
            return Err(AddSignatureError::DuplicatedEntry {
                signer: signer_id,
                total_weight: state.total_weight,
            });
        }
        if let Err(source) = state.backend.trusted_add(info.index, sig) {
            return Err(AddSignatureError::Backend {
                total_weight: state.total_weight,
                source,
            });
        }
        state.collected.insert(signer_id);
        state.total_weight += info.weight;
        Ok(state.total_weight)
    }

    /// Snapshot of the accumulated stake weight.
    pub fn total_weight(&self) -> u64 {
        self.state.read().total_weight
    }

    /// Combine the collected signatures.
    ///
    /// The backend performs a final validity check of the combined
    /// signature, which catches invalid contributions accepted by
    /// `trusted_add`. Whether the accumulated weight reaches quorum is the
    /// caller's responsibility to check beforehand.
    ///
    /// Returns the contributing identities and the aggregated signature.
    pub fn aggregate(&self) -> Result<(Vec<ReplicaId>, Vec<u8>), AggregationError> {
        let state = self.state.read();
        let (indices, sig) = state.backend.aggregate()?;
        let signer_ids = indices.into_iter().map(|idx| self.ids[idx]).collect();
        Ok((signer_ids, sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_crypto::{toy_sign, ToySha3Aggregation};

    type ToyAggregator = WeightedSignatureAggregator<ToySha3Aggregation>;

    const MESSAGE: &[u8] = b"vote:view=8";
    const TAG: &[u8] = b"RATCHET_VOTE_V1";

    fn signers(weights: &[u64]) -> Vec<(ReplicaId, u64)> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| (ReplicaId::new(i as u64 + 1), w))
            .collect()
    }

    fn keys(n: usize) -> Vec<PublicKeyBytes> {
        (0..n)
            .map(|i| PublicKeyBytes::new(vec![i as u8 + 1; 16]))
            .collect()
    }

    fn sig_for(keys: &[PublicKeyBytes], index: usize) -> [u8; 32] {
        toy_sign(TAG, MESSAGE, &keys[index])
    }

    fn build(weights: &[u64]) -> (ToyAggregator, Vec<PublicKeyBytes>) {
        let pks = keys(weights.len());
        let agg = ToyAggregator::new(&signers(weights), &pks, MESSAGE, TAG).unwrap();
        (agg, pks)
    }

    #[test]
    fn construction_rejects_mismatched_lengths() {
        let err = ToyAggregator::new(&signers(&[1, 1, 1]), &keys(2), MESSAGE, TAG).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::LengthMismatch {
                identities: 3,
                keys: 2
            }
        ));
    }

    #[test]
    fn construction_rejects_empty_and_malformed_keys() {
        let err = ToyAggregator::new(&[], &[], MESSAGE, TAG).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::Backend(AggregationBackendError::EmptyKeyList)
        ));

        let mut pks = keys(2);
        pks[0] = PublicKeyBytes::new(vec![]);
        let err = ToyAggregator::new(&signers(&[1, 1]), &pks, MESSAGE, TAG).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::Backend(AggregationBackendError::MalformedKey(0))
        ));
    }

    #[test]
    fn verify_distinguishes_unknown_signer_from_bad_signature() {
        let (agg, pks) = build(&[10, 20]);

        agg.verify(ReplicaId::new(1), &sig_for(&pks, 0)).unwrap();

        let err = agg.verify(ReplicaId::new(99), &sig_for(&pks, 0)).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidSigner(_)));

        let err = agg.verify(ReplicaId::new(1), &[0u8; 32]).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidSignature(_)));
    }

    #[test]
    fn duplicate_contribution_is_rejected_and_not_double_counted() {
        let (agg, pks) = build(&[10, 20]);
        let sig = sig_for(&pks, 0);

        assert_eq!(agg.trusted_add(ReplicaId::new(1), &sig).unwrap(), 10);

        let err = agg.trusted_add(ReplicaId::new(1), &sig).unwrap_err();
        assert!(err.is_duplicated_entry());
        assert_eq!(err.total_weight(), 10);
        assert_eq!(agg.total_weight(), 10);
    }

    #[test]
    fn unknown_signer_is_rejected_with_current_weight() {
        let (agg, pks) = build(&[10, 20]);
        agg.trusted_add(ReplicaId::new(2), &sig_for(&pks, 1)).unwrap();

        let err = agg.trusted_add(ReplicaId::new(42), &[0u8; 32]).unwrap_err();
        assert!(matches!(err, AddSignatureError::InvalidSigner { .. }));
        assert_eq!(err.total_weight(), 20);
    }

    #[test]
    fn weight_is_additive_and_aggregate_returns_exact_signer_set() {
        let weights = [7u64, 11, 13, 17];
        let (agg, pks) = build(&weights);

        for i in 0..weights.len() {
            let id = ReplicaId::new(i as u64 + 1);
            agg.trusted_add(id, &sig_for(&pks, i)).unwrap();
        }
        assert_eq!(agg.total_weight(), weights.iter().sum::<u64>());

        let (ids, sig) = agg.aggregate().unwrap();
        assert_eq!(
            ids,
            (1..=4).map(ReplicaId::new).collect::<Vec<_>>()
        );
        assert!(!sig.is_empty());
    }

    #[test]
    fn aggregate_is_repeatable_over_the_same_accumulated_set() {
        let (agg, pks) = build(&[1, 2, 3]);
        agg.trusted_add(ReplicaId::new(1), &sig_for(&pks, 0)).unwrap();
        agg.trusted_add(ReplicaId::new(3), &sig_for(&pks, 2)).unwrap();

        let first = agg.aggregate().unwrap();
        let second = agg.aggregate().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_catches_unverified_garbage() {
        let (agg, pks) = build(&[1, 1]);
        agg.trusted_add(ReplicaId::new(1), &sig_for(&pks, 0)).unwrap();
        // trusted_add takes it without complaint.
        agg.trusted_add(ReplicaId::new(2), &[0xEE; 32]).unwrap();

        let err = agg.aggregate().unwrap_err();
        assert!(matches!(
            err,
            AggregationError::Backend(AggregationBackendError::InvalidAggregate)
        ));
    }

    #[test]
    fn concurrent_adds_keep_weight_and_membership_consistent() {
        use std::sync::Arc;

        let n = 32usize;
        let weights: Vec<u64> = (1..=n as u64).collect();
        let pks = keys(n);
        let agg = Arc::new(
            ToyAggregator::new(&signers(&weights), &pks, MESSAGE, TAG).unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..n {
            let agg = Arc::clone(&agg);
            let sig = sig_for(&pks, i);
            handles.push(std::thread::spawn(move || {
                let id = ReplicaId::new(i as u64 + 1);
                // Each signer races a duplicate of itself; exactly one of
                // the two calls may win.
                let first = agg.trusted_add(id, &sig);
                let second = agg.trusted_add(id, &sig);
                assert!(first.is_ok() ^ second.is_ok() || first.is_ok() && second.is_err());
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(agg.total_weight(), weights.iter().sum::<u64>());
        let (ids, _) = agg.aggregate().unwrap();
        assert_eq!(ids.len(), n);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn total_weight_equals_sum_of_distinct_contributions(
                weights in proptest::collection::vec(1u64..1_000_000, 1..24)
            ) {
                let (agg, pks) = build(&weights);
                let mut expected = 0u64;
                for i in 0..weights.len() {
                    let id = ReplicaId::new(i as u64 + 1);
                    let total = agg.trusted_add(id, &sig_for(&pks, i)).unwrap();
                    expected += weights[i];
                    prop_assert_eq!(total, expected);
                }
                prop_assert_eq!(agg.total_weight(), expected);

                let (ids, _) = agg.aggregate().unwrap();
                prop_assert_eq!(ids.len(), weights.len());
            }
        }
    }
}
