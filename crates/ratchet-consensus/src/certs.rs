//! Quorum and timeout certificates.
//!
//! A [`QuorumCertificate`] proves that replicas holding at least a quorum of
//! stake voted for a specific block at a specific view. A
//! [`TimeoutCertificate`] proves that a quorum of stake gave up on a view,
//! which allows the view to advance even when no quorum certificate formed.
//!
//! Both are immutable value types; many components hold copies or
//! references, none mutates a certificate after construction.

use crate::ids::{BlockId, ReplicaId, View};

/// Proof of stake-weighted quorum agreement on a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    /// View of the voted block.
    pub view: View,
    /// Identifier of the block this certificate attests to.
    pub block_id: BlockId,
    /// Replicas whose votes are included.
    pub signer_ids: Vec<ReplicaId>,
    /// Aggregated signature over (view, block_id).
    pub sig_data: Vec<u8>,
}

impl QuorumCertificate {
    /// Create a new certificate.
    pub fn new(view: View, block_id: BlockId, signer_ids: Vec<ReplicaId>, sig_data: Vec<u8>) -> Self {
        QuorumCertificate {
            view,
            block_id,
            signer_ids,
            sig_data,
        }
    }

    /// The certificate for the genesis block. View 0 is reserved for
    /// genesis, which has no proposer and needs no signatures.
    pub fn genesis() -> Self {
        QuorumCertificate {
            view: 0,
            block_id: BlockId::ZERO,
            signer_ids: Vec::new(),
            sig_data: Vec::new(),
        }
    }
}

/// Proof of stake-weighted quorum agreement to abandon a view.
///
/// Carries the highest quorum certificate known among the timing-out
/// replicas so that the next leader can build on the freshest quorum state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutCertificate {
    /// The view that was abandoned.
    pub view: View,
    /// The newest QC among the contributing timeout objects.
    pub newest_qc: QuorumCertificate,
    /// Replicas whose timeout signatures are included.
    pub signer_ids: Vec<ReplicaId>,
    /// Aggregated signature over (view, newest_qc.view).
    pub sig_data: Vec<u8>,
}

impl TimeoutCertificate {
    /// Create a new certificate.
    pub fn new(
        view: View,
        newest_qc: QuorumCertificate,
        signer_ids: Vec<ReplicaId>,
        sig_data: Vec<u8>,
    ) -> Self {
        TimeoutCertificate {
            view,
            newest_qc,
            signer_ids,
            sig_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_qc_is_view_zero_with_zero_block() {
        let qc = QuorumCertificate::genesis();
        assert_eq!(qc.view, 0);
        assert_eq!(qc.block_id, BlockId::ZERO);
        assert!(qc.signer_ids.is_empty());
    }

    #[test]
    fn certificates_compare_by_value() {
        let qc = QuorumCertificate::new(5, BlockId::new([1; 32]), vec![ReplicaId(1)], vec![0xFF]);
        let tc = TimeoutCertificate::new(6, qc.clone(), vec![ReplicaId(1)], vec![0xEE]);
        assert_eq!(tc.newest_qc, qc);
        assert_eq!(tc.clone(), tc);
    }
}
