//! Core message and state types for the consensus protocol.
//!
//! Blocks, proposals, votes, and timeout objects are the ephemeral protocol
//! messages; [`LivenessData`] is the minimal persisted snapshot needed to
//! resume the pacemaker safely after a restart; [`TimerInfo`] describes the
//! currently running timeout for notification purposes.

use std::time::{Duration, Instant};

use crate::certs::{QuorumCertificate, TimeoutCertificate};
use crate::ids::{BlockId, ReplicaId, View};

/// A block in the fork tree. Immutable once created; owned by the fork
/// tracker after it has been added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Content hash of this block.
    pub block_id: BlockId,
    /// View in which this block was proposed.
    pub view: View,
    /// The leader that produced this block.
    pub proposer_id: ReplicaId,
    /// Certificate for the parent block.
    pub qc: QuorumCertificate,
    /// Hash of the block payload (transactions etc., opaque to consensus).
    pub payload_hash: [u8; 32],
}

impl Block {
    /// Build a block, deriving its identifier from the header fields.
    pub fn new(
        view: View,
        proposer_id: ReplicaId,
        qc: QuorumCertificate,
        payload_hash: [u8; 32],
    ) -> Self {
        let block_id = Self::compute_id(view, proposer_id, &qc, &payload_hash);
        Block {
            block_id,
            view,
            proposer_id,
            qc,
            payload_hash,
        }
    }

    /// Content hash over the header fields.
    pub fn compute_id(
        view: View,
        proposer_id: ReplicaId,
        qc: &QuorumCertificate,
        payload_hash: &[u8; 32],
    ) -> BlockId {
        let mut bytes = Vec::with_capacity(8 + 8 + 8 + 32 + 32);
        bytes.extend_from_slice(&view.to_le_bytes());
        bytes.extend_from_slice(&proposer_id.as_u64().to_le_bytes());
        bytes.extend_from_slice(&qc.view.to_le_bytes());
        bytes.extend_from_slice(qc.block_id.as_bytes());
        bytes.extend_from_slice(payload_hash);
        BlockId::hash_of(&bytes)
    }
}

/// A leader's signed block proposal.
///
/// When the previous view ended without a quorum certificate, the proposal
/// must carry the timeout certificate that justifies entering this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// The proposed block.
    pub block: Block,
    /// Certificate proving the previous view timed out, if it did.
    pub last_view_tc: Option<TimeoutCertificate>,
    /// Proposer signature over the block.
    pub sig_data: Vec<u8>,
}

impl Proposal {
    /// Create a proposal for a block.
    pub fn new(block: Block, last_view_tc: Option<TimeoutCertificate>, sig_data: Vec<u8>) -> Self {
        Proposal {
            block,
            last_view_tc,
            sig_data,
        }
    }

    /// The proposer's own vote for its block. A proposal is an implicit
    /// vote, so the leader's stake counts toward the quorum it collects.
    pub fn proposer_vote(&self) -> Vote {
        Vote {
            view: self.block.view,
            block_id: self.block.block_id,
            signer_id: self.block.proposer_id,
            sig_data: self.sig_data.clone(),
        }
    }
}

/// A single replica's signature over a specific (view, block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// View of the voted block.
    pub view: View,
    /// The block being voted for.
    pub block_id: BlockId,
    /// The voting replica.
    pub signer_id: ReplicaId,
    /// Signature over (view, block_id).
    pub sig_data: Vec<u8>,
}

/// A single replica's signed statement that it is timing out a view.
///
/// Carries the replica's newest known QC and, if the previous view ended in
/// a timeout, the corresponding TC, so that certificate collection can pick
/// the freshest quorum state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutObject {
    /// The view being timed out.
    pub view: View,
    /// The newest QC known to the signer.
    pub newest_qc: QuorumCertificate,
    /// TC for the previous view, if that view ended by timeout.
    pub last_view_tc: Option<TimeoutCertificate>,
    /// The replica signing this timeout.
    pub signer_id: ReplicaId,
    /// Signature over (view, newest_qc.view).
    pub sig_data: Vec<u8>,
}

/// Emitted by the pacemaker when the current view actually increased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewViewEvent {
    /// The view that was entered.
    pub view: View,
}

/// Minimal persisted pacemaker state.
///
/// Written synchronously on every view change and read once at startup.
/// Recovery resumes at exactly the persisted view or later, never earlier;
/// reusing a view number risks equivocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessData {
    /// The view the pacemaker was in when the snapshot was taken.
    pub current_view: View,
    /// The newest quorum certificate known at that time.
    pub newest_qc: QuorumCertificate,
    /// TC for `current_view - 1`, if that view ended by timeout.
    pub last_view_tc: Option<TimeoutCertificate>,
}

/// Which phase the running timeout covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMode {
    /// Waiting to receive a proposal for the current view or otherwise
    /// observe progress.
    ReplicaTimeout,
    /// A leader waiting to collect votes after processing the block for the
    /// current view.
    VoteCollectionTimeout,
}

impl std::fmt::Display for TimeoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutMode::ReplicaTimeout => write!(f, "replica-timeout"),
            TimeoutMode::VoteCollectionTimeout => write!(f, "vote-collection-timeout"),
        }
    }
}

/// Metadata about the currently running timeout, for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    /// Which phase this timer covers.
    pub mode: TimeoutMode,
    /// The view the timer was started for.
    pub view: View,
    /// When the timer was started.
    pub start_time: Instant,
    /// How long until it fires.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_covers_all_header_fields() {
        let qc = QuorumCertificate::genesis();
        let base = Block::new(1, ReplicaId(1), qc.clone(), [0; 32]);

        let other_view = Block::new(2, ReplicaId(1), qc.clone(), [0; 32]);
        let other_proposer = Block::new(1, ReplicaId(2), qc.clone(), [0; 32]);
        let other_payload = Block::new(1, ReplicaId(1), qc, [1; 32]);

        assert_ne!(base.block_id, other_view.block_id);
        assert_ne!(base.block_id, other_proposer.block_id);
        assert_ne!(base.block_id, other_payload.block_id);
    }

    #[test]
    fn proposer_vote_matches_block() {
        let block = Block::new(3, ReplicaId(7), QuorumCertificate::genesis(), [0; 32]);
        let proposal = Proposal::new(block.clone(), None, vec![0xAA]);
        let vote = proposal.proposer_vote();
        assert_eq!(vote.view, block.view);
        assert_eq!(vote.block_id, block.block_id);
        assert_eq!(vote.signer_id, ReplicaId(7));
    }
}
