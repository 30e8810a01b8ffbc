//! Collaborator interfaces of the event handler.
//!
//! The event handler orchestrates but does not itself store blocks, sign
//! votes, or talk to the network. Each of those concerns sits behind a
//! trait defined here, so the core logic can be driven in tests by small
//! in-memory implementations and in production by the real components.
//!
//! All traits take `&self`; implementations handle their own interior
//! mutability, since several of them are shared with other threads (vote
//! collection, networking).

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::certs::{QuorumCertificate, TimeoutCertificate};
use crate::ids::{BlockId, ReplicaId, View};
use crate::model::{Block, LivenessData, Proposal, TimeoutObject, Vote};

/// Unrecoverable failure inside a collaborator component.
///
/// Anything a collaborator cannot handle internally is fatal to consensus
/// participation; the error text is for the operator, not for dispatch.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ComponentError(pub String);

impl ComponentError {
    /// Build an error from anything displayable.
    pub fn new(msg: impl fmt::Display) -> Self {
        ComponentError(msg.to_string())
    }
}

/// Outcome of asking the safety rules to sign something.
#[derive(Debug)]
pub enum SafetyError {
    /// Signing would violate a safety rule. Expected during normal
    /// operation (e.g. the block extends a conflicting fork); the replica
    /// simply abstains.
    NoVote(String),
    /// The safety rules themselves failed. Fatal.
    Internal(String),
}

impl SafetyError {
    /// True if this is the benign abstention case.
    pub fn is_no_vote(&self) -> bool {
        matches!(self, SafetyError::NoVote(_))
    }
}

impl fmt::Display for SafetyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyError::NoVote(reason) => write!(f, "not voting: {}", reason),
            SafetyError::Internal(reason) => write!(f, "safety rules failure: {}", reason),
        }
    }
}

impl std::error::Error for SafetyError {}

/// In-memory tree of blocks above the last finalized block.
pub trait Forks: Send + Sync {
    /// Store a block. Must tolerate duplicates.
    fn add_block(&self, block: &Block) -> Result<(), ComponentError>;

    /// Track a certificate for an already-stored block.
    fn add_qc(&self, qc: &QuorumCertificate) -> Result<(), ComponentError>;

    /// Look up a block by identifier.
    fn get_block(&self, block_id: &BlockId) -> Option<Block>;

    /// All known blocks proposed for a view. More than one means the leader
    /// equivocated.
    fn get_blocks_for_view(&self, view: View) -> Vec<Block>;

    /// View of the latest finalized block.
    fn finalized_view(&self) -> View;
}

/// Signing decisions gated by the consensus safety rules.
pub trait SafetyRules: Send + Sync {
    /// Produce a vote for the proposal, or abstain.
    ///
    /// `cur_view` is the pacemaker's current view; voting for a block from
    /// any other view is refused.
    fn produce_vote(&self, proposal: &Proposal, cur_view: View) -> Result<Vote, SafetyError>;

    /// Produce a signed timeout statement for the current view.
    fn produce_timeout(
        &self,
        cur_view: View,
        newest_qc: &QuorumCertificate,
        last_view_tc: Option<&TimeoutCertificate>,
    ) -> Result<TimeoutObject, SafetyError>;
}

/// Committee membership and leader selection.
pub trait Committee: Send + Sync {
    /// The leader for a view. Deterministic across all honest replicas.
    fn leader_for_view(&self, view: View) -> Result<ReplicaId, ComponentError>;

    /// This replica's own identity.
    fn self_id(&self) -> ReplicaId;
}

/// Builds block proposals when this replica leads a view.
pub trait BlockProducer: Send + Sync {
    /// Build a signed proposal extending the block certified by `qc`.
    ///
    /// `last_view_tc` must be included when the previous view ended by
    /// timeout, so followers can validate the view entry.
    fn make_block_proposal(
        &self,
        qc: QuorumCertificate,
        view: View,
        last_view_tc: Option<TimeoutCertificate>,
    ) -> Result<Proposal, ComponentError>;
}

/// Outbound consensus messaging.
pub trait Communicator: Send + Sync {
    /// Broadcast a proposal to the whole committee after waiting `delay`.
    fn broadcast_proposal_with_delay(
        &self,
        proposal: &Proposal,
        delay: Duration,
    ) -> Result<(), ComponentError>;

    /// Send a vote to the leader collecting votes for its view.
    fn send_vote(&self, vote: &Vote, recipient: ReplicaId) -> Result<(), ComponentError>;

    /// Broadcast a timeout statement to the whole committee.
    fn broadcast_timeout(&self, timeout: &TimeoutObject) -> Result<(), ComponentError>;
}

/// Ingestion side of vote aggregation. Collects votes per view and emits a
/// quorum certificate back into the event loop once enough stake voted.
pub trait VoteCollector: Send + Sync {
    /// Feed a proposal so the collector knows which block votes refer to.
    /// The proposal counts as the proposer's own vote.
    fn add_block(&self, proposal: &Proposal) -> Result<(), ComponentError>;

    /// Feed a vote from the network or from this replica itself.
    fn add_vote(&self, vote: Vote) -> Result<(), ComponentError>;
}

/// Ingestion side of timeout aggregation, mirroring [`VoteCollector`] for
/// timeout objects and timeout certificates.
pub trait TimeoutCollector: Send + Sync {
    /// Feed a timeout object from the network or from this replica itself.
    fn add_timeout(&self, timeout: TimeoutObject) -> Result<(), ComponentError>;
}

/// Durable storage for pacemaker liveness state.
///
/// `put_liveness_data` must be synchronous: the pacemaker calls it before a
/// new view becomes live, and a crash after the call must recover into the
/// new view or later, never an earlier one.
pub trait Persister: Send + Sync {
    /// Persist the liveness snapshot. Must not return before the data is
    /// durable.
    fn put_liveness_data(&self, data: &LivenessData) -> Result<(), ComponentError>;

    /// Load the last persisted snapshot.
    fn get_liveness_data(&self) -> Result<LivenessData, ComponentError>;

    /// Record that the event loop started processing this view. Written at
    /// startup, before any recovery work.
    fn put_started(&self, view: View) -> Result<(), ComponentError>;
}

/// Persister backed by process memory. Suitable for tests and for nodes
/// that accept losing liveness state on restart.
#[derive(Debug)]
pub struct InMemoryPersister {
    data: Mutex<LivenessData>,
}

impl InMemoryPersister {
    /// Start from the given snapshot.
    pub fn new(data: LivenessData) -> Self {
        InMemoryPersister {
            data: Mutex::new(data),
        }
    }

    /// Start from view 1 with only the genesis certificate.
    pub fn genesis() -> Self {
        Self::new(LivenessData {
            current_view: 1,
            newest_qc: QuorumCertificate::genesis(),
            last_view_tc: None,
        })
    }
}

impl Persister for InMemoryPersister {
    fn put_liveness_data(&self, data: &LivenessData) -> Result<(), ComponentError> {
        *self.data.lock() = data.clone();
        Ok(())
    }

    fn get_liveness_data(&self) -> Result<LivenessData, ComponentError> {
        Ok(self.data.lock().clone())
    }

    fn put_started(&self, _view: View) -> Result<(), ComponentError> {
        Ok(())
    }
}
