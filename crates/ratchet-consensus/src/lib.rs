//! Event-driven HotStuff-style consensus core.
//!
//! This crate implements the view-synchronization and event-orchestration
//! layer of a chained BFT protocol:
//! - `Pacemaker`: owns the current view, advances it on quorum certificates,
//!   timeout certificates, and local timeouts, and persists every change
//! - `TimeoutController`: adaptive view timeouts with multiplicative growth
//!   and additive decrease
//! - `EventHandler`: single-threaded orchestration of proposals, constructed
//!   certificates, and timeouts across the pacemaker and its collaborators
//! - `WeightedSignatureAggregator`: stake-weighted, identity-addressed
//!   signature collection on top of an index-based aggregation backend
//!
//! Collaborator interfaces (fork tracking, safety rules, leader selection,
//! block production, messaging, persistence) live in `api`; observation
//! hooks live in `notifications`.
//!
//! Identity and message types:
//! - `ReplicaId`, `BlockId`, `View`: canonical identifiers
//! - `Block`, `Proposal`, `Vote`, `TimeoutObject`: protocol messages
//! - `QuorumCertificate`, `TimeoutCertificate`: quorum proofs
//! - `LivenessData`: the persisted pacemaker snapshot

pub mod aggregation;
pub mod api;
pub mod certs;
pub mod event_handler;
pub mod ids;
pub mod model;
pub mod notifications;
pub mod pacemaker;
pub mod timeout;

pub use aggregation::{AddSignatureError, AggregationError, WeightedSignatureAggregator};
pub use api::{
    BlockProducer, Committee, Communicator, ComponentError, Forks, InMemoryPersister, Persister,
    SafetyError, SafetyRules, TimeoutCollector, VoteCollector,
};
pub use certs::{QuorumCertificate, TimeoutCertificate};
pub use event_handler::{EventHandler, EventHandlerError};
pub use ids::{BlockId, ReplicaId, View};
pub use model::{
    Block, LivenessData, NewViewEvent, Proposal, TimeoutMode, TimeoutObject, TimerInfo, Vote,
};
pub use notifications::{Consumer, NoopConsumer};
pub use pacemaker::Pacemaker;
pub use timeout::{TimeoutConfig, TimeoutConfigError, TimeoutController};
