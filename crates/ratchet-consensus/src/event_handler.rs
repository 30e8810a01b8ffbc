//! Single-threaded consensus event orchestration.
//!
//! The event handler receives the four inputs that can change a replica's
//! state (a proposal, a constructed quorum certificate, a constructed
//! timeout certificate, a local timeout) and wires them through the
//! pacemaker, safety rules, forks, and outbound messaging. It holds no
//! protocol state of its own; every decision is delegated to the component
//! that owns the relevant state.
//!
//! All entry points run on one thread. Concurrent certificate construction
//! happens elsewhere and feeds back in as `on_qc_constructed` /
//! `on_tc_constructed` events.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::api::{
    BlockProducer, Committee, Communicator, ComponentError, Forks, Persister, SafetyRules,
    TimeoutCollector, VoteCollector,
};
use crate::certs::{QuorumCertificate, TimeoutCertificate};
use crate::ids::View;
use crate::model::Proposal;
use crate::pacemaker::Pacemaker;

/// Fatal event-handling failure, tagged with the component that failed.
///
/// Any of these means the replica can no longer participate correctly and
/// must stop; callers do not dispatch on the variant.
#[derive(Debug, thiserror::Error)]
pub enum EventHandlerError {
    #[error("fork tracking failed: {0}")]
    Forks(#[source] ComponentError),
    #[error("safety rules failed: {0}")]
    Safety(String),
    #[error("outbound messaging failed: {0}")]
    Communicator(#[source] ComponentError),
    #[error("persistence failed: {0}")]
    Persister(#[source] ComponentError),
    #[error("block production failed: {0}")]
    BlockProducer(#[source] ComponentError),
    #[error("pacemaker failed: {0}")]
    Pacemaker(#[source] ComponentError),
    #[error("committee lookup failed: {0}")]
    Committee(#[source] ComponentError),
    #[error("vote collection failed: {0}")]
    VoteCollector(#[source] ComponentError),
    #[error("timeout collection failed: {0}")]
    TimeoutCollector(#[source] ComponentError),
}

/// Wires consensus events through the pacemaker and its collaborators.
pub struct EventHandler {
    pacemaker: Pacemaker,
    forks: Arc<dyn Forks>,
    safety_rules: Arc<dyn SafetyRules>,
    committee: Arc<dyn Committee>,
    block_producer: Arc<dyn BlockProducer>,
    communicator: Arc<dyn Communicator>,
    vote_collector: Arc<dyn VoteCollector>,
    timeout_collector: Arc<dyn TimeoutCollector>,
    persister: Arc<dyn Persister>,
}

impl EventHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pacemaker: Pacemaker,
        forks: Arc<dyn Forks>,
        safety_rules: Arc<dyn SafetyRules>,
        committee: Arc<dyn Committee>,
        block_producer: Arc<dyn BlockProducer>,
        communicator: Arc<dyn Communicator>,
        vote_collector: Arc<dyn VoteCollector>,
        timeout_collector: Arc<dyn TimeoutCollector>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        EventHandler {
            pacemaker,
            forks,
            safety_rules,
            committee,
            block_producer,
            communicator,
            vote_collector,
            timeout_collector,
            persister,
        }
    }

    /// The pacemaker's current view.
    pub fn cur_view(&self) -> View {
        self.pacemaker.cur_view()
    }

    /// Channel that fires when the current view's timer expires. The
    /// driving loop selects on this alongside its event queues.
    pub fn timeout_channel(&self) -> crossbeam_channel::Receiver<std::time::Instant> {
        self.pacemaker.timeout_channel()
    }

    /// Start consensus processing.
    ///
    /// Records the starting view, starts the pacemaker, then replays blocks
    /// that arrived while the replica was offline: every stored block
    /// between the finalized view and the current view is re-fed through
    /// the proposal path so certificates embedded in them can catch the
    /// pacemaker up. Finally proposes if this replica leads the (possibly
    /// advanced) current view.
    pub fn start(&mut self) -> Result<(), EventHandlerError> {
        self.persister
            .put_started(self.pacemaker.cur_view())
            .map_err(EventHandlerError::Persister)?;
        self.pacemaker.start();

        info!(
            "starting event handling in view {}",
            self.pacemaker.cur_view()
        );
        self.process_pending_blocks()?;
        self.propose_if_leader_for_current_view()
    }

    /// A proposal arrived from the network (or was replayed at startup).
    pub fn on_receive_proposal(&mut self, proposal: &Proposal) -> Result<(), EventHandlerError> {
        let block = &proposal.block;
        debug!(
            "received proposal for view {} block {}",
            block.view, block.block_id
        );

        // Feed vote aggregation first: the proposal doubles as the
        // proposer's vote, and collection for a view may begin before this
        // replica's pacemaker reaches it.
        self.vote_collector
            .add_block(proposal)
            .map_err(EventHandlerError::VoteCollector)?;
        self.forks
            .add_block(block)
            .map_err(EventHandlerError::Forks)?;

        // The embedded QC may advance the view, whether or not we vote.
        self.pacemaker
            .process_qc(&block.qc)
            .map_err(EventHandlerError::Pacemaker)?;
        if let Some(tc) = &proposal.last_view_tc {
            self.pacemaker
                .process_tc(tc)
                .map_err(EventHandlerError::Pacemaker)?;
        }

        let cur_view = self.pacemaker.cur_view();
        if block.view == cur_view {
            self.process_current_view_block(proposal, cur_view)?;
        } else {
            debug!(
                "not voting for view {} block while in view {}",
                block.view, cur_view
            );
        }

        // After any view change caused by the embedded certificates, this
        // replica may now lead the current view.
        self.propose_if_leader_for_current_view()
    }

    /// Vote aggregation completed a quorum certificate.
    pub fn on_qc_constructed(&mut self, qc: &QuorumCertificate) -> Result<(), EventHandlerError> {
        debug!("qc constructed for view {} block {}", qc.view, qc.block_id);
        self.forks.add_qc(qc).map_err(EventHandlerError::Forks)?;
        let changed = self
            .pacemaker
            .process_qc(qc)
            .map_err(EventHandlerError::Pacemaker)?;
        if changed.is_some() {
            self.propose_if_leader_for_current_view()?;
        }
        Ok(())
    }

    /// Timeout aggregation completed a timeout certificate.
    pub fn on_tc_constructed(&mut self, tc: &TimeoutCertificate) -> Result<(), EventHandlerError> {
        debug!("tc constructed for view {}", tc.view);
        let changed = self
            .pacemaker
            .process_tc(tc)
            .map_err(EventHandlerError::Pacemaker)?;
        if changed.is_some() {
            self.propose_if_leader_for_current_view()?;
        }
        Ok(())
    }

    /// The current view's timer fired.
    ///
    /// Advances the view, then broadcasts a signed timeout statement for
    /// the view that was abandoned so the committee can assemble a timeout
    /// certificate. The statement also goes into this replica's own
    /// collector; its stake counts too.
    pub fn on_local_timeout(&mut self) -> Result<(), EventHandlerError> {
        let timed_out_view = self.pacemaker.cur_view();
        let last_view_tc = self.pacemaker.last_view_tc().cloned();
        let newest_qc = self.pacemaker.newest_qc().clone();

        self.pacemaker
            .on_local_timeout()
            .map_err(EventHandlerError::Pacemaker)?;

        let timeout = match self.safety_rules.produce_timeout(
            timed_out_view,
            &newest_qc,
            last_view_tc.as_ref(),
        ) {
            Ok(timeout) => timeout,
            Err(err) if err.is_no_vote() => {
                debug!("not timing out view {}: {}", timed_out_view, err);
                return self.propose_if_leader_for_current_view();
            }
            Err(err) => return Err(EventHandlerError::Safety(err.to_string())),
        };

        self.communicator
            .broadcast_timeout(&timeout)
            .map_err(EventHandlerError::Communicator)?;
        self.timeout_collector
            .add_timeout(timeout)
            .map_err(EventHandlerError::TimeoutCollector)?;

        self.propose_if_leader_for_current_view()
    }

    /// Replay stored blocks from above the finalized view up to the current
    /// view. The current view is re-read every iteration because embedded
    /// certificates move it forward during replay.
    fn process_pending_blocks(&mut self) -> Result<(), EventHandlerError> {
        let mut view = self.forks.finalized_view() + 1;
        while view <= self.pacemaker.cur_view() {
            let blocks = self.forks.get_blocks_for_view(view);
            for block in blocks {
                debug!("replaying pending block for view {}", block.view);
                let proposal = Proposal::new(block, None, Vec::new());
                self.on_receive_proposal(&proposal)?;
            }
            view += 1;
        }
        Ok(())
    }

    /// Handle the block for the current view: switch to the shorter
    /// vote-collection timer when this replica collects the next view's
    /// votes, then vote if the safety rules allow it.
    fn process_current_view_block(
        &mut self,
        proposal: &Proposal,
        cur_view: View,
    ) -> Result<(), EventHandlerError> {
        let next_leader = self
            .committee
            .leader_for_view(cur_view + 1)
            .map_err(EventHandlerError::Committee)?;
        let collecting_next = next_leader == self.committee.self_id();
        // The current view's block is processed; when we collect the next
        // view's votes, the rest of the view's budget only covers
        // aggregation. This holds whether or not we vote ourselves.
        if collecting_next {
            self.pacemaker.start_vote_collection_timeout();
        }

        // Voting requires the parent; without it the block's validity
        // cannot be judged. The block stays stored and is revisited once
        // synchronization delivers the parent.
        if proposal.block.qc.view > 0 && self.forks.get_block(&proposal.block.qc.block_id).is_none()
        {
            warn!(
                "missing parent {} for view {} block, skipping vote",
                proposal.block.qc.block_id, proposal.block.view
            );
            return Ok(());
        }

        let vote = match self.safety_rules.produce_vote(proposal, cur_view) {
            Ok(vote) => vote,
            Err(err) if err.is_no_vote() => {
                debug!("abstaining in view {}: {}", cur_view, err);
                return Ok(());
            }
            Err(err) => return Err(EventHandlerError::Safety(err.to_string())),
        };

        if collecting_next {
            self.vote_collector
                .add_vote(vote)
                .map_err(EventHandlerError::VoteCollector)?;
        } else {
            self.communicator
                .send_vote(&vote, next_leader)
                .map_err(EventHandlerError::Communicator)?;
        }
        Ok(())
    }

    /// Build and broadcast a proposal if this replica leads the current
    /// view and has not already proposed for it.
    fn propose_if_leader_for_current_view(&mut self) -> Result<(), EventHandlerError> {
        let cur_view = self.pacemaker.cur_view();
        let leader = self
            .committee
            .leader_for_view(cur_view)
            .map_err(EventHandlerError::Committee)?;
        if leader != self.committee.self_id() {
            return Ok(());
        }
        // Proposing twice for one view is equivocation.
        if !self.forks.get_blocks_for_view(cur_view).is_empty() {
            debug!("already proposed for view {}", cur_view);
            return Ok(());
        }

        let qc = self.pacemaker.newest_qc().clone();
        let mut last_view_tc = self.pacemaker.last_view_tc().cloned();
        // When the TC's embedded QC certifies the abandoned view itself,
        // the QC alone justifies entering this view; the TC is redundant.
        if let Some(tc) = &last_view_tc {
            if qc.view >= tc.view {
                last_view_tc = None;
            }
        }

        let proposal = self
            .block_producer
            .make_block_proposal(qc, cur_view, last_view_tc)
            .map_err(EventHandlerError::BlockProducer)?;
        info!(
            "proposing block {} for view {}",
            proposal.block.block_id, cur_view
        );

        self.forks
            .add_block(&proposal.block)
            .map_err(EventHandlerError::Forks)?;
        self.vote_collector
            .add_block(&proposal)
            .map_err(EventHandlerError::VoteCollector)?;
        self.communicator
            .broadcast_proposal_with_delay(&proposal, self.pacemaker.block_rate_delay())
            .map_err(EventHandlerError::Communicator)?;
        Ok(())
    }
}
