//! View liveness state machine.
//!
//! The pacemaker owns the replica's current view and decides when to move
//! on. Views advance only on certificates: a quorum certificate for view v
//! moves every replica to v+1, a timeout certificate for view v does the
//! same when no quorum formed. A local timeout also forces the view forward
//! so a replica can never wedge on an unresponsive leader.
//!
//! # Invariants
//!
//! - The current view is strictly monotonically increasing. A request to
//!   re-enter or go back to a view is a logic error and panics.
//! - `newest_qc` never decreases in view.
//! - Every view change is persisted before the new view becomes live, so a
//!   crash can never resume into an already-used view.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, warn};

use crate::api::{ComponentError, Persister};
use crate::certs::{QuorumCertificate, TimeoutCertificate};
use crate::ids::View;
use crate::model::{LivenessData, NewViewEvent, TimeoutMode};
use crate::notifications::Consumer;
use crate::timeout::TimeoutController;

/// Drives view progression for one replica.
pub struct Pacemaker {
    liveness: LivenessData,
    timeout_control: TimeoutController,
    notifier: Arc<dyn Consumer>,
    persister: Arc<dyn Persister>,
    started: bool,
}

impl Pacemaker {
    /// Restore a pacemaker from persisted liveness state.
    ///
    /// # Errors
    ///
    /// Fails if the persisted state cannot be read or records a view below
    /// 1. View 0 is reserved for genesis and no replica ever operates in it.
    pub fn new(
        timeout_control: TimeoutController,
        notifier: Arc<dyn Consumer>,
        persister: Arc<dyn Persister>,
    ) -> Result<Self, ComponentError> {
        let liveness = persister.get_liveness_data()?;
        if liveness.current_view < 1 {
            return Err(ComponentError::new(format!(
                "persisted view {} is below the minimum view 1",
                liveness.current_view
            )));
        }
        Ok(Pacemaker {
            liveness,
            timeout_control,
            notifier,
            persister,
            started: false,
        })
    }

    /// Begin timing the current view. Idempotent; only the first call
    /// starts a timer.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let timer = self
            .timeout_control
            .start_timeout(TimeoutMode::ReplicaTimeout, self.liveness.current_view);
        self.notifier.on_starting_timeout(&timer);
    }

    /// The view this replica is currently in.
    pub fn cur_view(&self) -> View {
        self.liveness.current_view
    }

    /// The newest quorum certificate this replica knows.
    pub fn newest_qc(&self) -> &QuorumCertificate {
        &self.liveness.newest_qc
    }

    /// Timeout certificate for the previous view, if it ended by timeout.
    pub fn last_view_tc(&self) -> Option<&TimeoutCertificate> {
        self.liveness.last_view_tc.as_ref()
    }

    /// Channel that fires when the current view's timer expires.
    pub fn timeout_channel(&self) -> Receiver<std::time::Instant> {
        self.timeout_control.channel()
    }

    /// Configured proposal broadcast delay.
    pub fn block_rate_delay(&self) -> Duration {
        self.timeout_control.block_rate_delay()
    }

    /// Process a quorum certificate.
    ///
    /// A certificate for a past view is stale and ignored. Otherwise the
    /// replica records progress (shrinking its timeout), adopts the QC if it
    /// is the newest seen, and advances to the view after the certified one.
    ///
    /// Returns the new-view event if the view changed.
    pub fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
    ) -> Result<Option<NewViewEvent>, ComponentError> {
        if qc.view < self.liveness.current_view {
            debug!(
                "ignoring stale qc for view {} while in view {}",
                qc.view, self.liveness.current_view
            );
            return Ok(None);
        }

        // A current-or-future QC is evidence the committee is making
        // progress, regardless of how far ahead it is.
        self.timeout_control.on_progress_before_timeout();

        if qc.view > self.liveness.newest_qc.view {
            self.liveness.newest_qc = qc.clone();
        }
        // Entering via QC: the previous view (qc.view) ended with a quorum,
        // so no timeout certificate applies.
        self.liveness.last_view_tc = None;

        let new_view = qc.view + 1;
        self.notifier.on_qc_triggered_view_change(qc, new_view);
        self.goto_view(new_view)?;
        Ok(Some(NewViewEvent { view: new_view }))
    }

    /// Process a timeout certificate.
    ///
    /// A certificate for a past view is stale and ignored. Otherwise the
    /// replica fast-forwards its newest QC from the one embedded in the TC,
    /// records the TC as the previous view's exit proof, and advances to the
    /// view after the abandoned one.
    ///
    /// Returns the new-view event if the view changed.
    pub fn process_tc(
        &mut self,
        tc: &TimeoutCertificate,
    ) -> Result<Option<NewViewEvent>, ComponentError> {
        if tc.view < self.liveness.current_view {
            debug!(
                "ignoring stale tc for view {} while in view {}",
                tc.view, self.liveness.current_view
            );
            return Ok(None);
        }

        if tc.newest_qc.view > self.liveness.newest_qc.view {
            self.liveness.newest_qc = tc.newest_qc.clone();
        }
        self.liveness.last_view_tc = Some(tc.clone());

        let new_view = tc.view + 1;
        self.notifier.on_tc_triggered_view_change(tc, new_view);
        self.goto_view(new_view)?;
        Ok(Some(NewViewEvent { view: new_view }))
    }

    /// The current view's timer fired. Grows the timeout and forces the
    /// view forward so the replica cannot wedge behind a silent leader.
    pub fn on_local_timeout(&mut self) -> Result<NewViewEvent, ComponentError> {
        if let Some(timer) = self.timeout_control.timer_info() {
            self.notifier.on_reached_timeout(&timer);
        }
        warn!(
            "local timeout in view {}, forcing view change",
            self.liveness.current_view
        );
        self.timeout_control.on_timeout();

        let new_view = self.liveness.current_view + 1;
        self.goto_view(new_view)?;
        Ok(NewViewEvent { view: new_view })
    }

    /// Replace the replica timer with the shorter vote-collection timer.
    /// Called by a leader once it has processed its own block for the
    /// current view and is now only waiting for votes.
    pub fn start_vote_collection_timeout(&mut self) {
        let timer = self
            .timeout_control
            .start_timeout(TimeoutMode::VoteCollectionTimeout, self.liveness.current_view);
        self.notifier.on_starting_timeout(&timer);
    }

    /// Enter `new_view`. Persists the liveness snapshot, then starts the
    /// view timer; the new view is not live until both happened.
    ///
    /// # Panics
    ///
    /// Panics if `new_view` is not strictly greater than the current view.
    /// View monotonicity is the safety bedrock of the whole protocol; a
    /// violation means corrupted internal state and must not be survived.
    fn goto_view(&mut self, new_view: View) -> Result<(), ComponentError> {
        let cur_view = self.liveness.current_view;
        assert!(
            new_view > cur_view,
            "cannot move from view {} to non-larger view {}",
            cur_view,
            new_view
        );

        if new_view > cur_view + 1 {
            self.notifier.on_skipped_ahead(new_view);
        }

        self.liveness.current_view = new_view;
        // A retained TC only justifies entering the view directly after the
        // one it certifies; drop it when views were skipped.
        if let Some(tc) = &self.liveness.last_view_tc {
            if tc.view + 1 != new_view {
                self.liveness.last_view_tc = None;
            }
        }

        self.persister.put_liveness_data(&self.liveness)?;

        let timer = self
            .timeout_control
            .start_timeout(TimeoutMode::ReplicaTimeout, new_view);
        self.notifier.on_starting_timeout(&timer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryPersister;
    use crate::ids::BlockId;
    use crate::notifications::NoopConsumer;
    use crate::timeout::TimeoutConfig;
    use parking_lot::Mutex;

    fn qc(view: View) -> QuorumCertificate {
        QuorumCertificate::new(view, BlockId::new([view as u8; 32]), vec![], vec![])
    }

    fn tc(view: View, qc_view: View) -> TimeoutCertificate {
        TimeoutCertificate::new(view, qc(qc_view), vec![], vec![])
    }

    fn controller() -> TimeoutController {
        TimeoutController::new(TimeoutConfig::default()).unwrap()
    }

    fn pacemaker_at(view: View) -> (Pacemaker, Arc<InMemoryPersister>) {
        let persister = Arc::new(InMemoryPersister::new(LivenessData {
            current_view: view,
            newest_qc: QuorumCertificate::genesis(),
            last_view_tc: None,
        }));
        let pm = Pacemaker::new(controller(), Arc::new(NoopConsumer), persister.clone()).unwrap();
        (pm, persister)
    }

    /// Records skipped-ahead notifications for assertions.
    #[derive(Default)]
    struct SkipRecorder {
        skipped: Mutex<Vec<View>>,
    }

    impl Consumer for SkipRecorder {
        fn on_skipped_ahead(&self, new_view: View) {
            self.skipped.lock().push(new_view);
        }
    }

    #[test]
    fn rejects_persisted_view_zero() {
        let persister = Arc::new(InMemoryPersister::new(LivenessData {
            current_view: 0,
            newest_qc: QuorumCertificate::genesis(),
            last_view_tc: None,
        }));
        assert!(Pacemaker::new(controller(), Arc::new(NoopConsumer), persister).is_err());
    }

    #[test]
    fn qc_for_current_view_advances_to_next() {
        let (mut pm, persister) = pacemaker_at(3);
        let event = pm.process_qc(&qc(3)).unwrap().unwrap();
        assert_eq!(event.view, 4);
        assert_eq!(pm.cur_view(), 4);
        assert_eq!(pm.newest_qc().view, 3);
        assert!(pm.last_view_tc().is_none());
        // Persisted before the view became live.
        assert_eq!(persister.get_liveness_data().unwrap().current_view, 4);
    }

    #[test]
    fn stale_qc_is_ignored() {
        let (mut pm, _) = pacemaker_at(5);
        assert!(pm.process_qc(&qc(3)).unwrap().is_none());
        assert_eq!(pm.cur_view(), 5);
    }

    #[test]
    fn future_qc_skips_ahead_and_notifies() {
        let recorder = Arc::new(SkipRecorder::default());
        let persister = Arc::new(InMemoryPersister::genesis());
        let mut pm = Pacemaker::new(controller(), recorder.clone(), persister).unwrap();

        let event = pm.process_qc(&qc(9)).unwrap().unwrap();
        assert_eq!(event.view, 10);
        assert_eq!(pm.cur_view(), 10);
        assert_eq!(*recorder.skipped.lock(), vec![10]);
    }

    #[test]
    fn tc_advances_and_fast_forwards_newest_qc() {
        let (mut pm, _) = pacemaker_at(4);
        let event = pm.process_tc(&tc(4, 3)).unwrap().unwrap();
        assert_eq!(event.view, 5);
        assert_eq!(pm.newest_qc().view, 3);
        assert_eq!(pm.last_view_tc().unwrap().view, 4);
    }

    #[test]
    fn stale_tc_is_ignored() {
        let (mut pm, _) = pacemaker_at(7);
        assert!(pm.process_tc(&tc(5, 4)).unwrap().is_none());
        assert_eq!(pm.cur_view(), 7);
        assert!(pm.last_view_tc().is_none());
    }

    #[test]
    fn qc_entry_clears_previous_tc() {
        let (mut pm, _) = pacemaker_at(4);
        pm.process_tc(&tc(4, 3)).unwrap();
        assert!(pm.last_view_tc().is_some());

        pm.process_qc(&qc(5)).unwrap();
        assert!(pm.last_view_tc().is_none());
    }

    #[test]
    fn skipping_views_drops_a_no_longer_adjacent_tc() {
        let (mut pm, _) = pacemaker_at(4);
        // TC for view 6 while in view 4: the TC certifies view 6, which is
        // adjacent to the new view 7, so it is retained.
        pm.process_tc(&tc(6, 3)).unwrap();
        assert_eq!(pm.cur_view(), 7);
        assert_eq!(pm.last_view_tc().unwrap().view, 6);

        // A far-future QC skips ahead; nothing certifies the view before
        // the new one.
        pm.process_qc(&qc(20)).unwrap();
        assert_eq!(pm.cur_view(), 21);
        assert!(pm.last_view_tc().is_none());
    }

    #[test]
    fn local_timeout_always_advances() {
        let (mut pm, persister) = pacemaker_at(6);
        pm.start();
        let event = pm.on_local_timeout().unwrap();
        assert_eq!(event.view, 7);
        assert_eq!(pm.cur_view(), 7);
        assert_eq!(persister.get_liveness_data().unwrap().current_view, 7);
    }

    #[test]
    fn start_is_idempotent() {
        let (mut pm, _) = pacemaker_at(2);
        pm.start();
        let first = pm.timeout_channel();
        pm.start();
        // Same underlying channel; no second timer was started.
        assert!(first.is_empty());
        assert_eq!(pm.cur_view(), 2);
    }

    #[test]
    #[should_panic(expected = "non-larger view")]
    fn goto_view_panics_on_non_monotonic_request() {
        let (mut pm, _) = pacemaker_at(5);
        pm.goto_view(5).unwrap();
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn view_is_strictly_monotonic_under_any_certificate_stream(
                certs in proptest::collection::vec((0u64..50, any::<bool>()), 1..100)
            ) {
                let (mut pm, _) = pacemaker_at(1);
                let mut last_view = pm.cur_view();
                for (view, is_qc) in certs {
                    if is_qc {
                        pm.process_qc(&qc(view)).unwrap();
                    } else {
                        pm.process_tc(&tc(view, view.saturating_sub(1))).unwrap();
                    }
                    prop_assert!(pm.cur_view() >= last_view);
                    last_view = pm.cur_view();
                }
            }
        }
    }
}
