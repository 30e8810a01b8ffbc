//! Observer hooks for consensus-internal events.
//!
//! The [`Consumer`] trait is a pure observation surface: implementations
//! feed metrics, logging, or test instrumentation. All methods have no-op
//! defaults so consumers only implement what they care about, and no
//! consensus logic may ever depend on a consumer's behavior.

use crate::certs::{QuorumCertificate, TimeoutCertificate};
use crate::ids::View;
use crate::model::TimerInfo;

/// Receives notifications about pacemaker and event-loop activity.
///
/// Implementations must be cheap and must not block; they run inline on the
/// event-handling thread.
pub trait Consumer: Send + Sync {
    /// A timeout timer was started.
    fn on_starting_timeout(&self, _timer: &TimerInfo) {}

    /// A timeout timer fired without progress.
    fn on_reached_timeout(&self, _timer: &TimerInfo) {}

    /// The view advanced by more than one, skipping views in between.
    fn on_skipped_ahead(&self, _new_view: View) {}

    /// A quorum certificate caused a view change.
    fn on_qc_triggered_view_change(&self, _qc: &QuorumCertificate, _new_view: View) {}

    /// A timeout certificate caused a view change.
    fn on_tc_triggered_view_change(&self, _tc: &TimeoutCertificate, _new_view: View) {}
}

/// Consumer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsumer;

impl Consumer for NoopConsumer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeoutMode;
    use std::time::{Duration, Instant};

    #[test]
    fn noop_consumer_accepts_all_notifications() {
        let consumer = NoopConsumer;
        let timer = TimerInfo {
            mode: TimeoutMode::ReplicaTimeout,
            view: 1,
            start_time: Instant::now(),
            duration: Duration::from_millis(100),
        };
        consumer.on_starting_timeout(&timer);
        consumer.on_reached_timeout(&timer);
        consumer.on_skipped_ahead(5);
        consumer.on_qc_triggered_view_change(&QuorumCertificate::genesis(), 1);
    }
}
