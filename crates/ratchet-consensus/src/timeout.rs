//! Adaptive timeout control for the pacemaker.
//!
//! The controller owns one mutable timeout duration and the logic to adjust
//! it: sustained timeouts grow it multiplicatively (the committee is slower
//! than we assumed), observed progress shrinks it by a fixed step (the
//! committee is healthy, tighten up). Both directions are bounded by the
//! configured minimum and maximum.
//!
//! Firing is exposed as a channel that delivers a single `Instant` at the
//! deadline; the driving loop selects on it alongside incoming events.
//! Starting a new timeout replaces the channel, so a stale timer can never
//! fire for a past view.

use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::ids::View;
use crate::model::{TimeoutMode, TimerInfo};

/// Static configuration for timeout adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutConfig {
    /// Timeout for the first view after startup.
    pub replica_timeout: Duration,
    /// Lower bound the decrease step never crosses.
    pub min_replica_timeout: Duration,
    /// Upper bound the increase factor never crosses.
    pub max_replica_timeout: Duration,
    /// Multiplier applied on each timeout without progress. Must be > 1.
    pub timeout_increase_factor: f64,
    /// Fixed amount subtracted on each observed progress event.
    pub timeout_decrease_step: Duration,
    /// Fraction of the replica timeout reserved for vote collection.
    /// Must lie in (0, 1].
    pub vote_aggregation_fraction: f64,
    /// Deliberate delay before broadcasting a proposal, to rate-limit block
    /// production independent of network speed.
    pub block_rate_delay: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            replica_timeout: Duration::from_millis(1200),
            min_replica_timeout: Duration::from_millis(200),
            max_replica_timeout: Duration::from_secs(30),
            timeout_increase_factor: 2.0,
            timeout_decrease_step: Duration::from_millis(100),
            vote_aggregation_fraction: 0.5,
            block_rate_delay: Duration::ZERO,
        }
    }
}

/// Configuration validation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutConfigError {
    /// The minimum timeout exceeds the initial timeout.
    MinAboveInitial { min: Duration, initial: Duration },
    /// The initial timeout exceeds the maximum timeout.
    InitialAboveMax { initial: Duration, max: Duration },
    /// The increase factor is not strictly greater than one.
    IncreaseFactorNotGrowing(f64),
    /// The vote aggregation fraction lies outside (0, 1].
    FractionOutOfRange(f64),
}

impl fmt::Display for TimeoutConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutConfigError::MinAboveInitial { min, initial } => write!(
                f,
                "minimum timeout {:?} exceeds initial timeout {:?}",
                min, initial
            ),
            TimeoutConfigError::InitialAboveMax { initial, max } => write!(
                f,
                "initial timeout {:?} exceeds maximum timeout {:?}",
                initial, max
            ),
            TimeoutConfigError::IncreaseFactorNotGrowing(factor) => {
                write!(f, "timeout increase factor {} must be > 1", factor)
            }
            TimeoutConfigError::FractionOutOfRange(fraction) => write!(
                f,
                "vote aggregation fraction {} must lie in (0, 1]",
                fraction
            ),
        }
    }
}

impl std::error::Error for TimeoutConfigError {}

impl TimeoutConfig {
    /// Validate a configuration.
    pub fn validated(self) -> Result<Self, TimeoutConfigError> {
        if self.min_replica_timeout > self.replica_timeout {
            return Err(TimeoutConfigError::MinAboveInitial {
                min: self.min_replica_timeout,
                initial: self.replica_timeout,
            });
        }
        if self.replica_timeout > self.max_replica_timeout {
            return Err(TimeoutConfigError::InitialAboveMax {
                initial: self.replica_timeout,
                max: self.max_replica_timeout,
            });
        }
        if self.timeout_increase_factor <= 1.0 {
            return Err(TimeoutConfigError::IncreaseFactorNotGrowing(
                self.timeout_increase_factor,
            ));
        }
        if self.vote_aggregation_fraction <= 0.0 || self.vote_aggregation_fraction > 1.0 {
            return Err(TimeoutConfigError::FractionOutOfRange(
                self.vote_aggregation_fraction,
            ));
        }
        Ok(self)
    }
}

/// Owns the adjustable timeout duration and the running timer.
#[derive(Debug)]
pub struct TimeoutController {
    config: TimeoutConfig,
    /// Current adapted replica timeout, always within [min, max].
    replica_timeout: Duration,
    /// Metadata of the running timer, if one was started.
    timer_info: Option<TimerInfo>,
    /// Fires exactly once at the current deadline.
    channel: Receiver<Instant>,
}

impl TimeoutController {
    /// Create a controller from a validated configuration.
    pub fn new(config: TimeoutConfig) -> Result<Self, TimeoutConfigError> {
        let config = config.validated()?;
        Ok(TimeoutController {
            config,
            replica_timeout: config.replica_timeout,
            timer_info: None,
            channel: crossbeam_channel::never(),
        })
    }

    /// Start a timer for `view` in the given mode, replacing any prior
    /// timer. Vote-collection timers run for the configured fraction of the
    /// replica timeout, since part of the view's budget already elapsed
    /// before the leader's own block was processed.
    pub fn start_timeout(&mut self, mode: TimeoutMode, view: View) -> TimerInfo {
        let duration = match mode {
            TimeoutMode::ReplicaTimeout => self.replica_timeout,
            TimeoutMode::VoteCollectionTimeout => {
                self.replica_timeout.mul_f64(self.config.vote_aggregation_fraction)
            }
        };
        let info = TimerInfo {
            mode,
            view,
            start_time: Instant::now(),
            duration,
        };
        self.channel = crossbeam_channel::after(duration);
        self.timer_info = Some(info);
        info
    }

    /// Channel that fires at the current deadline. Never fires before
    /// `start_timeout` was called.
    pub fn channel(&self) -> Receiver<Instant> {
        self.channel.clone()
    }

    /// Metadata of the running timer, if any.
    pub fn timer_info(&self) -> Option<TimerInfo> {
        self.timer_info
    }

    /// The timer fired without progress: grow the timeout multiplicatively,
    /// capped at the configured maximum.
    pub fn on_timeout(&mut self) {
        let grown = self.replica_timeout.mul_f64(self.config.timeout_increase_factor);
        self.replica_timeout = grown.min(self.config.max_replica_timeout);
    }

    /// Progress observed before the timer fired: shrink the timeout by the
    /// fixed step, floored at the configured minimum.
    pub fn on_progress_before_timeout(&mut self) {
        self.replica_timeout = self
            .replica_timeout
            .saturating_sub(self.config.timeout_decrease_step)
            .max(self.config.min_replica_timeout);
    }

    /// Current adapted replica timeout.
    pub fn replica_timeout(&self) -> Duration {
        self.replica_timeout
    }

    /// Configured proposal broadcast delay.
    pub fn block_rate_delay(&self) -> Duration {
        self.config.block_rate_delay
    }
}
