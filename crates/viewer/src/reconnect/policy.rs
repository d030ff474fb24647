//! Backoff policy and retry bookkeeping
//!
//! Pure logic, no timers: [`RetryTracker::observe`] turns each state
//! snapshot into a [`Decision`] that the supervisor task carries out.

use crate::config::ReconnectConfig;
use crate::state::{ConnectionState, Phase};
use std::time::Duration;

/// Exponential backoff without jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries between successful connections
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (0-indexed): `min(initial * 2^attempt, max)`
    ///
    /// Overflow saturates to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis();
        let max_ms = self.max_delay.as_millis();

        let delay_ms = 1u128
            .checked_shl(attempt)
            .and_then(|factor| initial_ms.checked_mul(factor))
            .map_or(max_ms, |ms| ms.min(max_ms));

        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    /// Check if another retry is allowed after `attempts` retries
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// What the supervisor should do about a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do
    Ignore,
    /// Arm the retry timer
    Schedule {
        /// 1-based retry number
        attempt: u32,
        /// Time until the retry
        delay: Duration,
    },
    /// Connection succeeded: cancel any pending retry, counter back to zero
    Reset,
    /// A retry was warranted but the budget is spent
    Exhausted,
}

/// Edge-triggered retry state
///
/// A failure counts once per `(phase, attempt)` pair, so snapshots coalesced
/// by the watch channel cannot hide the failure of a retried attempt.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: BackoffPolicy,
    enabled: bool,
    attempts: u32,
    last_seen: Option<(Phase, u64)>,
    pending: bool,
    exhausted: bool,
}

impl RetryTracker {
    /// Create a tracker for the given settings
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            policy: BackoffPolicy::from(config),
            enabled: config.enabled,
            attempts: 0,
            last_seen: None,
            pending: false,
            exhausted: false,
        }
    }

    /// Backoff policy in use
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Retries scheduled since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A retry is armed and has not fired yet
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The last failure found the budget spent
    ///
    /// Cleared on success and when a new attempt is seen in flight.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Record the snapshot present when observation starts, without acting on it
    pub fn prime(&mut self, state: &ConnectionState) {
        self.last_seen = Some((state.phase, state.attempt));
    }

    /// Feed the next snapshot
    pub fn observe(&mut self, state: &ConnectionState) -> Decision {
        let previous = self.last_seen.replace((state.phase, state.attempt));

        if state.connected && state.phase == Phase::Connected {
            self.attempts = 0;
            self.pending = false;
            self.exhausted = false;
            return Decision::Reset;
        }

        if !state.phase.is_terminal_failure() {
            self.exhausted = false;
        }

        if !self.enabled || state.connected || !state.phase.is_terminal_failure() {
            return Decision::Ignore;
        }

        if state.error_kind.is_some_and(|kind| !kind.is_retryable()) {
            return Decision::Ignore;
        }

        // Edge-triggered: the same failing phase of the same attempt is not a new failure
        if previous == Some((state.phase, state.attempt)) || self.pending {
            return Decision::Ignore;
        }

        if !self.policy.should_retry(self.attempts) {
            self.exhausted = true;
            return Decision::Exhausted;
        }

        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.pending = true;

        Decision::Schedule {
            attempt: self.attempts,
            delay,
        }
    }

    /// The armed retry fired
    pub fn retry_fired(&mut self) {
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn snapshot(phase: Phase) -> ConnectionState {
        ConnectionState {
            phase,
            ..Default::default()
        }
    }

    fn attempt(phase: Phase, attempt: u64) -> ConnectionState {
        ConnectionState {
            phase,
            attempt,
            ..Default::default()
        }
    }

    fn connected() -> ConnectionState {
        ConnectionState {
            phase: Phase::Connected,
            connected: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..5)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_backoff_saturates_on_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_should_retry() {
        let policy = BackoffPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_schedule_on_failure_edge() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::New));

        assert_eq!(tracker.observe(&snapshot(Phase::Connecting)), Decision::Ignore);
        assert_eq!(
            tracker.observe(&snapshot(Phase::Failed)),
            Decision::Schedule {
                attempt: 1,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(tracker.attempts(), 1);
        assert!(tracker.is_pending());
    }

    #[test]
    fn test_same_phase_twice_schedules_once() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::Connecting));

        assert!(matches!(
            tracker.observe(&snapshot(Phase::Failed)),
            Decision::Schedule { .. }
        ));
        tracker.retry_fired();
        assert_eq!(tracker.observe(&snapshot(Phase::Failed)), Decision::Ignore);
        assert_eq!(tracker.attempts(), 1);
    }

    #[test]
    fn test_pending_retry_blocks_second_schedule() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::Connecting));

        assert!(matches!(
            tracker.observe(&snapshot(Phase::Failed)),
            Decision::Schedule { .. }
        ));
        assert_eq!(
            tracker.observe(&snapshot(Phase::Disconnected)),
            Decision::Ignore
        );
        assert_eq!(tracker.attempts(), 1);
    }

    #[test]
    fn test_initial_failure_snapshot_not_acted_on() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::Failed));
        assert_eq!(tracker.observe(&snapshot(Phase::Failed)), Decision::Ignore);
    }

    #[test]
    fn test_budget_exhausted() {
        let config = ReconnectConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let mut tracker = RetryTracker::new(&config);
        tracker.prime(&snapshot(Phase::New));

        for n in 1..=2 {
            assert!(matches!(
                tracker.observe(&attempt(Phase::Failed, n)),
                Decision::Schedule { .. }
            ));
            tracker.retry_fired();
            tracker.observe(&attempt(Phase::Connecting, n + 1));
            assert!(!tracker.is_exhausted());
        }

        assert_eq!(tracker.observe(&attempt(Phase::Failed, 3)), Decision::Exhausted);
        assert_eq!(tracker.attempts(), 2);
        assert!(tracker.is_exhausted());

        // A manual attempt in flight is not "given up" yet
        tracker.observe(&attempt(Phase::Connecting, 4));
        assert!(!tracker.is_exhausted());
    }

    #[test]
    fn test_failure_of_retried_attempt_counts_when_connecting_was_coalesced() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&attempt(Phase::New, 0));

        assert!(matches!(
            tracker.observe(&attempt(Phase::Failed, 1)),
            Decision::Schedule { attempt: 1, .. }
        ));
        tracker.retry_fired();

        // Attempt 2 went Connecting -> Failed before the supervisor looked
        assert_eq!(
            tracker.observe(&attempt(Phase::Failed, 2)),
            Decision::Schedule {
                attempt: 2,
                delay: Duration::from_millis(4000)
            }
        );
    }

    #[test]
    fn test_non_retryable_failure_is_not_retried() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::Connecting));

        let state = ConnectionState {
            phase: Phase::Failed,
            error_kind: Some(ErrorKind::Config),
            ..Default::default()
        };
        assert_eq!(tracker.observe(&state), Decision::Ignore);
        assert_eq!(tracker.attempts(), 0);
    }

    #[test]
    fn test_connected_resets_counter() {
        let mut tracker = RetryTracker::new(&ReconnectConfig::default());
        tracker.prime(&snapshot(Phase::New));

        tracker.observe(&snapshot(Phase::Failed));
        tracker.retry_fired();
        tracker.observe(&snapshot(Phase::Connecting));
        assert_eq!(tracker.attempts(), 1);

        assert_eq!(tracker.observe(&connected()), Decision::Reset);
        assert_eq!(tracker.attempts(), 0);
    }

    #[test]
    fn test_disabled_never_schedules() {
        let config = ReconnectConfig {
            enabled: false,
            ..Default::default()
        };
        let mut tracker = RetryTracker::new(&config);
        tracker.prime(&snapshot(Phase::New));
        assert_eq!(tracker.observe(&snapshot(Phase::Failed)), Decision::Ignore);
        assert_eq!(tracker.observe(&snapshot(Phase::Closed)), Decision::Ignore);
    }
}
