//! Reconnection supervisor task

use super::policy::{Decision, RetryTracker};
use crate::config::ReconnectConfig;
use crate::state::ConnectionState;
use parking_lot::Mutex;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

/// Observable supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStatus {
    /// Retries scheduled since the last successful connection
    pub attempts: u32,
    /// A retry timer is pending
    pub reconnecting: bool,
    /// Retry budget
    pub max_attempts: u32,
    /// The last failure found the budget spent; only a manual `connect()` helps now
    pub exhausted: bool,
}

/// Watches session state snapshots and schedules retries with backoff
///
/// Dropping the supervisor is equivalent to [`ReconnectionSupervisor::shutdown`].
pub struct ReconnectionSupervisor {
    status_tx: Arc<watch::Sender<ReconnectStatus>>,
    status_rx: watch::Receiver<ReconnectStatus>,
    /// Cleared on shutdown; the callback only runs while holding it set
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl ReconnectionSupervisor {
    /// Start supervising `states`, calling `connect` for every retry
    ///
    /// The snapshot current at this point is recorded but not acted on.
    /// `connect` runs on the supervisor task and must not block or call
    /// [`ReconnectionSupervisor::shutdown`]. Must be called from within a
    /// tokio runtime.
    pub fn observe<F>(
        mut states: watch::Receiver<ConnectionState>,
        connect: F,
        config: ReconnectConfig,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let initial = ReconnectStatus {
            attempts: 0,
            reconnecting: false,
            max_attempts: config.max_attempts,
            exhausted: false,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let status_tx = Arc::new(status_tx);
        let active = Arc::new(Mutex::new(true));

        let mut tracker = RetryTracker::new(&config);
        tracker.prime(&states.borrow_and_update());

        let task = tokio::spawn(supervise(
            states,
            connect,
            tracker,
            Arc::clone(&status_tx),
            Arc::clone(&active),
        ));

        Self {
            status_tx,
            status_rx,
            active,
            task,
        }
    }

    /// Retries scheduled since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.status_rx.borrow().attempts
    }

    /// Whether a retry timer is pending
    pub fn is_reconnecting(&self) -> bool {
        self.status_rx.borrow().reconnecting
    }

    /// Current status
    pub fn status(&self) -> ReconnectStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<ReconnectStatus> {
        self.status_rx.clone()
    }

    /// Cancel any pending retry and stop observing
    ///
    /// Once this returns the connect callback is never invoked again.
    pub fn shutdown(&self) {
        {
            let mut active = self.active.lock();
            if !*active {
                return;
            }
            *active = false;
        }

        self.task.abort();
        self.status_tx.send_modify(|status| status.reconnecting = false);
        debug!("Reconnection supervisor stopped");
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReconnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionSupervisor")
            .field("status", &self.status())
            .finish()
    }
}

async fn supervise<F>(
    mut states: watch::Receiver<ConnectionState>,
    connect: F,
    mut tracker: RetryTracker,
    status_tx: Arc<watch::Sender<ReconnectStatus>>,
    active: Arc<Mutex<bool>>,
) where
    F: Fn() + Send + Sync + 'static,
{
    let max_attempts = tracker.policy().max_attempts;

    let mut retry: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    debug!("Session gone, supervisor exiting");
                    break;
                }

                let state = states.borrow_and_update().clone();
                match tracker.observe(&state) {
                    Decision::Schedule { attempt, delay } => {
                        info!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            phase = %state.phase,
                            "Scheduling reconnection"
                        );
                        retry = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                    Decision::Reset => {
                        if retry.take().is_some() {
                            debug!("Connected, pending retry cancelled");
                        }
                    }
                    Decision::Exhausted => {
                        warn!(
                            max_attempts,
                            phase = %state.phase,
                            "Reconnection attempts exhausted"
                        );
                    }
                    Decision::Ignore => {}
                }
            }
            _ = wait_retry(&mut retry) => {
                retry = None;
                tracker.retry_fired();
                publish(&status_tx, &tracker, max_attempts);

                let guard = active.lock();
                if !*guard {
                    break;
                }
                info!(attempt = tracker.attempts(), max_attempts, "Reconnecting");
                connect();
                continue;
            }
        }

        publish(&status_tx, &tracker, max_attempts);
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

fn publish(status_tx: &watch::Sender<ReconnectStatus>, tracker: &RetryTracker, max_attempts: u32) {
    status_tx.send_if_modified(|status| {
        let next = ReconnectStatus {
            attempts: tracker.attempts(),
            reconnecting: tracker.is_pending(),
            max_attempts,
            exhausted: tracker.is_exhausted(),
        };
        let modified = *status != next;
        *status = next;
        modified
    });
}
