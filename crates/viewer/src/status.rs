//! User-facing status line

use crate::reconnect::ReconnectStatus;
use crate::state::ConnectionState;

/// Status banner for a snapshot and optional supervisor status
///
/// Shows the last error and, while a retry budget is in use, the attempt
/// count out of the maximum. `None` when there is nothing to report.
pub fn banner(state: &ConnectionState, reconnect: Option<&ReconnectStatus>) -> Option<String> {
    if state.is_live() {
        return None;
    }

    let mut parts = Vec::new();

    if let Some(error) = state.error.as_deref() {
        parts.push(error.to_string());
    }

    if let Some(status) = reconnect.filter(|s| s.attempts > 0) {
        if status.exhausted {
            parts.push(format!(
                "Gave up after {} attempts, reconnect manually",
                status.max_attempts
            ));
        } else {
            parts.push(format!(
                "Reconnecting ({}/{})",
                status.attempts, status.max_attempts
            ));
        }
    }

    (!parts.is_empty()).then(|| parts.join(" - "))
}
