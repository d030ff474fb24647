//! Automatic reconnection with exponential backoff
//!
//! [`ReconnectionSupervisor`] watches a session's state snapshots. When the
//! phase newly becomes `disconnected`, `failed` or `closed` it waits
//! `min(initial * 2^n, max)` and calls the supplied connect callback, at most
//! `max_attempts` times between two successful connections.
//!
//! ```no_run
//! use streameasy_viewer::{ReconnectionSupervisor, SignalingSession, ViewerConfig};
//!
//! # async fn example() {
//! let config = ViewerConfig::new("ws://localhost:8080", "cam-1");
//! let reconnect = config.reconnect;
//! let session = SignalingSession::webrtc(config);
//!
//! let handle = session.clone();
//! let supervisor =
//!     ReconnectionSupervisor::observe(session.subscribe(), move || handle.connect(), reconnect);
//! session.connect();
//! # drop(supervisor);
//! # }
//! ```

pub mod policy;
pub mod supervisor;

pub use policy::{BackoffPolicy, Decision, RetryTracker};
pub use supervisor::{ReconnectStatus, ReconnectionSupervisor};
