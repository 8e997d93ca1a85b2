//! Runtime configuration for the binding and the presence room.

use std::time::Duration;

/// Configuration for a [`crate::DocumentBinding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    /// Undo only transactions tagged as local edits. When false, remote
    /// updates are undoable as well.
    pub track_local_only: bool,
    /// Grouping window of the replicated undo manager. Zero makes every
    /// local transaction its own undo step.
    pub capture_timeout_millis: u64,
    /// Run one silent diff at bind time so the first delivered patch
    /// already carries structure.
    pub prime_snapshot: bool,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            track_local_only: true,
            capture_timeout_millis: 0,
            prime_snapshot: true,
        }
    }
}

/// Configuration for a [`crate::PresenceRoom`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// State path holding a peer's display name.
    pub user_name_key: String,
    /// State path holding a peer's color.
    pub user_color_key: String,
    /// Minimum interval between local cursor broadcasts.
    pub cursor_throttle: Duration,
    /// Peers silent for longer than this are dropped by cleanup.
    pub idle_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            user_name_key: "user.name".into(),
            user_color_key: "user.color".into(),
            cursor_throttle: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(30),
        }
    }
}
