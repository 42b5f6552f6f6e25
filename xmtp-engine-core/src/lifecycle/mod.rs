//! Foreground and reconnect detection
//!
//! Both recovery events trigger a full resync. Detection is edge-triggered:
//! only the transition into the recovered state counts, never the state
//! itself.

mod watcher;

pub use watcher::LifecycleWatcher;

use crate::app_state::AppLifecycle;
use serde::Serialize;
use std::fmt;

/// Why a resync was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncReason {
    /// App came back from `inactive` or `background`
    Foregrounded,
    /// Internet reachability went from false to true
    Reconnected,
}

impl ResyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResyncReason::Foregrounded => "foregrounded",
            ResyncReason::Reconnected => "reconnected",
        }
    }
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `inactive | background -> active`
pub fn app_became_active(previous: AppLifecycle, next: AppLifecycle) -> bool {
    previous.is_backgrounded() && next == AppLifecycle::Active
}

/// `false -> true`
pub fn connectivity_regained(previous: bool, next: bool) -> bool {
    !previous && next
}
