//! Application-level readiness, reachability and lifecycle signals

use crate::signal::Observable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Foreground/background state reported by the host OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    #[default]
    Active,
    Inactive,
    Background,
}

impl AppLifecycle {
    /// True for `Inactive` and `Background`
    pub fn is_backgrounded(&self) -> bool {
        matches!(self, AppLifecycle::Inactive | AppLifecycle::Background)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppLifecycle::Active => "active",
            AppLifecycle::Inactive => "inactive",
            AppLifecycle::Background => "background",
        }
    }
}

impl fmt::Display for AppLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide app flags consumed by the engine
#[derive(Debug, Default)]
pub struct AppState {
    hydration_done: Observable<bool>,
    splash_screen_hidden: AtomicBool,
    internet_reachable: Observable<bool>,
    lifecycle: Observable<AppLifecycle>,
}

impl AppState {
    /// Not hydrated, splash visible, offline, active
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hydration_done(&self) -> bool {
        self.hydration_done.get()
    }

    pub fn set_hydration_done(&self, done: bool) {
        self.hydration_done.set(done);
    }

    /// Observable behind [`hydration_done`](Self::hydration_done)
    pub fn hydration(&self) -> &Observable<bool> {
        &self.hydration_done
    }

    pub fn splash_screen_hidden(&self) -> bool {
        self.splash_screen_hidden.load(Ordering::Acquire)
    }

    pub fn set_splash_screen_hidden(&self, hidden: bool) {
        self.splash_screen_hidden.store(hidden, Ordering::Release);
    }

    pub fn internet_reachable(&self) -> bool {
        self.internet_reachable.get()
    }

    pub fn set_internet_reachable(&self, reachable: bool) {
        self.internet_reachable.set(reachable);
    }

    /// Observable behind [`internet_reachable`](Self::internet_reachable)
    pub fn reachability(&self) -> &Observable<bool> {
        &self.internet_reachable
    }

    pub fn lifecycle_state(&self) -> AppLifecycle {
        self.lifecycle.get()
    }

    pub fn set_lifecycle_state(&self, state: AppLifecycle) {
        self.lifecycle.set(state);
    }

    /// Observable behind [`lifecycle_state`](Self::lifecycle_state)
    pub fn lifecycle(&self) -> &Observable<AppLifecycle> {
        &self.lifecycle
    }
}
