//! Health reporting
//!
//! A [`HealthReport`] is assembled on demand from engine state; nothing here
//! runs in the background.

use crate::account::AccountId;
use crate::streaming::StreamingStore;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub last_check: SystemTime,
}

impl ComponentHealth {
    /// Create a healthy component
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            last_check: SystemTime::now(),
        }
    }

    /// Create a degraded component
    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            last_check: SystemTime::now(),
        }
    }

    /// Create an unhealthy component
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            last_check: SystemTime::now(),
        }
    }
}

/// Overall engine health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: SystemTime,
    pub components: Vec<ComponentHealth>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthReport {
    /// Worst component status wins
    pub fn new(uptime: Duration, components: Vec<ComponentHealth>) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            timestamp: SystemTime::now(),
            components,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Streaming is degraded while offline or while any account lacks a stream
pub fn streaming_health(
    accounts: &[AccountId],
    store: &StreamingStore,
    reachable: bool,
    consent_enabled: bool,
) -> ComponentHealth {
    if !reachable {
        return ComponentHealth::degraded("streaming", "internet unreachable");
    }

    let lagging: Vec<&str> = accounts
        .iter()
        .filter(|account| {
            let state = store.get(account);
            !(state.is_streaming_conversations
                && state.is_streaming_messages
                && (!consent_enabled || state.is_streaming_consent))
        })
        .map(|account| account.as_str())
        .collect();

    if lagging.is_empty() {
        ComponentHealth::healthy("streaming")
    } else {
        ComponentHealth::degraded(
            "streaming",
            format!("not fully streaming: {}", lagging.join(", ")),
        )
    }
}

/// Cron is degraded until its first pass and unhealthy once passes go stale
pub fn cron_health(last_run: Option<Instant>, stale_after: Duration) -> ComponentHealth {
    match last_run {
        None => ComponentHealth::degraded("cron", "no pass completed yet"),
        Some(last) if last.elapsed() > stale_after => ComponentHealth::unhealthy(
            "cron",
            format!("last pass {}s ago", last.elapsed().as_secs()),
        ),
        Some(_) => ComponentHealth::healthy("cron"),
    }
}
