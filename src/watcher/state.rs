use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::config::WatchConfig;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WatchStatus {
    #[default]
    Stopped,
    Watching,
}

/// Polling cadence. Affects timing only, never which changes are reported.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WatchMode {
    #[default]
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSnapshot {
    pub status: WatchStatus,
    pub mode: WatchMode,
    pub last_seen_timestamp: Option<String>,
    pub polls: u64,
    pub changes: u64,
}

/// Observation state of one watching session. Reset by `begin` and `end`.
#[derive(Debug, Default)]
pub struct WatchState {
    pub status: WatchStatus,
    pub mode: WatchMode,
    pub last_seen_timestamp: Option<String>,
    pub last_activity: Option<Instant>,
    pub polls: u64,
    pub changes: u64,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        *self = Self {
            status: WatchStatus::Watching,
            ..Self::default()
        };
    }

    pub fn end(&mut self) {
        *self = Self::default();
    }

    pub fn is_watching(&self) -> bool {
        self.status == WatchStatus::Watching
    }

    /// Records one poll. Returns true when `latest` differs from the last
    /// timestamp seen, i.e. when the change callback is due.
    pub fn record_poll(&mut self, latest: Option<&str>, now: Instant) -> bool {
        self.polls += 1;
        if self.last_seen_timestamp.as_deref() == latest {
            return false;
        }

        self.last_seen_timestamp = latest.map(str::to_string);
        self.changes += 1;
        self.mark_active(now);
        true
    }

    pub fn mark_active(&mut self, now: Instant) {
        self.mode = WatchMode::Active;
        self.last_activity = Some(now);
    }

    /// When Active should be re-examined for decay.
    pub fn decay_deadline(&self, quiet_period: Duration) -> Option<Instant> {
        match (self.mode, self.last_activity) {
            (WatchMode::Active, Some(at)) => Some(at + quiet_period),
            (WatchMode::Active, None) => Some(Instant::now()),
            (WatchMode::Idle, _) => None,
        }
    }

    /// Demotes Active to Idle if nothing happened for `quiet_period`.
    pub fn decay(&mut self, now: Instant, quiet_period: Duration) -> bool {
        let quiet = self
            .last_activity
            .map_or(true, |at| now.saturating_duration_since(at) >= quiet_period);
        if self.mode == WatchMode::Active && quiet {
            self.mode = WatchMode::Idle;
            return true;
        }
        false
    }

    pub fn interval(&self, config: &WatchConfig) -> Duration {
        match self.mode {
            WatchMode::Idle => config.idle_interval,
            WatchMode::Active => config.active_interval,
        }
    }

    pub fn snapshot(&self) -> WatchSnapshot {
        WatchSnapshot {
            status: self.status,
            mode: self.mode,
            last_seen_timestamp: self.last_seen_timestamp.clone(),
            polls: self.polls,
            changes: self.changes,
        }
    }
}
