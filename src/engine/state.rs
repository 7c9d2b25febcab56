// * Process-wide monitor state
// * One instance per session, shared by reference; every mutation happens inside
// * a single lock turn and no lock is held across an await

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::persistence::store::{
    KeyValueStore, KeyValueStoreExt, KEY_LAST_KNOWN_COUNT, KEY_LAST_REPORT_AT,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// `None` until the first successful probe (or a persisted baseline)
    pub last_known_count: Option<u64>,
    pub last_probe_at_ms: Option<u64>,
    pub last_successful_report_at_ms: Option<u64>,
    /// Memory only: a restart re-arms the failure alert
    pub session_failure_alert_sent: bool,
    pub next_probe_due_at_ms: Option<u64>,
    pub is_probe_in_flight: bool,
    pub countdown_remaining_ms: u64,
    pub just_resumed_until_ms: Option<u64>,
}

pub type StateHandle = Arc<RwLock<MonitorState>>;

impl MonitorState {
    /// Seeds the persisted fields from the store
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        Self {
            last_known_count: store.get_as(KEY_LAST_KNOWN_COUNT),
            last_successful_report_at_ms: store.get_as(KEY_LAST_REPORT_AT),
            ..Default::default()
        }
    }

    pub fn into_handle(self) -> StateHandle {
        Arc::new(RwLock::new(self))
    }

    /// Claims the single probe slot; false when a probe is already running
    pub fn try_begin_probe(&mut self, now_ms: u64) -> bool {
        if self.is_probe_in_flight {
            return false;
        }
        self.is_probe_in_flight = true;
        self.last_probe_at_ms = Some(now_ms);
        true
    }

    pub fn finish_probe(&mut self) {
        self.is_probe_in_flight = false;
    }

    pub fn is_just_resumed(&self, now_ms: u64) -> bool {
        self.just_resumed_until_ms.is_some_and(|until| now_ms < until)
    }

    /// `MM:SS` until the next scheduled probe
    pub fn countdown_display(&self) -> String {
        format_countdown(self.countdown_remaining_ms)
    }
}

/// Formats milliseconds as zero-padded `MM:SS`; minutes are not wrapped
pub fn format_countdown(remaining_ms: u64) -> String {
    let total_secs = remaining_ms / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}
