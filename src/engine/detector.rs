// * Change detection
// * Turns a successful read into "no alert" or "new activity" and keeps the
// * baseline consistent; a decrease is an external reset, not an alert

use std::sync::Arc;

use crate::engine::alerts::{AlertDispatcher, ObserveMode};
use crate::engine::state::StateHandle;
use crate::ops::telemetry;
use crate::persistence::store::{KeyValueStore, KeyValueStoreExt, KEY_LAST_KNOWN_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountChange {
    /// First observation; becomes the baseline
    Baseline { count: u64 },
    Increased { delta: u64, count: u64 },
    /// The site's own counter went down
    Reset { from: u64, to: u64 },
    Unchanged,
}

/// Pure comparison against the previous baseline
pub fn evaluate(previous: Option<u64>, count: u64) -> CountChange {
    match previous {
        None => CountChange::Baseline { count },
        Some(last) if count > last => CountChange::Increased {
            delta: count - last,
            count,
        },
        Some(last) if count < last => CountChange::Reset {
            from: last,
            to: count,
        },
        Some(_) => CountChange::Unchanged,
    }
}

pub struct ChangeDetector {
    state: StateHandle,
    store: Arc<dyn KeyValueStore>,
    dispatcher: Arc<AlertDispatcher>,
}

impl ChangeDetector {
    pub fn new(state: StateHandle, store: Arc<dyn KeyValueStore>, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self {
            state,
            store,
            dispatcher,
        }
    }

    /// Applies one observation. Test observations compare and alert the same
    /// way but leave the baseline and the failure flag untouched.
    pub async fn observe(&self, count: u64, mode: ObserveMode) -> CountChange {
        let (change, cleared_failure) = {
            let mut state = self.state.write().await;
            // * A test bump with no baseline yet compares against zero
            let previous = match mode {
                ObserveMode::Live => state.last_known_count,
                ObserveMode::Test => Some(state.last_known_count.unwrap_or(0)),
            };
            let change = evaluate(previous, count);
            let mut cleared = false;
            if mode == ObserveMode::Live {
                state.last_known_count = Some(count);
                cleared = state.session_failure_alert_sent;
                state.session_failure_alert_sent = false;
            }
            (change, cleared)
        };

        if cleared_failure {
            tracing::info!("Probe recovered, failure alert re-armed");
        }

        if mode == ObserveMode::Live {
            telemetry::set_last_known_count(count);
            if change != CountChange::Unchanged {
                if let Err(e) = self.store.set_as(KEY_LAST_KNOWN_COUNT, &count) {
                    tracing::warn!(error = %e, "Failed to persist last known count");
                }
            }
        }

        match change {
            CountChange::Baseline { count } => tracing::info!(count = count, "Baseline established"),
            CountChange::Increased { delta, count } => {
                tracing::info!(delta = delta, count = count, simulated = (mode == ObserveMode::Test), "New activity detected");
                self.dispatcher.dispatch(delta, count, mode).await;
            }
            CountChange::Reset { from, to } => {
                tracing::info!(from = from, to = to, "Count decreased, baseline resynchronized")
            }
            CountChange::Unchanged => tracing::info!(count = count, "Count unchanged"),
        }

        change
    }
}


#[cfg(test)]
mod observe_tests {
    use super::*;
    use crate::config::settings::{AlertChannels, AlertCount};
    use crate::engine::clock::ManualClock;
    use crate::engine::state::MonitorState;
    use crate::engine::testing::{acking_http, reporter, RecordingSink};
    use crate::persistence::store::MemoryStore;
    use std::sync::Mutex;

    fn detector(state: &StateHandle, store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> ChangeDetector {
        let clock = Arc::new(ManualClock::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::new(
            sink,
            reporter(acking_http(bodies), state, &clock),
            AlertChannels::default(),
            AlertCount::Delta,
        );
        ChangeDetector::new(state.clone(), store, Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_live_success_updates_baseline_and_clears_flag() {
        let state = MonitorState {
            last_known_count: Some(3),
            session_failure_alert_sent: true,
            ..Default::default()
        }
        .into_handle();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(&state, store.clone(), sink.clone());

        let change = detector.observe(5, ObserveMode::Live).await;
        assert_eq!(change, CountChange::Increased { delta: 2, count: 5 });
        let snapshot = state.read().await.clone();
        assert_eq!(snapshot.last_known_count, Some(5));
        assert!(!snapshot.session_failure_alert_sent);
        assert_eq!(store.get_as::<u64>(KEY_LAST_KNOWN_COUNT), Some(5));
        assert_eq!(sink.sound_count(), 1);
    }

    #[tokio::test]
    async fn test_test_mode_alerts_without_persisting() {
        let state = MonitorState {
            last_known_count: Some(3),
            session_failure_alert_sent: true,
            ..Default::default()
        }
        .into_handle();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(&state, store.clone(), sink.clone());

        let change = detector.observe(4, ObserveMode::Test).await;
        assert_eq!(change, CountChange::Increased { delta: 1, count: 4 });
        let snapshot = state.read().await.clone();
        assert_eq!(snapshot.last_known_count, Some(3));
        assert!(snapshot.session_failure_alert_sent);
        assert_eq!(store.get_as::<u64>(KEY_LAST_KNOWN_COUNT), None);
        assert_eq!(sink.sound_count(), 1);
    }

    #[tokio::test]
    async fn test_test_mode_without_baseline_compares_against_zero() {
        let state = MonitorState::default().into_handle();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(&state, store.clone(), sink.clone());

        let change = detector.observe(1, ObserveMode::Test).await;
        assert_eq!(change, CountChange::Increased { delta: 1, count: 1 });
        assert_eq!(state.read().await.last_known_count, None);
        assert_eq!(store.get_as::<u64>(KEY_LAST_KNOWN_COUNT), None);
        assert_eq!(sink.notification_count(), 1);
        assert_eq!(sink.sound_count(), 1);
    }

    #[tokio::test]
    async fn test_live_without_baseline_is_still_silent() {
        let state = MonitorState::default().into_handle();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(&state, Arc::new(MemoryStore::new()), sink.clone());

        assert_eq!(
            detector.observe(4, ObserveMode::Live).await,
            CountChange::Baseline { count: 4 }
        );
        assert_eq!(sink.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_is_silent() {
        let state = MonitorState {
            last_known_count: Some(8),
            ..Default::default()
        }
        .into_handle();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(&state, Arc::new(MemoryStore::new()), sink.clone());

        assert_eq!(
            detector.observe(2, ObserveMode::Live).await,
            CountChange::Reset { from: 8, to: 2 }
        );
        assert_eq!(state.read().await.last_known_count, Some(2));
        assert_eq!(sink.notification_count(), 0);
    }
}
