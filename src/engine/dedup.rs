// * Session-scoped failure alert guard
// * A persistent fault sends one outbound alert per process lifetime; the
// * flag lives in memory only and is cleared by the next successful read

use std::sync::Arc;

use crate::engine::probe::ProbeResult;
use crate::engine::state::StateHandle;
use crate::network::reporter::{RemoteReporter, RemoteStatusPayload};
use crate::ops::alerting::{Alert, AlertKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// First failure of the episode; outbound alert attempted
    Alerted,
    /// Repeat failure; logged locally only
    Suppressed,
}

pub struct AlertDeduplicator {
    state: StateHandle,
    reporter: Arc<RemoteReporter>,
}

impl AlertDeduplicator {
    pub fn new(state: StateHandle, reporter: Arc<RemoteReporter>) -> Self {
        Self { state, reporter }
    }

    pub async fn on_failure(&self, result: &ProbeResult) -> FailureDisposition {
        // * Check and set in one lock turn so two failures can't both win
        let first = {
            let mut state = self.state.write().await;
            let first = !state.session_failure_alert_sent;
            state.session_failure_alert_sent = true;
            first
        };

        if !first {
            tracing::info!(
                outcome = result.label(),
                reason = %result.describe(),
                "Probe failure repeated, alert already sent this session"
            );
            return FailureDisposition::Suppressed;
        }

        Alert::new(AlertKind::ProbeFailure, result.describe())
            .with_context("outcome", result.label())
            .log();

        let payload = RemoteStatusPayload::alert(
            "Monitor probe failing",
            format!(
                "The background check failed ({}). Monitoring continues; this alert is sent once per session.",
                result.describe()
            ),
        );
        let _ = self.reporter.send(&payload).await;

        FailureDisposition::Alerted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::state::MonitorState;
    use crate::engine::testing::{acking_http, reporter};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_repeated_failures_alert_once() {
        let state = MonitorState::default().into_handle();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(ManualClock::new(0));
        let dedup = AlertDeduplicator::new(state.clone(), reporter(acking_http(bodies.clone()), &state, &clock));

        let failure = ProbeResult::StructuralFailure {
            reason: "selector gone".into(),
        };
        assert_eq!(dedup.on_failure(&failure).await, FailureDisposition::Alerted);
        for _ in 0..5 {
            assert_eq!(dedup.on_failure(&ProbeResult::Timeout).await, FailureDisposition::Suppressed);
        }

        assert!(state.read().await.session_failure_alert_sent);
        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("selector gone"));
    }

    #[tokio::test]
    async fn test_cleared_flag_rearms_alert() {
        let state = MonitorState::default().into_handle();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(ManualClock::new(0));
        let dedup = AlertDeduplicator::new(state.clone(), reporter(acking_http(bodies.clone()), &state, &clock));

        dedup.on_failure(&ProbeResult::Timeout).await;
        state.write().await.session_failure_alert_sent = false;
        assert_eq!(dedup.on_failure(&ProbeResult::Timeout).await, FailureDisposition::Alerted);
        assert_eq!(bodies.lock().unwrap().len(), 2);
    }
}
