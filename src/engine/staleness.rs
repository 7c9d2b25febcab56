// * Remote staleness watchdog
// * Independent of the heartbeat: local execution may be fine while the
// * collector has stopped acknowledging. Repeats every interval on purpose.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::constants::{DEFAULT_STALENESS_THRESHOLD_MINUTES, STALENESS_CHECK_INTERVAL_SECS};
use crate::engine::clock::Clock;
use crate::engine::state::StateHandle;
use crate::ops::alerting::{Alert, AlertKind, AlertSink, Notification};

pub struct StalenessChecker {
    threshold_ms: u64,
    clock: Arc<dyn Clock>,
    state: StateHandle,
    sink: Arc<dyn AlertSink>,
    sound: bool,
}

impl StalenessChecker {
    pub fn new(
        threshold_minutes: f64,
        clock: Arc<dyn Clock>,
        state: StateHandle,
        sink: Arc<dyn AlertSink>,
        sound: bool,
    ) -> Self {
        let minutes = if threshold_minutes.is_finite() && threshold_minutes > 0.0 {
            threshold_minutes
        } else {
            DEFAULT_STALENESS_THRESHOLD_MINUTES
        };
        Self {
            threshold_ms: (minutes * 60_000.0) as u64,
            clock,
            state,
            sink,
            sound,
        }
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    /// Milliseconds since the last acknowledged status when past the threshold.
    /// Never fires before the first acknowledgement.
    pub async fn check(&self) -> Option<u64> {
        let last = self.state.read().await.last_successful_report_at_ms?;
        let since = self.clock.now_ms().saturating_sub(last);
        if since <= self.threshold_ms {
            return None;
        }

        let minutes = since / 60_000;
        Alert::new(
            AlertKind::ReportStale,
            format!("No successful status report for {} minute(s)", minutes),
        )
        .with_context("threshold_ms", self.threshold_ms)
        .log();

        // * Stays up until dismissed
        self.sink.notify(&Notification::new(
            "Remote status stale",
            format!(
                "The collector has not acknowledged a status report for {} minute(s).",
                minutes
            ),
        ));
        if self.sound {
            self.sink.play_sound();
        }
        Some(since)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(STALENESS_CHECK_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
    }
}
