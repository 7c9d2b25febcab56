// * Suspend detection
// * A tick gap far beyond the nominal interval means the host slept; mark the
// * resumed window, tell the user and push a fresh status out of cycle

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::constants::{
    HEARTBEAT_INTERVAL_SECS, HEARTBEAT_STALE_FACTOR, RESUMED_MARKER_SECS, RESUMED_POPUP_TIMEOUT_SECS,
};
use crate::engine::clock::Clock;
use crate::engine::state::StateHandle;
use crate::network::reporter::RemoteReporter;
use crate::ops::alerting::{Alert, AlertKind, AlertSink, Notification};

pub struct HeartbeatMonitor {
    interval: Duration,
    stale_after_ms: u64,
    last_tick_ms: u64,
    clock: Arc<dyn Clock>,
    state: StateHandle,
    sink: Arc<dyn AlertSink>,
    reporter: Arc<RemoteReporter>,
    sound: bool,
}

impl HeartbeatMonitor {
    pub fn new(
        clock: Arc<dyn Clock>,
        state: StateHandle,
        sink: Arc<dyn AlertSink>,
        reporter: Arc<RemoteReporter>,
        sound: bool,
    ) -> Self {
        let interval = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
        let last_tick_ms = clock.now_ms();
        Self {
            interval,
            stale_after_ms: interval.as_millis() as u64 * u64::from(HEARTBEAT_STALE_FACTOR),
            last_tick_ms,
            clock,
            state,
            sink,
            reporter,
            sound,
        }
    }

    /// Measures the gap since the previous tick and always moves the
    /// reference forward, so one gap is reported at most once
    pub fn check(&mut self) -> Option<u64> {
        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now;
        (elapsed > self.stale_after_ms).then_some(elapsed)
    }

    /// Returns the detected gap in milliseconds, if any
    pub async fn on_tick(&mut self) -> Option<u64> {
        let gap_ms = self.check()?;
        let now = self.clock.now_ms();

        self.state.write().await.just_resumed_until_ms =
            Some(now + Duration::from_secs(RESUMED_MARKER_SECS).as_millis() as u64);

        let minutes = gap_ms / 60_000;
        Alert::new(AlertKind::Resumed, format!("Host resumed after {} minute(s) asleep, resyncing", minutes))
            .with_context("gap_ms", gap_ms)
            .log();

        self.sink.notify(
            &Notification::new(
                "Monitor resumed",
                format!("The monitor was suspended for about {} minute(s) and has resynchronized.", minutes),
            )
            .with_timeout(Duration::from_secs(RESUMED_POPUP_TIMEOUT_SECS)),
        );
        if self.sound {
            self.sink.play_sound();
        }

        if let Err(e) = self.reporter.push_status().await {
            tracing::warn!(error = %e, "Resync status push failed");
        }
        Some(gap_ms)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // * First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
            }
        }
    }
}
