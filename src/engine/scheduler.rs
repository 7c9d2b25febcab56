// * Jittered probe cadence
// * Picks a random delay in [min, max] minutes, counts it down on wall-clock
// * deltas, and requests a probe when it reaches zero

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::constants::{
    COUNTDOWN_TICK_MS, DEFAULT_MAX_INTERVAL_MINUTES, DEFAULT_MIN_INTERVAL_MINUTES,
};
use crate::config::settings::Configuration;
use crate::engine::clock::Clock;
use crate::engine::state::StateHandle;
use crate::ops::telemetry;

/// Delay until the next probe; invalid bounds fall back to the default range
pub fn jittered_delay<R: Rng>(config: &Configuration, rng: &mut R) -> Duration {
    let (min, max) = config
        .interval_bounds()
        .unwrap_or((DEFAULT_MIN_INTERVAL_MINUTES, DEFAULT_MAX_INTERVAL_MINUTES));
    let minutes = if min == max { min } else { rng.gen_range(min..=max) };
    Duration::try_from_secs_f64(minutes * 60.0).unwrap_or_else(|_| {
        Duration::from_secs_f64(DEFAULT_MIN_INTERVAL_MINUTES * 60.0)
    })
}

/// Whether the user is currently typing into the monitored page
pub trait PresenceSignal: Send + Sync {
    fn is_typing(&self) -> bool;
}

/// No presence source; the countdown never freezes
#[derive(Debug, Default)]
pub struct NoPresence;

impl PresenceSignal for NoPresence {
    fn is_typing(&self) -> bool {
        false
    }
}

/// Presence flipped by hand (CLI, tests)
#[derive(Debug, Default)]
pub struct ManualPresence {
    typing: AtomicBool,
}

impl ManualPresence {
    pub fn set_typing(&self, typing: bool) {
        self.typing.store(typing, Ordering::SeqCst);
    }
}

impl PresenceSignal for ManualPresence {
    fn is_typing(&self) -> bool {
        self.typing.load(Ordering::SeqCst)
    }
}

/// Remaining time until the next probe, advanced by measured wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining_ms: u64,
    last_tick_ms: u64,
}

impl Countdown {
    pub fn new(delay: Duration, now_ms: u64) -> Self {
        Self {
            remaining_ms: delay.as_millis() as u64,
            last_tick_ms: now_ms,
        }
    }

    /// Consumes the time since the previous tick unless frozen. A frozen tick
    /// still moves the reference point so the pause is not charged later.
    pub fn tick(&mut self, now_ms: u64, frozen: bool) -> u64 {
        let elapsed = now_ms.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now_ms;
        if !frozen {
            self.remaining_ms = self.remaining_ms.saturating_sub(elapsed);
        }
        self.remaining_ms
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn is_due(&self) -> bool {
        self.remaining_ms == 0
    }
}

/// Where a probe request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrigin {
    /// Immediate read when the scheduler first starts
    Startup,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub origin: ProbeOrigin,
}

/// Claims the probe slot and hands the request to the probe task.
/// Returns false (and does nothing) while another probe is in flight.
pub async fn request_probe(
    state: &StateHandle,
    clock: &dyn Clock,
    requests: &mpsc::Sender<ProbeRequest>,
    origin: ProbeOrigin,
) -> bool {
    let claimed = state.write().await.try_begin_probe(clock.now_ms());
    if !claimed {
        tracing::info!(origin = ?origin, "Probe already in flight, request skipped");
        return false;
    }

    if requests.send(ProbeRequest { origin }).await.is_err() {
        state.write().await.finish_probe();
        tracing::warn!("Probe task is not running, request dropped");
        return false;
    }
    true
}

pub struct Scheduler {
    config: Arc<Configuration>,
    state: StateHandle,
    clock: Arc<dyn Clock>,
    presence: Arc<dyn PresenceSignal>,
    requests: mpsc::Sender<ProbeRequest>,
    rng: StdRng,
    probe_on_start: bool,
}

impl Scheduler {
    pub fn new(
        config: Arc<Configuration>,
        state: StateHandle,
        clock: Arc<dyn Clock>,
        presence: Arc<dyn PresenceSignal>,
        requests: mpsc::Sender<ProbeRequest>,
    ) -> Self {
        Self {
            config,
            state,
            clock,
            presence,
            requests,
            rng: StdRng::from_entropy(),
            probe_on_start: true,
        }
    }

    /// Restarts after a configuration change only re-arm the countdown
    pub fn with_probe_on_start(mut self, probe_on_start: bool) -> Self {
        self.probe_on_start = probe_on_start;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn frozen(&self) -> bool {
        self.config.pause_while_typing && self.presence.is_typing()
    }

    /// Picks the next delay and publishes it
    pub async fn schedule_next(&mut self) -> Countdown {
        let delay = jittered_delay(&self.config, &mut self.rng);
        let now = self.clock.now_ms();
        let countdown = Countdown::new(delay, now);
        {
            let mut state = self.state.write().await;
            state.next_probe_due_at_ms = Some(now + countdown.remaining_ms());
            state.countdown_remaining_ms = countdown.remaining_ms();
        }
        tracing::info!(delay_secs = delay.as_secs(), "Next probe scheduled");
        countdown
    }

    /// One countdown step; returns true when a probe was requested
    pub async fn on_tick(&mut self, countdown: &mut Countdown) -> bool {
        let now = self.clock.now_ms();
        let frozen = self.frozen();
        let remaining = countdown.tick(now, frozen);

        {
            let mut state = self.state.write().await;
            state.countdown_remaining_ms = remaining;
            if frozen {
                state.next_probe_due_at_ms = Some(now + remaining);
            }
        }
        telemetry::set_next_probe_seconds(remaining / 1000);

        if !countdown.is_due() {
            return false;
        }

        let requested = request_probe(
            &self.state,
            self.clock.as_ref(),
            &self.requests,
            ProbeOrigin::Scheduled,
        )
        .await;
        *countdown = self.schedule_next().await;
        requested
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if self.probe_on_start {
            request_probe(
                &self.state,
                self.clock.as_ref(),
                &self.requests,
                ProbeOrigin::Startup,
            )
            .await;
        }
        let mut countdown = self.schedule_next().await;
        let mut ticker = tokio::time::interval(Duration::from_millis(COUNTDOWN_TICK_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.on_tick(&mut countdown).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::state::MonitorState;

    fn config(min: f64, max: f64) -> Configuration {
        Configuration {
            min_interval_minutes: min,
            max_interval_minutes: max,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_within_configured_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = config(2.0, 3.0);
        for _ in 0..500 {
            let delay = jittered_delay(&cfg, &mut rng);
            assert!(delay >= Duration::from_secs(120));
            assert!(delay <= Duration::from_secs(180));
        }
    }

    #[test]
    fn test_inverted_bounds_fall_back_to_default() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = config(10.0, 1.0);
        for _ in 0..200 {
            let delay = jittered_delay(&cfg, &mut rng);
            assert!(delay >= Duration::from_secs(7 * 60));
            assert!(delay <= Duration::from_secs(10 * 60));
        }
    }

    #[test]
    fn test_nan_bounds_fall_back_to_default() {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = jittered_delay(&config(f64::NAN, 4.0), &mut rng);
        assert!(delay >= Duration::from_secs(7 * 60));
    }

    #[test]
    fn test_huge_bounds_fall_back_to_default() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let delay = jittered_delay(&config(1.0, 1e300), &mut rng);
            assert!(delay >= Duration::from_secs(7 * 60));
            assert!(delay <= Duration::from_secs(10 * 60));
        }
    }

    #[test]
    fn test_equal_bounds_are_exact() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            jittered_delay(&config(1.5, 1.5), &mut rng),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_countdown_uses_wall_clock_deltas() {
        let mut countdown = Countdown::new(Duration::from_secs(10), 1_000);
        // * A missed tick after suspension consumes the whole gap at once
        assert_eq!(countdown.tick(8_000, false), 3_000);
        assert_eq!(countdown.tick(20_000, false), 0);
        assert!(countdown.is_due());
    }

    #[test]
    fn test_frozen_countdown_keeps_remaining() {
        let mut countdown = Countdown::new(Duration::from_secs(10), 0);
        assert_eq!(countdown.tick(4_000, true), 10_000);
        // * The frozen stretch is not charged on resume
        assert_eq!(countdown.tick(5_000, false), 9_000);
    }

    #[tokio::test]
    async fn test_request_probe_respects_in_flight_guard() {
        let state = MonitorState::default().into_handle();
        let clock = ManualClock::new(5);
        let (tx, mut rx) = mpsc::channel(4);

        assert!(request_probe(&state, &clock, &tx, ProbeOrigin::Manual).await);
        assert!(!request_probe(&state, &clock, &tx, ProbeOrigin::Scheduled).await);
        assert_eq!(rx.recv().await.unwrap().origin, ProbeOrigin::Manual);
        assert!(rx.try_recv().is_err());

        state.write().await.finish_probe();
        assert!(request_probe(&state, &clock, &tx, ProbeOrigin::Scheduled).await);
    }

    #[tokio::test]
    async fn test_closed_channel_releases_the_slot() {
        let state = MonitorState::default().into_handle();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!request_probe(&state, &ManualClock::new(0), &tx, ProbeOrigin::Manual).await);
        assert!(!state.read().await.is_probe_in_flight);
    }

    #[tokio::test]
    async fn test_tick_requests_probe_when_due() {
        let clock = Arc::new(ManualClock::new(0));
        let state = MonitorState::default().into_handle();
        let presence = Arc::new(ManualPresence::default());
        let (tx, mut rx) = mpsc::channel(4);
        let mut scheduler = Scheduler::new(
            Arc::new(config(1.0, 1.0)),
            state.clone(),
            clock.clone(),
            presence.clone(),
            tx,
        );

        let mut countdown = scheduler.schedule_next().await;
        assert_eq!(state.read().await.countdown_display(), "01:00");

        presence.set_typing(true);
        clock.advance(59_000);
        assert!(!scheduler.on_tick(&mut countdown).await);
        assert_eq!(countdown.remaining_ms(), 60_000);

        presence.set_typing(false);
        clock.advance(60_000);
        assert!(scheduler.on_tick(&mut countdown).await);
        assert_eq!(rx.recv().await.unwrap().origin, ProbeOrigin::Scheduled);
        assert!(state.read().await.is_probe_in_flight);
        // * Re-armed for the next cycle
        assert_eq!(countdown.remaining_ms(), 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_requests_a_probe_immediately() {
        let state = MonitorState::default().into_handle();
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = Scheduler::new(
            Arc::new(config(7.0, 10.0)),
            state.clone(),
            Arc::new(ManualClock::new(0)),
            Arc::new(NoPresence),
            tx,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        let request = rx.recv().await.unwrap();
        assert_eq!(request.origin, ProbeOrigin::Startup);
        assert!(state.read().await.is_probe_in_flight);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_without_startup_probe_only_arms_countdown() {
        let state = MonitorState::default().into_handle();
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = Scheduler::new(
            Arc::new(config(7.0, 10.0)),
            state.clone(),
            Arc::new(ManualClock::new(0)),
            Arc::new(NoPresence),
            tx,
        )
        .with_probe_on_start(false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(!state.read().await.is_probe_in_flight);
        assert!(state.read().await.next_probe_due_at_ms.is_some());

        cancel.cancel();
        task.await.unwrap();
    }
}
