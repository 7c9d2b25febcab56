// * Monitor runtime
// * Scheduler -> probe task -> outcome task over channels, plus independent
// * heartbeat, staleness and status timers; all restartable on config apply

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::settings::{ConfigError, Configuration};
use crate::engine::alerts::{AlertDispatcher, ObserveMode};
use crate::engine::clock::Clock;
use crate::engine::dedup::{AlertDeduplicator, FailureDisposition};
use crate::engine::detector::{ChangeDetector, CountChange};
use crate::engine::heartbeat::HeartbeatMonitor;
use crate::engine::probe::{LogoutNotice, Probe, ProbeResult, ProbeTimings};
use crate::engine::sandbox::{sandbox_from_settings, ProbeSandbox, SandboxError};
use crate::engine::scheduler::{request_probe, PresenceSignal, ProbeOrigin, ProbeRequest, Scheduler};
use crate::engine::staleness::StalenessChecker;
use crate::engine::state::{format_countdown, MonitorState, StateHandle};
use crate::network::client::HttpClient;
use crate::network::reporter::{RemoteReporter, ReportError, StatusPush};
use crate::ops::alerting::AlertSink;
use crate::ops::ring_log::RingLog;
use crate::persistence::store::{KeyValueStore, StoreError};
use crate::refinery::signal::{ExtractError, SignalExtractor};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collaborators that outlive any single configuration
#[derive(Clone)]
pub struct MonitorDeps {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn KeyValueStore>,
    /// Client used to reach the collector
    pub collector: Arc<dyn HttpClient>,
    pub sink: Arc<dyn AlertSink>,
    pub presence: Arc<dyn PresenceSignal>,
    pub ring_log: RingLog,
    /// Replaces the sandbox the probe settings would build
    pub sandbox: Option<Arc<dyn ProbeSandbox>>,
}

/// What happened to one probe result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Observed(CountChange),
    Failure(FailureDisposition),
    LoggedOut,
}

/// Routes a probe result to the change detector or the failure guard
pub struct CycleHandler {
    detector: ChangeDetector,
    dedup: AlertDeduplicator,
}

impl CycleHandler {
    pub fn new(detector: ChangeDetector, dedup: AlertDeduplicator) -> Self {
        Self { detector, dedup }
    }

    pub async fn handle(&self, result: &ProbeResult) -> CycleOutcome {
        match result {
            ProbeResult::Success { count } => {
                CycleOutcome::Observed(self.detector.observe(*count, ObserveMode::Live).await)
            }
            // * Covered by the logout notice; never arms the failure flag
            ProbeResult::AuthFailure => CycleOutcome::LoggedOut,
            other => CycleOutcome::Failure(self.dedup.on_failure(other).await),
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }
}

/// Everything built from one configuration
struct Components {
    config: Arc<Configuration>,
    reporter: Arc<RemoteReporter>,
    probe: Arc<Probe>,
    handler: Arc<CycleHandler>,
}

struct Timers {
    cancel: CancellationToken,
    requests: mpsc::Sender<ProbeRequest>,
    tasks: Vec<JoinHandle<()>>,
}

/// Display snapshot of the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub last_known_count: Option<u64>,
    pub countdown: String,
    pub probe_in_flight: bool,
    pub typing: bool,
    pub just_resumed: bool,
    pub failure_alert_sent: bool,
    pub last_successful_report_at: Option<DateTime<Utc>>,
}

pub struct Monitor {
    deps: MonitorDeps,
    state: StateHandle,
    components: StdRwLock<Arc<Components>>,
    timers: Mutex<Option<Timers>>,
}

impl Monitor {
    /// Builds a monitor whose state is seeded from the store
    pub fn new(config: Configuration, deps: MonitorDeps) -> Result<Self, MonitorError> {
        let state = MonitorState::restore(deps.store.as_ref()).into_handle();
        Self::with_state(config, deps, state)
    }

    pub fn with_state(config: Configuration, deps: MonitorDeps, state: StateHandle) -> Result<Self, MonitorError> {
        let components = build_components(config, &deps, &state)?;
        Ok(Self {
            deps,
            state,
            components: StdRwLock::new(Arc::new(components)),
            timers: Mutex::new(None),
        })
    }

    fn current(&self) -> Arc<Components> {
        self.components
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn config(&self) -> Arc<Configuration> {
        self.current().config.clone()
    }

    pub fn ring_log(&self) -> &RingLog {
        &self.deps.ring_log
    }

    /// Spawns every timer for the current configuration and probes at once
    pub async fn start(&self) {
        self.start_timers(true).await;
    }

    async fn start_timers(&self, probe_on_start: bool) {
        let mut timers = self.timers.lock().await;
        if timers.is_some() {
            return;
        }
        *timers = Some(self.spawn_timers(self.current(), probe_on_start));
        tracing::info!(probe_on_start = probe_on_start, "Monitor started");
    }

    /// Cancels every timer and waits for them to wind down. An in-flight
    /// probe is allowed to finish so its sandbox is closed.
    pub async fn stop(&self) {
        let Some(timers) = self.timers.lock().await.take() else {
            return;
        };
        timers.cancel.cancel();
        for task in timers.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Monitor task ended abnormally");
            }
        }
        self.state.write().await.finish_probe();
        tracing::info!("Monitor stopped");
    }

    /// Replaces the configuration and restarts every timer consuming it
    pub async fn apply_and_restart(&self, config: Configuration) -> Result<(), MonitorError> {
        config.validate()?;
        let components = Arc::new(build_components(config, &self.deps, &self.state)?);

        let was_running = self.timers.lock().await.is_some();
        self.stop().await;
        *self.components.write().unwrap_or_else(|e| e.into_inner()) = components;
        if was_running {
            self.start_timers(false).await;
        }
        tracing::info!(restarted = was_running, "Configuration applied");
        Ok(())
    }

    /// Requests an immediate probe through the scheduler's path and guard
    pub async fn trigger_now(&self) -> bool {
        let requests = match self.timers.lock().await.as_ref() {
            Some(timers) => timers.requests.clone(),
            None => {
                tracing::warn!("Monitor not running, manual probe ignored");
                return false;
            }
        };
        request_probe(&self.state, self.deps.clock.as_ref(), &requests, ProbeOrigin::Manual).await
    }

    /// Runs one full cycle inline: probe, then route the result
    pub async fn run_cycle(&self) -> Option<(ProbeResult, CycleOutcome)> {
        let components = self.current();
        if !self.state.write().await.try_begin_probe(self.deps.clock.now_ms()) {
            tracing::info!("Probe already in flight, cycle skipped");
            return None;
        }
        let result = components.probe.execute().await;
        self.state.write().await.finish_probe();
        let outcome = components.handler.handle(&result).await;
        Some((result, outcome))
    }

    /// Probes once and reports the classification without routing it
    pub async fn test_discovery(&self) -> Option<ProbeResult> {
        let components = self.current();
        if !self.state.write().await.try_begin_probe(self.deps.clock.now_ms()) {
            tracing::info!("Probe already in flight, discovery test skipped");
            return None;
        }
        let result = components.probe.classify().await;
        self.state.write().await.finish_probe();
        tracing::info!(outcome = result.label(), "Discovery test finished");
        Some(result)
    }

    /// Synthetic bump of one through the full alert path; nothing persisted
    pub async fn simulate_activity(&self) -> CountChange {
        let current = self.state.read().await.last_known_count.unwrap_or(0);
        tracing::info!(from = current, "Simulating new activity");
        self.current()
            .handler
            .detector()
            .observe(current + 1, ObserveMode::Test)
            .await
    }

    pub async fn push_status_now(&self) -> Result<StatusPush, ReportError> {
        self.current().reporter.push_status().await
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.read().await.clone();
        let now = self.deps.clock.now_ms();
        MonitorStatus {
            last_known_count: state.last_known_count,
            countdown: format_countdown(state.countdown_remaining_ms),
            probe_in_flight: state.is_probe_in_flight,
            typing: self.deps.presence.is_typing(),
            just_resumed: state.is_just_resumed(now),
            failure_alert_sent: state.session_failure_alert_sent,
            last_successful_report_at: state
                .last_successful_report_at_ms
                .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        }
    }

    /// Mirrors the rolling log to durable storage
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.deps.ring_log.checkpoint(self.deps.store.as_ref())
    }

    pub fn clear_log(&self) -> Result<(), StoreError> {
        self.deps.ring_log.clear();
        self.checkpoint()
    }

    fn spawn_timers(&self, components: Arc<Components>, probe_on_start: bool) -> Timers {
        let cancel = CancellationToken::new();
        let (request_tx, request_rx) = mpsc::channel::<ProbeRequest>(1);
        let (report_tx, report_rx) = mpsc::channel::<ProbeResult>(4);
        let config = components.config.clone();
        let deps = &self.deps;

        let mut tasks = Vec::with_capacity(6);

        tasks.push(tokio::spawn(probe_task(
            components.probe.clone(),
            self.state.clone(),
            request_rx,
            report_tx,
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(outcome_task(components.handler.clone(), report_rx)));

        let scheduler = Scheduler::new(
            config.clone(),
            self.state.clone(),
            deps.clock.clone(),
            deps.presence.clone(),
            request_tx.clone(),
        )
        .with_probe_on_start(probe_on_start);
        tasks.push(tokio::spawn(scheduler.run(cancel.clone())));

        let heartbeat = HeartbeatMonitor::new(
            deps.clock.clone(),
            self.state.clone(),
            deps.sink.clone(),
            components.reporter.clone(),
            config.alert_channels.sound,
        );
        tasks.push(tokio::spawn(heartbeat.run(cancel.clone())));

        let staleness = StalenessChecker::new(
            config.local_staleness_threshold_minutes,
            deps.clock.clone(),
            self.state.clone(),
            deps.sink.clone(),
            config.alert_channels.sound,
        );
        tasks.push(tokio::spawn(staleness.run(cancel.clone())));

        tasks.push(tokio::spawn(status_task(
            components.reporter.clone(),
            Duration::from_secs(config.status_interval_secs.max(1)),
            cancel.clone(),
        )));

        Timers {
            cancel,
            requests: request_tx,
            tasks,
        }
    }
}

fn build_components(
    config: Configuration,
    deps: &MonitorDeps,
    state: &StateHandle,
) -> Result<Components, MonitorError> {
    let reporter = Arc::new(RemoteReporter::new(
        config.remote_endpoint.clone(),
        config.success_marker.clone(),
        deps.collector.clone(),
        state.clone(),
        deps.store.clone(),
        deps.clock.clone(),
        deps.ring_log.clone(),
    ));

    let sandbox = match &deps.sandbox {
        Some(sandbox) => sandbox.clone(),
        None => sandbox_from_settings(&config.probe)?,
    };

    let probe = Probe::new(
        config.target_url.clone(),
        sandbox,
        SignalExtractor::from_settings(&config.probe)?,
        ProbeTimings::from(&config.probe),
    )
    .with_logout_notice(LogoutNotice::new(
        reporter.clone(),
        deps.store.clone(),
        config.alert_channels.email,
    ));

    let dispatcher = Arc::new(
        AlertDispatcher::new(
            deps.sink.clone(),
            reporter.clone(),
            config.alert_channels,
            config.alert_count,
        )
        .with_icon(config.notification_icon.clone()),
    );
    let handler = CycleHandler::new(
        ChangeDetector::new(state.clone(), deps.store.clone(), dispatcher),
        AlertDeduplicator::new(state.clone(), reporter.clone()),
    );

    Ok(Components {
        config: Arc::new(config),
        reporter,
        probe: Arc::new(probe),
        handler: Arc::new(handler),
    })
}

async fn probe_task(
    probe: Arc<Probe>,
    state: StateHandle,
    mut requests: mpsc::Receiver<ProbeRequest>,
    reports: mpsc::Sender<ProbeResult>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        tracing::info!(origin = ?request.origin, "Probe started");
        let result = probe.execute().await;
        state.write().await.finish_probe();

        if reports.send(result).await.is_err() {
            break;
        }
    }
}

// * Runs until the probe task drops its sender, so a result finished during
// * shutdown is still routed
async fn outcome_task(handler: Arc<CycleHandler>, mut reports: mpsc::Receiver<ProbeResult>) {
    while let Some(result) = reports.recv().await {
        let outcome = handler.handle(&result).await;
        tracing::debug!(outcome = ?outcome, "Probe result handled");
    }
}

async fn status_task(reporter: Arc<RemoteReporter>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // * Failures are logged by the reporter; the next tick is the retry
                let _ = reporter.push_status().await;
            }
        }
    }
}
