// * Probe - one isolated, timeout-bounded read of the signal
// * Poll the sandbox page on a short interval up to the inner timeout, all
// * under an outer deadline; the page is closed exactly once on every path

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::settings::ProbeSettings;
use crate::engine::sandbox::{ProbeSandbox, SandboxPage};
use crate::network::reporter::{RemoteReporter, RemoteStatusPayload};
use crate::ops::alerting::{Alert, AlertKind};
use crate::ops::telemetry;
use crate::persistence::store::{KeyValueStore, KeyValueStoreExt, KEY_LOGOUT_NOTIFIED};
use crate::refinery::signal::{Extraction, SignalExtractor};

/// Classified outcome of one probe; produced once, consumed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Success { count: u64 },
    StructuralFailure { reason: String },
    AuthFailure,
    Timeout,
    TransportFailure { reason: String },
}

impl ProbeResult {
    /// Stable label used in metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            ProbeResult::Success { .. } => "success",
            ProbeResult::StructuralFailure { .. } => "structural_failure",
            ProbeResult::AuthFailure => "auth_failure",
            ProbeResult::Timeout => "timeout",
            ProbeResult::TransportFailure { .. } => "transport_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }

    /// Human readable reason for failure alerts
    pub fn describe(&self) -> String {
        match self {
            ProbeResult::Success { count } => format!("signal read: {}", count),
            ProbeResult::StructuralFailure { reason } => {
                format!("page structure changed: {}", reason)
            }
            ProbeResult::AuthFailure => "session logged out".to_string(),
            ProbeResult::Timeout => "probe exceeded its outer timeout".to_string(),
            ProbeResult::TransportFailure { reason } => format!("page failed to load: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    pub poll_interval: Duration,
    pub inner_timeout: Duration,
    pub outer_timeout: Duration,
}

impl From<&ProbeSettings> for ProbeTimings {
    fn from(settings: &ProbeSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            inner_timeout: Duration::from_secs(settings.inner_timeout_secs),
            outer_timeout: Duration::from_secs(settings.outer_timeout_secs),
        }
    }
}

/// One-shot "please log back in" mail, once per logged-out episode
pub struct LogoutNotice {
    reporter: Arc<RemoteReporter>,
    store: Arc<dyn KeyValueStore>,
    email_enabled: bool,
}

impl LogoutNotice {
    pub fn new(reporter: Arc<RemoteReporter>, store: Arc<dyn KeyValueStore>, email_enabled: bool) -> Self {
        Self {
            reporter,
            store,
            email_enabled,
        }
    }

    fn already_notified(&self) -> bool {
        self.store.get_as::<bool>(KEY_LOGOUT_NOTIFIED).unwrap_or(false)
    }

    /// Returns true when this call sent (or would have sent) the notice
    pub async fn on_logged_out(&self) -> bool {
        if self.already_notified() {
            tracing::info!("Still logged out, notice already sent");
            return false;
        }

        // * The flag marks the episode even when the email channel is off
        if let Err(e) = self.store.set_as(KEY_LOGOUT_NOTIFIED, &true) {
            tracing::warn!(error = %e, "Failed to persist logout flag");
        }
        Alert::new(AlertKind::LoggedOut, "Session logged out, log back in to resume monitoring").log();

        if self.email_enabled {
            let payload = RemoteStatusPayload::alert(
                "Monitor logged out",
                "The monitored site reports the session as logged out. Log back in to resume monitoring.",
            );
            let _ = self.reporter.send(&payload).await;
        }
        true
    }

    /// Ends the episode once the signal is readable again
    pub fn on_signal_returned(&self) {
        if !self.already_notified() {
            return;
        }
        match self.store.remove(KEY_LOGOUT_NOTIFIED) {
            Ok(()) => tracing::info!("Signal readable again, logout notice re-armed"),
            Err(e) => tracing::warn!(error = %e, "Failed to clear logout flag"),
        }
    }
}

pub struct Probe {
    target_url: String,
    sandbox: Arc<dyn ProbeSandbox>,
    extractor: SignalExtractor,
    timings: ProbeTimings,
    logout: Option<LogoutNotice>,
}

impl Probe {
    pub fn new(
        target_url: impl Into<String>,
        sandbox: Arc<dyn ProbeSandbox>,
        extractor: SignalExtractor,
        timings: ProbeTimings,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            sandbox,
            extractor,
            timings,
            logout: None,
        }
    }

    pub fn with_logout_notice(mut self, notice: LogoutNotice) -> Self {
        self.logout = Some(notice);
        self
    }

    /// Runs one probe and handles the logged-out episode bookkeeping
    pub async fn execute(&self) -> ProbeResult {
        let result = self.classify().await;

        if let Some(logout) = &self.logout {
            match &result {
                ProbeResult::AuthFailure => {
                    logout.on_logged_out().await;
                }
                ProbeResult::Success { .. } => logout.on_signal_returned(),
                _ => {}
            }
        }
        result
    }

    /// Runs one probe with no side effects beyond the sandbox itself
    pub async fn classify(&self) -> ProbeResult {
        let slot: Mutex<Option<Box<dyn SandboxPage>>> = Mutex::new(None);

        let result = match tokio::time::timeout(self.timings.outer_timeout, self.poll(&slot)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::Timeout,
        };

        // * Whatever path got us here, the page is released once
        if let Some(mut page) = slot.lock().await.take() {
            page.close().await;
        }

        telemetry::record_probe(result.label());
        match &result {
            ProbeResult::Success { count } => tracing::info!(count = count, "Probe succeeded"),
            other => tracing::warn!(outcome = other.label(), reason = %other.describe(), "Probe failed"),
        }
        result
    }

    async fn poll(&self, slot: &Mutex<Option<Box<dyn SandboxPage>>>) -> ProbeResult {
        let page = match self.sandbox.open(&self.target_url).await {
            Ok(page) => page,
            Err(e) => {
                return ProbeResult::TransportFailure {
                    reason: e.to_string(),
                }
            }
        };
        *slot.lock().await = Some(page);

        let deadline = Instant::now() + self.timings.inner_timeout;
        loop {
            let (snapshot, settled) = {
                let mut guard = slot.lock().await;
                let Some(page) = guard.as_mut() else {
                    return ProbeResult::TransportFailure {
                        reason: "sandbox page vanished".into(),
                    };
                };
                (page.snapshot().await, page.is_settled())
            };

            let html = match snapshot {
                Ok(html) => html,
                Err(e) => {
                    return ProbeResult::TransportFailure {
                        reason: e.to_string(),
                    }
                }
            };

            match self.extractor.extract(&html) {
                Extraction::Found(count) => return ProbeResult::Success { count },
                Extraction::Unparseable(text) => {
                    return ProbeResult::StructuralFailure {
                        reason: format!("signal text '{}' is not a count", text),
                    }
                }
                Extraction::Missing { logged_out } => {
                    if settled || Instant::now() >= deadline {
                        if logged_out {
                            return ProbeResult::AuthFailure;
                        }
                        return ProbeResult::StructuralFailure {
                            reason: format!(
                                "signal element not found within {}s",
                                self.timings.inner_timeout.as_secs()
                            ),
                        };
                    }
                }
            }

            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::{SandboxError, StaticPage};
    use crate::refinery::auth::SelectorIndicator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FOUND: &str = r#"<span class="count">3</span>"#;
    const LOGIN: &str = r#"<a id="login-link">Log in</a>"#;

    fn extractor() -> SignalExtractor {
        SignalExtractor::new(
            "span.count",
            Box::new(SelectorIndicator::new("#login-link").unwrap()),
        )
        .unwrap()
    }

    fn timings() -> ProbeTimings {
        ProbeTimings {
            poll_interval: Duration::from_millis(500),
            inner_timeout: Duration::from_secs(20),
            outer_timeout: Duration::from_secs(45),
        }
    }

    struct FixedSandbox(&'static str);

    #[async_trait]
    impl ProbeSandbox for FixedSandbox {
        async fn open(&self, _url: &str) -> Result<Box<dyn SandboxPage>, SandboxError> {
            Ok(Box::new(StaticPage::new(self.0)))
        }
    }

    struct BrokenSandbox;

    #[async_trait]
    impl ProbeSandbox for BrokenSandbox {
        async fn open(&self, _url: &str) -> Result<Box<dyn SandboxPage>, SandboxError> {
            Err(SandboxError::Load("connection refused".into()))
        }
    }

    // * Dynamic page that renders the counter after a number of polls
    struct LatePage {
        polls: usize,
        ready_after: usize,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SandboxPage for LatePage {
        async fn snapshot(&mut self) -> Result<String, SandboxError> {
            self.polls += 1;
            if self.polls > self.ready_after {
                Ok(FOUND.to_string())
            } else {
                Ok("<div>loading</div>".to_string())
            }
        }

        fn is_settled(&self) -> bool {
            false
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct LateSandbox {
        ready_after: usize,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProbeSandbox for LateSandbox {
        async fn open(&self, _url: &str) -> Result<Box<dyn SandboxPage>, SandboxError> {
            Ok(Box::new(LatePage {
                polls: 0,
                ready_after: self.ready_after,
                closes: self.closes.clone(),
            }))
        }
    }

    fn probe(sandbox: Arc<dyn ProbeSandbox>) -> Probe {
        Probe::new("https://example.com/", sandbox, extractor(), timings())
    }

    #[tokio::test]
    async fn test_static_success() {
        let result = probe(Arc::new(FixedSandbox(FOUND))).classify().await;
        assert_eq!(result, ProbeResult::Success { count: 3 });
    }

    #[tokio::test]
    async fn test_load_error_is_transport_failure() {
        let result = probe(Arc::new(BrokenSandbox)).classify().await;
        assert!(matches!(result, ProbeResult::TransportFailure { .. }));
    }

    #[tokio::test]
    async fn test_settled_page_with_login_link_is_auth_failure() {
        let result = probe(Arc::new(FixedSandbox(LOGIN))).classify().await;
        assert_eq!(result, ProbeResult::AuthFailure);
    }

    #[tokio::test]
    async fn test_settled_page_without_signal_is_structural() {
        let result = probe(Arc::new(FixedSandbox("<p>redesign</p>"))).classify().await;
        assert!(matches!(result, ProbeResult::StructuralFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_page_polls_until_signal_appears() {
        let closes = Arc::new(AtomicUsize::new(0));
        let sandbox = Arc::new(LateSandbox {
            ready_after: 3,
            closes: closes.clone(),
        });
        let result = probe(sandbox).classify().await;
        assert_eq!(result, ProbeResult::Success { count: 3 });
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_page_gives_up_after_inner_timeout() {
        let closes = Arc::new(AtomicUsize::new(0));
        let sandbox = Arc::new(LateSandbox {
            ready_after: usize::MAX,
            closes: closes.clone(),
        });
        let started = Instant::now();
        let result = probe(sandbox).classify().await;
        assert!(matches!(result, ProbeResult::StructuralFailure { .. }));
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert!(started.elapsed() < Duration::from_secs(45));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_labels_are_distinct() {
        let labels = [
            ProbeResult::Success { count: 0 }.label(),
            ProbeResult::StructuralFailure { reason: String::new() }.label(),
            ProbeResult::AuthFailure.label(),
            ProbeResult::Timeout.label(),
            ProbeResult::TransportFailure { reason: String::new() }.label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
