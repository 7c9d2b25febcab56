// * Alerting - local notification capability
// * The core decides what to raise; rendering sounds, popups and title flashes
// * belongs to whatever implements AlertSink

use std::collections::BTreeMap;
use std::time::Duration;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertSeverity {
    /// Monitoring is degraded and needs a human
    Critical,
    /// Something the user should look at
    Warning,
    /// Informational alert
    Info,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "CRITICAL"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Info => write!(f, "INFO"),
        }
    }
}

/// Alert kinds raised by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// The signal increased
    NewActivity,
    /// A probe failed (structural, transport or timeout)
    ProbeFailure,
    /// The target reports the session as logged out
    LoggedOut,
    /// The host was suspended and has resumed
    Resumed,
    /// The collector has not acknowledged a status push for too long
    ReportStale,
}

impl AlertKind {
    /// Stable label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::NewActivity => "new_activity",
            AlertKind::ProbeFailure => "probe_failure",
            AlertKind::LoggedOut => "logged_out",
            AlertKind::Resumed => "resumed",
            AlertKind::ReportStale => "report_stale",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::ProbeFailure | AlertKind::LoggedOut => AlertSeverity::Critical,
            AlertKind::ReportStale | AlertKind::Resumed => AlertSeverity::Warning,
            AlertKind::NewActivity => AlertSeverity::Info,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label().to_uppercase())
    }
}

/// What a notification does when clicked or dismissed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationAction {
    #[default]
    None,
    /// Bring the monitored page to the foreground
    FocusPage,
    /// Stop any running title flash
    StopTitleFlash,
    /// Focus the page and stop the title flash
    FocusAndStopFlash,
}

/// A desktop notification request; fire-and-forget
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    /// `None` keeps the notification until dismissed
    pub timeout: Option<Duration>,
    pub on_click: NotificationAction,
    pub on_dismiss: NotificationAction,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
            timeout: None,
            on_click: NotificationAction::FocusPage,
            on_dismiss: NotificationAction::None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn on_click(mut self, action: NotificationAction) -> Self {
        self.on_click = action;
        self
    }

    pub fn on_dismiss(mut self, action: NotificationAction) -> Self {
        self.on_dismiss = action;
        self
    }
}

/// Local notification capability invoked by the core
pub trait AlertSink: Send + Sync {
    fn notify(&self, notification: &Notification);
    fn play_sound(&self);
    fn start_title_flash(&self, count: u64);
    fn stop_title_flash(&self);
}

/// Default sink: every channel becomes a structured log line
#[derive(Debug, Default)]
pub struct LoggingSink;

impl AlertSink for LoggingSink {
    fn notify(&self, notification: &Notification) {
        tracing::warn!(
            title = %notification.title,
            timeout = ?notification.timeout,
            "NOTIFY: {}", notification.body
        );
    }

    fn play_sound(&self) {
        tracing::info!("Alert sound");
    }

    fn start_title_flash(&self, count: u64) {
        tracing::info!(count = count, "Title flash started");
    }

    fn stop_title_flash(&self) {
        tracing::debug!("Title flash stopped");
    }
}

/// A raised alert, kept for logging and metrics
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Adds context to the alert
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Logs the alert at a level matching its severity and counts it
    pub fn log(&self) {
        let context_str = self
            .context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        match self.kind.severity() {
            AlertSeverity::Critical => tracing::error!(
                severity = %self.kind.severity(),
                kind = %self.kind,
                context = context_str,
                "ALERT: {}", self.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                severity = %self.kind.severity(),
                kind = %self.kind,
                context = context_str,
                "ALERT: {}", self.message
            ),
            AlertSeverity::Info => tracing::info!(
                severity = %self.kind.severity(),
                kind = %self.kind,
                context = context_str,
                "ALERT: {}", self.message
            ),
        }

        crate::ops::telemetry::record_alert(self.kind.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_with_context() {
        let alert = Alert::new(AlertKind::NewActivity, "2 new")
            .with_context("delta", 2)
            .with_context("count", 5);

        assert_eq!(alert.context.get("delta"), Some(&"2".to_string()));
        assert_eq!(alert.context.get("count"), Some(&"5".to_string()));
    }

    #[test]
    fn test_kind_severity_mapping() {
        assert_eq!(AlertKind::ProbeFailure.severity(), AlertSeverity::Critical);
        assert_eq!(AlertKind::LoggedOut.severity(), AlertSeverity::Critical);
        assert_eq!(AlertKind::ReportStale.severity(), AlertSeverity::Warning);
        assert_eq!(AlertKind::NewActivity.severity(), AlertSeverity::Info);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", AlertKind::ReportStale), "REPORT_STALE");
        assert_eq!(AlertKind::Resumed.label(), "resumed");
    }

    #[test]
    fn test_notification_builder() {
        let n = Notification::new("Title", "Body")
            .with_timeout(Duration::from_secs(15))
            .on_dismiss(NotificationAction::StopTitleFlash);

        assert_eq!(n.timeout, Some(Duration::from_secs(15)));
        assert_eq!(n.on_click, NotificationAction::FocusPage);
        assert_eq!(n.on_dismiss, NotificationAction::StopTitleFlash);
        assert!(n.icon.is_none());
    }
}
