// * New-activity fan-out
// * One increase becomes sound, title flash, popup and email, each gated by
// * its channel switch

use std::sync::Arc;
use std::time::Duration;

use crate::config::constants::ACTIVITY_POPUP_TIMEOUT_SECS;
use crate::config::settings::{AlertChannels, AlertCount};
use crate::network::reporter::{RemoteReporter, RemoteStatusPayload};
use crate::ops::alerting::{Alert, AlertKind, AlertSink, Notification, NotificationAction};

/// Whether an observation comes from a real probe or a manual simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveMode {
    Live,
    Test,
}

impl ObserveMode {
    fn prefix(&self) -> &'static str {
        match self {
            ObserveMode::Live => "",
            ObserveMode::Test => "[TEST] ",
        }
    }
}

/// Channels actually fired for one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sound: bool,
    pub title_flash: bool,
    pub popup: bool,
    pub email_delivered: Option<bool>,
}

pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    reporter: Arc<RemoteReporter>,
    channels: AlertChannels,
    count_mode: AlertCount,
    icon: Option<String>,
}

impl AlertDispatcher {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        reporter: Arc<RemoteReporter>,
        channels: AlertChannels,
        count_mode: AlertCount,
    ) -> Self {
        Self {
            sink,
            reporter,
            channels,
            count_mode,
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    /// Number shown to the user for an increase
    pub fn shown_count(&self, delta: u64, count: u64) -> u64 {
        match self.count_mode {
            AlertCount::Delta => delta,
            AlertCount::Total => count,
        }
    }

    pub async fn dispatch(&self, delta: u64, count: u64, mode: ObserveMode) -> DispatchReport {
        let shown = self.shown_count(delta, count);
        let prefix = mode.prefix();
        let mut report = DispatchReport::default();

        Alert::new(AlertKind::NewActivity, format!("{}{} new message(s)", prefix, shown))
            .with_context("delta", delta)
            .with_context("count", count)
            .log();

        if self.channels.sound {
            self.sink.play_sound();
            report.sound = true;
        }

        if self.channels.title_flash {
            self.sink.start_title_flash(shown);
            report.title_flash = true;
        }

        if self.channels.popup {
            let mut notification = Notification::new(
                format!("{}New messages", prefix),
                format!("You have {} new message(s).", shown),
            )
            .with_timeout(Duration::from_secs(ACTIVITY_POPUP_TIMEOUT_SECS))
            .on_click(NotificationAction::FocusAndStopFlash)
            .on_dismiss(NotificationAction::StopTitleFlash);
            if let Some(icon) = &self.icon {
                notification = notification.with_icon(icon.clone());
            }
            self.sink.notify(&notification);
            report.popup = true;
        }

        if self.channels.email {
            let payload = RemoteStatusPayload::alert(
                format!("{}{} new message(s)", prefix, shown),
                format!(
                    "{}The monitored page now shows {} unread (up {} since the last check).",
                    prefix, count, delta
                ),
            );
            report.email_delivered = Some(self.reporter.send(&payload).await.is_ok());
        }

        report
    }
}
