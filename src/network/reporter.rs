// * Remote collector client
// * Best-effort status heartbeats and alert mails; no retries, the next
// * scheduled send is the retry

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::constants::STATUS_LOG_EXCERPT;
use crate::engine::clock::Clock;
use crate::engine::state::{format_countdown, StateHandle};
use crate::network::client::HttpClient;
use crate::network::errors::NetworkError;
use crate::ops::ring_log::RingLog;
use crate::ops::telemetry;
use crate::persistence::store::{KeyValueStore, KeyValueStoreExt, KEY_LAST_REPORT_AT};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Collector endpoint is not configured")]
    EndpointMissing,

    #[error("Collector endpoint '{0}' is not a valid http(s) URL")]
    EndpointInvalid(String),

    #[error("Collector unreachable: {0}")]
    Transport(#[from] NetworkError),

    #[error("Collector rejected the request with HTTP {status}")]
    Rejected { status: u16 },

    #[error("Collector response lacked the success marker")]
    MissingSuccessMarker,

    #[error("Payload serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ReportError {
    fn metric_label(&self) -> &'static str {
        match self {
            ReportError::EndpointMissing | ReportError::EndpointInvalid(_) => "invalid_endpoint",
            ReportError::Transport(_) => "transport",
            ReportError::Rejected { .. } | ReportError::MissingSuccessMarker => "rejected",
            ReportError::Encode(_) => "encode",
        }
    }
}

/// Periodic status body: `{"type":"statusUpdate","countdown":"MM:SS","messageCount":N}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "statusUpdate")]
pub struct StatusUpdate {
    pub countdown: String,
    #[serde(rename = "messageCount")]
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

/// One-off mail body: `{"subject":"...","message":"..."}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMail {
    pub subject: String,
    pub message: String,
}

/// Built fresh for every send and dropped afterwards
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RemoteStatusPayload {
    StatusUpdate(StatusUpdate),
    Alert(AlertMail),
}

impl RemoteStatusPayload {
    pub fn alert(subject: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteStatusPayload::Alert(AlertMail {
            subject: subject.into(),
            message: message.into(),
        })
    }

    pub fn is_status_update(&self) -> bool {
        matches!(self, RemoteStatusPayload::StatusUpdate(_))
    }

    /// Loggable rendering: the log excerpt is reduced to a count so the
    /// rolling log never ingests a copy of itself
    pub fn sanitized(&self) -> String {
        match self {
            RemoteStatusPayload::StatusUpdate(status) => {
                let logs = match &status.logs {
                    Some(lines) => format!(" logs=<{} entries elided>", lines.len()),
                    None => String::new(),
                };
                format!(
                    "statusUpdate countdown={} messageCount={}{}",
                    status.countdown, status.message_count, logs
                )
            }
            RemoteStatusPayload::Alert(mail) => format!(
                "alert subject=\"{}\" message=<{} chars>",
                mail.subject,
                mail.message.chars().count()
            ),
        }
    }
}

/// Result of a periodic status push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPush {
    Delivered,
    /// Nothing to report until the first successful probe
    SkippedUnknownCount,
}

pub struct RemoteReporter {
    endpoint: Option<String>,
    success_marker: String,
    http: Arc<dyn HttpClient>,
    state: StateHandle,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ring_log: RingLog,
}

impl RemoteReporter {
    pub fn new(
        endpoint: Option<String>,
        success_marker: impl Into<String>,
        http: Arc<dyn HttpClient>,
        state: StateHandle,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ring_log: RingLog,
    ) -> Self {
        Self {
            endpoint,
            success_marker: success_marker.into(),
            http,
            state,
            store,
            clock,
            ring_log,
        }
    }

    /// Parses the configured endpoint; only http(s) URLs with a host pass
    pub fn validate_endpoint(&self) -> Result<Url, ReportError> {
        let raw = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(ReportError::EndpointMissing)?;

        let url = Url::parse(raw).map_err(|_| ReportError::EndpointInvalid(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ReportError::EndpointInvalid(raw.to_string()));
        }
        Ok(url)
    }

    /// Sends one payload. A delivered status update refreshes the
    /// last-successful-report timestamp; alerts never do.
    pub async fn send(&self, payload: &RemoteStatusPayload) -> Result<(), ReportError> {
        let result = self.deliver(payload).await;
        match &result {
            Ok(()) => telemetry::record_report("delivered"),
            Err(e) => {
                telemetry::record_report(e.metric_label());
                tracing::warn!(error = %e, payload = %payload.sanitized(), "Collector send failed");
            }
        }
        result
    }

    async fn deliver(&self, payload: &RemoteStatusPayload) -> Result<(), ReportError> {
        let endpoint = self.validate_endpoint()?;
        tracing::info!(payload = %payload.sanitized(), "Sending to collector");

        let body = serde_json::to_string(payload)?;
        let response = self.http.post_text(endpoint.as_str(), body).await?;

        if !response.is_ok() {
            return Err(ReportError::Rejected {
                status: response.status,
            });
        }
        if !response.body.contains(&self.success_marker) {
            return Err(ReportError::MissingSuccessMarker);
        }

        if payload.is_status_update() {
            let now = self.clock.now_ms();
            self.state.write().await.last_successful_report_at_ms = Some(now);
            if let Err(e) = self.store.set_as(KEY_LAST_REPORT_AT, &now) {
                tracing::warn!(error = %e, "Failed to persist last report timestamp");
            }
        }

        tracing::info!(status = response.status, "Collector acknowledged");
        Ok(())
    }

    /// Builds the current status from shared state and sends it
    pub async fn push_status(&self) -> Result<StatusPush, ReportError> {
        let (count, countdown) = {
            let state = self.state.read().await;
            (state.last_known_count, state.countdown_remaining_ms)
        };

        let Some(count) = count else {
            tracing::info!("Message count unknown, skipping status push");
            return Ok(StatusPush::SkippedUnknownCount);
        };

        let payload = RemoteStatusPayload::StatusUpdate(StatusUpdate {
            countdown: format_countdown(countdown),
            message_count: count,
            logs: Some(self.ring_log.recent(STATUS_LOG_EXCERPT)),
        });

        self.send(&payload).await.map(|_| StatusPush::Delivered)
    }
}
