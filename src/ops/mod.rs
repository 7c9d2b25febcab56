// * Operations: alerting capability, telemetry and the rolling log

pub mod alerting;
pub mod ring_log;
pub mod telemetry;

pub use alerting::{Alert, AlertKind, AlertSeverity, AlertSink, LoggingSink, Notification, NotificationAction};
pub use ring_log::{LogEntry, RingLog, RingLogLayer};
pub use telemetry::{
    get_metrics_string, init_tracing, init_tracing_pretty, start_metrics_server, MetricsServerHandle,
};
