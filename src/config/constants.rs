// * Configuration Constants
// * Central location for all default cadences, thresholds and timeouts

// * Default jitter bounds for the probe cadence, in minutes
pub const DEFAULT_MIN_INTERVAL_MINUTES: f64 = 7.0;
pub const DEFAULT_MAX_INTERVAL_MINUTES: f64 = 10.0;

// * Upper bound accepted for a configured interval (one day); larger bounds fall back
pub const MAX_INTERVAL_MINUTES: f64 = 1440.0;

// * Local warning when the collector has not acknowledged a status push for this long
pub const DEFAULT_STALENESS_THRESHOLD_MINUTES: f64 = 30.0;

// * Probe polling cadence inside the isolated context
pub const PROBE_POLL_INTERVAL_MS: u64 = 500;

// * Inner timeout: how long to wait for the signal element to appear
pub const PROBE_INNER_TIMEOUT_SECS: u64 = 20;

// * Outer timeout: hard bound on one probe attempt, cleanup guaranteed
pub const PROBE_OUTER_TIMEOUT_SECS: u64 = 45;

// * Scheduler countdown tick
pub const COUNTDOWN_TICK_MS: u64 = 1_000;

// * Heartbeat tick and the multiple of it that counts as a suspend gap
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;
pub const HEARTBEAT_STALE_FACTOR: u32 = 5;

// * How long the "just resumed" marker stays visible
pub const RESUMED_MARKER_SECS: u64 = 15;

// * Collector watchdog cadence
pub const STALENESS_CHECK_INTERVAL_SECS: u64 = 60;

// * Periodic status push cadence
pub const STATUS_PUSH_INTERVAL_SECS: u64 = 60;

// * Rolling log capacity and the excerpt attached to status pushes
pub const LOG_CAPACITY: usize = 200;
pub const STATUS_LOG_EXCERPT: usize = 20;

// * Collector acknowledgement marker expected in a 200 response body
pub const DEFAULT_SUCCESS_MARKER: &str = "Success";

// * Collector request timeout
pub const REPORT_TIMEOUT_SECS: u64 = 30;

// * Default CSS selector for the unread counter and the logged-out indicator
pub const DEFAULT_SIGNAL_SELECTOR: &str =
    "a.show-messages[href='#New Job Notice Board'] span[data-bind='text: messages().length']";
pub const DEFAULT_LOGIN_SELECTOR: &str = "#login-link";

// * Notification display timeouts
pub const ACTIVITY_POPUP_TIMEOUT_SECS: u64 = 15;
pub const RESUMED_POPUP_TIMEOUT_SECS: u64 = 20;
