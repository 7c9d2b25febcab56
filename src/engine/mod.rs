// * Monitoring core: probe cadence, classification, change detection and the
// * watchdogs that run beside it

pub mod alerts;
pub mod browser;
pub mod clock;
pub mod dedup;
pub mod detector;
pub mod heartbeat;
pub mod probe;
pub mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod staleness;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::{AlertDispatcher, ObserveMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{AlertDeduplicator, FailureDisposition};
pub use detector::{evaluate, ChangeDetector, CountChange};
pub use heartbeat::HeartbeatMonitor;
pub use probe::{LogoutNotice, Probe, ProbeResult, ProbeTimings};
pub use runtime::{CycleHandler, CycleOutcome, Monitor, MonitorDeps, MonitorError, MonitorStatus};
pub use sandbox::{HttpSandbox, ProbeSandbox, SandboxError, SandboxPage, StaticPage};
pub use scheduler::{jittered_delay, Countdown, ManualPresence, NoPresence, PresenceSignal, Scheduler};
pub use staleness::StalenessChecker;
pub use state::{MonitorState, StateHandle};
