// * Signal extraction from fetched page snapshots

pub mod auth;
pub mod signal;

pub use auth::{indicator_from_config, AuthIndicator, PatternIndicator, SelectorIndicator};
pub use signal::{parse_count, ExtractError, Extraction, SignalExtractor};
