pub mod constants;
pub mod settings;

pub use settings::{
    AlertChannels, AlertCount, ConfigError, ConfigSource, Configuration, FileConfigSource,
    LoginIndicator, ProbeMode, ProbeSettings,
};
