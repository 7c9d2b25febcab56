// * Durable key/value state that survives restarts

pub mod store;

pub use store::{
    JsonFileStore, KeyValueStore, KeyValueStoreExt, MemoryStore, StoreError, KEY_LAST_KNOWN_COUNT,
    KEY_LAST_REPORT_AT, KEY_LOGOUT_NOTIFIED, KEY_LOG_BUFFER,
};
