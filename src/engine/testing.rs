// * Shared fixtures for engine unit tests

use std::sync::{Arc, Mutex};

use crate::engine::clock::ManualClock;
use crate::engine::state::StateHandle;
use crate::network::client::{HttpResponse, MockHttpClient};
use crate::network::reporter::RemoteReporter;
use crate::ops::alerting::{AlertSink, Notification};
use crate::ops::ring_log::RingLog;
use crate::persistence::store::MemoryStore;

pub const ENDPOINT: &str = "https://collector.example.com/exec";

/// Sink that remembers every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
    pub sounds: Mutex<usize>,
    pub flashes: Mutex<Vec<u64>>,
}

impl RecordingSink {
    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn sound_count(&self) -> usize {
        *self.sounds.lock().unwrap()
    }
}

impl AlertSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn play_sound(&self) {
        *self.sounds.lock().unwrap() += 1;
    }

    fn start_title_flash(&self, count: u64) {
        self.flashes.lock().unwrap().push(count);
    }

    fn stop_title_flash(&self) {}
}

/// Mock collector that acknowledges every post and records the bodies
pub fn acking_http(bodies: Arc<Mutex<Vec<String>>>) -> MockHttpClient {
    let mut mock = MockHttpClient::new();
    mock.expect_post_text().returning(move |_, body| {
        bodies.lock().unwrap().push(body);
        Box::pin(async {
            Ok(HttpResponse {
                status: 200,
                body: "Success".to_string(),
            })
        })
    });
    mock
}

pub fn reporter(
    http: MockHttpClient,
    state: &StateHandle,
    clock: &Arc<ManualClock>,
) -> Arc<RemoteReporter> {
    Arc::new(RemoteReporter::new(
        Some(ENDPOINT.to_string()),
        "Success",
        Arc::new(http),
        state.clone(),
        Arc::new(MemoryStore::new()),
        clock.clone(),
        RingLog::new(50),
    ))
}
