//! Shared test utilities

use std::time::Duration;

use yoyo_companion::config::{EndpointConfig, PayloadKind, TransportMode};
use yoyo_companion::store::{self, StateRepo};

/// Set up an in-memory client state store
#[must_use]
pub fn setup_test_state() -> StateRepo {
    StateRepo::new(store::init_memory().expect("failed to init test store"))
}

/// Endpoint configuration pointing at nothing, for scripted transports
#[must_use]
pub fn test_endpoint(mode: TransportMode, payload: PayloadKind) -> EndpointConfig {
    EndpointConfig {
        chat_url: "http://test.local/api/chat".to_string(),
        speech_url: "http://test.local/api/speech".to_string(),
        mode,
        sentinel: "---YOYO_AUDIO_SEPARATOR---".to_string(),
        payload,
        timeout: Duration::from_secs(5),
    }
}
