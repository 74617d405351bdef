// Not every test binary uses every helper
#![allow(dead_code)]

pub mod mock_upstream;

use actix_web::web;
use chat_relay_rs::config::UpstreamConfig;
use chat_relay_rs::server::AppState;
use serde_json::{Value, json};

pub const TEST_API_KEY: &str = "test-key";

/// App state pointed at `endpoint` with test-sized limits.
pub fn create_app_state(endpoint: &str) -> web::Data<AppState> {
    let config = UpstreamConfig::new(endpoint, TEST_API_KEY)
        .expect("valid test config")
        .with_request_timeout(10);
    web::Data::new(AppState::new(config).expect("Failed to create AppState in test"))
}

pub fn chat_body(model: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "user", "content": "Hello"},
            {"role": "assistant", "content": "Hi, how can I help?"},
            {"role": "user", "content": "Say hello back"}
        ],
        "stream": stream
    })
}
