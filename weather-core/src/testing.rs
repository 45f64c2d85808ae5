//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use crate::{
    connector::ForecastSource,
    dispatch::Messenger,
    error::{SendError, WeatherError},
    transformer::WeatherTransformer,
};

/// A provider body with today and tomorrow for Grimbergen.
pub fn sample_payload() -> Value {
    json!({
        "location": { "name": "Grimbergen", "tz_id": "Europe/Brussels" },
        "current": { "temp_c": 12.5, "feelslike_c": 11.0, "condition": { "text": "Partly cloudy" } },
        "forecast": { "forecastday": [
            {
                "astro": { "sunrise": "07:01 AM", "sunset": "06:40 PM" },
                "day": { "maxtemp_c": 14.0, "mintemp_c": 8.2, "condition": { "text": "Overcast" } }
            },
            {
                "astro": { "sunrise": "07:03 AM", "sunset": "06:38 PM" },
                "day": { "maxtemp_c": 16.3, "mintemp_c": 9.1, "condition": { "text": "Light rain" } }
            }
        ]}
    })
}

/// Answers every request with a fixed payload, or a fixed failing status.
#[derive(Debug)]
pub struct StubSource {
    payload: Value,
    fail_with: Option<StatusCode>,
    pub calls: Mutex<Vec<String>>,
}

impl StubSource {
    pub fn new(payload: Value) -> Arc<Self> {
        Arc::new(Self { payload, fail_with: None, calls: Mutex::new(Vec::new()) })
    }

    pub fn failing(status: StatusCode) -> Arc<Self> {
        Arc::new(Self { payload: Value::Null, fail_with: Some(status), calls: Mutex::new(Vec::new()) })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForecastSource for StubSource {
    async fn fetch_forecast(&self, coordinates: &str) -> Result<Value, WeatherError> {
        self.calls.lock().unwrap().push(coordinates.to_string());
        match self.fail_with {
            Some(status) => Err(WeatherError::from_status(status, "stubbed failure".into())),
            None => Ok(self.payload.clone()),
        }
    }
}

pub fn transformer(source: Arc<StubSource>) -> WeatherTransformer {
    WeatherTransformer::new(source)
}

/// Records delivered messages; chats listed in `failing` reject delivery.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    failing: Vec<String>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMessenger {
    pub fn failing_for(chat_ids: &[&str]) -> Self {
        Self {
            failing: chat_ids.iter().map(|id| id.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        if self.failing.iter().any(|id| id == chat_id) {
            return Err(SendError { chat_id: chat_id.to_string(), reason: "blocked by user".into() });
        }
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}
