use reqwest::StatusCode;
use thiserror::Error;

/// Errors produced while fetching or rendering a weather report.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// The provider answered with a 5xx status.
    #[error("Weather provider is unavailable (status {status}): {body}")]
    UpstreamUnavailable { status: StatusCode, body: String },

    /// The provider rejected the request (4xx), or the request could not be
    /// built from the given input.
    #[error("Weather provider rejected the request (status {status}): {body}")]
    BadRequestData { status: StatusCode, body: String },

    /// Any other non-200 status.
    #[error("Weather provider answered with unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("Failed to reach the weather provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Weather provider response is malformed: {0}")]
    MalformedResponse(String),

    #[error("Unsupported report moment '{0}'. Supported: current, forecast, full.")]
    UnsupportedMoment(String),
}

impl WeatherError {
    /// Map a non-200 status to the matching error kind.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status.is_server_error() {
            Self::UpstreamUnavailable { status, body }
        } else if status.is_client_error() {
            Self::BadRequestData { status, body }
        } else {
            Self::UnexpectedStatus { status, body }
        }
    }

    pub(crate) fn invalid_coordinates(latitude: f64, longitude: f64) -> Self {
        Self::BadRequestData {
            status: StatusCode::BAD_REQUEST,
            body: format!(
                "coordinates ({latitude}, {longitude}) are outside of -90..90 / -180..180"
            ),
        }
    }
}

/// Errors produced by the subscriber store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown subscriber field '{0}'")]
    UnknownField(String),

    #[error("Field '{field}' expects {expected}")]
    FieldType { field: &'static str, expected: &'static str },

    #[error("Field '{0}' cannot be changed")]
    ReadOnlyField(&'static str),

    #[error("Invalid subscriber {chat_id}: {reason}")]
    InvalidSubscriber { chat_id: String, reason: String },

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A message could not be delivered to a chat.
#[derive(Debug, Error)]
#[error("Failed to deliver message to chat {chat_id}: {reason}")]
pub struct SendError {
    pub chat_id: String,
    pub reason: String,
}
