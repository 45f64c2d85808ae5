//! Core library for the weather bot.
//!
//! This crate defines:
//! - Configuration assembled once at startup
//! - The HTTP connector and the report transformer for WeatherAPI.com
//! - The SQLite subscriber store
//! - The chat flow and the scheduled forecast broadcast
//!
//! It is used by `weather-bot`, but has no dependency on any chat platform.

pub mod config;
pub mod connector;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod store;
pub mod transformer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, DatabaseConfig, TelegramConfig, WeatherApiConfig};
pub use connector::{ApiConnector, ForecastSource, HttpConnector, WeatherApiConnector};
pub use conversation::{Action, Conversation, Keyboard, Reply};
pub use dispatch::{BroadcastSummary, Messenger, broadcast_forecasts};
pub use error::{SendError, StoreError, WeatherError};
pub use model::{ForecastReport, Moment, Subscriber};
pub use store::{FieldValue, Fields, SubscriberField, UserStore};
pub use transformer::{Transformer, WeatherTransformer};
