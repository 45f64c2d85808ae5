//! Binary crate for the `weather-bot` Telegram bot.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and wiring the core components together
//! - Telegram update routing and message delivery
//! - Interactive configuration

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod telegram;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("weather_bot=info,weather_core=info,teloxide=warn")
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
