use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use teloxide::Bot;
use tracing::info;
use weather_core::{
    Config, Conversation, FieldValue, Fields, UserStore, WeatherApiConnector, WeatherTransformer,
    broadcast_forecasts,
};

use crate::telegram::{self, TelegramMessenger};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-bot", version, about = "Telegram weather forecast bot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively write the config file.
    Configure,

    /// Poll Telegram and answer users until interrupted.
    Run,

    /// Send tomorrow's forecast to every subscriber, then exit.
    Broadcast,

    /// Print a weather report for coordinates.
    Report {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// One of "current", "forecast" or "full".
        #[arg(long, default_value = "full")]
        moment: String,
    },

    /// Inspect or remove stored subscribers.
    Subscribers {
        #[command(subcommand)]
        command: SubscribersCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SubscribersCommand {
    /// List stored subscribers, optionally filtered as `field=value`.
    List {
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
    },

    /// Delete the row for a chat id.
    Delete { chat_id: String },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Run => {
                let config = load_config(true)?;
                let conversation = Conversation::new(
                    UserStore::new(&config.database),
                    transformer(&config)?,
                );
                telegram::run(Bot::new(&config.telegram.token), Arc::new(conversation)).await
            }
            Command::Broadcast => {
                let config = load_config(true)?;
                let store = UserStore::new(&config.database);
                let messenger = TelegramMessenger::new(Bot::new(&config.telegram.token));

                let summary = broadcast_forecasts(&store, &transformer(&config)?, &messenger)
                    .await
                    .context("Failed to read subscribers for the broadcast")?;
                println!(
                    "Sent {} of {} forecasts.",
                    summary.sent.len(),
                    summary.recipients()
                );
                Ok(())
            }
            Command::Report { lat, lon, moment } => {
                let config = load_config(false)?;
                let text = transformer(&config)?.render_named(lat, lon, &moment).await?;
                println!("{text}");
                Ok(())
            }
            Command::Subscribers { command } => {
                let config = Config::load()?;
                let store = UserStore::new(&config.database);
                match command {
                    SubscribersCommand::List { filters } => list_subscribers(&store, &filters).await,
                    SubscribersCommand::Delete { chat_id } => {
                        if store.delete(&chat_id).await? {
                            println!("Deleted subscriber {chat_id}");
                        } else {
                            println!("No subscriber {chat_id}");
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Load the config and fail early on missing credentials.
fn load_config(needs_bot: bool) -> anyhow::Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    if needs_bot {
        config.validate()?;
    } else {
        config.validate_weather()?;
    }
    info!(
        base_url = %config.weather.base_url,
        database = %config.database.path.display(),
        "Configuration loaded"
    );
    Ok(config)
}

fn transformer(config: &Config) -> anyhow::Result<WeatherTransformer> {
    let connector = WeatherApiConnector::new(&config.weather)
        .context("Failed to build the weather API client")?;
    Ok(WeatherTransformer::new(Arc::new(connector)))
}

fn configure() -> anyhow::Result<()> {
    let path = Config::resolve_path()?;
    let mut config = Config::load_file(&path)?;

    config.telegram.token = Password::new("Telegram bot token:")
        .without_confirmation()
        .prompt()?;
    config.weather.api_key = Password::new("WeatherAPI.com key:")
        .without_confirmation()
        .prompt()?;
    let db_path = Text::new("SQLite database file:")
        .with_default(&config.database.path.to_string_lossy())
        .prompt()?;
    config.database.path = db_path.into();

    config.validate()?;
    config.save(&path)?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}

async fn list_subscribers(store: &UserStore, filters: &[String]) -> anyhow::Result<()> {
    let fields = Fields::parse(
        filters
            .iter()
            .map(|raw| parse_filter(raw))
            .collect::<anyhow::Result<Vec<_>>>()?,
    )?;

    let subscribers = store.read(&fields).await?;
    if subscribers.is_empty() {
        println!("No subscribers.");
    }
    for sub in subscribers {
        let location = match sub.coordinates() {
            Some((lat, lon)) => format!("{lat},{lon}"),
            None => "-".to_string(),
        };
        println!(
            "{}\tlocation={}\tagreement={}\tsubscription={}\tactive={}",
            sub.chat_id, location, sub.agreement, sub.subscription, sub.active
        );
    }
    Ok(())
}

/// `field=value`; booleans and numbers are recognised, `null` clears a coordinate.
fn parse_filter(raw: &str) -> anyhow::Result<(&str, FieldValue)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Filter '{raw}' must look like field=value"))?;
    let value = match value {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        "null" => FieldValue::Real(None),
        other if name != "chat_id" => match other.parse::<f64>() {
            Ok(number) => FieldValue::from(number),
            Err(_) => FieldValue::from(other),
        },
        other => FieldValue::from(other),
    };
    Ok((name, value))
}
