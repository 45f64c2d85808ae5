//! Platform-neutral chat flow.
//!
//! Every inbound event maps to a list of [`Reply`] values; the chat adapter
//! only has to render them. Errors never escape: they are logged and turned
//! into an apology for the user.

use std::{collections::HashMap, fmt, str::FromStr};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    model::{Moment, Subscriber},
    store::{Fields, SubscriberField, UserStore},
    transformer::WeatherTransformer,
};

pub const WELCOME_TEXT: &str =
    "Welcome to your personal weather forecast assistant, what do you want to do:";
pub const HELP_TEXT: &str = "Use /start to test this bot.\n\n\
    /start - get current weather or subscribe to daily updates\n\
    /unsubscribe - stop the daily updates\n\
    /forget - delete everything stored about this chat\n\
    /help - show this message";
pub const SHARE_LOCATION_TEXT: &str = "Please share your location, using the command button.";
pub const CONSENT_TEXT: &str =
    "To subscribe, you need to accept that we store your location and chat data.";
pub const DECLINED_TEXT: &str = "We can't deliver automatic updates, if we can't store your \
    location and chat information. Please use the /start command to get current weather \
    conditions or accept the consent.";
pub const SENDING_CURRENT_TEXT: &str = "Sending current weather conditions. If you want to \
    subscribe for automated updates, send the command /start and select the button subscribe \
    to automated updates.";
pub const SUBSCRIBED_TEXT: &str =
    "You location will be saved in order to send you automated weather updates.";
pub const WEATHER_APOLOGY: &str =
    "Sorry, I couldn't get the weather for your location right now. Please try again later.";
pub const STORE_APOLOGY: &str =
    "Sorry, I couldn't update your subscription right now. Please try again later.";
pub const UNKNOWN_ACTION_TEXT: &str = "Sorry, I don't know that action. Use /start to begin again.";
pub const SHARE_LOCATION_BUTTON: &str = "Share location";

/// Inline button payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Current,
    Automation,
    Confirm,
    Decline,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Current => "current",
            Action::Automation => "automation",
            Action::Confirm => "confirm",
            Action::Decline => "decline",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Current => "Get current weather conditions",
            Action::Automation => "Subscribe for automated daily weather updates",
            Action::Confirm => "Confirm Consent",
            Action::Decline => "Decline Consent",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "current" => Ok(Action::Current),
            "automation" => Ok(Action::Automation),
            "confirm" => Ok(Action::Confirm),
            "decline" => Ok(Action::Decline),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// How a reply should be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    None,
    /// One inline button per row.
    Actions(Vec<Action>),
    /// One-time reply keyboard asking for the user's location.
    RequestLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Keyboard,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: Keyboard::None }
    }

    pub fn with_actions(text: impl Into<String>, actions: Vec<Action>) -> Self {
        Self { text: text.into(), keyboard: Keyboard::Actions(actions) }
    }

    pub fn request_location() -> Self {
        Self { text: SHARE_LOCATION_TEXT.to_string(), keyboard: Keyboard::RequestLocation }
    }
}

/// What a location share means for a chat, decided by the last button pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Current,
    AwaitingConsent,
    Subscribe,
}

#[derive(Debug)]
pub struct Conversation {
    store: UserStore,
    transformer: WeatherTransformer,
    intents: Mutex<HashMap<String, Intent>>,
}

impl Conversation {
    pub fn new(store: UserStore, transformer: WeatherTransformer) -> Self {
        Self { store, transformer, intents: Mutex::new(HashMap::new()) }
    }

    pub async fn intent(&self, chat_id: &str) -> Option<Intent> {
        self.intents.lock().await.get(chat_id).copied()
    }

    async fn set_intent(&self, chat_id: &str, intent: Option<Intent>) {
        let mut intents = self.intents.lock().await;
        match intent {
            Some(intent) => intents.insert(chat_id.to_string(), intent),
            None => intents.remove(chat_id),
        };
    }

    pub fn start(&self) -> Vec<Reply> {
        vec![Reply::with_actions(WELCOME_TEXT, vec![Action::Current, Action::Automation])]
    }

    pub fn help(&self) -> Vec<Reply> {
        vec![Reply::text(HELP_TEXT)]
    }

    /// Handle an inline button press with an opaque payload.
    pub async fn button(&self, chat_id: &str, payload: &str) -> Vec<Reply> {
        let action = match payload.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                warn!(chat_id, error = %e, "Ignoring button press");
                return vec![Reply::text(UNKNOWN_ACTION_TEXT)];
            }
        };
        info!(chat_id, %action, "Button pressed");

        match action {
            Action::Current => {
                self.set_intent(chat_id, Some(Intent::Current)).await;
                vec![Reply::request_location()]
            }
            Action::Automation => {
                self.set_intent(chat_id, Some(Intent::AwaitingConsent)).await;
                vec![Reply::with_actions(CONSENT_TEXT, vec![Action::Confirm, Action::Decline])]
            }
            Action::Confirm => {
                self.set_intent(chat_id, Some(Intent::Subscribe)).await;
                vec![Reply::request_location()]
            }
            Action::Decline => {
                self.set_intent(chat_id, None).await;
                vec![Reply::text(DECLINED_TEXT)]
            }
        }
    }

    /// Handle a shared location: store it after consent, otherwise answer
    /// with the current weather.
    pub async fn location(&self, chat_id: &str, latitude: f64, longitude: f64) -> Vec<Reply> {
        let intent = self.intent(chat_id).await;
        if intent == Some(Intent::Subscribe) {
            let subscriber = Subscriber::subscribed(chat_id, latitude, longitude);
            return match self.store.upsert(&subscriber).await {
                Ok(()) => {
                    info!(chat_id, "Subscriber saved");
                    vec![Reply::text(SUBSCRIBED_TEXT)]
                }
                Err(e) => {
                    error!(chat_id, error = %e, "Failed to save subscriber");
                    vec![Reply::text(STORE_APOLOGY)]
                }
            };
        }

        let report = match self.transformer.render(latitude, longitude, Moment::Current).await {
            Ok(text) => text,
            Err(e) => {
                error!(chat_id, error = %e, "Failed to render current weather");
                WEATHER_APOLOGY.to_string()
            }
        };
        // A one-off report needs nothing remembered afterwards.
        if intent == Some(Intent::Current) {
            self.set_intent(chat_id, None).await;
        }
        vec![Reply::text(SENDING_CURRENT_TEXT), Reply::text(report)]
    }

    /// Stop daily updates but keep the stored location.
    pub async fn unsubscribe(&self, chat_id: &str) -> Vec<Reply> {
        let fields = Fields::new().with(SubscriberField::Subscription, false);
        let text = match self.store.update(chat_id, &fields).await {
            Ok(true) => "You will no longer receive automated weather updates.",
            Ok(false) => "You are not subscribed to automated weather updates.",
            Err(e) => {
                error!(chat_id, error = %e, "Failed to unsubscribe");
                STORE_APOLOGY
            }
        };
        vec![Reply::text(text)]
    }

    /// Delete everything stored for the chat.
    pub async fn forget(&self, chat_id: &str) -> Vec<Reply> {
        self.set_intent(chat_id, None).await;
        let text = match self.store.delete(chat_id).await {
            Ok(true) => "Your location and chat data have been deleted.",
            Ok(false) => "There is no data stored for this chat.",
            Err(e) => {
                error!(chat_id, error = %e, "Failed to delete subscriber");
                STORE_APOLOGY
            }
        };
        vec![Reply::text(text)]
    }
}
