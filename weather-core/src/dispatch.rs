use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::{
    error::{SendError, StoreError},
    model::Moment,
    store::{Fields, SubscriberField, UserStore},
    transformer::WeatherTransformer,
};

/// Outbound side of the chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), SendError>;
}

/// Outcome of one broadcast run.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sent: Vec<String>,
    pub failed: Vec<String>,
}

impl BroadcastSummary {
    pub fn recipients(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

/// Filter selecting every subscriber that should get the daily report.
pub fn broadcast_filter() -> Fields {
    Fields::new()
        .with(SubscriberField::Agreement, true)
        .with(SubscriberField::Subscription, true)
        .with(SubscriberField::Active, true)
}

/// Send tomorrow's forecast to every consenting, subscribed, active chat.
///
/// Delivery is best-effort: a failure for one recipient is logged and the
/// run moves on to the next. Only failing to read the recipients aborts.
#[instrument(skip_all)]
pub async fn broadcast_forecasts(
    store: &UserStore,
    transformer: &WeatherTransformer,
    messenger: &dyn Messenger,
) -> Result<BroadcastSummary, StoreError> {
    let started_at = Utc::now();
    let subscribers = store.read(&broadcast_filter()).await?;
    info!(count = subscribers.len(), "Broadcasting forecasts");

    let mut sent = Vec::new();
    let mut failed = Vec::new();

    for subscriber in subscribers {
        let chat_id = subscriber.chat_id;
        let Some((latitude, longitude)) = subscriber.latitude.zip(subscriber.longitude) else {
            warn!(chat_id = %chat_id, "Subscriber has no stored location, skipping");
            failed.push(chat_id);
            continue;
        };

        let text = match transformer.render(latitude, longitude, Moment::Forecast).await {
            Ok(text) => text,
            Err(e) => {
                error!(chat_id = %chat_id, error = %e, "Failed to build weather update");
                failed.push(chat_id);
                continue;
            }
        };

        match messenger.send_text(&chat_id, &text).await {
            Ok(()) => {
                info!(chat_id = %chat_id, "Sent weather update");
                sent.push(chat_id);
            }
            Err(e) => {
                error!(chat_id = %chat_id, error = %e, "Failed to send weather update");
                failed.push(chat_id);
            }
        }
    }

    let summary = BroadcastSummary { started_at, finished_at: Utc::now(), sent, failed };
    info!(
        sent = summary.sent.len(),
        failed = summary.failed.len(),
        elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
        "Broadcast finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Subscriber,
        testing::{RecordingMessenger, StubSource, sample_payload, transformer},
    };
    use reqwest::StatusCode;
    use tempfile::TempDir;

    async fn seeded_store(subscribers: &[Subscriber]) -> (TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(dir.path().join("subscribers.db"));
        for sub in subscribers {
            store.insert(sub).await.unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn one_failed_send_does_not_abort_the_batch() {
        let (_dir, store) = seeded_store(&[
            Subscriber::subscribed("1", 1.0, 1.0),
            Subscriber::subscribed("2", 2.0, 2.0),
            Subscriber::subscribed("3", 3.0, 3.0),
        ])
        .await;
        let messenger = RecordingMessenger::failing_for(&["2"]);

        let summary = broadcast_forecasts(
            &store,
            &transformer(StubSource::new(sample_payload())),
            &messenger,
        )
        .await
        .unwrap();

        assert_eq!(messenger.recipients(), ["1", "3"]);
        assert_eq!(summary.sent, ["1", "3"]);
        assert_eq!(summary.failed, ["2"]);
        assert_eq!(summary.recipients(), 3);
    }

    #[tokio::test]
    async fn only_consenting_active_subscribers_receive_forecasts() {
        let mut paused = Subscriber::subscribed("paused", 1.0, 1.0);
        paused.active = false;
        let mut opted_out = Subscriber::subscribed("opted-out", 1.0, 1.0);
        opted_out.subscription = false;

        let (_dir, store) =
            seeded_store(&[Subscriber::subscribed("ok", 1.0, 1.0), paused, opted_out]).await;
        let messenger = RecordingMessenger::default();

        broadcast_forecasts(&store, &transformer(StubSource::new(sample_payload())), &messenger)
            .await
            .unwrap();

        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ok");
        assert!(sent[0].1.contains("for tomorrow in Grimbergen"));
    }

    #[tokio::test]
    async fn provider_outage_is_counted_per_recipient() {
        let (_dir, store) = seeded_store(&[
            Subscriber::subscribed("1", 1.0, 1.0),
            Subscriber::subscribed("2", 2.0, 2.0),
        ])
        .await;
        let source = StubSource::failing(StatusCode::SERVICE_UNAVAILABLE);
        let messenger = RecordingMessenger::default();

        let summary = broadcast_forecasts(&store, &transformer(source.clone()), &messenger)
            .await
            .unwrap();

        assert!(summary.sent.is_empty());
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_store_sends_nothing() {
        let (_dir, store) = seeded_store(&[]).await;
        let messenger = RecordingMessenger::default();

        let summary =
            broadcast_forecasts(&store, &transformer(StubSource::new(sample_payload())), &messenger)
                .await
                .unwrap();
        assert_eq!(summary.recipients(), 0);
        assert!(messenger.recipients().is_empty());
    }
}
