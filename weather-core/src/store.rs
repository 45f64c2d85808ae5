//! SQLite-backed subscriber store.
//!
//! Every operation opens its own connection, runs inside a single transaction
//! and commits before returning. Column names only ever come from
//! [`SubscriberField`]; values are always bound as parameters.

use rusqlite::{
    Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior, params,
    params_from_iter,
    types::ToSqlOutput,
};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tokio::task;
use tracing::{debug, instrument};

use crate::{config::DatabaseConfig, error::StoreError, model::Subscriber};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS subscribers (
        chat_id      TEXT PRIMARY KEY NOT NULL,
        latitude     REAL,
        longitude    REAL,
        agreement    INTEGER NOT NULL DEFAULT 0,
        subscription INTEGER NOT NULL DEFAULT 0,
        active       INTEGER NOT NULL DEFAULT 1
    )";

const COLUMNS: &str = "chat_id, latitude, longitude, agreement, subscription, active";

/// The closed set of subscriber columns usable in filters and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberField {
    ChatId,
    Latitude,
    Longitude,
    Agreement,
    Subscription,
    Active,
}

impl SubscriberField {
    pub fn column(&self) -> &'static str {
        match self {
            SubscriberField::ChatId => "chat_id",
            SubscriberField::Latitude => "latitude",
            SubscriberField::Longitude => "longitude",
            SubscriberField::Agreement => "agreement",
            SubscriberField::Subscription => "subscription",
            SubscriberField::Active => "active",
        }
    }

    pub const fn all() -> &'static [SubscriberField] {
        &[
            SubscriberField::ChatId,
            SubscriberField::Latitude,
            SubscriberField::Longitude,
            SubscriberField::Agreement,
            SubscriberField::Subscription,
            SubscriberField::Active,
        ]
    }

    fn check(&self, value: &FieldValue) -> Result<(), StoreError> {
        let expected = match (self, value) {
            (SubscriberField::ChatId, FieldValue::Text(_)) => return Ok(()),
            (SubscriberField::Latitude | SubscriberField::Longitude, FieldValue::Real(_)) => {
                return Ok(());
            }
            (
                SubscriberField::Agreement | SubscriberField::Subscription | SubscriberField::Active,
                FieldValue::Bool(_),
            ) => return Ok(()),
            (SubscriberField::ChatId, _) => "text",
            (SubscriberField::Latitude | SubscriberField::Longitude, _) => "a number or null",
            _ => "a boolean",
        };
        Err(StoreError::FieldType { field: self.column(), expected })
    }
}

impl fmt::Display for SubscriberField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for SubscriberField {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SubscriberField::all()
            .iter()
            .copied()
            .find(|field| field.column() == value)
            .ok_or_else(|| StoreError::UnknownField(value.to_string()))
    }
}

/// A value bound to a [`SubscriberField`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Real(Option<f64>),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(Some(value))
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        FieldValue::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            FieldValue::Text(v) => v.to_sql(),
            FieldValue::Real(v) => v.to_sql(),
            FieldValue::Bool(v) => v.to_sql(),
        }
    }
}

/// An ordered set of field/value pairs, used both as an exact-match filter
/// and as the assignments of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(SubscriberField, FieldValue)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair, replacing an earlier value for the same field.
    pub fn with(mut self, field: SubscriberField, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        match self.0.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.0.push((field, value)),
        }
        self
    }

    /// Build from loosely typed `(name, value)` pairs, rejecting unknown names.
    pub fn parse<'a, I>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        pairs
            .into_iter()
            .try_fold(Self::new(), |fields, (name, value)| -> Result<Self, StoreError> {
                Ok(fields.with(name.parse()?, value))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SubscriberField, FieldValue)> {
        self.0.iter()
    }

    fn validate(&self) -> Result<(), StoreError> {
        self.0.iter().try_for_each(|(field, value)| field.check(value))
    }

    /// `WHERE` clause and the values it binds; `NULL` reals compare with `IS NULL`.
    fn where_clause(&self) -> (String, Vec<&FieldValue>) {
        if self.0.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut values = Vec::new();
        let conditions: Vec<String> = self
            .0
            .iter()
            .map(|(field, value)| match value {
                FieldValue::Real(None) => format!("{} IS NULL", field.column()),
                _ => {
                    values.push(value);
                    format!("{} = ?", field.column())
                }
            })
            .collect();

        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

/// Persistent subscriber table.
#[derive(Debug, Clone)]
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self::open(&config.path)
    }

    pub fn open(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Run `op` on a fresh connection inside one transaction on the blocking pool.
    ///
    /// The transaction is committed only when `op` succeeds; dropping it on
    /// error rolls everything back. Writers must pass
    /// [`TransactionBehavior::Immediate`]: a deferred transaction that upgrades
    /// its read lock gets `SQLITE_BUSY` without waiting on the busy timeout.
    async fn transact<T, F>(&self, behavior: TransactionBehavior, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();

        task::spawn_blocking(move || -> Result<T, StoreError> {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;

            let tx = conn.transaction_with_behavior(behavior)?;
            tx.execute_batch(SCHEMA)?;
            let out = op(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }

    /// Insert a new subscriber. An existing `chat_id` is a constraint error.
    #[instrument(skip(self, subscriber), fields(chat_id = %subscriber.chat_id))]
    pub async fn insert(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        validate(subscriber)?;
        let sub = subscriber.clone();

        self.transact(TransactionBehavior::Immediate, move |tx| {
            tx.execute(
                &format!("INSERT INTO subscribers ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    sub.chat_id,
                    sub.latitude,
                    sub.longitude,
                    sub.agreement,
                    sub.subscription,
                    sub.active
                ],
            )?;
            debug!("Inserted subscriber");
            Ok(())
        })
        .await
    }

    /// Insert a subscriber or overwrite every column of the existing row.
    #[instrument(skip(self, subscriber), fields(chat_id = %subscriber.chat_id))]
    pub async fn upsert(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        validate(subscriber)?;
        let sub = subscriber.clone();

        self.transact(TransactionBehavior::Immediate, move |tx| {
            tx.execute(
                &format!(
                    "INSERT INTO subscribers ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(chat_id) DO UPDATE SET
                         latitude = excluded.latitude,
                         longitude = excluded.longitude,
                         agreement = excluded.agreement,
                         subscription = excluded.subscription,
                         active = excluded.active"
                ),
                params![
                    sub.chat_id,
                    sub.latitude,
                    sub.longitude,
                    sub.agreement,
                    sub.subscription,
                    sub.active
                ],
            )?;
            debug!("Upserted subscriber");
            Ok(())
        })
        .await
    }

    /// All rows matching every filter pair; an empty filter returns everything.
    #[instrument(skip(self))]
    pub async fn read(&self, filters: &Fields) -> Result<Vec<Subscriber>, StoreError> {
        filters.validate()?;
        let filters = filters.clone();

        self.transact(TransactionBehavior::Deferred, move |tx| {
            let (clause, values) = filters.where_clause();
            let sql = format!("SELECT {COLUMNS} FROM subscribers{clause} ORDER BY chat_id");

            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), row_to_subscriber)?
                .collect::<Result<Vec<_>, _>>()?;

            debug!(count = rows.len(), "Read subscribers");
            Ok(rows)
        })
        .await
    }

    /// Set the given fields on one row. Returns `false` when `chat_id` is absent.
    ///
    /// The row must still satisfy the subscription invariant afterwards,
    /// otherwise nothing is written.
    #[instrument(skip(self))]
    pub async fn update(&self, chat_id: &str, fields: &Fields) -> Result<bool, StoreError> {
        fields.validate()?;
        if fields.iter().any(|(field, _)| *field == SubscriberField::ChatId) {
            return Err(StoreError::ReadOnlyField(SubscriberField::ChatId.column()));
        }
        if fields.is_empty() {
            return Ok(false);
        }

        let chat_id = chat_id.to_string();
        let fields = fields.clone();

        self.transact(TransactionBehavior::Immediate, move |tx| {
            let assignments: Vec<String> =
                fields.iter().map(|(field, _)| format!("{} = ?", field.column())).collect();
            let sql = format!(
                "UPDATE subscribers SET {} WHERE chat_id = ?",
                assignments.join(", ")
            );

            let mut values: Vec<&dyn ToSql> =
                fields.iter().map(|(_, value)| value as &dyn ToSql).collect();
            values.push(&chat_id);

            let changed = tx.execute(&sql, params_from_iter(values))?;
            if changed == 0 {
                debug!("No subscriber to update");
                return Ok(false);
            }

            let row = tx.query_row(
                &format!("SELECT {COLUMNS} FROM subscribers WHERE chat_id = ?1"),
                [&chat_id],
                row_to_subscriber,
            )?;
            validate(&row)?;

            debug!("Updated subscriber");
            Ok(true)
        })
        .await
    }

    /// Remove a row. Returns `false` when `chat_id` is absent.
    #[instrument(skip(self))]
    pub async fn delete(&self, chat_id: &str) -> Result<bool, StoreError> {
        let chat_id = chat_id.to_string();

        self.transact(TransactionBehavior::Immediate, move |tx| {
            let deleted = tx.execute("DELETE FROM subscribers WHERE chat_id = ?1", [&chat_id])?;
            debug!(deleted = deleted > 0, "Deleted subscriber");
            Ok(deleted > 0)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn exists(&self, chat_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(chat_id).await?.is_some())
    }

    /// Fetch a single subscriber by chat id.
    pub async fn get(&self, chat_id: &str) -> Result<Option<Subscriber>, StoreError> {
        let chat_id = chat_id.to_string();

        self.transact(TransactionBehavior::Deferred, move |tx| {
            Ok(tx
                .query_row(
                    &format!("SELECT {COLUMNS} FROM subscribers WHERE chat_id = ?1"),
                    [&chat_id],
                    row_to_subscriber,
                )
                .optional()?)
        })
        .await
    }
}

fn validate(subscriber: &Subscriber) -> Result<(), StoreError> {
    subscriber.validate().map_err(|reason| StoreError::InvalidSubscriber {
        chat_id: subscriber.chat_id.clone(),
        reason,
    })
}

fn row_to_subscriber(row: &Row<'_>) -> Result<Subscriber, rusqlite::Error> {
    Ok(Subscriber {
        chat_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        agreement: row.get(3)?,
        subscription: row.get(4)?,
        active: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, UserStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = UserStore::open(dir.path().join("subscribers.db"));
        (dir, store)
    }

    fn inactive(chat_id: &str) -> Subscriber {
        Subscriber {
            chat_id: chat_id.to_string(),
            latitude: None,
            longitude: None,
            agreement: false,
            subscription: false,
            active: true,
        }
    }

    #[tokio::test]
    async fn insert_then_read_by_chat_id_roundtrip() {
        let (_dir, store) = store();
        let sub = Subscriber::subscribed("1001", 50.85, 4.35);
        store.insert(&sub).await.unwrap();
        store.insert(&inactive("1002")).await.unwrap();

        let rows = store
            .read(&Fields::new().with(SubscriberField::ChatId, "1001"))
            .await
            .unwrap();
        assert_eq!(rows, vec![sub]);
    }

    #[tokio::test]
    async fn exists_before_and_after_insert() {
        let (_dir, store) = store();
        assert!(!store.exists("7").await.unwrap());

        store.insert(&inactive("7")).await.unwrap();
        assert!(store.exists("7").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_row_and_tolerates_missing() {
        let (_dir, store) = store();
        store.insert(&inactive("7")).await.unwrap();

        assert!(store.delete("7").await.unwrap());
        assert!(!store.exists("7").await.unwrap());
        assert!(!store.delete("7").await.unwrap());
        assert!(!store.delete("never-seen").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_store_error() {
        let (_dir, store) = store();
        store.insert(&inactive("7")).await.unwrap();

        let err = store.insert(&inactive("7")).await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[tokio::test]
    async fn insert_rejects_subscription_without_coordinates() {
        let (_dir, store) = store();
        let mut sub = Subscriber::subscribed("7", 1.0, 2.0);
        sub.longitude = None;

        let err = store.insert(&sub).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSubscriber { .. }));
        assert!(!store.exists("7").await.unwrap());
    }

    #[tokio::test]
    async fn empty_filter_reads_all_rows_in_chat_id_order() {
        let (_dir, store) = store();
        for id in ["3", "1", "2"] {
            store.insert(&inactive(id)).await.unwrap();
        }

        let ids: Vec<String> =
            store.read(&Fields::new()).await.unwrap().into_iter().map(|s| s.chat_id).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn filters_are_a_conjunction() {
        let (_dir, store) = store();
        store.insert(&Subscriber::subscribed("1", 1.0, 1.0)).await.unwrap();
        let mut paused = Subscriber::subscribed("2", 2.0, 2.0);
        paused.active = false;
        store.insert(&paused).await.unwrap();
        store.insert(&inactive("3")).await.unwrap();

        let filter = Fields::new()
            .with(SubscriberField::Agreement, true)
            .with(SubscriberField::Subscription, true)
            .with(SubscriberField::Active, true);
        let rows = store.read(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chat_id, "1");

        let no_location = store
            .read(&Fields::new().with(SubscriberField::Latitude, None::<f64>))
            .await
            .unwrap();
        assert_eq!(no_location.len(), 1);
        assert_eq!(no_location[0].chat_id, "3");
    }

    #[tokio::test]
    async fn update_sets_fields_and_reports_missing_rows() {
        let (_dir, store) = store();
        store.insert(&Subscriber::subscribed("1", 1.0, 1.0)).await.unwrap();

        let changed = store
            .update("1", &Fields::new().with(SubscriberField::Subscription, false))
            .await
            .unwrap();
        assert!(changed);
        let row = store.get("1").await.unwrap().unwrap();
        assert!(!row.subscription);
        assert_eq!(row.coordinates(), Some((1.0, 1.0)));

        let changed = store
            .update("absent", &Fields::new().with(SubscriberField::Active, false))
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn update_that_breaks_invariant_is_rolled_back() {
        let (_dir, store) = store();
        store.insert(&Subscriber::subscribed("1", 1.0, 1.0)).await.unwrap();

        let err = store
            .update("1", &Fields::new().with(SubscriberField::Latitude, None::<f64>))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSubscriber { .. }));
        assert_eq!(store.get("1").await.unwrap().unwrap().latitude, Some(1.0));
    }

    #[tokio::test]
    async fn update_rejects_chat_id_and_mistyped_values() {
        let (_dir, store) = store();
        store.insert(&inactive("1")).await.unwrap();

        let err = store
            .update("1", &Fields::new().with(SubscriberField::ChatId, "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyField("chat_id")));

        let err = store
            .update("1", &Fields::new().with(SubscriberField::Active, "yes"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FieldType { field: "active", .. }));
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let (_dir, store) = store();
        store.insert(&inactive("1")).await.unwrap();
        store.upsert(&Subscriber::subscribed("1", 3.0, 4.0)).await.unwrap();

        let row = store.get("1").await.unwrap().unwrap();
        assert_eq!(row, Subscriber::subscribed("1", 3.0, 4.0));
        assert_eq!(store.read(&Fields::new()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_writers_wait_for_the_lock() {
        let (_dir, store) = store();

        let writes: Vec<_> = (0..200)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.upsert(&Subscriber::subscribed(i.to_string(), 1.0, 2.0)).await
                })
            })
            .collect();

        for write in writes {
            write.await.unwrap().unwrap();
        }
        assert_eq!(store.read(&Fields::new()).await.unwrap().len(), 200);
    }

    #[test]
    fn field_names_come_from_allow_list() {
        for field in SubscriberField::all() {
            assert_eq!(field.column().parse::<SubscriberField>().unwrap(), *field);
        }

        let err = "chat_id; DROP TABLE subscribers".parse::<SubscriberField>().unwrap_err();
        assert!(matches!(err, StoreError::UnknownField(_)));
        assert!(Fields::parse([("username", FieldValue::from("x"))]).is_err());
    }

    #[test]
    fn fields_replace_duplicate_keys() {
        let fields = Fields::new()
            .with(SubscriberField::Active, true)
            .with(SubscriberField::Active, false);
        assert_eq!(fields.iter().count(), 1);
        assert_eq!(fields.iter().next().unwrap().1, FieldValue::Bool(false));
    }

    #[test]
    fn where_clause_uses_placeholders_only() {
        let fields = Fields::parse([
            ("chat_id", FieldValue::from("1' OR '1'='1")),
            ("latitude", FieldValue::Real(None)),
        ])
        .unwrap();
        let (clause, values) = fields.where_clause();
        assert_eq!(clause, " WHERE chat_id = ? AND latitude IS NULL");
        assert_eq!(values.len(), 1);
    }
}
