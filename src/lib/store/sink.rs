use crate::document::{Document, FieldValue, ID_FIELD};
use crate::error::Error;
use crate::store::{DocumentStore, Namespace};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Collections kept in the utility database.
pub mod collections {
    pub const PRIMARY_KEYS: &str = "primary_keys";
    pub const QUEUE: &str = "replicator_queue";
    pub const LOG: &str = "mysqllog";
    pub const PARSED: &str = "parsed_db";
    pub const PARSED_TABLES: &str = "parsed_tables";
    pub const COUNTERS: &str = "counters";
}

pub const NOT_AVAILABLE: &str = "NA";
pub const LAST_LOG_POSITION_ID: &str = "last_log_pos";

const COUNTER_IDS: [&str; 3] = ["insert_seq", "update_seq", "delete_seq"];

/// Document store together with the bookkeeping of the utility database.
///
/// Bookkeeping collections receive their seed documents the first time they
/// are created, each collection is checked once per handle.
#[derive(Debug, Clone)]
pub struct Sink<S> {
    store: S,
    util_database: Arc<str>,
    checked: Arc<Mutex<HashSet<Namespace>>>,
}

impl<S> Sink<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, util_database: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            util_database: util_database.into(),
            checked: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn util_database(&self) -> &str {
        &self.util_database
    }

    /// Returns the namespace of `collection` in `database`, creating it when missing.
    pub async fn collection(
        &self,
        database: impl AsRef<str>,
        collection: impl AsRef<str>,
    ) -> Result<Namespace, Error> {
        let namespace = Namespace::new(database.as_ref(), collection.as_ref());
        let mut checked = self.checked.lock().await;

        if checked.contains(&namespace) {
            return Ok(namespace);
        }

        if self.store.ensure_collection(&namespace).await? {
            info!(collection = %namespace, "created collection");
            self.seed(&namespace).await?;
        }

        checked.insert(namespace.clone());
        Ok(namespace)
    }

    pub async fn util_collection(&self, collection: impl AsRef<str>) -> Result<Namespace, Error> {
        self.collection(self.util_database.as_ref(), collection)
            .await
    }

    /// Drops a whole database, forgetting which of its collections were checked.
    pub async fn drop_database(&self, database: &str) -> Result<(), Error> {
        let mut checked = self.checked.lock().await;

        self.store.drop_database(database).await?;
        checked.retain(|namespace| namespace.database() != database);

        Ok(())
    }

    /// Increments one of the seeded counters and returns its new value.
    pub async fn increment_counter(&self, counter: &str) -> Result<i64, Error> {
        let namespace = self.util_collection(collections::COUNTERS).await?;
        let filter = Document::new().with(ID_FIELD, counter);

        let current = self
            .store
            .find_one(&namespace, &filter)
            .await?
            .and_then(|document| document.get_i64("num"))
            .unwrap_or(0);

        self.store
            .replace_one(
                &namespace,
                &filter,
                Document::new().with("num", current + 1),
                true,
            )
            .await?;

        Ok(current + 1)
    }

    async fn seed(&self, namespace: &Namespace) -> Result<(), Error> {
        if namespace.database() != self.util_database.as_ref() {
            return Ok(());
        }

        match namespace.collection() {
            collections::COUNTERS => {
                for counter in COUNTER_IDS {
                    self.store
                        .insert_one(
                            namespace,
                            Document::new().with(ID_FIELD, counter).with("num", 0),
                        )
                        .await?;
                }
            }
            collections::LOG => {
                self.store
                    .insert_one(
                        namespace,
                        Document::new()
                            .with(ID_FIELD, LAST_LOG_POSITION_ID)
                            .with("log_file", NOT_AVAILABLE)
                            .with("log_pos", FieldValue::from(NOT_AVAILABLE)),
                    )
                    .await?;
            }
            _ => {}
        }

        Ok(())
    }
}
