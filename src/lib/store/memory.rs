use crate::document::{Document, ID_FIELD};
use crate::error::Error;
use crate::store::{DocumentStore, Namespace, SortOrder};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

type Collections = BTreeMap<String, Vec<Document>>;

/// In-memory document sink.
///
/// Cloned handles share the same data. Documents keep insertion order inside
/// a collection, so unsorted reads are deterministic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, Collections>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every document in the collection.
    pub async fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        let inner = self.inner.lock().await;

        inner
            .get(namespace.database())
            .and_then(|database| database.get(namespace.collection()))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) async fn load_collection(&self, namespace: &Namespace, documents: Vec<Document>) {
        let mut inner = self.inner.lock().await;

        inner
            .entry(namespace.database().to_owned())
            .or_default()
            .insert(namespace.collection().to_owned(), documents);
    }
}

fn collection<'a>(
    inner: &'a mut BTreeMap<String, Collections>,
    namespace: &Namespace,
) -> &'a mut Vec<Document> {
    inner
        .entry(namespace.database().to_owned())
        .or_default()
        .entry(namespace.collection().to_owned())
        .or_default()
}

impl DocumentStore for MemoryStore {
    async fn ensure_collection(&self, namespace: &Namespace) -> Result<bool, Error> {
        let mut inner = self.inner.lock().await;
        let database = inner.entry(namespace.database().to_owned()).or_default();

        if database.contains_key(namespace.collection()) {
            return Ok(false);
        }

        database.insert(namespace.collection().to_owned(), Vec::new());
        Ok(true)
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let documents = collection(&mut inner, namespace);

        if let Some(id) = document.get(ID_FIELD) {
            let duplicate = documents
                .iter()
                .any(|existing| existing.get(ID_FIELD) == Some(id));

            if duplicate {
                return Err(Error::Store(format!(
                    "duplicate {ID_FIELD} {id:?} in {namespace}"
                )));
            }
        }

        documents.push(document);
        Ok(())
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> Result<usize, Error> {
        let mut inner = self.inner.lock().await;
        let length = documents.len();

        collection(&mut inner, namespace).extend(documents);
        Ok(length)
    }

    async fn replace_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        mut document: Document,
        upsert: bool,
    ) -> Result<u64, Error> {
        let mut inner = self.inner.lock().await;
        let documents = collection(&mut inner, namespace);

        match documents.iter_mut().find(|existing| existing.matches(filter)) {
            Some(existing) => {
                if !document.contains_field(ID_FIELD) {
                    if let Some(id) = existing.get(ID_FIELD).cloned() {
                        document.insert(ID_FIELD, id);
                    }
                }

                *existing = document;
                Ok(1)
            }
            None if upsert => {
                if !document.contains_field(ID_FIELD) {
                    if let Some(id) = filter.get(ID_FIELD).cloned() {
                        document.insert(ID_FIELD, id);
                    }
                }

                documents.push(document);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, namespace: &Namespace, filter: &Document) -> Result<u64, Error> {
        let mut inner = self.inner.lock().await;
        let documents = collection(&mut inner, namespace);

        match documents.iter().position(|existing| existing.matches(filter)) {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<Option<Document>, Error> {
        let inner = self.inner.lock().await;

        Ok(inner
            .get(namespace.database())
            .and_then(|database| database.get(namespace.collection()))
            .and_then(|documents| documents.iter().find(|document| document.matches(filter)))
            .cloned())
    }

    async fn find_sorted(
        &self,
        namespace: &Namespace,
        filter: &Document,
        sort_field: &str,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<Document>, Error> {
        let inner = self.inner.lock().await;

        let mut documents: Vec<&Document> = inner
            .get(namespace.database())
            .and_then(|database| database.get(namespace.collection()))
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| document.matches(filter))
                    .collect()
            })
            .unwrap_or_default();

        documents.sort_by(|left, right| match (left.get(sort_field), right.get(sort_field)) {
            (Some(left), Some(right)) => left.sort_cmp(right),
            (left, right) => left.is_some().cmp(&right.is_some()),
        });

        if order == SortOrder::Descending {
            documents.reverse();
        }

        Ok(documents.into_iter().take(limit).cloned().collect())
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize, Error> {
        let inner = self.inner.lock().await;

        Ok(inner
            .get(namespace.database())
            .and_then(|database| database.get(namespace.collection()))
            .map_or(0, Vec::len))
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;

        if let Some(database) = inner.get_mut(namespace.database()) {
            database.remove(namespace.collection());
        }

        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), Error> {
        self.inner.lock().await.remove(database);
        Ok(())
    }

    async fn database_names(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.lock().await.keys().cloned().collect())
    }
}
