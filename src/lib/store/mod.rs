mod file;
mod memory;
mod sink;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sink::{collections, Sink, LAST_LOG_POSITION_ID, NOT_AVAILABLE};

use crate::document::Document;
use crate::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;

/// Location of a collection inside the document sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Capabilities consumed from the document sink.
///
/// Filters are matched by equality of every filter field, see [`Document::matches`].
/// Writes into a collection that does not exist yet create it implicitly.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Creates the collection if it is missing, returns `true` when it was created.
    fn ensure_collection(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> impl Future<Output = Result<usize, Error>> + Send;

    /// Replaces the first document matching `filter`, returns number of matched documents.
    ///
    /// With `upsert` the replacement is inserted when nothing matches.
    fn replace_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        document: Document,
        upsert: bool,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Deletes the first document matching `filter`, returns number of deleted documents.
    fn delete_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> impl Future<Output = Result<Option<Document>, Error>> + Send;

    /// Returns up to `limit` documents matching `filter` ordered by `sort_field`.
    fn find_sorted(
        &self,
        namespace: &Namespace,
        filter: &Document,
        sort_field: &str,
        order: SortOrder,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Document>, Error>> + Send;

    fn count(&self, namespace: &Namespace) -> impl Future<Output = Result<usize, Error>> + Send;

    fn drop_collection(
        &self,
        namespace: &Namespace,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn drop_database(&self, database: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn database_names(&self) -> impl Future<Output = Result<Vec<String>, Error>> + Send;
}
