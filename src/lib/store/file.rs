use crate::document::Document;
use crate::error::Error;
use crate::store::{DocumentStore, MemoryStore, Namespace, SortOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SNAPSHOT_EXTENSION: &str = "json";
const JOURNAL_EXTENSION: &str = "journal";

/// Mutation appended to a collection journal, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Insert {
        documents: Vec<Document>,
    },
    Replace {
        filter: Document,
        document: Document,
        upsert: bool,
    },
    Delete {
        filter: Document,
    },
}

/// Durable document sink keeping a snapshot and a journal per collection.
///
/// Reads are served from memory. Every mutation appends one line to the
/// collection journal before returning. Opening the store replays journals
/// over their snapshots and compacts them into new snapshots.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
    memory: MemoryStore,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Opens the store at `root`, loading every collection found in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let store = Self {
            root: Arc::new(root.into()),
            memory: MemoryStore::new(),
            write_lock: Arc::new(Mutex::new(())),
        };

        fs::create_dir_all(store.root.as_path()).await?;

        let mut journals = BTreeSet::new();
        let mut databases = fs::read_dir(store.root.as_path()).await?;

        while let Some(database) = databases.next_entry().await? {
            if !database.file_type().await?.is_dir() {
                continue;
            }

            let database_name = database.file_name().to_string_lossy().into_owned();
            let mut collections = fs::read_dir(database.path()).await?;

            while let Some(collection) = collections.next_entry().await? {
                let path = collection.path();
                let collection_name = match path.file_stem().and_then(|value| value.to_str()) {
                    Some(name) => name.to_owned(),
                    None => continue,
                };
                let namespace = Namespace::new(&database_name, collection_name);

                match path.extension().and_then(|value| value.to_str()) {
                    Some(SNAPSHOT_EXTENSION) => {
                        let documents: Vec<Document> =
                            serde_json::from_slice(&fs::read(&path).await?)?;
                        debug!(collection = %namespace, documents = documents.len(), "loaded snapshot");
                        store.memory.load_collection(&namespace, documents).await;
                    }
                    Some(JOURNAL_EXTENSION) => {
                        journals.insert(namespace);
                    }
                    _ => {}
                }
            }
        }

        for namespace in journals {
            store.replay(&namespace).await?;
            store.compact(&namespace).await?;
        }

        Ok(store)
    }

    fn collection_path(&self, namespace: &Namespace, extension: &str) -> PathBuf {
        self.root
            .join(namespace.database())
            .join(format!("{}.{extension}", namespace.collection()))
    }

    async fn replay(&self, namespace: &Namespace) -> Result<(), Error> {
        let path = self.collection_path(namespace, JOURNAL_EXTENSION);
        let mut lines = BufReader::new(fs::File::open(&path).await?).lines();
        let mut replayed = 0;

        while let Some(line) = lines.next_line().await? {
            let entry = match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entry,
                Err(error) => {
                    // a torn write can only be the last line
                    warn!(collection = %namespace, %error, "journal ends with an unreadable entry");
                    break;
                }
            };

            match entry {
                JournalEntry::Insert { documents } => {
                    self.memory.insert_many(namespace, documents).await?;
                }
                JournalEntry::Replace {
                    filter,
                    document,
                    upsert,
                } => {
                    self.memory
                        .replace_one(namespace, &filter, document, upsert)
                        .await?;
                }
                JournalEntry::Delete { filter } => {
                    self.memory.delete_one(namespace, &filter).await?;
                }
            }
            replayed += 1;
        }

        debug!(collection = %namespace, replayed, "replayed journal");
        Ok(())
    }

    /// Writes the collection snapshot and starts an empty journal.
    async fn compact(&self, namespace: &Namespace) -> Result<(), Error> {
        let path = self.collection_path(namespace, SNAPSHOT_EXTENSION);
        let temporary = path.with_extension("tmp");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let documents = self.memory.documents(namespace).await;
        fs::write(&temporary, serde_json::to_vec(&documents)?).await?;
        fs::rename(&temporary, &path).await?;
        remove_if_exists(&self.collection_path(namespace, JOURNAL_EXTENSION)).await
    }

    async fn append(&self, namespace: &Namespace, entry: &JournalEntry) -> Result<(), Error> {
        let path = self.collection_path(namespace, JOURNAL_EXTENSION);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        journal.write_all(&line).await?;
        journal.flush().await?;

        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(Error::Io(error)),
    }
}

impl DocumentStore for FileStore {
    async fn ensure_collection(&self, namespace: &Namespace) -> Result<bool, Error> {
        let _guard = self.write_lock.lock().await;
        let created = self.memory.ensure_collection(namespace).await?;

        if created {
            self.compact(namespace).await?;
        }

        Ok(created)
    }

    async fn insert_one(&self, namespace: &Namespace, document: Document) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let entry = JournalEntry::Insert {
            documents: vec![document.clone()],
        };

        self.memory.insert_one(namespace, document).await?;
        self.append(namespace, &entry).await
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> Result<usize, Error> {
        let _guard = self.write_lock.lock().await;
        let entry = JournalEntry::Insert {
            documents: documents.clone(),
        };

        let inserted = self.memory.insert_many(namespace, documents).await?;
        self.append(namespace, &entry).await?;

        Ok(inserted)
    }

    async fn replace_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        document: Document,
        upsert: bool,
    ) -> Result<u64, Error> {
        let _guard = self.write_lock.lock().await;
        let entry = JournalEntry::Replace {
            filter: filter.clone(),
            document: document.clone(),
            upsert,
        };

        let matched = self
            .memory
            .replace_one(namespace, filter, document, upsert)
            .await?;

        if matched > 0 || upsert {
            self.append(namespace, &entry).await?;
        }

        Ok(matched)
    }

    async fn delete_one(&self, namespace: &Namespace, filter: &Document) -> Result<u64, Error> {
        let _guard = self.write_lock.lock().await;
        let deleted = self.memory.delete_one(namespace, filter).await?;

        if deleted > 0 {
            self.append(
                namespace,
                &JournalEntry::Delete {
                    filter: filter.clone(),
                },
            )
            .await?;
        }

        Ok(deleted)
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<Option<Document>, Error> {
        self.memory.find_one(namespace, filter).await
    }

    async fn find_sorted(
        &self,
        namespace: &Namespace,
        filter: &Document,
        sort_field: &str,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<Document>, Error> {
        self.memory
            .find_sorted(namespace, filter, sort_field, order, limit)
            .await
    }

    async fn count(&self, namespace: &Namespace) -> Result<usize, Error> {
        self.memory.count(namespace).await
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        self.memory.drop_collection(namespace).await?;

        remove_if_exists(&self.collection_path(namespace, SNAPSHOT_EXTENSION)).await?;
        remove_if_exists(&self.collection_path(namespace, JOURNAL_EXTENSION)).await
    }

    async fn drop_database(&self, database: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        self.memory.drop_database(database).await?;

        match fs::remove_dir_all(self.root.join(database)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::Io(error)),
        }
    }

    async fn database_names(&self) -> Result<Vec<String>, Error> {
        self.memory.database_names().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temporary_root(name: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        std::env::temp_dir().join(format!("docsync-{name}-{suffix}"))
    }

    async fn all(store: &FileStore, namespace: &Namespace) -> Result<Vec<Document>, Error> {
        store
            .find_sorted(namespace, &Document::new(), "id", SortOrder::Ascending, 100)
            .await
    }

    #[tokio::test]
    async fn restores_documents_after_reopening() -> Result<(), Error> {
        let root = temporary_root("reopen");
        let namespace = Namespace::new("shop", "orders");

        let store = FileStore::open(&root).await?;
        store
            .insert_many(&namespace, vec![document! {"id" => 1}, document! {"id" => 2}])
            .await?;
        store.delete_one(&namespace, &document! {"id" => 1}).await?;
        store
            .replace_one(&namespace, &document! {"id" => 2}, document! {"id" => 2, "paid" => true}, false)
            .await?;

        let reopened = FileStore::open(&root).await?;

        assert_eq!(
            all(&reopened, &namespace).await?,
            vec![document! {"id" => 2, "paid" => true}]
        );

        fs::remove_dir_all(&root).await?;
        Ok(())
    }

    #[tokio::test]
    async fn appends_mutations_to_journal_and_compacts_on_open() -> Result<(), Error> {
        let root = temporary_root("journal");
        let namespace = Namespace::new("shop", "orders");

        let store = FileStore::open(&root).await?;
        store.ensure_collection(&namespace).await?;
        let snapshot = fs::read(root.join("shop").join("orders.json")).await?;

        for id in 0..50 {
            store.insert_one(&namespace, document! {"id" => id}).await?;
        }

        let journal = fs::read_to_string(root.join("shop").join("orders.journal")).await?;
        assert_eq!(journal.lines().count(), 50);
        assert_eq!(fs::read(root.join("shop").join("orders.json")).await?, snapshot);

        let reopened = FileStore::open(&root).await?;

        assert_eq!(all(&reopened, &namespace).await?.len(), 50);
        assert!(!root.join("shop").join("orders.journal").exists());

        fs::remove_dir_all(&root).await?;
        Ok(())
    }

    #[tokio::test]
    async fn ignores_torn_journal_tail() -> Result<(), Error> {
        let root = temporary_root("torn");
        let namespace = Namespace::new("shop", "orders");

        let store = FileStore::open(&root).await?;
        store.insert_one(&namespace, document! {"id" => 1}).await?;

        let mut journal = OpenOptions::new()
            .append(true)
            .open(root.join("shop").join("orders.journal"))
            .await?;
        journal.write_all(b"{\"op\":\"insert\",\"docu").await?;
        journal.flush().await?;

        let reopened = FileStore::open(&root).await?;

        assert_eq!(all(&reopened, &namespace).await?, vec![document! {"id" => 1}]);

        fs::remove_dir_all(&root).await?;
        Ok(())
    }

    #[tokio::test]
    async fn removes_database_directory_on_drop() -> Result<(), Error> {
        let root = temporary_root("drop");
        let store = FileStore::open(&root).await?;
        store
            .insert_one(&Namespace::new("shop", "orders"), document! {"id" => 1})
            .await?;

        store.drop_database("shop").await?;

        assert!(!root.join("shop").exists());
        assert!(FileStore::open(&root).await?.database_names().await?.is_empty());

        fs::remove_dir_all(&root).await?;
        Ok(())
    }
}
