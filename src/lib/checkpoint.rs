//! Resumption state: the binlog checkpoint, per-database bootstrap status
//! and the tables loaded by the bulk path.

use crate::document::{Document, FieldValue, ID_FIELD};
use crate::error::Error;
use crate::replication::BinlogPosition;
use crate::store::{collections, DocumentStore, Sink, LAST_LOG_POSITION_ID, NOT_AVAILABLE};
use tracing::{debug, info};

const STATUS_OK: &str = "ok";
const STATUS_KO: &str = "ko";

/// Bootstrap pass whose completion is tracked per database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsePass {
    Schema,
    Data,
}

impl ParsePass {
    fn field(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedStatus {
    pub schema: bool,
    pub data: bool,
}

impl ParsedStatus {
    pub fn is_ready(&self) -> bool {
        self.schema && self.data
    }

    fn from_document(document: &Document) -> Self {
        let is_ok = |field| document.get_str(field) == Some(STATUS_OK);

        Self {
            schema: is_ok(ParsePass::Schema.field()),
            data: is_ok(ParsePass::Data.field()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointStore<S> {
    sink: Sink<S>,
}

impl<S> CheckpointStore<S>
where
    S: DocumentStore,
{
    pub fn new(sink: Sink<S>) -> Self {
        Self { sink }
    }

    /// Last persisted position, `None` when nothing was recorded yet.
    pub async fn read(&self) -> Result<Option<BinlogPosition>, Error> {
        let namespace = self.sink.util_collection(collections::LOG).await?;
        let document = self
            .sink
            .store()
            .find_one(&namespace, &position_filter())
            .await?;

        let document = match document {
            Some(document) => document,
            None => return Ok(None),
        };

        let file = match document.get_str("log_file") {
            Some(NOT_AVAILABLE) | None => return Ok(None),
            Some(file) => file,
        };

        let position = match document.get("log_pos") {
            Some(FieldValue::Int(position)) => u64::try_from(*position).ok(),
            Some(FieldValue::Text(position)) => position.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::MalformedDocument(format!("log_pos is not a position in {file}")))?;

        Ok(Some(BinlogPosition::new(file, position)))
    }

    pub async fn write(&self, position: &BinlogPosition) -> Result<(), Error> {
        let namespace = self.sink.util_collection(collections::LOG).await?;
        debug!(%position, "writing checkpoint");

        self.sink
            .store()
            .replace_one(
                &namespace,
                &position_filter(),
                Document::new()
                    .with("log_file", position.file())
                    .with("log_pos", position.position() as i64),
                true,
            )
            .await?;

        Ok(())
    }

    pub async fn mark_parsed(&self, db: &str, pass: ParsePass) -> Result<(), Error> {
        let namespace = self.sink.util_collection(collections::PARSED).await?;
        let filter = Document::new().with(ID_FIELD, db);
        let mut document = self
            .sink
            .store()
            .find_one(&namespace, &filter)
            .await?
            .unwrap_or_else(|| {
                Document::new()
                    .with("db", db)
                    .with(ParsePass::Schema.field(), STATUS_KO)
                    .with(ParsePass::Data.field(), STATUS_KO)
            });

        document.insert(pass.field(), STATUS_OK);
        self.sink
            .store()
            .replace_one(&namespace, &filter, document, true)
            .await?;

        info!(db, pass = pass.field(), "marked database as parsed");
        Ok(())
    }

    pub async fn parsed_status(&self, db: &str) -> Result<ParsedStatus, Error> {
        let namespace = self.sink.util_collection(collections::PARSED).await?;

        Ok(self
            .sink
            .store()
            .find_one(&namespace, &Document::new().with(ID_FIELD, db))
            .await?
            .map(|document| ParsedStatus::from_document(&document))
            .unwrap_or_default())
    }

    /// Fails unless both bootstrap passes completed for `db`.
    pub async fn ensure_ready(&self, db: &str) -> Result<(), Error> {
        let status = self.parsed_status(db).await?;

        let missing = match (status.schema, status.data) {
            (true, true) => return Ok(()),
            (false, false) => "schema and data",
            (false, true) => "schema",
            (true, false) => "data",
        };

        Err(Error::DatabaseNotParsed {
            db: db.to_owned(),
            missing,
        })
    }

    pub async fn mark_table_loaded(&self, db: &str, table: &str) -> Result<(), Error> {
        let namespace = self.sink.util_collection(collections::PARSED_TABLES).await?;
        let filter = Document::new().with(ID_FIELD, db);
        let mut tables = self.loaded_tables(db).await?;

        if tables.iter().any(|loaded| loaded == table) {
            return Ok(());
        }

        tables.push(table.to_owned());
        self.sink
            .store()
            .replace_one(
                &namespace,
                &filter,
                Document::new().with("database", db).with(
                    "parsed_table",
                    tables.into_iter().map(FieldValue::from).collect::<Vec<_>>(),
                ),
                true,
            )
            .await?;

        Ok(())
    }

    pub async fn loaded_tables(&self, db: &str) -> Result<Vec<String>, Error> {
        let namespace = self.sink.util_collection(collections::PARSED_TABLES).await?;

        Ok(self
            .sink
            .store()
            .find_one(&namespace, &Document::new().with(ID_FIELD, db))
            .await?
            .and_then(|document| {
                document.get("parsed_table").and_then(FieldValue::as_array).map(|tables| {
                    tables
                        .iter()
                        .filter_map(FieldValue::as_str)
                        .map(str::to_owned)
                        .collect()
                })
            })
            .unwrap_or_default())
    }

    /// Fails with the list of `tables` that were not bulk loaded into `db`.
    pub async fn ensure_tables_loaded(&self, db: &str, tables: &[String]) -> Result<(), Error> {
        let loaded = self.loaded_tables(db).await?;
        let missing: Vec<String> = tables
            .iter()
            .filter(|table| !loaded.contains(table))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::TablesNotLoaded(missing))
        }
    }
}

fn position_filter() -> Document {
    Document::new().with(ID_FIELD, LAST_LOG_POSITION_ID)
}
