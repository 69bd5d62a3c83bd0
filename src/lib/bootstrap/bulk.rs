use crate::bootstrap::tsv;
use crate::catalog::{SchemaCatalog, SchemaRecord};
use crate::checkpoint::CheckpointStore;
use crate::coercion::coerce_row;
use crate::database::Database;
use crate::error::Error;
use crate::replication::BinlogPosition;
use crate::store::{DocumentStore, Namespace, Sink};
use mysql_async::prelude::Queryable;
use mysql_common::value::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{error, info, warn};

const INSERT_CHUNK: usize = 1000;

/// Source side of the bulk path.
pub trait SourceSnapshot: Send + Sync {
    fn current_position(&self) -> impl Future<Output = Result<BinlogPosition, Error>> + Send;

    /// Writes the table as tab-delimited text and returns the number of rows.
    fn export_table(
        &self,
        db: &str,
        table: &str,
        path: &Path,
    ) -> impl Future<Output = Result<u64, Error>> + Send;
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableLoad {
    Loaded {
        rows: usize,
        failed_rows: usize,
        position: BinlogPosition,
    },
    /// The source moved during the export, the table has to be loaded again.
    SourceChanged {
        before: BinlogPosition,
        after: BinlogPosition,
    },
}

/// Loads whole tables through a tab-delimited export, bypassing the XML dump.
pub struct BulkLoader<S, X> {
    sink: Sink<S>,
    catalog: SchemaCatalog<S>,
    checkpoint: CheckpointStore<S>,
    source: X,
    work_dir: PathBuf,
}

impl<S, X> BulkLoader<S, X>
where
    S: DocumentStore,
    X: SourceSnapshot,
{
    pub fn new(sink: Sink<S>, source: X, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: SchemaCatalog::new(sink.clone()),
            checkpoint: CheckpointStore::new(sink.clone()),
            sink,
            source,
            work_dir: work_dir.into(),
        }
    }

    /// Loads every table and records the shared snapshot as the capture start.
    ///
    /// The checkpoint is only moved when no checkpoint exists yet and all
    /// tables were exported at the same source position.
    pub async fn load_tables(&self, db: &str, tables: &[String]) -> Result<Vec<(String, TableLoad)>, Error> {
        let mut loads = Vec::with_capacity(tables.len());

        for table in tables {
            loads.push((table.clone(), self.load_table(db, table).await?));
        }

        let mut positions = loads.iter().filter_map(|(_, load)| match load {
            TableLoad::Loaded { position, .. } => Some(position),
            TableLoad::SourceChanged { .. } => None,
        });

        if let Some(first) = positions.next() {
            let shared = positions.all(|position| position == first);

            match (shared, self.checkpoint.read().await?) {
                (true, None) => self.checkpoint.write(first).await?,
                (false, None) => {
                    warn!(db, "tables were exported at different positions, checkpoint left unset")
                }
                (_, Some(_)) => {}
            }
        }

        Ok(loads)
    }

    pub async fn load_table(&self, db: &str, table: &str) -> Result<TableLoad, Error> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self.work_dir.join(format!("{db}.{table}.tsv"));

        let before = self.source.current_position().await?;
        let exported = self.source.export_table(db, table, &path).await?;
        let after = self.source.current_position().await?;

        if before != after {
            warn!(db, table, %before, %after, "source changed during export, table must be reloaded");
            remove_export(&path).await;
            return Ok(TableLoad::SourceChanged { before, after });
        }

        let record = match self.catalog.get(db, table).await? {
            Some(record) => record,
            None => {
                warn!(db, table, "no schema record, loading values as text");
                SchemaRecord::new(db, table)
            }
        };

        let namespace = self.sink.collection(db, table).await?;
        self.sink.store().drop_collection(&namespace).await?;

        let (rows, failed_rows) = self.read_export(&path, &record, &namespace).await?;

        remove_export(&path).await;
        self.checkpoint.mark_table_loaded(db, table).await?;
        info!(db, table, exported, rows, failed_rows, "bulk loaded table");

        Ok(TableLoad::Loaded {
            rows,
            failed_rows,
            position: before,
        })
    }

    async fn read_export(
        &self,
        path: &Path,
        record: &SchemaRecord,
        namespace: &Namespace,
    ) -> Result<(usize, usize), Error> {
        let store = self.sink.store();
        let mut lines = BufReader::new(File::open(path).await?).lines();

        let columns: Vec<String> = match lines.next_line().await? {
            Some(header) => tsv::parse_line(&header)
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
            None => return Ok((0, 0)),
        };

        let mut chunk = Vec::with_capacity(INSERT_CHUNK);
        let (mut rows, mut failed_rows) = (0, 0);

        while let Some(line) = lines.next_line().await? {
            let values = tsv::parse_line(&line);

            if values.len() != columns.len() {
                failed_rows += 1;
                error!(table = record.table(), line = %line, "column count does not match the header");
                continue;
            }

            match coerce_row(columns.iter().cloned().zip(values), record.types()) {
                Ok(document) => chunk.push(document),
                Err(error) if !error.is_record_error() => return Err(error),
                Err(error) => {
                    failed_rows += 1;
                    error!(table = record.table(), %error, "skipping exported row");
                }
            }

            if chunk.len() == INSERT_CHUNK {
                rows += store.insert_many(namespace, std::mem::take(&mut chunk)).await?;
            }
        }

        if !chunk.is_empty() {
            rows += store.insert_many(namespace, chunk).await?;
        }

        Ok((rows, failed_rows))
    }
}

async fn remove_export(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), %error, "failed to remove export file");
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Text protocol rendering of a column value, `None` for NULL.
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(value) => Some(value.to_string()),
        Value::UInt(value) => Some(value.to_string()),
        Value::Float(value) => Some(value.to_string()),
        Value::Double(value) => Some(value.to_string()),
        Value::Date(year, month, day, hour, minute, second, _) => Some(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )),
        Value::Time(negative, days, hours, minutes, seconds, _) => Some(format!(
            "{}{:02}:{minutes:02}:{seconds:02}",
            if negative { "-" } else { "" },
            u64::from(days) * 24 + u64::from(hours)
        )),
    }
}

impl SourceSnapshot for Database {
    async fn current_position(&self) -> Result<BinlogPosition, Error> {
        self.binlog_position().await
    }

    async fn export_table(&self, db: &str, table: &str, path: &Path) -> Result<u64, Error> {
        let mut connection = self.acquire_connection().await?;
        let mut result = connection
            .query_iter(format!(
                "SELECT * FROM {}.{}",
                quote_identifier(db),
                quote_identifier(table)
            ))
            .await?;

        let columns: Vec<String> = result
            .columns_ref()
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect();

        let mut output = BufWriter::new(File::create(path).await?);
        output
            .write_all(tsv::format_line(columns.iter().map(|column| Some(column.as_str()))).as_bytes())
            .await?;

        let mut rows = 0;
        while let Some(row) = result.next().await? {
            let values: Vec<Option<String>> = row
                .unwrap_raw()
                .into_iter()
                .map(|value| value.and_then(value_text))
                .collect();
            output
                .write_all(tsv::format_line(values.iter().map(Option::as_deref)).as_bytes())
                .await?;
            rows += 1;
        }

        output.flush().await?;
        Ok(rows)
    }
}
