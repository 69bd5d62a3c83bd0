use crate::database::Database;
use crate::document::Document;
use crate::error::Error;
use crate::event::RowMutation;
use crate::replication::columns::ColumnNames;
use crate::replication::value::normalize;
use crate::replication::{BinlogPosition, ReplicationLog, RowEventSource};
use mysql_async::BinlogStream;
use mysql_common::binlog::consts::EventType;
use mysql_common::binlog::events::{Event, EventData, RotateEvent};
use mysql_common::binlog::row::BinlogRow;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// When the reported position moves past a rows event carrying several rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// After the last row of the event was handed out.
    #[default]
    Event,
    /// Right after the first row was handed out, remaining rows of the event
    /// are lost when the process stops before they are enqueued.
    Row,
}

/// Rows decoded from one event, waiting to be handed out.
#[derive(Debug, Default)]
struct PendingRows {
    mode: CheckpointMode,
    rows: VecDeque<RowMutation>,
    position: Option<BinlogPosition>,
}

impl PendingRows {
    fn new(mode: CheckpointMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Queues the rows of an event ending at `next`, returns the position
    /// the source moves to right away.
    fn push(
        &mut self,
        rows: impl IntoIterator<Item = RowMutation>,
        next: BinlogPosition,
    ) -> Option<BinlogPosition> {
        self.rows.extend(rows);

        match (self.mode, self.rows.is_empty()) {
            (CheckpointMode::Event, false) => {
                self.position = Some(next);
                None
            }
            _ => Some(next),
        }
    }

    /// Next row with the position reached once it is handed out.
    fn pop(&mut self) -> Option<(RowMutation, Option<BinlogPosition>)> {
        let row = self.rows.pop_front()?;
        let position = match self.rows.is_empty() {
            true => self.position.take(),
            false => None,
        };

        Some((row, position))
    }
}

/// Binary log of the source server, restricted to a set of databases.
#[derive(Clone, Debug)]
pub struct BinlogLog {
    database: Database,
    databases: Arc<[String]>,
    checkpoint: CheckpointMode,
}

impl BinlogLog {
    pub fn new(database: Database, databases: impl Into<Arc<[String]>>) -> Self {
        Self {
            database,
            databases: databases.into(),
            checkpoint: CheckpointMode::default(),
        }
    }

    pub fn with_checkpoint_mode(self, checkpoint: CheckpointMode) -> Self {
        Self { checkpoint, ..self }
    }
}

impl ReplicationLog for BinlogLog {
    type Source = BinlogEventSource;

    async fn open(&self, start: Option<BinlogPosition>) -> Result<BinlogEventSource, Error> {
        let position = match start {
            Some(position) => position,
            None => self.database.binlog_position().await?,
        };

        info!(%position, checkpoint = ?self.checkpoint, "opening binlog stream");

        let stream = self.database.binlog_stream(&position).await?;
        let mut columns = ColumnNames::default();
        columns
            .populate(
                &mut self.database.acquire_connection().await?,
                &self.databases,
            )
            .await?;

        Ok(BinlogEventSource {
            database: self.database.clone(),
            databases: self.databases.clone(),
            stream,
            columns,
            position,
            pending: PendingRows::new(self.checkpoint),
        })
    }
}

pub struct BinlogEventSource {
    database: Database,
    databases: Arc<[String]>,
    stream: BinlogStream,
    columns: ColumnNames,
    position: BinlogPosition,
    pending: PendingRows,
}

impl RowEventSource for BinlogEventSource {
    async fn next_mutation(&mut self) -> Result<Option<RowMutation>, Error> {
        loop {
            if let Some((mutation, position)) = self.pending.pop() {
                if let Some(position) = position {
                    self.position = position;
                }

                return Ok(Some(mutation));
            }

            let event = match self.stream.next().await {
                Some(event) => event?,
                None => return Ok(None),
            };

            self.process_event(event).await?;
        }
    }

    fn position(&self) -> &BinlogPosition {
        &self.position
    }
}

impl BinlogEventSource {
    async fn process_event(&mut self, event: Event) -> Result<(), Error> {
        match event.header().event_type() {
            Ok(
                EventType::DELETE_ROWS_EVENT
                | EventType::WRITE_ROWS_EVENT
                | EventType::UPDATE_ROWS_EVENT
                | EventType::PARTIAL_UPDATE_ROWS_EVENT,
            ) => self.process_rows_event(event).await,
            Ok(EventType::ROTATE_EVENT) => {
                let rotate_event: RotateEvent = event.read_event()?;

                self.position = self
                    .position
                    .clone()
                    .with_file(rotate_event.name())
                    .with_position(rotate_event.position());
                debug!(position = %self.position, "binlog rotated");

                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn process_rows_event(&mut self, event: Event) -> Result<(), Error> {
        let next_position = self
            .position
            .clone()
            .with_position(u64::from(event.header().log_pos()));

        let (db, table, rows) = match event.read_data()? {
            Some(EventData::RowsEvent(rows_event)) => {
                let table_map = match self.stream.get_tme(rows_event.table_id()) {
                    Some(table_map) => table_map,
                    None => {
                        warn!(table_id = rows_event.table_id(), "rows event without table map");
                        return Ok(());
                    }
                };

                let db = table_map.database_name().into_owned();
                if !self.databases.contains(&db) {
                    self.position = next_position;
                    return Ok(());
                }

                let rows = rows_event
                    .rows(table_map)
                    .collect::<Result<Vec<(Option<BinlogRow>, Option<BinlogRow>)>, _>>()?;

                (db, table_map.table_name().into_owned(), rows)
            }
            _ => return Ok(()),
        };

        if !self.columns.has_table(&db, &table) {
            debug!(db, table, "reloading column names");
            self.columns
                .populate(&mut self.database.acquire_connection().await?, &self.databases)
                .await?;
        }

        let mut mutations = Vec::with_capacity(rows.len());

        for row in rows {
            let mutation = match row {
                (None, Some(after)) => {
                    RowMutation::insert(&db, &table, self.row_document(&db, &table, &after))
                }
                (Some(before), None) => {
                    RowMutation::delete(&db, &table, self.row_document(&db, &table, &before))
                }
                (Some(before), Some(after)) => RowMutation::update(
                    &db,
                    &table,
                    self.row_document(&db, &table, &before),
                    self.row_document(&db, &table, &after),
                ),
                (None, None) => continue,
            };

            mutations.push(mutation);
        }

        if let Some(position) = self.pending.push(mutations, next_position) {
            self.position = position;
        }

        Ok(())
    }

    fn row_document(&self, db: &str, table: &str, row: &BinlogRow) -> Document {
        row.columns_ref()
            .iter()
            .enumerate()
            .filter_map(|(index, column)| {
                let value = row.as_ref(index)?;
                let name = column.name_str();

                let name = match name.is_empty() {
                    false => name.into_owned(),
                    true => self
                        .columns
                        .column_name(db, table, index)
                        .map(str::to_owned)
                        .unwrap_or_else(|| format!("column_{index}")),
                };

                Some((name, normalize(value, column.column_type())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<RowMutation> {
        (1..=3)
            .map(|id| RowMutation::insert("shop", "orders", document! {"id" => id}))
            .collect()
    }

    fn end() -> BinlogPosition {
        BinlogPosition::new("bin.000001", 900)
    }

    #[test]
    fn holds_position_until_last_row_of_event() {
        let mut pending = PendingRows::new(CheckpointMode::Event);

        assert_eq!(pending.push(rows(), end()), None);
        assert_eq!(pending.pop().map(|(_, position)| position), Some(None));
        assert_eq!(pending.pop().map(|(_, position)| position), Some(None));
        assert_eq!(pending.pop().map(|(_, position)| position), Some(Some(end())));
        assert!(pending.pop().is_none());
    }

    #[test]
    fn moves_position_with_first_row_in_row_mode() {
        let mut pending = PendingRows::new(CheckpointMode::Row);

        assert_eq!(pending.push(rows(), end()), Some(end()));
        assert_eq!(pending.pop().map(|(_, position)| position), Some(None));
        assert_eq!(pending.rows.len(), 2);
    }

    #[test]
    fn moves_position_for_event_without_rows() {
        let mut pending = PendingRows::new(CheckpointMode::Event);

        assert_eq!(pending.push(Vec::new(), end()), Some(end()));
        assert!(pending.pop().is_none());
    }
}
