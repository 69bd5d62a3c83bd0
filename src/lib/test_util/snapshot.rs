use crate::bootstrap::{format_line, SourceSnapshot};
use crate::error::Error;
use crate::replication::BinlogPosition;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

type TableRows = (Vec<String>, Vec<Vec<Option<String>>>);

/// In-process source for the bulk path.
///
/// Positions are handed out in order, the last one repeats forever.
#[derive(Clone)]
pub struct SnapshotStub {
    positions: Arc<Mutex<VecDeque<BinlogPosition>>>,
    tables: HashMap<(String, String), TableRows>,
}

impl SnapshotStub {
    pub fn at(position: BinlogPosition) -> Self {
        Self::with_positions([position])
    }

    pub fn with_positions(positions: impl IntoIterator<Item = BinlogPosition>) -> Self {
        Self {
            positions: Arc::new(Mutex::new(positions.into_iter().collect())),
            tables: HashMap::new(),
        }
    }

    pub fn with_table(
        mut self,
        db: &str,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<Option<&str>>>,
    ) -> Self {
        self.tables.insert(
            (db.to_owned(), table.to_owned()),
            (
                columns.iter().map(|column| column.to_string()).collect(),
                rows.into_iter()
                    .map(|row| row.into_iter().map(|value| value.map(str::to_owned)).collect())
                    .collect(),
            ),
        );
        self
    }
}

impl SourceSnapshot for SnapshotStub {
    async fn current_position(&self) -> Result<BinlogPosition, Error> {
        let mut positions = self.positions.lock().unwrap();

        match positions.len() {
            0 => Err(Error::BinlogPositionMissing),
            1 => Ok(positions[0].clone()),
            _ => Ok(positions.pop_front().unwrap()),
        }
    }

    async fn export_table(&self, db: &str, table: &str, path: &Path) -> Result<u64, Error> {
        let (columns, rows) = self
            .tables
            .get(&(db.to_owned(), table.to_owned()))
            .ok_or_else(|| Error::SchemaNotFound(db.to_owned(), table.to_owned()))?;

        let mut content = format_line(columns.iter().map(|column| Some(column.as_str())));
        for row in rows {
            content.push_str(&format_line(row.iter().map(Option::as_deref)));
        }

        tokio::fs::write(path, content).await?;
        Ok(rows.len() as u64)
    }
}
