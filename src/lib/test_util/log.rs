use crate::error::Error;
use crate::event::RowMutation;
use crate::replication::{BinlogPosition, ReplicationLog, RowEventSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replication log replaying a fixed list of mutations.
///
/// Every mutation is paired with the position right after it, opening the log
/// at a position skips the mutations at or before it.
#[derive(Clone)]
pub struct ScriptedLog {
    head: BinlogPosition,
    entries: Arc<Vec<(RowMutation, BinlogPosition)>>,
    fail_after: Option<usize>,
    opened_at: Arc<Mutex<Vec<Option<BinlogPosition>>>>,
}

impl ScriptedLog {
    pub fn new(head: BinlogPosition) -> Self {
        Self {
            head,
            entries: Arc::new(Vec::new()),
            fail_after: None,
            opened_at: Arc::default(),
        }
    }

    /// Appends a mutation ending `size` bytes after the previous one.
    pub fn with_mutation(self, mutation: RowMutation, size: u64) -> Self {
        let mut entries = self.entries.as_ref().clone();
        let last = entries
            .last()
            .map(|(_, position)| position.clone())
            .unwrap_or_else(|| self.head.clone());

        let position = last.clone().with_position(last.position() + size);
        entries.push((mutation, position));

        Self {
            entries: Arc::new(entries),
            ..self
        }
    }

    /// Sources fail with a connection error once `count` mutations were returned.
    pub fn failing_after(self, count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..self
        }
    }

    /// Start positions requested from this log, in order.
    pub fn opened_at(&self) -> Vec<Option<BinlogPosition>> {
        self.opened_at.lock().unwrap().clone()
    }

    pub fn end(&self) -> BinlogPosition {
        self.entries
            .last()
            .map(|(_, position)| position.clone())
            .unwrap_or_else(|| self.head.clone())
    }
}

pub struct ScriptedSource {
    position: BinlogPosition,
    pending: VecDeque<(RowMutation, BinlogPosition)>,
    remaining_before_failure: Option<usize>,
}

fn is_after(position: &BinlogPosition, start: &BinlogPosition) -> bool {
    (position.file(), position.position()) > (start.file(), start.position())
}

impl ReplicationLog for ScriptedLog {
    type Source = ScriptedSource;

    async fn open(&self, start: Option<BinlogPosition>) -> Result<Self::Source, Error> {
        self.opened_at.lock().unwrap().push(start.clone());

        let (position, pending) = match start {
            Some(start) => (
                start.clone(),
                self.entries
                    .iter()
                    .filter(|(_, position)| is_after(position, &start))
                    .cloned()
                    .collect(),
            ),
            None => (self.end(), VecDeque::new()),
        };

        Ok(ScriptedSource {
            position,
            pending,
            remaining_before_failure: self.fail_after,
        })
    }
}

impl RowEventSource for ScriptedSource {
    async fn next_mutation(&mut self) -> Result<Option<RowMutation>, Error> {
        match self.remaining_before_failure {
            Some(0) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "replication connection lost",
                )))
            }
            Some(ref mut remaining) => *remaining -= 1,
            None => {}
        }

        Ok(self.pending.pop_front().map(|(mutation, position)| {
            self.position = position;
            mutation
        }))
    }

    fn position(&self) -> &BinlogPosition {
        &self.position
    }
}
