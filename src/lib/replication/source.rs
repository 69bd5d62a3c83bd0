use crate::error::Error;
use crate::event::RowMutation;
use crate::replication::BinlogPosition;
use std::future::Future;

/// Pull-based stream of row mutations read from a replication log.
pub trait RowEventSource: Send {
    /// Next mutation, `None` once the log has no more events to offer.
    fn next_mutation(
        &mut self,
    ) -> impl Future<Output = Result<Option<RowMutation>, Error>> + Send;

    /// Position from which reading resumes without losing a returned mutation.
    fn position(&self) -> &BinlogPosition;
}

/// Opens row event sources at a given position of the log.
pub trait ReplicationLog: Send + Sync {
    type Source: RowEventSource;

    /// Opens the log at `start`, or at its current end when `start` is `None`.
    fn open(
        &self,
        start: Option<BinlogPosition>,
    ) -> impl Future<Output = Result<Self::Source, Error>> + Send;
}
