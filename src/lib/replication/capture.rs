use crate::applier::QueueNotice;
use crate::checkpoint::CheckpointStore;
use crate::error::Error;
use crate::queue::ReplicationQueue;
use crate::replication::{ReplicationLog, RowEventSource};
use crate::store::DocumentStore;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

/// Worker moving row mutations from the replication log into the queue.
///
/// Every mutation is enqueued before the checkpoint moves past it, a crash in
/// between replays the mutation on restart.
pub struct ChangeCapture<S> {
    queue: ReplicationQueue<S>,
    checkpoint: CheckpointStore<S>,
    notices: Option<Sender<QueueNotice>>,
}

impl<S> ChangeCapture<S>
where
    S: DocumentStore,
{
    pub fn new(queue: ReplicationQueue<S>, checkpoint: CheckpointStore<S>) -> Self {
        Self {
            queue,
            checkpoint,
            notices: None,
        }
    }

    pub fn with_notices(self, notices: Sender<QueueNotice>) -> Self {
        Self {
            notices: Some(notices),
            ..self
        }
    }

    /// Captures until the log is exhausted, returning the number of enqueued mutations.
    pub async fn run(&self, log: &impl ReplicationLog) -> Result<usize, Error> {
        let start = self.checkpoint.read().await?;

        match &start {
            Some(position) => info!(%position, "resuming capture from checkpoint"),
            None => info!("no checkpoint recorded, capturing from the current end of the log"),
        }

        let mut source = log.open(start).await?;
        let mut captured = 0;

        while let Some(mutation) = source.next_mutation().await? {
            let seqnum = self.queue.enqueue(mutation).await?;
            self.checkpoint.write(source.position()).await?;
            captured += 1;

            if let Some(notices) = &self.notices {
                if let Err(TrySendError::Closed(_)) = notices.try_send(QueueNotice(seqnum)) {
                    debug!(%seqnum, "applier is no longer listening for notices");
                }
            }
        }

        info!(captured, position = %source.position(), "replication log exhausted");
        Ok(captured)
    }
}
