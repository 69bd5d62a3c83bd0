//! Worker draining the replication queue into per-table sink collections.

use crate::catalog::SchemaCatalog;
use crate::document::Document;
use crate::error::Error;
use crate::event::RowChange;
use crate::queue::{ChangeEvent, ReplicationQueue, SeqNum};
use crate::store::{DocumentStore, Sink};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pause before checking the queue again while the capture is known to be ahead.
const BEHIND_RETRY: Duration = Duration::from_millis(100);

/// Which entries of a drained batch are removed from the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcknowledgePolicy {
    /// Every dequeued entry, including the ones that failed to apply.
    #[default]
    Batch,
    /// Only entries that were applied successfully.
    Applied,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApplierConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub idle_interval: Duration,
    pub acknowledge: AcknowledgePolicy,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            idle_interval: Duration::from_secs(1),
            acknowledge: AcknowledgePolicy::Batch,
        }
    }
}

/// Sent by the capture worker after each successful enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueNotice(pub SeqNum);

#[derive(Debug, Default)]
struct ApplierState {
    last_seqnum: Option<SeqNum>,
    /// Highest sequence number announced by a notice.
    notified: Option<SeqNum>,
    /// Highest sequence number read from the queue, applied or not.
    dequeued: Option<SeqNum>,
    should_run: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dequeued: usize,
    pub applied: usize,
    pub failed: usize,
    pub acknowledged: usize,
}

#[derive(Clone)]
pub struct Applier<S> {
    sink: Sink<S>,
    queue: ReplicationQueue<S>,
    catalog: SchemaCatalog<S>,
    config: ApplierConfig,
    state: Arc<Mutex<ApplierState>>,
}

impl<S> Applier<S>
where
    S: DocumentStore,
{
    pub fn new(
        sink: Sink<S>,
        queue: ReplicationQueue<S>,
        catalog: SchemaCatalog<S>,
        config: ApplierConfig,
    ) -> Self {
        Self {
            sink,
            queue,
            catalog,
            config,
            state: Arc::new(Mutex::new(ApplierState::default())),
        }
    }

    /// Sequence number of the last applied event.
    pub async fn watermark(&self) -> Option<SeqNum> {
        self.state.lock().await.last_seqnum
    }

    /// Whether a notice announced an event above the watermark.
    pub async fn should_run(&self) -> bool {
        self.state.lock().await.should_run
    }

    /// Applies one batch from the head of the queue.
    pub async fn drain_once(&self) -> Result<DrainReport, Error> {
        let batch = self.queue.dequeue_batch(self.config.batch_size).await?;
        let mut report = DrainReport {
            dequeued: batch.len(),
            ..DrainReport::default()
        };
        let mut acknowledged = Vec::with_capacity(batch.len());

        if let Some(last) = batch.last() {
            let mut state = self.state.lock().await;
            state.dequeued = state.dequeued.max(Some(last.seqnum));
        }

        for event in batch {
            match self.apply(&event).await {
                Ok(()) => {
                    report.applied += 1;
                    self.state.lock().await.last_seqnum = Some(event.seqnum);
                    acknowledged.push(event.seqnum);
                }
                Err(error) => {
                    report.failed += 1;
                    error!(
                        seqnum = %event.seqnum,
                        schema = event.schema(),
                        table = event.table(),
                        %error,
                        "failed to apply change"
                    );

                    if self.config.acknowledge == AcknowledgePolicy::Batch {
                        acknowledged.push(event.seqnum);
                    }
                }
            }
        }

        for seqnum in acknowledged {
            self.queue.acknowledge(seqnum).await?;
            report.acknowledged += 1;
        }

        if report.dequeued == 0 {
            let mut state = self.state.lock().await;

            // a notice raised after the empty read keeps the flag
            if state.notified <= state.dequeued {
                state.should_run = false;
            }
        } else {
            debug!(?report, "drained queue batch");
        }

        Ok(report)
    }

    pub async fn apply(&self, event: &ChangeEvent) -> Result<(), Error> {
        let namespace = self.sink.collection(event.schema(), event.table()).await?;
        let store = self.sink.store();

        let counter = match event.change() {
            RowChange::Insert(values) => {
                store.insert_one(&namespace, values.clone()).await?;
                "insert_seq"
            }
            RowChange::Update { before, after } => {
                let primary_key = self
                    .catalog
                    .list_primary_key(event.schema(), event.table())
                    .await?;

                let filter = if primary_key.is_empty() {
                    before.clone()
                } else {
                    after.select(&primary_key)?
                };

                if store.replace_one(&namespace, &filter, after.clone(), false).await? == 0 {
                    warn!(seqnum = %event.seqnum, collection = %namespace, "update matched no document");
                }
                "update_seq"
            }
            RowChange::Delete(values) => {
                let filter = self.row_filter(event, values).await?;

                if store.delete_one(&namespace, &filter).await? == 0 {
                    warn!(seqnum = %event.seqnum, collection = %namespace, "delete matched no document");
                }
                "delete_seq"
            }
        };

        if let Err(error) = self.sink.increment_counter(counter).await {
            warn!(counter, %error, "failed to update counter");
        }

        Ok(())
    }

    async fn row_filter(&self, event: &ChangeEvent, values: &Document) -> Result<Document, Error> {
        let primary_key = self
            .catalog
            .list_primary_key(event.schema(), event.table())
            .await?;

        if primary_key.is_empty() {
            Ok(values.clone())
        } else {
            values.select(&primary_key)
        }
    }

    /// Runs until a batch fails to be read or acknowledged.
    pub async fn run(self, notices: Receiver<QueueNotice>) -> Result<(), Error> {
        let monitor = tokio::spawn(monitor(self.state.clone(), notices));
        info!(batch_size = self.config.batch_size, "applier started");

        let result = self.run_loop().await;
        monitor.abort();
        result
    }

    async fn run_loop(&self) -> Result<(), Error> {
        loop {
            let report = self.drain_once().await?;

            let pause = match (report.dequeued, self.should_run().await) {
                (0, true) => BEHIND_RETRY,
                (0, false) => self.config.idle_interval,
                _ => self.config.poll_interval,
            };

            sleep(pause).await;
        }
    }
}

/// Raises the run flag whenever a notice is above the watermark.
async fn monitor(state: Arc<Mutex<ApplierState>>, mut notices: Receiver<QueueNotice>) {
    while let Some(QueueNotice(seqnum)) = notices.recv().await {
        let mut state = state.lock().await;
        state.notified = state.notified.max(Some(seqnum));

        if state.last_seqnum.map_or(true, |last| seqnum > last) {
            state.should_run = true;
        }
    }

    debug!("notice channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaRecord;
    use crate::event::RowMutation;
    use crate::store::{MemoryStore, Namespace};
    use tokio::sync::mpsc::channel;

    struct Fixture {
        store: MemoryStore,
        queue: ReplicationQueue<MemoryStore>,
        applier: Applier<MemoryStore>,
    }

    async fn fixture(acknowledge: AcknowledgePolicy) -> Fixture {
        let store = MemoryStore::new();
        let sink = Sink::new(store.clone(), "util");
        let queue = ReplicationQueue::open(sink.clone()).await.unwrap();
        let catalog = SchemaCatalog::new(sink.clone());
        catalog
            .put(&SchemaRecord::new("shop", "orders").with_primary_key("id"))
            .await
            .unwrap();

        Fixture {
            store,
            applier: Applier::new(
                sink,
                queue.clone(),
                catalog,
                ApplierConfig {
                    acknowledge,
                    ..ApplierConfig::default()
                },
            ),
            queue,
        }
    }

    fn orders() -> Namespace {
        Namespace::new("shop", "orders")
    }

    #[tokio::test]
    async fn applies_update_by_primary_key() -> Result<(), Error> {
        let Fixture {
            store,
            queue,
            applier,
        } = fixture(AcknowledgePolicy::Batch).await;
        store
            .insert_one(&orders(), document! {"id" => 5, "status" => "new"})
            .await?;

        queue
            .enqueue(RowMutation::update(
                "shop",
                "orders",
                document! {"id" => 5, "status" => "new"},
                document! {"id" => 5, "status" => "paid"},
            ))
            .await?;

        let report = applier.drain_once().await?;

        assert_eq!(
            store.documents(&orders()).await,
            vec![document! {"id" => 5, "status" => "paid"}]
        );
        assert_eq!(report.applied, 1);
        assert_eq!(queue.pending().await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn deletes_by_full_row_without_primary_key() -> Result<(), Error> {
        let Fixture {
            store,
            queue,
            applier,
        } = fixture(AcknowledgePolicy::Batch).await;
        let logs = Namespace::new("shop", "logs");
        store
            .insert_many(
                &logs,
                vec![
                    document! {"msg" => "a", "at" => 1},
                    document! {"msg" => "b", "at" => 1},
                ],
            )
            .await?;

        queue
            .enqueue(RowMutation::delete(
                "shop",
                "logs",
                document! {"msg" => "a", "at" => 1},
            ))
            .await?;
        applier.drain_once().await?;

        assert_eq!(
            store.documents(&logs).await,
            vec![document! {"msg" => "b", "at" => 1}]
        );

        Ok(())
    }

    #[tokio::test]
    async fn applies_events_in_sequence_order() -> Result<(), Error> {
        let Fixture {
            store,
            queue,
            applier,
        } = fixture(AcknowledgePolicy::Batch).await;

        queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"id" => 1, "v" => "a"}))
            .await?;
        queue
            .enqueue(RowMutation::update(
                "shop",
                "orders",
                document! {"id" => 1, "v" => "a"},
                document! {"id" => 1, "v" => "b"},
            ))
            .await?;
        let last = queue
            .enqueue(RowMutation::delete("shop", "orders", document! {"id" => 1, "v" => "b"}))
            .await?;

        applier.drain_once().await?;

        assert_eq!(store.documents(&orders()).await, vec![]);
        assert_eq!(applier.watermark().await, Some(last));

        Ok(())
    }

    #[tokio::test]
    async fn removes_failed_entries_with_batch_acknowledgement() -> Result<(), Error> {
        let Fixture {
            store,
            queue,
            applier,
        } = fixture(AcknowledgePolicy::Batch).await;
        store.insert_one(&orders(), document! {"_id" => 1, "id" => 1}).await?;

        queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"_id" => 1, "id" => 1}))
            .await?;
        queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"id" => 2}))
            .await?;

        let report = applier.drain_once().await?;

        assert_eq!(
            report,
            DrainReport {
                dequeued: 2,
                applied: 1,
                failed: 1,
                acknowledged: 2
            }
        );
        assert_eq!(queue.pending().await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn keeps_failed_entries_with_applied_acknowledgement() -> Result<(), Error> {
        let Fixture {
            store,
            queue,
            applier,
        } = fixture(AcknowledgePolicy::Applied).await;
        store.insert_one(&orders(), document! {"_id" => 1, "id" => 1}).await?;

        let failing = queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"_id" => 1, "id" => 1}))
            .await?;

        applier.drain_once().await?;

        assert_eq!(queue.dequeue_batch(10).await?[0].seqnum, failing);

        Ok(())
    }

    #[tokio::test]
    async fn counts_applied_events_by_kind() -> Result<(), Error> {
        let Fixture { store, queue, applier } = fixture(AcknowledgePolicy::Batch).await;

        queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"id" => 1}))
            .await?;
        applier.drain_once().await?;

        let counters = store
            .documents(&Namespace::new("util", "counters"))
            .await;

        assert!(counters.contains(&document! {"_id" => "insert_seq", "num" => 1}));

        Ok(())
    }

    #[tokio::test]
    async fn monitor_raises_flag_for_events_above_watermark() -> Result<(), Error> {
        let Fixture { applier, .. } = fixture(AcknowledgePolicy::Batch).await;
        let (sender, receiver) = channel(4);

        applier.state.lock().await.last_seqnum = Some(SeqNum::new(10));
        sender.send(QueueNotice(SeqNum::new(5))).await.unwrap();
        drop(sender);
        monitor(applier.state.clone(), receiver).await;
        assert!(!applier.should_run().await);

        let (sender, receiver) = channel(4);
        sender.send(QueueNotice(SeqNum::new(11))).await.unwrap();
        drop(sender);
        monitor(applier.state.clone(), receiver).await;
        assert!(applier.should_run().await);

        Ok(())
    }

    #[tokio::test]
    async fn keeps_flag_for_notice_not_yet_read_from_queue() -> Result<(), Error> {
        let Fixture { queue, applier, .. } = fixture(AcknowledgePolicy::Batch).await;
        let (sender, receiver) = channel(4);

        sender.send(QueueNotice(SeqNum::new(1))).await.unwrap();
        drop(sender);
        monitor(applier.state.clone(), receiver).await;

        assert_eq!(applier.drain_once().await?.dequeued, 0);
        assert!(applier.should_run().await);

        queue
            .enqueue(RowMutation::insert("shop", "orders", document! {"id" => 1}))
            .await?;
        assert_eq!(applier.drain_once().await?.applied, 1);
        assert_eq!(applier.drain_once().await?.dequeued, 0);
        assert!(!applier.should_run().await);

        Ok(())
    }
}
