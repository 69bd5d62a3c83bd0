//! Durable FIFO of captured row changes awaiting application.

use crate::document::{Document, FieldValue, ID_FIELD};
use crate::error::Error;
use crate::event::{RowChange, RowMutation};
use crate::store::{collections, DocumentStore, Namespace, Sink, SortOrder};
use chrono::Utc;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SEQNUM_FIELD: &str = "seqnum";

/// Monotonic ordering key of a queued event, microseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(u64);

impl SeqNum {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    fn from_field(value: Option<&FieldValue>) -> Result<Self, Error> {
        value
            .and_then(FieldValue::as_i64)
            .and_then(|value| u64::try_from(value).ok())
            .map(Self)
            .ok_or_else(|| Error::MalformedDocument("queue entry has no seqnum".into()))
    }
}

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SeqNum> for FieldValue {
    fn from(value: SeqNum) -> Self {
        FieldValue::Int(value.0 as i64)
    }
}

/// Issues strictly increasing sequence numbers derived from the wall clock.
///
/// When the clock does not move forward between calls the previous value is
/// incremented instead.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarantees every following number is above `seqnum`.
    pub fn observe(&self, seqnum: SeqNum) {
        self.last.fetch_max(seqnum.0, Ordering::SeqCst);
    }

    pub fn next(&self) -> SeqNum {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
        let mut current = self.last.load(Ordering::SeqCst);

        loop {
            let candidate = now.max(current + 1);

            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return SeqNum(candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Queued row change together with its ordering key.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub seqnum: SeqNum,
    pub mutation: RowMutation,
}

impl ChangeEvent {
    pub fn new(seqnum: SeqNum, mutation: RowMutation) -> Self {
        Self { seqnum, mutation }
    }

    pub fn schema(&self) -> &str {
        &self.mutation.schema
    }

    pub fn table(&self) -> &str {
        &self.mutation.table
    }

    pub fn change(&self) -> &RowChange {
        &self.mutation.change
    }

    pub fn to_document(&self) -> Document {
        Document::new()
            .with(ID_FIELD, self.seqnum)
            .with(SEQNUM_FIELD, self.seqnum)
            .with("event_type", self.change().kind())
            .with("schema", self.schema())
            .with("table", self.table())
            .with("values", self.change().values())
    }

    pub fn from_document(document: Document) -> Result<Self, Error> {
        let mut document = document;
        let seqnum = SeqNum::from_field(document.get(SEQNUM_FIELD))?;

        let text = |field: &str| match document.get_str(field) {
            Some(value) => Ok(value.to_owned()),
            None => Err(Error::MalformedDocument(format!(
                "queue entry {seqnum} has no {field}"
            ))),
        };

        let kind = text("event_type")?;
        let schema = text("schema")?;
        let table = text("table")?;

        let values = match document.remove("values") {
            Some(FieldValue::Document(values)) => values,
            _ => {
                return Err(Error::MalformedDocument(format!(
                    "queue entry {seqnum} has no values"
                )))
            }
        };

        Ok(Self::new(
            seqnum,
            RowMutation::new(schema, table, RowChange::from_values(&kind, values)?),
        ))
    }
}

/// Durable queue shared by the capture and apply workers.
#[derive(Clone, Debug)]
pub struct ReplicationQueue<S> {
    sink: Sink<S>,
    namespace: Namespace,
    sequence: Arc<SequenceGenerator>,
}

impl<S> ReplicationQueue<S>
where
    S: DocumentStore,
{
    /// Opens the queue, continuing the sequence above any pending entry.
    pub async fn open(sink: Sink<S>) -> Result<Self, Error> {
        let namespace = sink.util_collection(collections::QUEUE).await?;
        let sequence = Arc::new(SequenceGenerator::new());

        let newest = sink
            .store()
            .find_sorted(
                &namespace,
                &Document::new(),
                SEQNUM_FIELD,
                SortOrder::Descending,
                1,
            )
            .await?;

        if let Some(newest) = newest.first() {
            sequence.observe(SeqNum::from_field(newest.get(SEQNUM_FIELD))?);
        }

        Ok(Self {
            sink,
            namespace,
            sequence,
        })
    }

    pub async fn enqueue(&self, mutation: RowMutation) -> Result<SeqNum, Error> {
        let event = ChangeEvent::new(self.sequence.next(), mutation);

        self.sink
            .store()
            .insert_one(&self.namespace, event.to_document())
            .await?;

        Ok(event.seqnum)
    }

    /// Up to `limit` oldest entries, entries stay queued until acknowledged.
    pub async fn dequeue_batch(&self, limit: usize) -> Result<Vec<ChangeEvent>, Error> {
        self.sink
            .store()
            .find_sorted(
                &self.namespace,
                &Document::new(),
                SEQNUM_FIELD,
                SortOrder::Ascending,
                limit,
            )
            .await?
            .into_iter()
            .map(|document| {
                ChangeEvent::from_document(document).map_err(|error| {
                    Error::Store(format!("unreadable entry in {}: {error}", self.namespace))
                })
            })
            .collect()
    }

    /// Removes an entry, acknowledging an absent entry is a no-op.
    pub async fn acknowledge(&self, seqnum: SeqNum) -> Result<(), Error> {
        self.sink
            .store()
            .delete_one(&self.namespace, &Document::new().with(ID_FIELD, seqnum))
            .await?;

        Ok(())
    }

    pub async fn pending(&self) -> Result<usize, Error> {
        self.sink.store().count(&self.namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn queue() -> ReplicationQueue<MemoryStore> {
        ReplicationQueue::open(Sink::new(MemoryStore::new(), "util"))
            .await
            .unwrap()
    }

    fn order(id: i64) -> RowMutation {
        RowMutation::insert("shop", "orders", document! {"id" => id})
    }

    #[test]
    fn generates_strictly_increasing_numbers() {
        let sequence = SequenceGenerator::new();
        let far_future = SeqNum::new(u64::MAX / 2);

        sequence.observe(far_future);

        let first = sequence.next();
        let second = sequence.next();

        assert_eq!(first, SeqNum::new(u64::MAX / 2 + 1));
        assert!(second > first);
    }

    #[test]
    fn round_trips_update_event_through_document() {
        let event = ChangeEvent::new(
            SeqNum::new(1700000000000001),
            RowMutation::update(
                "shop",
                "orders",
                document! {"id" => 5, "status" => "new"},
                document! {"id" => 5, "status" => "paid"},
            ),
        );

        assert_eq!(ChangeEvent::from_document(event.to_document()).unwrap(), event);
    }

    #[tokio::test]
    async fn dequeues_in_enqueue_order() -> Result<(), Error> {
        let queue = queue().await;

        let first = queue.enqueue(order(1)).await?;
        let second = queue.enqueue(order(2)).await?;
        queue.enqueue(order(3)).await?;

        let batch = queue.dequeue_batch(2).await?;

        assert_eq!(
            batch,
            vec![
                ChangeEvent::new(first, order(1)),
                ChangeEvent::new(second, order(2))
            ]
        );
        assert_eq!(queue.pending().await?, 3);

        Ok(())
    }

    #[tokio::test]
    async fn acknowledges_idempotently() -> Result<(), Error> {
        let queue = queue().await;
        let seqnum = queue.enqueue(order(1)).await?;

        queue.acknowledge(seqnum).await?;
        queue.acknowledge(seqnum).await?;

        assert_eq!(queue.pending().await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn continues_sequence_above_pending_entries() -> Result<(), Error> {
        let store = MemoryStore::new();
        let sink = Sink::new(store.clone(), "util");
        let namespace = sink.util_collection(collections::QUEUE).await?;
        let future = SeqNum::new(u64::MAX / 4);
        store
            .insert_one(
                &namespace,
                ChangeEvent::new(future, order(1)).to_document(),
            )
            .await?;

        let queue = ReplicationQueue::open(sink).await?;
        let seqnum = queue.enqueue(order(2)).await?;

        assert!(seqnum > future);
        assert_eq!(queue.dequeue_batch(10).await?[1].seqnum, seqnum);

        Ok(())
    }

    #[tokio::test]
    async fn keeps_order_with_concurrent_producers() -> Result<(), Error> {
        let queue = queue().await;

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for id in 0..25 {
                        queue.enqueue(order(producer * 100 + id)).await?;
                    }
                    Ok::<_, Error>(())
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap()?;
        }

        let batch = queue.dequeue_batch(200).await?;
        let seqnums: Vec<_> = batch.iter().map(|event| event.seqnum).collect();
        let mut sorted = seqnums.clone();
        sorted.sort();
        sorted.dedup();

        assert_eq!(batch.len(), 100);
        assert_eq!(seqnums, sorted);

        Ok(())
    }
}
