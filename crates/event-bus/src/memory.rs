//! In-process partitioned log.
//!
//! Topics have a fixed number of partitions. A record's partition is a stable
//! hash of its key, so every record for one key lands in one partition and is
//! delivered in append order.
//!
//! Consumer groups keep a committed offset per partition and an ownership
//! table. A consumer claims every unowned partition when it starts and checks
//! again on each rebalance tick, so partitions released by a stopped member
//! are picked up by the remaining members of the group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    Consumer, EventBusError, Message, MessageHandler, Producer, RecordMetadata, Result, Shutdown,
};

#[derive(Debug)]
struct Record {
    key: Vec<u8>,
    payload: Vec<u8>,
}

struct Partition {
    records: RwLock<Vec<Arc<Record>>>,
    /// Number of records appended so far.
    high_watermark: watch::Sender<u64>,
}

impl Partition {
    fn new() -> Self {
        let (high_watermark, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            high_watermark,
        }
    }

    async fn append(&self, record: Record) -> u64 {
        let mut records = self.records.write().await;
        let offset = records.len() as u64;
        records.push(Arc::new(record));
        self.high_watermark.send_replace(offset + 1);
        offset
    }

    async fn read(&self, offset: u64) -> Option<Arc<Record>> {
        let index = usize::try_from(offset).ok()?;
        self.records.read().await.get(index).cloned()
    }
}

struct Topic {
    name: String,
    partitions: Vec<Partition>,
}

impl Topic {
    fn new(name: &str, partitions: u32) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..partitions).map(|_| Partition::new()).collect(),
        }
    }

    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// FNV-1a over the key bytes.
    fn partition_for(&self, key: &[u8]) -> u32 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0100_0000_01b3;

        let hash = key
            .iter()
            .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME));
        (hash % u64::from(self.partition_count())) as u32
    }

    fn partition(&self, partition: u32) -> Option<&Partition> {
        self.partitions.get(partition as usize)
    }
}

type PartitionKey = (String, u32);

#[derive(Default)]
struct GroupState {
    committed: HashMap<PartitionKey, u64>,
    owners: HashMap<PartitionKey, u64>,
}

struct Inner {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    groups: Mutex<HashMap<String, GroupState>>,
    default_partitions: u32,
    next_member: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        lock(&self.topics)
            .get(name)
            .cloned()
            .ok_or_else(|| EventBusError::UnknownTopic(name.to_string()))
    }

    fn committed(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        lock(&self.groups)
            .get(group)
            .and_then(|state| state.committed.get(&(topic.to_string(), partition)).copied())
    }

    fn commit(&self, group: &str, topic: &str, partition: u32, next_offset: u64) {
        lock(&self.groups)
            .entry(group.to_string())
            .or_default()
            .committed
            .insert((topic.to_string(), partition), next_offset);
    }
}

/// A shared in-memory log. Clones refer to the same topics and groups.
#[derive(Clone)]
pub struct InMemoryLog {
    inner: Arc<Inner>,
}

impl InMemoryLog {
    /// Creates an empty log. Topics created implicitly get
    /// `default_partitions` partitions (at least one).
    pub fn new(default_partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                default_partitions: default_partitions.max(1),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a topic with an explicit partition count.
    ///
    /// Creating an existing topic with the same count is a no-op.
    pub fn create_topic(&self, name: &str, partitions: u32) -> Result<()> {
        if partitions == 0 {
            return Err(EventBusError::InvalidPartitionCount {
                topic: name.to_string(),
                partitions,
            });
        }

        let mut topics = lock(&self.inner.topics);
        if let Some(existing) = topics.get(name) {
            if existing.partition_count() != partitions {
                return Err(EventBusError::PartitionMismatch {
                    topic: name.to_string(),
                    existing: existing.partition_count(),
                    requested: partitions,
                });
            }
            return Ok(());
        }

        topics.insert(name.to_string(), Arc::new(Topic::new(name, partitions)));
        info!(topic = name, partitions, "Topic created");
        Ok(())
    }

    fn ensure_topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = lock(&self.inner.topics);
        topics
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(
                    topic = name,
                    partitions = self.inner.default_partitions,
                    "Topic created"
                );
                Arc::new(Topic::new(name, self.inner.default_partitions))
            })
            .clone()
    }

    /// Returns a producer for `topic`, creating the topic if needed.
    pub fn producer(&self, topic: &str) -> InMemoryProducer {
        InMemoryProducer {
            topic: self.ensure_topic(topic),
        }
    }

    /// Returns a consumer of `topic` in `group`, creating the topic if needed.
    pub fn consumer(&self, topic: &str, group: &str, config: ConsumerConfig) -> InMemoryConsumer {
        InMemoryConsumer {
            inner: self.inner.clone(),
            topic: self.ensure_topic(topic),
            group: group.to_string(),
            config,
        }
    }

    pub fn partition_count(&self, topic: &str) -> Result<u32> {
        Ok(self.inner.topic(topic)?.partition_count())
    }

    /// Returns the partition a record with `key` is appended to.
    pub fn partition_for(&self, topic: &str, key: &[u8]) -> Result<u32> {
        Ok(self.inner.topic(topic)?.partition_for(key))
    }

    /// Returns the next offset `group` will read from a partition, if the
    /// group has committed anything there.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.inner.committed(group, topic, partition)
    }

    /// Returns the partitions of `topic` currently owned by members of `group`.
    pub fn assigned_partitions(&self, group: &str, topic: &str) -> Vec<u32> {
        let groups = lock(&self.inner.groups);
        let mut assigned: Vec<u32> = groups
            .get(group)
            .map(|state| {
                state
                    .owners
                    .keys()
                    .filter(|(owned_topic, _)| owned_topic == topic)
                    .map(|(_, partition)| *partition)
                    .collect()
            })
            .unwrap_or_default();
        assigned.sort_unstable();
        assigned
    }

    /// Returns every record of `topic`, partition by partition.
    ///
    /// Records read this way carry `attempt == 0`.
    pub async fn records(&self, topic: &str) -> Result<Vec<Message>> {
        let topic = self.inner.topic(topic)?;
        let mut messages = Vec::new();
        for (index, partition) in topic.partitions.iter().enumerate() {
            let records = partition.records.read().await;
            messages.extend(records.iter().enumerate().map(|(offset, record)| Message {
                topic: topic.name.clone(),
                partition: index as u32,
                offset: offset as u64,
                key: record.key.clone(),
                payload: record.payload.clone(),
                attempt: 0,
            }));
        }
        Ok(messages)
    }
}

/// Appends records to one topic of an [`InMemoryLog`].
#[derive(Clone)]
pub struct InMemoryProducer {
    topic: Arc<Topic>,
}

#[async_trait]
impl Producer for InMemoryProducer {
    fn topic(&self) -> &str {
        &self.topic.name
    }

    async fn send(&self, key: Vec<u8>, value: Vec<u8>) -> Result<RecordMetadata> {
        let partition = self.topic.partition_for(&key);
        let target = self
            .topic
            .partition(partition)
            .ok_or_else(|| EventBusError::Closed {
                topic: self.topic.name.clone(),
                partition,
            })?;
        let offset = target
            .append(Record {
                key,
                payload: value,
            })
            .await;

        metrics::counter!("event_bus_messages_published_total", "topic" => self.topic.name.clone())
            .increment(1);
        debug!(topic = %self.topic.name, partition, offset, "Record appended");

        Ok(RecordMetadata {
            topic: self.topic.name.clone(),
            partition,
            offset,
        })
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Delay before a failed record is delivered again.
    pub retry_backoff: Duration,
    /// How often unowned partitions are claimed.
    pub rebalance_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
            rebalance_interval: Duration::from_secs(1),
        }
    }
}

/// A consumer group member reading one topic of an [`InMemoryLog`].
///
/// Every call to [`Consumer::consume`] joins the group as a new member.
#[derive(Clone)]
pub struct InMemoryConsumer {
    inner: Arc<Inner>,
    topic: Arc<Topic>,
    group: String,
    config: ConsumerConfig,
}

/// Partition ownership held by one running `consume` call.
///
/// Owned partitions are released on drop, including when the consume future
/// is aborted.
struct Membership {
    inner: Arc<Inner>,
    group: String,
    topic: String,
    member: u64,
}

impl Membership {
    fn join(inner: Arc<Inner>, group: &str, topic: &str) -> Self {
        let member = inner.next_member.fetch_add(1, Ordering::Relaxed);
        Self {
            inner,
            group: group.to_string(),
            topic: topic.to_string(),
            member,
        }
    }

    fn claim_unowned(&self, partition_count: u32) -> Vec<u32> {
        let mut groups = lock(&self.inner.groups);
        let state = groups.entry(self.group.clone()).or_default();
        (0..partition_count)
            .filter(|partition| {
                let key = (self.topic.clone(), *partition);
                if state.owners.contains_key(&key) {
                    return false;
                }
                state.owners.insert(key, self.member);
                true
            })
            .collect()
    }

    fn release(&self, partition: u32) {
        let mut groups = lock(&self.inner.groups);
        if let Some(state) = groups.get_mut(&self.group) {
            let key = (self.topic.clone(), partition);
            if state.owners.get(&key) == Some(&self.member) {
                state.owners.remove(&key);
            }
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let mut groups = lock(&self.inner.groups);
        if let Some(state) = groups.get_mut(&self.group) {
            state
                .owners
                .retain(|(topic, _), owner| !(topic == &self.topic && *owner == self.member));
        }
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic.name
    }

    fn group(&self) -> &str {
        &self.group
    }

    async fn consume(&self, handler: Arc<dyn MessageHandler>, shutdown: Shutdown) -> Result<()> {
        let membership = Membership::join(self.inner.clone(), &self.group, &self.topic.name);
        info!(
            topic = %self.topic.name,
            group = %self.group,
            member = membership.member,
            "Consumer started"
        );

        let mut workers: JoinSet<(u32, Result<()>)> = JoinSet::new();
        let mut rebalance = tokio::time::interval(self.config.rebalance_interval);
        rebalance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = workers.join_next() => {
                    let (partition, outcome) = joined?;
                    if let Err(err) = outcome {
                        error!(
                            topic = %self.topic.name,
                            group = %self.group,
                            partition,
                            error = %err,
                            "Partition worker stopped"
                        );
                    }
                    membership.release(partition);
                }
                _ = rebalance.tick() => {
                    for partition in membership.claim_unowned(self.topic.partition_count()) {
                        info!(
                            topic = %self.topic.name,
                            group = %self.group,
                            member = membership.member,
                            partition,
                            "Partition assigned"
                        );
                        let worker = PartitionWorker {
                            inner: self.inner.clone(),
                            topic: self.topic.clone(),
                            group: self.group.clone(),
                            partition,
                            handler: handler.clone(),
                            shutdown: shutdown.clone(),
                            retry_backoff: self.config.retry_backoff,
                        };
                        workers.spawn(async move { (partition, worker.run().await) });
                    }
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((partition, Err(err))) => {
                    error!(topic = %self.topic.name, partition, error = %err, "Partition worker stopped");
                }
                Err(err) => {
                    error!(topic = %self.topic.name, error = %err, "Partition worker panicked");
                }
            }
        }

        info!(
            topic = %self.topic.name,
            group = %self.group,
            member = membership.member,
            "Consumer stopped"
        );
        Ok(())
    }
}

/// Delivers the records of one partition, in order, to a handler.
struct PartitionWorker {
    inner: Arc<Inner>,
    topic: Arc<Topic>,
    group: String,
    partition: u32,
    handler: Arc<dyn MessageHandler>,
    shutdown: Shutdown,
    retry_backoff: Duration,
}

impl PartitionWorker {
    fn closed(&self) -> EventBusError {
        EventBusError::Closed {
            topic: self.topic.name.clone(),
            partition: self.partition,
        }
    }

    async fn run(self) -> Result<()> {
        let partition = self.topic.partition(self.partition).ok_or_else(|| self.closed())?;
        let mut high_watermark = partition.high_watermark.subscribe();
        let mut offset = self
            .inner
            .committed(&self.group, &self.topic.name, self.partition)
            .unwrap_or(0);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                available = wait_for_offset(&mut high_watermark, offset) => {
                    available.map_err(|_| self.closed())?;
                }
            }

            let record = partition.read(offset).await.ok_or_else(|| self.closed())?;
            if !self.deliver(offset, &record).await {
                return Ok(());
            }

            self.inner
                .commit(&self.group, &self.topic.name, self.partition, offset + 1);
            offset += 1;
        }
    }

    /// Hands the record to the handler until it succeeds.
    ///
    /// Returns false if shutdown interrupted delivery; the offset must then
    /// stay uncommitted.
    async fn deliver(&self, offset: u64, record: &Record) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let message = Message {
                topic: self.topic.name.clone(),
                partition: self.partition,
                offset,
                key: record.key.clone(),
                payload: record.payload.clone(),
                attempt,
            };

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(%message, "Delivery interrupted by shutdown");
                    return false;
                }
                outcome = self.handler.handle(&message, &self.shutdown) => outcome,
            };

            match outcome {
                Ok(()) => {
                    metrics::counter!(
                        "event_bus_messages_processed_total",
                        "topic" => self.topic.name.clone(),
                        "group" => self.group.clone()
                    )
                    .increment(1);
                    return true;
                }
                Err(err) => {
                    metrics::counter!(
                        "event_bus_handler_failures_total",
                        "topic" => self.topic.name.clone(),
                        "group" => self.group.clone()
                    )
                    .increment(1);
                    warn!(
                        topic = %self.topic.name,
                        group = %self.group,
                        partition = self.partition,
                        offset,
                        attempt,
                        error = %err,
                        "Handler failed, record will be redelivered"
                    );

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return false,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }
}

async fn wait_for_offset(
    high_watermark: &mut watch::Receiver<u64>,
    offset: u64,
) -> std::result::Result<(), watch::error::RecvError> {
    loop {
        if *high_watermark.borrow_and_update() > offset {
            return Ok(());
        }
        high_watermark.changed().await?;
    }
}
