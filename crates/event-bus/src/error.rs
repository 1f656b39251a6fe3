use thiserror::Error;

/// Errors raised by the event transport itself.
///
/// Handler failures are not transport errors: they are logged and the record
/// is redelivered.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid partition count {partitions} for topic {topic}")]
    InvalidPartitionCount { topic: String, partitions: u32 },

    #[error("Topic {topic} already exists with {existing} partitions (requested {requested})")]
    PartitionMismatch {
        topic: String,
        existing: u32,
        requested: u32,
    },

    #[error("Partition {partition} of topic {topic} is closed")]
    Closed { topic: String, partition: u32 },

    #[error("Partition worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, EventBusError>;
