use std::sync::Arc;

use async_trait::async_trait;

use crate::{Message, RecordMetadata, Result, Shutdown};

/// Error returned by a handler. Any error leaves the record uncommitted.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered record.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a record. Returning `Ok` commits its offset; returning an
    /// error causes redelivery of the same record.
    ///
    /// Long waits must observe `shutdown` and give up when it fires.
    async fn handle(
        &self,
        message: &Message,
        shutdown: &Shutdown,
    ) -> std::result::Result<(), HandlerError>;
}

/// Appends records to one topic.
#[async_trait]
pub trait Producer: Send + Sync {
    fn topic(&self) -> &str;

    /// Appends `value` to the partition selected by `key`.
    async fn send(&self, key: Vec<u8>, value: Vec<u8>) -> Result<RecordMetadata>;

    /// Waits until every sent record is durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A member of a consumer group reading one topic.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn topic(&self) -> &str;

    fn group(&self) -> &str;

    /// Delivers records to `handler` until `shutdown` fires.
    async fn consume(&self, handler: Arc<dyn MessageHandler>, shutdown: Shutdown) -> Result<()>;
}
