//! Encoding domain events onto the log and decoding them back.

use std::sync::Arc;

use domain::{DomainEvent, decode_event, encode_event};
use event_bus::{Message, Producer, RecordMetadata};
use tracing::info;

use crate::error::{FulfillmentError, Result};

/// Publishes domain events to one topic, keyed by order.
#[derive(Clone)]
pub struct EventPublisher {
    producer: Arc<dyn Producer>,
}

impl EventPublisher {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }

    pub fn topic(&self) -> &str {
        self.producer.topic()
    }

    /// Encodes and appends the event to the partition of its order.
    pub async fn publish<E: DomainEvent>(&self, event: &E) -> Result<RecordMetadata> {
        let payload = encode_event(event)?;
        let metadata = self.producer.send(event.partition_key(), payload).await?;

        metrics::counter!("events_published_total", "event_type" => E::EVENT_TYPE).increment(1);
        info!(
            event_type = E::EVENT_TYPE,
            event_id = %event.event_id(),
            order_id = %event.order_id(),
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "Event published"
        );
        Ok(metadata)
    }

    /// Waits until published events are durable.
    pub async fn flush(&self) -> Result<()> {
        Ok(self.producer.flush().await?)
    }
}

/// Decodes a delivered record and rejects events without an order.
pub fn decode_message<E: DomainEvent>(message: &Message) -> Result<E> {
    let event: E = decode_event(&message.payload)?;
    if event.order_id().is_nil() {
        return Err(FulfillmentError::validation(format!(
            "{} {} has an empty order id",
            E::EVENT_TYPE,
            event.event_id()
        )));
    }
    Ok(event)
}
