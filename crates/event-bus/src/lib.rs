//! Event transport for the fulfillment saga.
//!
//! A minimal publish/consume interface over a partitioned log:
//!
//! - [`Producer::send`] appends a record to the partition chosen by its key,
//!   so records sharing a key are delivered in publish order.
//! - [`Consumer::consume`] drives a [`MessageHandler`] once per delivered
//!   record. The group offset is committed only after the handler succeeds;
//!   a failed or interrupted record is delivered again.
//!
//! [`InMemoryLog`] is the in-process implementation. Any ordered, partitioned,
//! at-least-once log can stand behind the same traits.

pub mod error;
pub mod memory;
pub mod message;
pub mod shutdown;
pub mod transport;

pub use error::{EventBusError, Result};
pub use memory::{ConsumerConfig, InMemoryConsumer, InMemoryLog, InMemoryProducer};
pub use message::{Message, RecordMetadata};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use transport::{Consumer, HandlerError, MessageHandler, Producer};
