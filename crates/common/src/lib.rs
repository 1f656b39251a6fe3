//! Identifier types shared by every service in the fulfillment pipeline.

pub mod types;

pub use types::{EventId, OrderId, PartId, TransactionId, UserId};
