//! Domain layer for the order-fulfillment pipeline.
//!
//! This crate provides:
//! - The [`Order`] entity and its [`OrderStatus`] state machine
//! - Domain events ([`OrderPaid`], [`ShipAssembled`]) exchanged between services
//! - The binary wire codec used to put events on the event log

pub mod events;
pub mod order;

pub use events::{CodecError, DomainEvent, OrderPaid, ShipAssembled, decode_event, encode_event};
pub use order::{
    Money, Order, OrderError, OrderRecord, OrderStatus, PaymentDetails, PaymentMethod,
    PricedPart,
};
