//! Domain events exchanged between services over the event log.
//!
//! Events are immutable facts. Each carries its own [`EventId`], distinct from
//! the identity of the order it describes, and is keyed by order ID so that all
//! events of one order land on the same partition.

mod codec;

pub use codec::{CodecError, decode_event, encode_event};

use common::{EventId, OrderId, TransactionId, UserId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::order::{PaymentDetails, PaymentMethod};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// The event type name, used in logs and metrics labels.
    const EVENT_TYPE: &'static str;

    /// One-byte discriminator written in the wire header.
    const TAG: u8;

    /// Current schema version written in the wire header.
    const SCHEMA_VERSION: u8;

    /// Returns the stable identity of this event.
    fn event_id(&self) -> EventId;

    /// Returns the order this event belongs to.
    fn order_id(&self) -> OrderId;

    /// Returns the partition key: the order ID bytes.
    fn partition_key(&self) -> Vec<u8> {
        self.order_id().as_uuid().as_bytes().to_vec()
    }
}

/// Emitted once per successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub event_id: EventId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub payment_method: PaymentMethod,
    pub transaction_id: TransactionId,
}

impl OrderPaid {
    /// Creates a new event with a fresh event ID.
    pub fn new(order_id: OrderId, user_id: UserId, payment: PaymentDetails) -> Self {
        Self {
            event_id: EventId::new(),
            order_id,
            user_id,
            payment_method: payment.method,
            transaction_id: payment.transaction_id,
        }
    }
}

impl DomainEvent for OrderPaid {
    const EVENT_TYPE: &'static str = "OrderPaid";
    const TAG: u8 = 1;
    const SCHEMA_VERSION: u8 = 1;

    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn order_id(&self) -> OrderId {
        self.order_id
    }
}

/// Emitted once per completed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipAssembled {
    pub event_id: EventId,
    pub order_id: OrderId,
    pub user_id: UserId,

    /// Realized build time.
    pub build_time_seconds: u64,
}

impl ShipAssembled {
    /// Creates a new event with a fresh event ID.
    pub fn new(order_id: OrderId, user_id: UserId, build_time_seconds: u64) -> Self {
        Self {
            event_id: EventId::new(),
            order_id,
            user_id,
            build_time_seconds,
        }
    }
}

impl DomainEvent for ShipAssembled {
    const EVENT_TYPE: &'static str = "ShipAssembled";
    const TAG: u8 = 2;
    const SCHEMA_VERSION: u8 = 1;

    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn order_id(&self) -> OrderId {
        self.order_id
    }
}
