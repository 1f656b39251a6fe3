//! Order entity and related types.

mod entity;
mod state;
mod value_objects;

pub use entity::{Order, OrderRecord};
pub use state::OrderStatus;
pub use value_objects::{Money, PaymentDetails, PaymentMethod, PricedPart};

use common::OrderId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// An order needs at least one part.
    #[error("Order must contain at least one part")]
    NoParts,

    /// Order is not in a status that allows the requested transition.
    #[error("Invalid state transition: cannot {action} order {order_id} in {current_status} status")]
    InvalidStateTransition {
        order_id: OrderId,
        current_status: OrderStatus,
        action: &'static str,
    },

    /// The summed part prices do not fit the money representation.
    #[error("Order total overflows")]
    PriceOverflow,

    /// Status name not recognised.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// Payment method name not recognised.
    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    /// A stored order violates an entity invariant.
    #[error("Inconsistent order record {order_id}: {reason}")]
    InconsistentRecord { order_id: OrderId, reason: String },
}
