//! Services of the build-to-order fulfillment saga.
//!
//! The saga is choreographed through the event log:
//! 1. [`OrderService`] validates parts with Inventory and persists the order.
//! 2. Paying the order calls Payment, marks it `PAID` and publishes `OrderPaid`.
//! 3. [`AssemblyService`] consumes `OrderPaid`, builds, publishes `ShipAssembled`.
//! 4. [`ShipAssembledHandler`] consumes `ShipAssembled` and marks the order `ASSEMBLED`.
//! 5. [`NotificationService`] consumes both events and alerts the customer.

pub mod assembly;
pub mod clients;
pub mod error;
pub mod notification;
pub mod order_events;
pub mod orders;
pub mod publisher;
pub mod topics;

pub use assembly::{AssemblyConfig, AssemblyService};
pub use clients::{
    ChannelClient, InMemoryChannelClient, InMemoryInventoryClient, InMemoryPaymentClient,
    InMemoryUserClient, InventoryClient, NotificationChannel, Part, PaymentClient, RecordedPayment,
    SentMessage, UserClient, UserProfile,
};
pub use error::{ErrorKind, FulfillmentError, Result};
pub use notification::{Delivery, Notice, NotificationService, TELEGRAM_PROVIDER};
pub use order_events::ShipAssembledHandler;
pub use orders::{AssemblyTransition, CreatedOrder, OrderService};
pub use publisher::{EventPublisher, decode_message};
