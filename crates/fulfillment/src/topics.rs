//! Topic and consumer group names shared by every service.

/// Carries `OrderPaid` events.
pub const ORDER_PAID: &str = "order.paid";

/// Carries `ShipAssembled` events.
pub const SHIP_ASSEMBLED: &str = "ship.assembled";

pub const ASSEMBLY_GROUP: &str = "assembly-service";
pub const ORDER_GROUP: &str = "order-service";
pub const NOTIFICATION_GROUP: &str = "notification-service";
