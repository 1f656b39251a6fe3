use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::Order;

use crate::Result;

/// Core trait for order persistence.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts a new order.
    ///
    /// Fails with `DuplicateOrder` if an order with the same ID exists.
    /// Returns the stored version (always 1).
    async fn insert(&self, order: &Order) -> Result<i64>;

    /// Replaces an existing order.
    ///
    /// Fails with `OrderNotFound` if the order does not exist, and with
    /// `ConcurrencyConflict` if the stored version differs from
    /// `order.version()`. Returns the new version.
    async fn update(&self, order: &Order) -> Result<i64>;

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;
}

#[async_trait]
impl<T: OrderRepository + ?Sized> OrderRepository for Arc<T> {
    async fn insert(&self, order: &Order) -> Result<i64> {
        (**self).insert(order).await
    }

    async fn update(&self, order: &Order) -> Result<i64> {
        (**self).update(order).await
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        (**self).get(order_id).await
    }
}

/// Version assigned to an order on insert.
pub const INITIAL_VERSION: i64 = 1;
