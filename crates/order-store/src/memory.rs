use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use tokio::sync::RwLock;

use crate::repository::INITIAL_VERSION;
use crate::{OrderRepository, Result, StoreError};

/// In-memory order repository.
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// version checks on update. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert(&self, order: &Order) -> Result<i64> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(StoreError::DuplicateOrder(order.id()));
        }

        let mut stored = order.clone();
        stored.set_version(INITIAL_VERSION);
        orders.insert(order.id(), stored);

        metrics::counter!("order_store_operations_total", "operation" => "insert").increment(1);
        Ok(INITIAL_VERSION)
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn update(&self, order: &Order) -> Result<i64> {
        let mut orders = self.orders.write().await;
        let current = orders
            .get_mut(&order.id())
            .ok_or(StoreError::OrderNotFound(order.id()))?;

        if current.version() != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected: order.version(),
                actual: current.version(),
            });
        }

        let new_version = order.version() + 1;
        *current = order.clone();
        current.set_version(new_version);

        metrics::counter!("order_store_operations_total", "operation" => "update").increment(1);
        Ok(new_version)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        metrics::counter!("order_store_operations_total", "operation" => "get").increment(1);
        Ok(self.orders.read().await.get(&order_id).cloned())
    }
}
