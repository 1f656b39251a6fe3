//! Order orchestration: the synchronous half of the saga.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use common::{OrderId, PartId, TransactionId, UserId};
use domain::{
    Money, Order, OrderError, OrderPaid, OrderStatus, PaymentDetails, PaymentMethod, PricedPart,
};
use order_store::OrderRepository;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::clients::{InventoryClient, PaymentClient};
use crate::error::{FulfillmentError, Result};
use crate::publisher::EventPublisher;

/// Result of a successful `create_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: OrderId,
    pub total_price: Money,
}

/// What `complete_assembly` did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyTransition {
    /// The order moved from `PAID` to `ASSEMBLED`.
    Assembled,
    /// The order was already `ASSEMBLED`; nothing changed.
    AlreadyAssembled,
}

/// One async lock per order, held across load, collaborator call and update.
///
/// Entries nobody holds or waits on are dropped on the next acquisition.
#[derive(Clone, Default)]
struct OrderLocks {
    locks: Arc<Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>>,
}

impl OrderLocks {
    async fn acquire(&self, order_id: OrderId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(order_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Owns every write to orders.
///
/// Creation and payment call the Inventory and Payment collaborators;
/// payment publishes `OrderPaid` once the `PAID` state is stored. Writes
/// to the same order are serialized within the service.
#[derive(Clone)]
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryClient>,
    payment: Arc<dyn PaymentClient>,
    publisher: EventPublisher,
    locks: OrderLocks,
}

impl OrderService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryClient>,
        payment: Arc<dyn PaymentClient>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            repository,
            inventory,
            payment,
            publisher,
            locks: OrderLocks::default(),
        }
    }

    /// Prices the requested parts and stores a new order awaiting payment.
    ///
    /// A part ID may appear more than once and is then priced once per
    /// occurrence. Every distinct ID must be known to Inventory.
    #[tracing::instrument(skip(self, part_ids), fields(parts = part_ids.len()))]
    pub async fn create_order(&self, user_id: UserId, part_ids: &[PartId]) -> Result<CreatedOrder> {
        if user_id.is_nil() {
            return Err(FulfillmentError::validation("user id is required"));
        }
        if part_ids.is_empty() {
            return Err(OrderError::NoParts.into());
        }
        if part_ids.iter().any(PartId::is_nil) {
            return Err(FulfillmentError::validation("part ids must not be empty"));
        }

        let requested: HashSet<PartId> = part_ids.iter().copied().collect();
        let resolved: HashMap<PartId, Money> = self
            .inventory
            .list_parts(part_ids)
            .await?
            .into_iter()
            .filter(|part| requested.contains(&part.id))
            .map(|part| (part.id, part.price))
            .collect();

        if resolved.len() != requested.len() {
            let mut missing = Vec::new();
            for id in part_ids {
                if !resolved.contains_key(id) && !missing.contains(id) {
                    missing.push(*id);
                }
            }
            warn!(missing = missing.len(), "Parts not found in inventory");
            return Err(FulfillmentError::PartsNotFound { part_ids: missing });
        }

        let priced: Vec<PricedPart> = part_ids
            .iter()
            .filter_map(|id| resolved.get(id).map(|price| PricedPart::new(*id, *price)))
            .collect();

        let mut order = Order::create(user_id, &priced)?;
        let version = self.repository.insert(&order).await?;
        order.set_version(version);

        metrics::counter!("orders_created_total").increment(1);
        info!(order_id = %order.id(), total_price = %order.total_price(), "Order created");

        Ok(CreatedOrder {
            order_id: order.id(),
            total_price: order.total_price(),
        })
    }

    /// Charges the customer, marks the order `PAID` and publishes `OrderPaid`.
    ///
    /// The order is checked before the charge so a paid or cancelled order is
    /// never charged. A failed charge leaves the order untouched. The event
    /// is only published after the `PAID` state is stored.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<TransactionId> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;
        order.ensure_can_pay()?;

        let transaction_id = self
            .payment
            .pay_order(order_id, order.user_id(), method)
            .await
            .inspect_err(|err| warn!(error = %err, "Payment failed, order left unchanged"))?;

        let payment = PaymentDetails {
            method,
            transaction_id,
        };
        order.pay(payment)?;

        if let Err(err) = self.repository.update(&order).await {
            error!(
                %transaction_id,
                error = %err,
                "Payment succeeded but the order could not be marked paid"
            );
            return Err(err.into());
        }

        let event = OrderPaid::new(order_id, order.user_id(), payment);
        if let Err(err) = self.publisher.publish(&event).await {
            error!(
                event_id = %event.event_id,
                error = %err,
                "Order is paid but OrderPaid was not published"
            );
            return Err(err);
        }

        metrics::counter!("orders_paid_total", "method" => method.as_str()).increment(1);
        info!(%transaction_id, "Order paid");
        Ok(transaction_id)
    }

    /// Cancels an order that has not been paid.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<()> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;
        order.cancel()?;
        self.repository.update(&order).await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        info!("Order cancelled");
        Ok(())
    }

    /// Moves a paid order to `ASSEMBLED`.
    ///
    /// An order that is already assembled is left as is.
    #[tracing::instrument(skip(self))]
    pub async fn complete_assembly(&self, order_id: OrderId) -> Result<AssemblyTransition> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.load(order_id).await?;
        if order.status() == OrderStatus::Assembled {
            return Ok(AssemblyTransition::AlreadyAssembled);
        }

        order.mark_assembled()?;
        self.repository.update(&order).await?;

        metrics::counter!("orders_assembled_total").increment(1);
        info!("Order assembled");
        Ok(AssemblyTransition::Assembled)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.repository
            .get(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use crate::clients::{InMemoryInventoryClient, InMemoryPaymentClient};
    use crate::error::ErrorKind;
    use domain::decode_event;
    use event_bus::InMemoryLog;
    use order_store::InMemoryOrderRepository;

    /// Payment client that takes a while to answer.
    struct SlowPayment {
        inner: InMemoryPaymentClient,
        delay: Duration,
    }

    #[async_trait]
    impl PaymentClient for SlowPayment {
        async fn pay_order(
            &self,
            order_id: OrderId,
            user_id: UserId,
            method: PaymentMethod,
        ) -> Result<TransactionId> {
            tokio::time::sleep(self.delay).await;
            self.inner.pay_order(order_id, user_id, method).await
        }
    }

    struct Harness {
        service: OrderService,
        repository: InMemoryOrderRepository,
        inventory: InMemoryInventoryClient,
        payment: InMemoryPaymentClient,
        log: InMemoryLog,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_payment_delay(Duration::ZERO)
        }

        fn with_payment_delay(delay: Duration) -> Self {
            let repository = InMemoryOrderRepository::new();
            let inventory = InMemoryInventoryClient::new();
            let payment = InMemoryPaymentClient::new();
            let log = InMemoryLog::new(2);
            let publisher = EventPublisher::new(Arc::new(log.producer("order.paid")));

            let service = OrderService::new(
                Arc::new(repository.clone()),
                Arc::new(inventory.clone()),
                Arc::new(SlowPayment {
                    inner: payment.clone(),
                    delay,
                }),
                publisher,
            );

            Self {
                service,
                repository,
                inventory,
                payment,
                log,
            }
        }

        async fn pending_order(&self) -> OrderId {
            let part = self.inventory.add_part("chassis", Money::from_dollars(500));
            self.service
                .create_order(UserId::new(), &[part])
                .await
                .unwrap()
                .order_id
        }

        async fn published(&self) -> Vec<OrderPaid> {
            self.log
                .records("order.paid")
                .await
                .unwrap()
                .iter()
                .map(|m| decode_event(&m.payload).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_create_order_sums_prices() {
        let h = Harness::new();
        let wheel = h.inventory.add_part("wheel", Money::from_dollars(100));
        let frame = h.inventory.add_part("frame", Money::from_dollars(250));
        let user_id = UserId::new();

        let created = h
            .service
            .create_order(user_id, &[wheel, frame])
            .await
            .unwrap();
        assert_eq!(created.total_price, Money::from_dollars(350));

        let order = h.service.get_order(created.order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::PendingPayment);
        assert_eq!(order.user_id(), user_id);
        assert_eq!(order.part_ids(), &[wheel, frame]);
        assert_eq!(order.version(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_parts_priced_per_occurrence() {
        let h = Harness::new();
        let wheel = h.inventory.add_part("wheel", Money::from_dollars(100));

        let created = h
            .service
            .create_order(UserId::new(), &[wheel, wheel])
            .await
            .unwrap();
        assert_eq!(created.total_price, Money::from_dollars(200));
    }

    #[tokio::test]
    async fn test_create_order_with_unknown_parts() {
        let h = Harness::new();
        let wheel = h.inventory.add_part("wheel", Money::from_dollars(100));
        let ghost = PartId::new();

        let err = h
            .service
            .create_order(UserId::new(), &[wheel, ghost, ghost])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(
            err,
            FulfillmentError::PartsNotFound { ref part_ids } if part_ids == &vec![ghost]
        ));
        assert_eq!(h.repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_validation() {
        let h = Harness::new();

        let err = h.service.create_order(UserId::new(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = h
            .service
            .create_order(UserId::nil(), &[PartId::new()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.inventory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_order_with_overflowing_prices() {
        let h = Harness::new();
        let gold = h.inventory.add_part("gold hull", Money::from_cents(i64::MAX));

        let err = h
            .service
            .create_order(UserId::new(), &[gold, gold])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_inventory_unavailable() {
        let h = Harness::new();
        h.inventory.set_fail_on_list(true);

        let err = h
            .service
            .create_order(UserId::new(), &[PartId::new()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_later_price_change_does_not_affect_order() {
        let h = Harness::new();
        let wheel = h.inventory.add_part("wheel", Money::from_dollars(100));
        let created = h.service.create_order(UserId::new(), &[wheel]).await.unwrap();

        h.inventory.set_price(wheel, Money::from_dollars(999));

        let order = h.service.get_order(created.order_id).await.unwrap();
        assert_eq!(order.total_price(), Money::from_dollars(100));
    }

    #[tokio::test]
    async fn test_pay_order_publishes_after_commit() {
        let h = Harness::new();
        let order_id = h.pending_order().await;

        let tx = h
            .service
            .pay_order(order_id, PaymentMethod::Card)
            .await
            .unwrap();

        let order = h.service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.payment().unwrap().transaction_id, tx);
        assert_eq!(order.payment().unwrap().method, PaymentMethod::Card);
        assert_eq!(order.version(), 2);

        let events = h.published().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].order_id, order_id);
        assert_eq!(events[0].user_id, order.user_id());
        assert_eq!(events[0].transaction_id, tx);
    }

    #[tokio::test]
    async fn test_failed_payment_leaves_order_unchanged() {
        let h = Harness::new();
        let order_id = h.pending_order().await;
        let before = h.service.get_order(order_id).await.unwrap();

        h.payment.set_fail_on_pay(true);
        let err = h
            .service
            .pay_order(order_id, PaymentMethod::Sbp)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(h.service.get_order(order_id).await.unwrap(), before);
        assert!(h.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_pay_twice_is_conflict_without_second_charge() {
        let h = Harness::new();
        let order_id = h.pending_order().await;
        h.service
            .pay_order(order_id, PaymentMethod::Card)
            .await
            .unwrap();

        let err = h
            .service
            .pay_order(order_id, PaymentMethod::Card)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.payment.payment_count(), 1);
        assert_eq!(h.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pay_unknown_order() {
        let h = Harness::new();
        let err = h
            .service
            .pay_order(OrderId::new(), PaymentMethod::Card)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
        assert_eq!(h.payment.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let h = Harness::new();

        let pending = h.pending_order().await;
        h.service.cancel_order(pending).await.unwrap();
        assert_eq!(
            h.service.get_order(pending).await.unwrap().status(),
            OrderStatus::Cancelled
        );

        let err = h.service.cancel_order(pending).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let paid = h.pending_order().await;
        h.service
            .pay_order(paid, PaymentMethod::Card)
            .await
            .unwrap();
        let err = h.service.cancel_order(paid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            h.service.get_order(paid).await.unwrap().status(),
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_complete_assembly() {
        let h = Harness::new();
        let order_id = h.pending_order().await;
        h.service
            .pay_order(order_id, PaymentMethod::Card)
            .await
            .unwrap();

        assert_eq!(
            h.service.complete_assembly(order_id).await.unwrap(),
            AssemblyTransition::Assembled
        );
        assert_eq!(
            h.service.complete_assembly(order_id).await.unwrap(),
            AssemblyTransition::AlreadyAssembled
        );

        let order = h.service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Assembled);
        assert_eq!(order.version(), 3);
    }

    #[tokio::test]
    async fn test_complete_assembly_requires_payment() {
        let h = Harness::new();
        let order_id = h.pending_order().await;

        let err = h.service.complete_assembly(order_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = h
            .service
            .complete_assembly(OrderId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    #[tokio::test]
    async fn test_concurrent_pays_charge_once() {
        let h = Harness::with_payment_delay(Duration::from_millis(50));
        let order_id = h.pending_order().await;

        let (first, second) = tokio::join!(
            h.service.pay_order(order_id, PaymentMethod::Card),
            h.service.pay_order(order_id, PaymentMethod::Card),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(h.payment.payments_for(order_id).len(), 1);
        assert_eq!(h.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_payment_in_flight() {
        let h = Harness::with_payment_delay(Duration::from_millis(50));
        let order_id = h.pending_order().await;

        let (paid, cancelled) = tokio::join!(
            h.service.pay_order(order_id, PaymentMethod::Card),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.service.cancel_order(order_id).await
            },
        );

        assert!(paid.is_ok());
        assert_eq!(cancelled.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(
            h.service.get_order(order_id).await.unwrap().status(),
            OrderStatus::Paid
        );
        assert_eq!(h.payment.payments_for(order_id).len(), 1);
    }

    #[tokio::test]
    async fn test_idle_order_locks_are_released() {
        let h = Harness::new();
        for _ in 0..3 {
            let order_id = h.pending_order().await;
            h.service.cancel_order(order_id).await.unwrap();
        }
        let order_id = h.pending_order().await;
        h.service
            .pay_order(order_id, PaymentMethod::Card)
            .await
            .unwrap();

        let held = h.service.locks.locks.lock().unwrap().len();
        assert!(held <= 1);
    }
}
