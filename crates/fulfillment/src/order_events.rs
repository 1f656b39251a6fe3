//! Order-side consumer of `ShipAssembled`.

use async_trait::async_trait;
use domain::{OrderError, ShipAssembled};
use event_bus::{HandlerError, Message, MessageHandler, Shutdown};
use tracing::{error, info, warn};

use crate::error::{ErrorKind, FulfillmentError};
use crate::orders::{AssemblyTransition, OrderService};
use crate::publisher::decode_message;

/// Marks orders `ASSEMBLED` when their build completes.
///
/// Redelivered events for an order that is already assembled are
/// acknowledged without changes. An event for an order in any other state
/// besides `PAID` cannot be fixed by redelivery; it is logged and
/// acknowledged. Everything else is returned as an error so the event is
/// delivered again.
pub struct ShipAssembledHandler {
    orders: OrderService,
}

impl ShipAssembledHandler {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for ShipAssembledHandler {
    async fn handle(
        &self,
        message: &Message,
        _shutdown: &Shutdown,
    ) -> std::result::Result<(), HandlerError> {
        let event: ShipAssembled = decode_message(message).inspect_err(|err| {
            error!(%message, error = %err, "Rejecting undecodable ShipAssembled");
        })?;

        match self.orders.complete_assembly(event.order_id).await {
            Ok(AssemblyTransition::Assembled) => Ok(()),
            Ok(AssemblyTransition::AlreadyAssembled) => {
                info!(
                    event_id = %event.event_id,
                    order_id = %event.order_id,
                    "Order already assembled, ignoring redelivered ShipAssembled"
                );
                Ok(())
            }
            Err(FulfillmentError::Order(OrderError::InvalidStateTransition {
                current_status,
                ..
            })) => {
                error!(
                    event_id = %event.event_id,
                    order_id = %event.order_id,
                    %current_status,
                    "ShipAssembled for an order that is not paid, acknowledging"
                );
                Ok(())
            }
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    error!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        "ShipAssembled for an unknown order"
                    );
                } else {
                    warn!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        kind = %err.kind(),
                        error = %err,
                        "Failed to mark order assembled"
                    );
                }
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::{InMemoryInventoryClient, InMemoryPaymentClient};
    use crate::publisher::EventPublisher;
    use common::{OrderId, UserId};
    use domain::{Money, OrderStatus, PaymentMethod, encode_event};
    use event_bus::{InMemoryLog, shutdown};
    use order_store::InMemoryOrderRepository;

    struct Harness {
        orders: OrderService,
        inventory: InMemoryInventoryClient,
        handler: ShipAssembledHandler,
    }

    fn harness() -> Harness {
        let log = InMemoryLog::new(1);
        let inventory = InMemoryInventoryClient::new();
        let orders = OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(inventory.clone()),
            Arc::new(InMemoryPaymentClient::new()),
            EventPublisher::new(Arc::new(log.producer("order.paid"))),
        );
        Harness {
            handler: ShipAssembledHandler::new(orders.clone()),
            orders,
            inventory,
        }
    }

    impl Harness {
        async fn order(&self, paid: bool) -> (OrderId, UserId) {
            let part = self.inventory.add_part("hull", Money::from_dollars(10));
            let user_id = UserId::new();
            let created = self.orders.create_order(user_id, &[part]).await.unwrap();
            if paid {
                self.orders
                    .pay_order(created.order_id, PaymentMethod::Card)
                    .await
                    .unwrap();
            }
            (created.order_id, user_id)
        }
    }

    fn message(event: &ShipAssembled) -> Message {
        Message {
            topic: "ship.assembled".to_string(),
            partition: 0,
            offset: 0,
            key: event.order_id.as_uuid().as_bytes().to_vec(),
            payload: encode_event(event).unwrap(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_paid_order_becomes_assembled() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();
        let (order_id, user_id) = h.order(true).await;
        let event = ShipAssembled::new(order_id, user_id, 4);

        h.handler.handle(&message(&event), &shutdown).await.unwrap();
        assert_eq!(
            h.orders.get_order(order_id).await.unwrap().status(),
            OrderStatus::Assembled
        );

        // Redelivery is a no-op.
        h.handler.handle(&message(&event), &shutdown).await.unwrap();
        let order = h.orders.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Assembled);
        assert_eq!(order.version(), 3);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_acknowledged() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();
        let event = ShipAssembled::new(OrderId::new(), UserId::new(), 1);

        assert!(h.handler.handle(&message(&event), &shutdown).await.is_err());
    }

    #[tokio::test]
    async fn test_unpaid_order_is_acknowledged_unchanged() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();
        let (order_id, user_id) = h.order(false).await;
        h.orders.cancel_order(order_id).await.unwrap();

        let event = ShipAssembled::new(order_id, user_id, 1);
        h.handler.handle(&message(&event), &shutdown).await.unwrap();
        assert_eq!(
            h.orders.get_order(order_id).await.unwrap().status(),
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_empty_order_id_is_rejected() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();
        let event = ShipAssembled::new(OrderId::nil(), UserId::new(), 1);

        assert!(h.handler.handle(&message(&event), &shutdown).await.is_err());
    }
}
