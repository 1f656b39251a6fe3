//! Assembly service: turns `OrderPaid` into `ShipAssembled`.

use std::time::Duration;

use async_trait::async_trait;
use domain::{OrderPaid, ShipAssembled};
use event_bus::{HandlerError, Message, MessageHandler, Shutdown};
use rand::Rng;
use tracing::{error, info, warn};

use crate::error::{FulfillmentError, Result};
use crate::publisher::{EventPublisher, decode_message};

/// Build time simulation settings.
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub min_build_units: u64,
    pub max_build_units: u64,
    /// Real time per build unit.
    pub time_unit: Duration,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            min_build_units: 1,
            max_build_units: 10,
            time_unit: Duration::from_secs(1),
        }
    }
}

/// Builds paid orders and announces them as assembled.
///
/// One build runs per delivery of `OrderPaid`. A build interrupted by
/// shutdown publishes nothing, so the event is delivered again on restart.
pub struct AssemblyService {
    publisher: EventPublisher,
    config: AssemblyConfig,
}

impl AssemblyService {
    /// `publisher` must target the `ShipAssembled` topic.
    pub fn new(publisher: EventPublisher, mut config: AssemblyConfig) -> Self {
        if config.min_build_units > config.max_build_units {
            std::mem::swap(&mut config.min_build_units, &mut config.max_build_units);
        }
        Self { publisher, config }
    }

    fn draw_build_units(&self) -> u64 {
        rand::thread_rng().gen_range(self.config.min_build_units..=self.config.max_build_units)
    }

    #[tracing::instrument(
        skip(self, event, shutdown),
        fields(order_id = %event.order_id, event_id = %event.event_id)
    )]
    pub async fn assemble(&self, event: &OrderPaid, shutdown: &Shutdown) -> Result<ShipAssembled> {
        let units = self.draw_build_units();
        let build_time = self
            .config
            .time_unit
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX));

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(units, "Build interrupted by shutdown");
                return Err(FulfillmentError::Cancelled);
            }
            _ = tokio::time::sleep(build_time) => {}
        }

        let assembled = ShipAssembled::new(event.order_id, event.user_id, units);
        self.publisher.publish(&assembled).await?;

        metrics::counter!("assembly_builds_total").increment(1);
        metrics::histogram!("assembly_build_seconds").record(build_time.as_secs_f64());
        info!(units, "Order assembled");
        Ok(assembled)
    }
}

#[async_trait]
impl MessageHandler for AssemblyService {
    async fn handle(
        &self,
        message: &Message,
        shutdown: &Shutdown,
    ) -> std::result::Result<(), HandlerError> {
        let event: OrderPaid = decode_message(message).inspect_err(|err| {
            error!(%message, error = %err, "Rejecting undecodable OrderPaid");
        })?;

        self.assemble(&event, shutdown).await.inspect_err(|err| {
            warn!(
                event_id = %event.event_id,
                order_id = %event.order_id,
                kind = %err.kind(),
                error = %err,
                "Assembly failed"
            );
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use common::{OrderId, TransactionId, UserId};
    use domain::{PaymentDetails, PaymentMethod, decode_event, encode_event};
    use event_bus::{InMemoryLog, shutdown};

    fn paid_event() -> OrderPaid {
        OrderPaid::new(
            OrderId::new(),
            UserId::new(),
            PaymentDetails {
                method: PaymentMethod::Card,
                transaction_id: TransactionId::new(),
            },
        )
    }

    fn service(log: &InMemoryLog, config: AssemblyConfig) -> AssemblyService {
        let publisher = EventPublisher::new(Arc::new(log.producer("ship.assembled")));
        AssemblyService::new(publisher, config)
    }

    fn fast() -> AssemblyConfig {
        AssemblyConfig {
            min_build_units: 1,
            max_build_units: 3,
            time_unit: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_assemble_publishes_ship_assembled() {
        let log = InMemoryLog::new(2);
        let service = service(&log, fast());
        let (_trigger, shutdown) = shutdown::channel();
        let paid = paid_event();

        let assembled = service.assemble(&paid, &shutdown).await.unwrap();
        assert_eq!(assembled.order_id, paid.order_id);
        assert_eq!(assembled.user_id, paid.user_id);
        assert!((1..=3).contains(&assembled.build_time_seconds));

        let records = log.records("ship.assembled").await.unwrap();
        assert_eq!(records.len(), 1);
        let published: ShipAssembled = decode_event(&records[0].payload).unwrap();
        assert_eq!(published, assembled);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_build_without_publishing() {
        let log = InMemoryLog::new(1);
        let service = service(
            &log,
            AssemblyConfig {
                min_build_units: 10,
                max_build_units: 10,
                time_unit: Duration::from_secs(60),
            },
        );
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let result = service.assemble(&paid_event(), &shutdown).await;
        assert!(matches!(result, Err(FulfillmentError::Cancelled)));
        assert!(log.records("ship.assembled").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_rejects_empty_order_id() {
        let log = InMemoryLog::new(1);
        let service = service(&log, fast());
        let (_trigger, shutdown) = shutdown::channel();

        let mut event = paid_event();
        event.order_id = OrderId::nil();
        let message = Message {
            topic: "order.paid".to_string(),
            partition: 0,
            offset: 0,
            key: Vec::new(),
            payload: encode_event(&event).unwrap(),
            attempt: 1,
        };

        assert!(service.handle(&message, &shutdown).await.is_err());
        assert!(log.records("ship.assembled").await.unwrap().is_empty());
    }

    #[test]
    fn test_inverted_range_is_normalized() {
        let log = InMemoryLog::new(1);
        let service = service(
            &log,
            AssemblyConfig {
                min_build_units: 5,
                max_build_units: 2,
                time_unit: Duration::from_millis(1),
            },
        );
        for _ in 0..20 {
            assert!((2..=5).contains(&service.draw_build_units()));
        }
    }
}
