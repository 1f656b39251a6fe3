//! Notification fan-out for `OrderPaid` and `ShipAssembled`.

use std::sync::Arc;

use async_trait::async_trait;
use common::UserId;
use domain::{DomainEvent, OrderPaid, ShipAssembled};
use event_bus::{HandlerError, Message, MessageHandler, Shutdown};
use tracing::{debug, error, info, warn};

use crate::clients::{ChannelClient, UserClient};
use crate::error::{FulfillmentError, Result};
use crate::publisher::decode_message;
use crate::topics;

/// Provider name of the telegram channel.
pub const TELEGRAM_PROVIDER: &str = "telegram";

/// An event that produces a customer notification.
pub trait Notice: DomainEvent {
    fn recipient(&self) -> UserId;

    /// Renders the message text for this event type.
    fn render(&self) -> String;
}

impl Notice for OrderPaid {
    fn recipient(&self) -> UserId {
        self.user_id
    }

    fn render(&self) -> String {
        format!(
            "Your order {} has been paid with {} (transaction {}).",
            self.order_id, self.payment_method, self.transaction_id
        )
    }
}

impl Notice for ShipAssembled {
    fn recipient(&self) -> UserId {
        self.user_id
    }

    fn render(&self) -> String {
        format!(
            "Your order {} has been assembled in {} s and is ready to ship.",
            self.order_id, self.build_time_seconds
        )
    }
}

/// Whether a notification went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The user has no channel registered with this provider.
    NotSubscribed,
}

/// Alerts users about their orders through one channel provider.
///
/// Holds no state of its own. Delivery is not deduplicated, so a
/// redelivered event notifies the user again.
pub struct NotificationService {
    users: Arc<dyn UserClient>,
    channel: Arc<dyn ChannelClient>,
}

impl NotificationService {
    pub fn new(users: Arc<dyn UserClient>, channel: Arc<dyn ChannelClient>) -> Self {
        Self { users, channel }
    }

    #[tracing::instrument(
        skip(self, event),
        fields(event_type = E::EVENT_TYPE, event_id = %event.event_id(), order_id = %event.order_id())
    )]
    pub async fn notify<E: Notice>(&self, event: &E) -> Result<Delivery> {
        let profile = self.users.get_user(event.recipient()).await?;

        let provider = self.channel.provider();
        let Some(channel) = profile.channel(provider) else {
            metrics::counter!("notifications_skipped_total", "event_type" => E::EVENT_TYPE)
                .increment(1);
            debug!(provider, "User has no channel for provider, skipping");
            return Ok(Delivery::NotSubscribed);
        };

        self.channel
            .send_message(&channel.target, &event.render())
            .await?;

        metrics::counter!("notifications_sent_total", "event_type" => E::EVENT_TYPE).increment(1);
        info!(provider, "Notification sent");
        Ok(Delivery::Sent)
    }

    async fn handle_event<E: Notice>(&self, message: &Message) -> Result<()> {
        let event: E = decode_message(message).inspect_err(|err| {
            error!(%message, event_type = E::EVENT_TYPE, error = %err, "Rejecting undecodable event");
        })?;

        self.notify(&event).await.inspect_err(|err| {
            warn!(
                event_type = E::EVENT_TYPE,
                event_id = %event.event_id(),
                order_id = %event.order_id(),
                kind = %err.kind(),
                error = %err,
                "Notification failed"
            );
        })?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for NotificationService {
    async fn handle(
        &self,
        message: &Message,
        _shutdown: &Shutdown,
    ) -> std::result::Result<(), HandlerError> {
        match message.topic.as_str() {
            topics::ORDER_PAID => self.handle_event::<OrderPaid>(message).await?,
            topics::SHIP_ASSEMBLED => self.handle_event::<ShipAssembled>(message).await?,
            other => {
                return Err(FulfillmentError::validation(format!(
                    "no notification template for topic {other}"
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{
        InMemoryChannelClient, InMemoryUserClient, NotificationChannel, UserProfile,
    };
    use crate::error::ErrorKind;
    use common::{OrderId, TransactionId};
    use domain::{PaymentDetails, PaymentMethod, encode_event};
    use event_bus::shutdown;

    struct Harness {
        service: NotificationService,
        users: InMemoryUserClient,
        channel: InMemoryChannelClient,
    }

    fn harness() -> Harness {
        let users = InMemoryUserClient::new();
        let channel = InMemoryChannelClient::new(TELEGRAM_PROVIDER);
        Harness {
            service: NotificationService::new(Arc::new(users.clone()), Arc::new(channel.clone())),
            users,
            channel,
        }
    }

    fn subscribed(users: &InMemoryUserClient) -> UserId {
        let user_id = UserId::new();
        users.register(
            user_id,
            UserProfile {
                login: "bob".to_string(),
                notification_channels: vec![
                    NotificationChannel::new("email", "bob@example.com"),
                    NotificationChannel::new(TELEGRAM_PROVIDER, "777"),
                ],
            },
        );
        user_id
    }

    fn paid(user_id: UserId) -> OrderPaid {
        OrderPaid::new(
            OrderId::new(),
            user_id,
            PaymentDetails {
                method: PaymentMethod::Card,
                transaction_id: TransactionId::new(),
            },
        )
    }

    fn message<E: DomainEvent>(topic: &str, event: &E) -> Message {
        Message {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: event.partition_key(),
            payload: encode_event(event).unwrap(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_templates_per_event_type() {
        let h = harness();
        let user_id = subscribed(&h.users);
        let paid = paid(user_id);
        let assembled = ShipAssembled::new(paid.order_id, user_id, 7);

        assert_eq!(h.service.notify(&paid).await.unwrap(), Delivery::Sent);
        assert_eq!(h.service.notify(&assembled).await.unwrap(), Delivery::Sent);

        let sent = h.channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.target == "777"));
        assert!(sent[0].text.contains("has been paid with CARD"));
        assert!(sent[1].text.contains("assembled in 7 s"));
    }

    #[tokio::test]
    async fn test_user_without_channel_is_skipped() {
        let h = harness();
        let user_id = UserId::new();
        h.users.register(user_id, UserProfile::default());

        assert_eq!(
            h.service.notify(&paid(user_id)).await.unwrap(),
            Delivery::NotSubscribed
        );
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_and_delivery_failures_surface() {
        let h = harness();

        let err = h.service.notify(&paid(UserId::new())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let user_id = subscribed(&h.users);
        h.channel.set_fail_on_send(true);
        let err = h.service.notify(&paid(user_id)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable_users_are_not_skipped() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();

        // An unknown user is an error, not an absent subscription.
        let unknown = paid(UserId::new());
        let err = h.service.notify(&unknown).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::UserNotFound(id) if id == unknown.user_id));
        assert!(
            h.service
                .handle(&message(topics::ORDER_PAID, &unknown), &shutdown)
                .await
                .is_err()
        );

        let user_id = subscribed(&h.users);
        h.users.set_fail_on_get(true);
        let err = h.service.notify(&paid(user_id)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(
            h.service
                .handle(&message(topics::ORDER_PAID, &paid(user_id)), &shutdown)
                .await
                .is_err()
        );
        assert!(h.channel.sent().is_empty());

        h.users.set_fail_on_get(false);
        assert_eq!(h.service.notify(&paid(user_id)).await.unwrap(), Delivery::Sent);
    }

    #[tokio::test]
    async fn test_handler_dispatches_on_topic() {
        let h = harness();
        let (_trigger, shutdown) = shutdown::channel();
        let user_id = subscribed(&h.users);
        let paid = paid(user_id);
        let assembled = ShipAssembled::new(paid.order_id, user_id, 2);

        h.service
            .handle(&message(topics::ORDER_PAID, &paid), &shutdown)
            .await
            .unwrap();
        h.service
            .handle(&message(topics::SHIP_ASSEMBLED, &assembled), &shutdown)
            .await
            .unwrap();
        assert_eq!(h.channel.sent().len(), 2);

        // An OrderPaid payload on the ShipAssembled topic does not decode.
        assert!(
            h.service
                .handle(&message(topics::SHIP_ASSEMBLED, &paid), &shutdown)
                .await
                .is_err()
        );
        assert!(
            h.service
                .handle(&message("unknown.topic", &paid), &shutdown)
                .await
                .is_err()
        );
    }
}
