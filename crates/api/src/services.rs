//! Bootstrap: the dependency graph of the running process.

use std::sync::Arc;

use common::UserId;
use domain::Money;
use event_bus::{Consumer, ConsumerConfig, InMemoryLog, MessageHandler, ShutdownTrigger};
use fulfillment::{
    AssemblyConfig, AssemblyService, EventPublisher, InMemoryChannelClient,
    InMemoryInventoryClient, InMemoryPaymentClient, InMemoryUserClient, NotificationChannel,
    NotificationService, OrderService, Part, ShipAssembledHandler, TELEGRAM_PROVIDER, UserProfile,
    topics,
};
use order_store::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository, StoreError};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::lifecycle::{ConsumerTask, Step, Teardown};
use crate::routes::orders::AppState;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Failed to prepare order store: {0}")]
    Store(#[from] StoreError),
}

/// Every long-lived component, built once at startup.
pub struct Services {
    pub orders: OrderService,
    pub log: InMemoryLog,
    pub inventory: InMemoryInventoryClient,
    pub payment: InMemoryPaymentClient,
    pub users: InMemoryUserClient,
    pub channel: InMemoryChannelClient,
    order_paid: EventPublisher,
    ship_assembled: EventPublisher,
    assembly: Arc<AssemblyService>,
    order_side: Arc<ShipAssembledHandler>,
    notification: Arc<NotificationService>,
    consumer_config: ConsumerConfig,
    pool: Option<PgPool>,
}

impl Services {
    /// Builds the graph, using PostgreSQL when `DATABASE_URL` is configured.
    pub async fn build(config: &Config) -> Result<Self, BootstrapError> {
        let Some(url) = config.database_url.as_deref() else {
            info!("DATABASE_URL not set, keeping orders in memory");
            return Ok(Self::in_memory(config));
        };

        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        let repository = PostgresOrderRepository::new(pool.clone());
        repository.run_migrations().await?;
        info!("Connected to PostgreSQL order store");

        Ok(Self::assemble(config, Arc::new(repository), Some(pool)))
    }

    /// Builds the graph with an in-memory order store.
    pub fn in_memory(config: &Config) -> Self {
        Self::assemble(config, Arc::new(InMemoryOrderRepository::new()), None)
    }

    fn assemble(
        config: &Config,
        repository: Arc<dyn OrderRepository>,
        pool: Option<PgPool>,
    ) -> Self {
        let log = InMemoryLog::new(config.event_partitions);
        let order_paid = EventPublisher::new(Arc::new(log.producer(topics::ORDER_PAID)));
        let ship_assembled = EventPublisher::new(Arc::new(log.producer(topics::SHIP_ASSEMBLED)));

        let inventory = InMemoryInventoryClient::new();
        let payment = InMemoryPaymentClient::new();
        let users = InMemoryUserClient::new();
        let channel = InMemoryChannelClient::new(TELEGRAM_PROVIDER);

        let orders = OrderService::new(
            repository,
            Arc::new(inventory.clone()),
            Arc::new(payment.clone()),
            order_paid.clone(),
        );
        let assembly = Arc::new(AssemblyService::new(
            ship_assembled.clone(),
            AssemblyConfig {
                time_unit: config.assembly_time_unit,
                ..AssemblyConfig::default()
            },
        ));
        let order_side = Arc::new(ShipAssembledHandler::new(orders.clone()));
        let notification = Arc::new(NotificationService::new(
            Arc::new(users.clone()),
            Arc::new(channel.clone()),
        ));

        let consumer_config = ConsumerConfig {
            retry_backoff: config.consumer_retry_backoff,
            ..ConsumerConfig::default()
        };

        Self {
            orders,
            log,
            inventory,
            payment,
            users,
            channel,
            order_paid,
            ship_assembled,
            assembly,
            order_side,
            notification,
            consumer_config,
            pool,
        }
    }

    /// Fills the catalog with a few parts so orders can be placed right away.
    pub fn seed_demo_catalog(&self) -> Vec<Part> {
        let catalog = [
            ("hull", Money::from_dollars(1200)),
            ("engine", Money::from_dollars(850)),
            ("wing", Money::from_dollars(300)),
            ("shield", Money::from_dollars(450)),
        ];

        catalog
            .into_iter()
            .map(|(name, price)| {
                let id = self.inventory.add_part(name, price);
                info!(part_id = %id, part = name, %price, "Catalog part available");
                Part {
                    id,
                    name: name.to_string(),
                    price,
                }
            })
            .collect()
    }

    /// Registers demo users: one subscribed to telegram, one without channels.
    pub fn seed_demo_users(&self) -> Vec<UserId> {
        let users = [
            ("demo", vec![NotificationChannel::new(TELEGRAM_PROVIDER, "100200300")]),
            ("quiet", Vec::new()),
        ];

        users
            .into_iter()
            .map(|(login, notification_channels)| {
                let user_id = UserId::new();
                info!(%user_id, login, channels = notification_channels.len(), "Demo user registered");
                self.users.register(
                    user_id,
                    UserProfile {
                        login: login.to_string(),
                        notification_channels,
                    },
                );
                user_id
            })
            .collect()
    }

    pub fn app_state(&self, trigger: &ShutdownTrigger) -> Arc<AppState> {
        Arc::new(AppState {
            orders: self.orders.clone(),
            shutdown: trigger.subscribe(),
        })
    }

    /// Starts one consumption loop per (service, topic).
    pub fn spawn_consumers(&self, trigger: &ShutdownTrigger) -> Vec<ConsumerTask> {
        let assembly: Arc<dyn MessageHandler> = self.assembly.clone();
        let order_side: Arc<dyn MessageHandler> = self.order_side.clone();
        let notification: Arc<dyn MessageHandler> = self.notification.clone();

        [
            (topics::ORDER_PAID, topics::ASSEMBLY_GROUP, assembly),
            (topics::SHIP_ASSEMBLED, topics::ORDER_GROUP, order_side),
            (
                topics::ORDER_PAID,
                topics::NOTIFICATION_GROUP,
                notification.clone(),
            ),
            (
                topics::SHIP_ASSEMBLED,
                topics::NOTIFICATION_GROUP,
                notification,
            ),
        ]
        .into_iter()
        .map(|(topic, group, handler)| {
            let consumer = self.log.consumer(topic, group, self.consumer_config.clone());
            let shutdown = trigger.subscribe();
            info!(%topic, %group, "Starting consumer");
            ConsumerTask {
                name: format!("{group}/{topic}"),
                handle: tokio::spawn(async move { consumer.consume(handler, shutdown).await }),
            }
        })
        .collect()
    }

    /// Resource release plan, registered in acquisition order.
    pub fn teardown(&self, config: &Config) -> Teardown {
        let mut teardown = Teardown::new(config.teardown_timeout);

        if let Some(pool) = self.pool.clone() {
            teardown.register(
                "database",
                vec![Step::new("close pool", async move {
                    pool.close().await;
                    Ok::<(), sqlx::Error>(())
                })],
            );
        }

        let publishers = [self.order_paid.clone(), self.ship_assembled.clone()];
        teardown.register(
            "event-log",
            publishers
                .into_iter()
                .map(|publisher| {
                    let name = format!("flush {}", publisher.topic());
                    Step::new(name, async move { publisher.flush().await })
                })
                .collect(),
        );

        teardown
    }
}
