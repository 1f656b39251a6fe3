use async_trait::async_trait;
use common::{OrderId, PartId, TransactionId, UserId};
use domain::{Money, Order, OrderRecord, OrderStatus, PaymentDetails, PaymentMethod};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::repository::INITIAL_VERSION;
use crate::{OrderRepository, Result, StoreError};

const ORDER_COLUMNS: &str = "order_id, user_id, part_ids, total_price_cents, status, \
     payment_method, transaction_id, version, created_at, updated_at";

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let part_ids: Vec<Uuid> = row.try_get("part_ids")?;
        let status: String = row.try_get("status")?;
        let payment_method: Option<String> = row.try_get("payment_method")?;
        let transaction_id: Option<Uuid> = row.try_get("transaction_id")?;

        let payment = match (payment_method, transaction_id) {
            (Some(method), Some(transaction_id)) => Some(PaymentDetails {
                method: method.parse::<PaymentMethod>()?,
                transaction_id: TransactionId::from_uuid(transaction_id),
            }),
            _ => None,
        };

        let record = OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            part_ids: part_ids.into_iter().map(PartId::from_uuid).collect(),
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            status: status.parse::<OrderStatus>()?,
            payment,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };

        Ok(Order::try_from(record)?)
    }
}

fn part_uuids(order: &Order) -> Vec<Uuid> {
    order.part_ids().iter().map(|id| id.as_uuid()).collect()
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert(&self, order: &Order) -> Result<i64> {
        let payment = order.payment();

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, part_ids, total_price_cents, status,
                                payment_method, transaction_id, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(part_uuids(order))
        .bind(order.total_price().cents())
        .bind(order.status().as_str())
        .bind(payment.map(|p| p.method.as_str()))
        .bind(payment.map(|p| p.transaction_id.as_uuid()))
        .bind(INITIAL_VERSION)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::DuplicateOrder(order.id());
            }
            StoreError::Database(e)
        })?;

        metrics::counter!("order_store_operations_total", "operation" => "insert").increment(1);
        Ok(INITIAL_VERSION)
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn update(&self, order: &Order) -> Result<i64> {
        let payment = order.payment();
        let new_version = order.version() + 1;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_method = $4, transaction_id = $5,
                version = $6, updated_at = $7
            WHERE order_id = $1 AND version = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.version())
        .bind(order.status().as_str())
        .bind(payment.map(|p| p.method.as_str()))
        .bind(payment.map(|p| p.transaction_id.as_uuid()))
        .bind(new_version)
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Either the order is gone or someone else moved it forward.
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM orders WHERE order_id = $1")
                    .bind(order.id().as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match actual {
                None => StoreError::OrderNotFound(order.id()),
                Some(actual) => StoreError::ConcurrencyConflict {
                    order_id: order.id(),
                    expected: order.version(),
                    actual,
                },
            });
        }

        tx.commit().await?;

        metrics::counter!("order_store_operations_total", "operation" => "update").increment(1);
        Ok(new_version)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        metrics::counter!("order_store_operations_total", "operation" => "get").increment(1);
        row.map(Self::row_to_order).transpose()
    }
}
