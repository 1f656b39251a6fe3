//! Order endpoints: create, pay, read and cancel.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, PartId, TransactionId, UserId};
use domain::{Money, Order, PaymentMethod};
use event_bus::Shutdown;
use fulfillment::OrderService;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: OrderService,
    /// Observed by the health check.
    pub shutdown: Shutdown,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_uuid: UserId,
    pub part_uuids: Vec<PartId>,
}

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub payment_method: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_uuid: OrderId,
    /// Decimal dollars, e.g. `"350.00"`.
    pub total_price: String,
}

#[derive(Debug, Serialize)]
pub struct PayOrderResponse {
    pub transaction_uuid: TransactionId,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub order_uuid: OrderId,
    pub user_uuid: UserId,
    pub part_uuids: Vec<PartId>,
    pub total_price: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub transaction_uuid: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        let payment = order.payment();
        Self {
            order_uuid: order.id(),
            user_uuid: order.user_id(),
            part_uuids: order.part_ids().to_vec(),
            total_price: decimal(order.total_price()),
            status: order.status().to_string(),
            payment_method: payment.map(|p| p.method.to_string()),
            transaction_uuid: payment.map(|p| p.transaction_id),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

/// Renders an amount as exact decimal dollars.
fn decimal(amount: Money) -> String {
    let sign = if amount.cents() < 0 { "-" } else { "" };
    format!(
        "{sign}{}.{:02}",
        amount.dollars().unsigned_abs(),
        amount.cents_part()
    )
}

// -- Handlers --

/// POST /orders: prices the parts and stores an order awaiting payment.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let Json(req) = payload?;
    let created = state
        .orders
        .create_order(req.user_uuid, &req.part_uuids)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_uuid: created.order_id,
            total_price: decimal(created.total_price),
        }),
    ))
}

/// POST /orders/{id}/pay
#[tracing::instrument(skip(state, payload))]
pub async fn pay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<PayOrderRequest>, JsonRejection>,
) -> Result<Json<PayOrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let method: PaymentMethod = req
        .payment_method
        .parse()
        .map_err(|e: domain::OrderError| ApiError::BadRequest(e.to_string()))?;

    let transaction_uuid = state.orders.pay_order(order_id, method).await?;
    Ok(Json(PayOrderResponse { transaction_uuid }))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(OrderView::from(&order)))
}

/// DELETE /orders/{id}: cancels an order that has not been paid.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.orders.cancel_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let order_id: OrderId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id {id:?}: {e}")))?;
    if order_id.is_nil() {
        return Err(ApiError::BadRequest("order id is required".to_string()));
    }
    Ok(order_id)
}
