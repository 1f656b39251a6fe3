//! Payment client trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, TransactionId, UserId};
use domain::PaymentMethod;

use super::{read, write};
use crate::error::{FulfillmentError, Result};

/// Trait for charging customers.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Charges the user for the order and returns the transaction ID.
    async fn pay_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        method: PaymentMethod,
    ) -> Result<TransactionId>;
}

/// A charge recorded by [`InMemoryPaymentClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPayment {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub method: PaymentMethod,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: Vec<RecordedPayment>,
    fail_on_pay: bool,
}

/// In-memory payment service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentClient {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentClient {
    /// Creates a new in-memory payment client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the client to decline every charge.
    pub fn set_fail_on_pay(&self, fail: bool) {
        write(&self.state).fail_on_pay = fail;
    }

    /// Returns the number of successful charges.
    pub fn payment_count(&self) -> usize {
        read(&self.state).payments.len()
    }

    /// Returns the charges made for an order.
    pub fn payments_for(&self, order_id: OrderId) -> Vec<RecordedPayment> {
        read(&self.state)
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PaymentClient for InMemoryPaymentClient {
    async fn pay_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        method: PaymentMethod,
    ) -> Result<TransactionId> {
        let mut state = write(&self.state);

        if state.fail_on_pay {
            return Err(FulfillmentError::upstream("payment", "payment declined"));
        }

        let transaction_id = TransactionId::new();
        state.payments.push(RecordedPayment {
            order_id,
            user_id,
            method,
            transaction_id,
        });

        Ok(transaction_id)
    }
}
