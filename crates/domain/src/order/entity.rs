//! Order entity implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, PartId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderStatus, PaymentDetails, PricedPart};

/// Order entity, the central record of the fulfillment saga.
///
/// The part list and the total price are fixed at creation. Payment details
/// are present exactly when the status is `Paid` or `Assembled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    part_ids: Vec<PartId>,
    total_price: Money,
    status: OrderStatus,
    payment: Option<PaymentDetails>,

    /// Optimistic concurrency counter. Zero until first persisted.
    version: i64,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Flat representation of a stored order, used to rebuild an [`Order`].
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub part_ids: Vec<PartId>,
    pub total_price: Money,
    pub status: OrderStatus,
    pub payment: Option<PaymentDetails>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order awaiting payment.
    ///
    /// The total is the sum of the resolved unit prices, captured once so that
    /// later catalog changes never alter an existing order.
    pub fn create(user_id: UserId, parts: &[PricedPart]) -> Result<Self, OrderError> {
        if parts.is_empty() {
            return Err(OrderError::NoParts);
        }

        let total_price = Money::checked_sum(parts.iter().map(|p| p.unit_price))
            .ok_or(OrderError::PriceOverflow)?;

        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            part_ids: parts.iter().map(|p| p.part_id).collect(),
            total_price,
            status: OrderStatus::PendingPayment,
            payment: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

impl TryFrom<OrderRecord> for Order {
    type Error = OrderError;

    fn try_from(record: OrderRecord) -> Result<Self, Self::Error> {
        let inconsistent = |reason: &str| OrderError::InconsistentRecord {
            order_id: record.id,
            reason: reason.to_string(),
        };

        if record.status == OrderStatus::Unspecified {
            return Err(inconsistent("status is unspecified"));
        }
        if record.part_ids.is_empty() {
            return Err(inconsistent("part list is empty"));
        }
        if record.payment.is_some() != record.status.requires_payment() {
            return Err(inconsistent(
                "payment details must be present exactly when paid or assembled",
            ));
        }

        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            part_ids: record.part_ids,
            total_price: record.total_price,
            status: record.status,
            payment: record.payment,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn part_ids(&self) -> &[PartId] {
        &self.part_ids
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the payment details, if the order has been paid.
    pub fn payment(&self) -> Option<&PaymentDetails> {
        self.payment.as_ref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Sets the version after a successful write.
    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Transitions
impl Order {
    /// Records a successful payment.
    pub fn pay(&mut self, payment: PaymentDetails) -> Result<(), OrderError> {
        self.ensure_can_pay()?;
        self.payment = Some(payment);
        self.transition(OrderStatus::Paid);
        Ok(())
    }

    /// Checks the payment guard without changing the order.
    ///
    /// Lets callers refuse before charging the customer.
    pub fn ensure_can_pay(&self) -> Result<(), OrderError> {
        self.ensure(self.status.can_pay(), "pay")
    }

    /// Records that the product has been assembled.
    pub fn mark_assembled(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_assemble(), "mark assembled")?;
        self.transition(OrderStatus::Assembled);
        Ok(())
    }

    /// Cancels an unpaid order.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.ensure(self.status.can_cancel(), "cancel")?;
        self.transition(OrderStatus::Cancelled);
        Ok(())
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                order_id: self.id,
                current_status: self.status,
                action,
            })
        }
    }

    fn transition(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
