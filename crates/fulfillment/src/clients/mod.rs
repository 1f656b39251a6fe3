//! Contracts of the collaborators the saga calls synchronously, plus
//! in-memory implementations with failure injection and call recording.

pub mod channel;
pub mod inventory;
pub mod payment;
pub mod user;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use channel::{ChannelClient, InMemoryChannelClient, SentMessage};
pub use inventory::{InMemoryInventoryClient, InventoryClient, Part};
pub use payment::{InMemoryPaymentClient, PaymentClient, RecordedPayment};
pub use user::{InMemoryUserClient, NotificationChannel, UserClient, UserProfile};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
