//! Order persistence.
//!
//! The order service is the only writer of order records. Every update is
//! guarded by the order's version so concurrent writers cannot silently
//! overwrite each other.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;
pub use repository::OrderRepository;
