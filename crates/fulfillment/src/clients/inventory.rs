//! Inventory client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::PartId;
use domain::Money;

use super::{read, write};
use crate::error::{FulfillmentError, Result};

/// A catalog part with its current unit price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub id: PartId,
    pub name: String,
    pub price: Money,
}

/// Trait for reading the parts catalog.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Returns the catalog entries for the given IDs.
    ///
    /// IDs with no catalog entry are simply absent from the result.
    async fn list_parts(&self, part_ids: &[PartId]) -> Result<Vec<Part>>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    parts: HashMap<PartId, Part>,
    calls: usize,
    fail_on_list: bool,
}

/// In-memory parts catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryClient {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryClient {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a part with a fresh ID and returns the ID.
    pub fn add_part(&self, name: impl Into<String>, price: Money) -> PartId {
        let part = Part {
            id: PartId::new(),
            name: name.into(),
            price,
        };
        let id = part.id;
        self.insert_part(part);
        id
    }

    /// Inserts or replaces a catalog entry.
    pub fn insert_part(&self, part: Part) {
        write(&self.state).parts.insert(part.id, part);
    }

    /// Changes the price of an existing part.
    pub fn set_price(&self, part_id: PartId, price: Money) {
        if let Some(part) = write(&self.state).parts.get_mut(&part_id) {
            part.price = price;
        }
    }

    /// Configures the client to fail every list call.
    pub fn set_fail_on_list(&self, fail: bool) {
        write(&self.state).fail_on_list = fail;
    }

    /// Returns the number of list calls made.
    pub fn call_count(&self) -> usize {
        read(&self.state).calls
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn list_parts(&self, part_ids: &[PartId]) -> Result<Vec<Part>> {
        let mut state = write(&self.state);
        state.calls += 1;

        if state.fail_on_list {
            return Err(FulfillmentError::upstream("inventory", "catalog unavailable"));
        }

        let mut found: Vec<Part> = Vec::new();
        for id in part_ids {
            if found.iter().any(|part| part.id == *id) {
                continue;
            }
            if let Some(part) = state.parts.get(id) {
                found.push(part.clone());
            }
        }
        Ok(found)
    }
}
