//! User service client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::UserId;

use super::{read, write};
use crate::error::{FulfillmentError, Result};

/// A channel the user has opted into, e.g. a telegram chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub provider: String,
    pub target: String,
}

impl NotificationChannel {
    pub fn new(provider: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub login: String,
    pub notification_channels: Vec<NotificationChannel>,
}

impl UserProfile {
    /// Returns the first channel registered for `provider`.
    pub fn channel(&self, provider: &str) -> Option<&NotificationChannel> {
        self.notification_channels
            .iter()
            .find(|channel| channel.provider == provider)
    }
}

/// Trait for resolving user profiles.
#[async_trait]
pub trait UserClient: Send + Sync {
    /// Fails with `UserNotFound` for unknown users.
    async fn get_user(&self, user_id: UserId) -> Result<UserProfile>;
}

#[derive(Debug, Default)]
struct InMemoryUserState {
    users: HashMap<UserId, UserProfile>,
    fail_on_get: bool,
}

/// In-memory user directory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserClient {
    state: Arc<RwLock<InMemoryUserState>>,
}

impl InMemoryUserClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: UserId, profile: UserProfile) {
        write(&self.state).users.insert(user_id, profile);
    }

    pub fn set_fail_on_get(&self, fail: bool) {
        write(&self.state).fail_on_get = fail;
    }
}

#[async_trait]
impl UserClient for InMemoryUserClient {
    async fn get_user(&self, user_id: UserId) -> Result<UserProfile> {
        let state = read(&self.state);

        if state.fail_on_get {
            return Err(FulfillmentError::upstream("user", "directory unavailable"));
        }

        state
            .users
            .get(&user_id)
            .cloned()
            .ok_or(FulfillmentError::UserNotFound(user_id))
    }
}
