//! Notification channel client trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{read, write};
use crate::error::{FulfillmentError, Result};

/// Delivers text messages through one provider.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// The provider name users register channels under.
    fn provider(&self) -> &str;

    async fn send_message(&self, target: &str, text: &str) -> Result<()>;
}

/// A message delivered by [`InMemoryChannelClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub target: String,
    pub text: String,
}

#[derive(Debug, Default)]
struct InMemoryChannelState {
    sent: Vec<SentMessage>,
    fail_on_send: bool,
}

/// In-memory channel that records delivered messages.
#[derive(Debug, Clone)]
pub struct InMemoryChannelClient {
    provider: String,
    state: Arc<RwLock<InMemoryChannelState>>,
}

impl InMemoryChannelClient {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            state: Arc::default(),
        }
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        write(&self.state).fail_on_send = fail;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        read(&self.state).sent.clone()
    }
}

#[async_trait]
impl ChannelClient for InMemoryChannelClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn send_message(&self, target: &str, text: &str) -> Result<()> {
        let mut state = write(&self.state);

        if state.fail_on_send {
            return Err(FulfillmentError::upstream("channel", "delivery failed"));
        }

        state.sent.push(SentMessage {
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
