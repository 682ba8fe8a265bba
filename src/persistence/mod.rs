//! Message persistence seam and an in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ParleyError, Result};
use crate::types::{Message, StopReason, Usage};

/// Fields that change on an already persisted message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.usage.is_none() && self.cost.is_none() && self.stop_reason.is_none()
    }

    /// Write the set fields into `message`'s metadata.
    pub fn apply_to(&self, message: &mut Message) {
        if self.is_empty() {
            return;
        }
        let metadata = message.metadata_mut();
        if let Some(usage) = &self.usage {
            metadata.usage = Some(usage.clone());
        }
        if let Some(cost) = self.cost {
            metadata.cost = Some(cost);
        }
        if let Some(stop_reason) = self.stop_reason {
            metadata.stop_reason = Some(stop_reason);
        }
    }
}

/// Durable storage for conversation messages.
///
/// Failures are reported to the orchestrator, which logs them and carries on;
/// in-memory history is never rolled back because a write failed.
#[async_trait]
pub trait MessagePersistence: Send + Sync {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()>;

    async fn update(&self, session_id: &str, message_id: &str, patch: &MessagePatch)
        -> Result<()>;

    /// Remove a message pruned from history. Stores that cannot delete may
    /// keep the default no-op.
    async fn remove(&self, session_id: &str, message_id: &str) -> Result<()> {
        let _ = (session_id, message_id);
        Ok(())
    }
}

/// Process-local store keyed by session id.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored messages of a session, in append order.
    pub async fn load(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MessagePersistence for InMemoryPersistence {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let messages = sessions.entry(session_id.to_string()).or_default();
        if messages.iter().any(|stored| stored.id == message.id) {
            return Err(ParleyError::Persistence(format!(
                "message {} already stored in session {session_id}",
                message.id
            )));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn update(
        &self,
        session_id: &str,
        message_id: &str,
        patch: &MessagePatch,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let message = sessions
            .get_mut(session_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| {
                ParleyError::Persistence(format!(
                    "message {message_id} not found in session {session_id}"
                ))
            })?;
        patch.apply_to(message);
        Ok(())
    }

    async fn remove(&self, session_id: &str, message_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(messages) = sessions.get_mut(session_id) {
            messages.retain(|message| message.id != message_id);
        }
        Ok(())
    }
}
