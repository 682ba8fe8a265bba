//! Model stream client trait and request shapes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::InferenceConfig;
use crate::error::ParleyError;
use crate::types::{Message, StreamEvent};

/// Stream of protocol events for one model turn.
pub type EventStream = BoxStream<'static, Result<StreamEvent, ParleyError>>;

/// A request sent to the model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(default)]
    pub inference_config: InferenceConfig,
}

/// One entry of the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemBlock {
    Text { text: String },
    CachePoint,
}

/// Tools advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tools: Vec<ToolSpec>,
    /// Ask the provider to cache the tool definitions.
    #[serde(default)]
    pub cache_point: bool,
}

/// Tool definition sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Transport to a model backend.
///
/// Implementations must stop producing events and release the transport once
/// `cancel` fires; ending the stream or yielding [`ParleyError::Aborted`] are
/// both acceptable.
#[async_trait]
pub trait ModelStreamClient: Send + Sync {
    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ParleyError>;
}
