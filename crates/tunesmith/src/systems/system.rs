use async_trait::async_trait;
use thiserror::Error;

use crate::errors::AgentResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A provider of tools the agent can call on the user's behalf
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Usage notes the provider wants the model to see, empty when it has none
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given arguments
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// Failures talking to a tool provider
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("no response to '{method}' within {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}
