use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolResult};

/// Core trait that defines a system of tools the loop can operate
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools, named locally to the system
    fn tools(&self) -> &[Tool];

    /// Call one of this system's tools with the given arguments
    async fn call(&self, tool_name: &str, arguments: Value) -> AgentResult<ToolResult>;
}
