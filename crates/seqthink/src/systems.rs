use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolResult};

mod registry;
mod system;
mod thinking;

pub use registry::SystemRegistry;
pub use system::System;
pub use thinking::{self_reasoning_tool_name, ThinkingSystem};

/// Executes tools on behalf of the loop.
///
/// Tools are addressed by a canonical name; `resolve` splits it into the
/// server that owns the tool and the tool's local name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Every tool currently offered, under canonical names
    fn tools(&self) -> Vec<Tool>;

    /// Map a canonical name to `(server, tool)`, `None` when nothing owns it
    fn resolve(&self, name: &str) -> Option<(String, String)>;

    async fn call_tool(&self, server: &str, tool: &str, input: Value) -> AgentResult<ToolResult>;
}
