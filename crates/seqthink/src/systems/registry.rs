use async_trait::async_trait;
use serde_json::Value;

use super::{System, ToolExecutor};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolResult};

const SEPARATOR: &str = "__";

/// A [`ToolExecutor`] over a set of [`System`]s.
///
/// Every tool is exposed as `{system}__{tool}`.
#[derive(Default)]
pub struct SystemRegistry {
    systems: Vec<Box<dyn System>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system to the registry. A later system with the same name is ignored.
    pub fn add_system(&mut self, system: Box<dyn System>) {
        if self.systems.iter().any(|s| s.name() == system.name()) {
            tracing::warn!(system = system.name(), "Ignoring duplicate system");
            return;
        }
        self.systems.push(system);
    }

    pub fn with_system(mut self, system: Box<dyn System>) -> Self {
        self.add_system(system);
        self
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|s| &**s)
    }

    /// Get all tools from all systems with proper system prefixing
    fn get_prefixed_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!("{}{}{}", system.name(), SEPARATOR, tool.name),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    fn get_system(&self, name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|sys| sys.name() == name)
            .map(|v| &**v)
    }
}

#[async_trait]
impl ToolExecutor for SystemRegistry {
    fn tools(&self) -> Vec<Tool> {
        self.get_prefixed_tools()
    }

    fn resolve(&self, name: &str) -> Option<(String, String)> {
        let (system_name, tool_name) = name.split_once(SEPARATOR)?;
        let system = self.get_system(system_name)?;
        system
            .tools()
            .iter()
            .any(|tool| tool.name == tool_name)
            .then(|| (system_name.to_string(), tool_name.to_string()))
    }

    async fn call_tool(&self, server: &str, tool: &str, input: Value) -> AgentResult<ToolResult> {
        let system = self
            .get_system(server)
            .ok_or_else(|| AgentError::ToolNotFound(format!("{}{}{}", server, SEPARATOR, tool)))?;
        system.call(tool, input).await
    }
}
