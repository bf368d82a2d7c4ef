use async_trait::async_trait;
use indoc::indoc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolResult};

pub const THINKING_SYSTEM_NAME: &str = "thinking";
pub const SEQUENTIAL_THINKING_TOOL: &str = "sequential_thinking";

/// Canonical name to configure as the loop's self-reasoning tool
pub fn self_reasoning_tool_name() -> String {
    format!("{}__{}", THINKING_SYSTEM_NAME, SEQUENTIAL_THINKING_TOOL)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThoughtInput {
    thought: String,
    thought_number: u32,
    total_thoughts: u32,
    next_thought_needed: bool,
}

/// Lets the model reason out loud one numbered thought at a time.
///
/// The tool keeps no state. It acknowledges the thought and reports whether
/// the model wants to continue, which the loop reads as its stop signal.
pub struct ThinkingSystem {
    tools: Vec<Tool>,
}

impl Default for ThinkingSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkingSystem {
    pub fn new() -> Self {
        let tool = Tool::new(
            SEQUENTIAL_THINKING_TOOL,
            indoc! {r#"
                Record one step of reasoning before deciding what to do next.
                Set nextThoughtNeeded to false once the reasoning is complete
                and no further tools are required.
            "#},
            json!({
                "type": "object",
                "required": ["thought", "thoughtNumber", "totalThoughts", "nextThoughtNeeded"],
                "properties": {
                    "thought": {"type": "string", "description": "The current thinking step"},
                    "thoughtNumber": {"type": "integer", "minimum": 1},
                    "totalThoughts": {"type": "integer", "minimum": 1},
                    "nextThoughtNeeded": {"type": "boolean"}
                }
            }),
        );
        Self { tools: vec![tool] }
    }

    fn record(&self, arguments: Value) -> AgentResult<ToolResult> {
        let input: ThoughtInput = serde_json::from_value(arguments)
            .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;

        if input.thought.trim().is_empty() {
            return Err(AgentError::InvalidParameters(
                "thought must not be empty".to_string(),
            ));
        }

        // the model may revise its estimate upwards mid-way
        let total_thoughts = input.total_thoughts.max(input.thought_number);
        tracing::debug!(
            thought_number = input.thought_number,
            total_thoughts,
            "Recorded thought"
        );

        let reply = json!({
            "thoughtNumber": input.thought_number,
            "totalThoughts": total_thoughts,
            "continue": input.next_thought_needed,
        });
        Ok(ToolResult::text(reply.to_string()))
    }
}

#[async_trait]
impl System for ThinkingSystem {
    fn name(&self) -> &str {
        THINKING_SYSTEM_NAME
    }

    fn description(&self) -> &str {
        "Structured step by step reasoning"
    }

    fn instructions(&self) -> &str {
        "Use sequential_thinking to plan before calling other tools."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> AgentResult<ToolResult> {
        match tool_name {
            SEQUENTIAL_THINKING_TOOL => self.record(arguments),
            _ => Err(AgentError::ToolNotFound(tool_name.to_string())),
        }
    }
}
