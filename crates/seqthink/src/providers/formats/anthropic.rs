use serde_json::{json, Value};

use super::{
    formatter_tool, select_formatter_call, FormatterAdapter, ToolCallAdapter, ToolChoice,
};
use crate::errors::FormatExtractionError;
use crate::models::message::{Message, MessageContent};
use crate::models::response::FormatterOutput;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::{sanitize_function_name, text_at_pointers, unique_tools};

/// Anthropic messages api: content block arrays, `tool_use`/`tool_result` blocks
pub struct AnthropicFormat;

impl AnthropicFormat {
    fn content_blocks(response: &Value) -> &[Value] {
        response
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl ToolCallAdapter for AnthropicFormat {
    fn tools_to_spec(&self, tools: &[Tool]) -> Value {
        let spec: Vec<Value> = unique_tools(tools)
            .into_iter()
            .map(|tool| {
                json!({
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        json!(spec)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        Self::content_blocks(response)
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .map(|block| {
                ToolCall::new(
                    block["id"].as_str().unwrap_or_default(),
                    block["name"].as_str().unwrap_or_default(),
                    block.get("input").cloned().unwrap_or_else(|| json!({})),
                )
            })
            .collect()
    }

    fn extract_text(&self, response: &Value) -> Option<String> {
        let texts: Vec<&str> = Self::content_blocks(response)
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .collect();

        if !texts.is_empty() {
            return Some(texts.join("\n"));
        }
        text_at_pointers(response, &["/completion", "/content/0/text"])
    }

    fn messages_to_spec(&self, messages: &[Message]) -> Vec<Value> {
        let mut spec = Vec::new();

        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                // The system prompt travels outside of the message list
                Role::System => continue,
            };

            if message.is_text_only() {
                let text = message.text();
                if !text.is_empty() {
                    spec.push(json!({"role": role, "content": text}));
                }
                continue;
            }

            let content: Vec<Value> = message
                .content
                .iter()
                .filter_map(|content| match content {
                    MessageContent::Text(text) if text.text.is_empty() => None,
                    MessageContent::Text(text) => Some(json!({
                        "type": "text",
                        "text": text.text,
                    })),
                    MessageContent::ToolRequest(request) => Some(json!({
                        "type": "tool_use",
                        "id": request.id,
                        "name": sanitize_function_name(&request.tool_call.name),
                        "input": request.tool_call.arguments,
                    })),
                    MessageContent::ToolResponse(response) => {
                        let mut block = json!({
                            "type": "tool_result",
                            "tool_use_id": response.id,
                            "content": response.content,
                        });
                        if response.is_error {
                            block["is_error"] = json!(true);
                        }
                        Some(block)
                    }
                })
                .collect();

            spec.push(json!({"role": role, "content": content}));
        }

        spec
    }

    fn tool_choice(&self, choice: &ToolChoice) -> Option<Value> {
        Some(match choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        })
    }
}

impl FormatterAdapter for AnthropicFormat {
    fn formatter_tool(&self) -> Value {
        self.tools_to_spec(&[formatter_tool()])
    }

    fn extract_formatter_output(
        &self,
        response: &Value,
    ) -> Result<FormatterOutput, FormatExtractionError> {
        let has_content = !Self::content_blocks(response).is_empty();
        select_formatter_call(has_content, self.extract_tool_calls(response))
    }
}
