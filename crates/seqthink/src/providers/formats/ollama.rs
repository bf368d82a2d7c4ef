use serde_json::{json, Value};
use uuid::Uuid;

use super::openai::tools_to_function_spec;
use super::{
    formatter_tool, select_formatter_call, FormatterAdapter, ToolCallAdapter, ToolChoice,
};
use crate::errors::FormatExtractionError;
use crate::models::message::{Message, MessageContent};
use crate::models::response::FormatterOutput;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::{parse_arguments, sanitize_function_name, text_at_pointers};

/// Ollama native chat api. Close to openai, but arguments are json objects,
/// there is a single `message` instead of `choices`, and no tool choice.
pub struct OllamaFormat;

impl ToolCallAdapter for OllamaFormat {
    fn tools_to_spec(&self, tools: &[Tool]) -> Value {
        tools_to_function_spec(tools)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        let Some(tool_calls) = response
            .pointer("/message/tool_calls")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        tool_calls
            .iter()
            .map(|tool_call| {
                let id = tool_call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                let arguments = match &tool_call["function"]["arguments"] {
                    Value::String(raw) => parse_arguments(raw),
                    Value::Null => json!({}),
                    other => other.clone(),
                };
                ToolCall::new(
                    id,
                    tool_call["function"]["name"].as_str().unwrap_or_default(),
                    arguments,
                )
            })
            .collect()
    }

    fn extract_text(&self, response: &Value) -> Option<String> {
        text_at_pointers(response, &["/message/content", "/response"])
    }

    fn messages_to_spec(&self, messages: &[Message]) -> Vec<Value> {
        let mut spec = Vec::new();

        for message in messages {
            let text = message.text();
            let tool_calls: Vec<Value> = message
                .tool_calls()
                .into_iter()
                .map(|call| {
                    json!({
                        "function": {
                            "name": sanitize_function_name(&call.name),
                            "arguments": call.arguments,
                        }
                    })
                })
                .collect();

            if !text.is_empty() || !tool_calls.is_empty() {
                let mut converted = json!({"role": message.role, "content": text});
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                spec.push(converted);
            }

            for content in &message.content {
                if let MessageContent::ToolResponse(response) = content {
                    let content = if response.is_error {
                        format!("Error: {}", response.content)
                    } else {
                        response.content.clone()
                    };
                    spec.push(json!({"role": "tool", "content": content}));
                }
            }
        }

        spec
    }

    fn tool_choice(&self, _choice: &ToolChoice) -> Option<Value> {
        None
    }
}

impl FormatterAdapter for OllamaFormat {
    fn formatter_tool(&self) -> Value {
        self.tools_to_spec(&[formatter_tool()])
    }

    fn extract_formatter_output(
        &self,
        response: &Value,
    ) -> Result<FormatterOutput, FormatExtractionError> {
        let calls = self.extract_tool_calls(response);
        let has_content = !calls.is_empty() || self.extract_text(response).is_some();
        select_formatter_call(has_content, calls)
    }
}
