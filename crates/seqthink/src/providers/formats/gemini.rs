use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    formatter_tool, select_formatter_call, FormatterAdapter, ToolCallAdapter, ToolChoice,
};
use crate::errors::FormatExtractionError;
use crate::models::message::{Message, MessageContent};
use crate::models::response::FormatterOutput;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::{sanitize_function_name, text_at_pointers, unique_tools};

/// Gemini generateContent: `contents` with `parts`, `functionCall`/`functionResponse` parts
/// and a `model` role for the assistant
pub struct GeminiFormat;

impl GeminiFormat {
    fn parts(response: &Value) -> &[Value] {
        response
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl ToolCallAdapter for GeminiFormat {
    fn tools_to_spec(&self, tools: &[Tool]) -> Value {
        let declarations: Vec<Value> = unique_tools(tools)
            .into_iter()
            .map(|tool| {
                json!({
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "parameters": tool.input_schema,
                })
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        Self::parts(response)
            .iter()
            .filter_map(|part| part.get("functionCall"))
            .map(|call| {
                // Gemini does not always assign ids, but results are paired by id internally
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                ToolCall::new(
                    id,
                    call["name"].as_str().unwrap_or_default(),
                    call.get("args").cloned().unwrap_or_else(|| json!({})),
                )
            })
            .collect()
    }

    fn extract_text(&self, response: &Value) -> Option<String> {
        let texts: Vec<&str> = Self::parts(response)
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .collect();

        if !texts.is_empty() {
            return Some(texts.join("\n"));
        }
        text_at_pointers(response, &["/text"])
    }

    fn messages_to_spec(&self, messages: &[Message]) -> Vec<Value> {
        let mut contents = Vec::new();
        // functionResponse parts are matched by name, not by id
        let mut names_by_id: HashMap<&str, String> = HashMap::new();

        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => continue,
            };

            let parts: Vec<Value> = message
                .content
                .iter()
                .filter_map(|content| match content {
                    MessageContent::Text(text) if text.text.is_empty() => None,
                    MessageContent::Text(text) => Some(json!({"text": text.text})),
                    MessageContent::ToolRequest(request) => {
                        let name = sanitize_function_name(&request.tool_call.name);
                        names_by_id.insert(&request.id, name.clone());
                        Some(json!({
                            "functionCall": {
                                "name": name,
                                "args": request.tool_call.arguments,
                            }
                        }))
                    }
                    MessageContent::ToolResponse(response) => {
                        let name = names_by_id
                            .get(response.id.as_str())
                            .cloned()
                            .unwrap_or_else(|| response.id.clone());
                        let key = if response.is_error { "error" } else { "content" };
                        Some(json!({
                            "functionResponse": {
                                "name": name,
                                "response": { key: response.content },
                            }
                        }))
                    }
                })
                .collect();

            if !parts.is_empty() {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }

        contents
    }

    fn tool_choice(&self, choice: &ToolChoice) -> Option<Value> {
        Some(match choice {
            ToolChoice::Auto => json!({"functionCallingConfig": {"mode": "AUTO"}}),
            ToolChoice::Tool(name) => json!({
                "functionCallingConfig": {
                    "mode": "ANY",
                    "allowedFunctionNames": [name]
                }
            }),
        })
    }
}

impl FormatterAdapter for GeminiFormat {
    fn formatter_tool(&self) -> Value {
        self.tools_to_spec(&[formatter_tool()])
    }

    fn extract_formatter_output(
        &self,
        response: &Value,
    ) -> Result<FormatterOutput, FormatExtractionError> {
        let has_content = !Self::parts(response).is_empty();
        select_formatter_call(has_content, self.extract_tool_calls(response))
    }
}
