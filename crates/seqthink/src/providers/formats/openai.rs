use serde_json::{json, Value};

use super::{
    formatter_tool, select_formatter_call, FormatterAdapter, ToolCallAdapter, ToolChoice,
};
use crate::errors::FormatExtractionError;
use crate::models::message::{Message, MessageContent};
use crate::models::response::FormatterOutput;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::{
    parse_arguments, sanitize_function_name, text_at_pointers, unique_tools,
};

/// OpenAI chat completions: plain string content, `tool_calls` on the assistant
/// message and one `tool` role message per result
pub struct OpenAiFormat;

/// Tool catalog in the chat completions `function` shape, shared with ollama
pub fn tools_to_function_spec(tools: &[Tool]) -> Value {
    let spec: Vec<Value> = unique_tools(tools)
        .into_iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect();
    json!(spec)
}

impl ToolCallAdapter for OpenAiFormat {
    fn tools_to_spec(&self, tools: &[Tool]) -> Value {
        tools_to_function_spec(tools)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        let Some(tool_calls) = response
            .pointer("/choices/0/message/tool_calls")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        tool_calls
            .iter()
            .map(|tool_call| {
                let id = tool_call["id"].as_str().unwrap_or_default();
                let name = tool_call["function"]["name"].as_str().unwrap_or_default();
                let arguments = match &tool_call["function"]["arguments"] {
                    Value::String(raw) => parse_arguments(raw),
                    Value::Null => json!({}),
                    other => other.clone(),
                };
                ToolCall::new(id, name, arguments)
            })
            .collect()
    }

    fn extract_text(&self, response: &Value) -> Option<String> {
        text_at_pointers(response, &["/choices/0/message/content", "/choices/0/text"])
    }

    fn messages_to_spec(&self, messages: &[Message]) -> Vec<Value> {
        let mut messages_spec = Vec::new();

        for message in messages {
            let mut converted = json!({
                "role": message.role
            });

            let mut output = Vec::new();

            for content in &message.content {
                match content {
                    MessageContent::Text(text) => {
                        if !text.text.is_empty() {
                            converted["content"] = json!(text.text);
                        }
                    }
                    MessageContent::ToolRequest(request) => {
                        let tool_call = json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&request.tool_call.name),
                                "arguments": request.tool_call.arguments.to_string(),
                            }
                        });
                        match converted.get_mut("tool_calls").and_then(Value::as_array_mut) {
                            Some(tool_calls) => tool_calls.push(tool_call),
                            None => converted["tool_calls"] = json!([tool_call]),
                        }
                    }
                    MessageContent::ToolResponse(response) => {
                        let content = if response.is_error {
                            format!("Error: {}", response.content)
                        } else {
                            response.content.clone()
                        };
                        output.push(json!({
                            "role": "tool",
                            "content": content,
                            "tool_call_id": response.id
                        }));
                    }
                }
            }

            if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                output.insert(0, converted);
            }
            messages_spec.extend(output);
        }

        messages_spec
    }

    fn tool_choice(&self, choice: &ToolChoice) -> Option<Value> {
        Some(match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Tool(name) => json!({
                "type": "function",
                "function": {"name": name}
            }),
        })
    }
}

impl FormatterAdapter for OpenAiFormat {
    fn formatter_tool(&self) -> Value {
        self.tools_to_spec(&[formatter_tool()])
    }

    fn extract_formatter_output(
        &self,
        response: &Value,
    ) -> Result<FormatterOutput, FormatExtractionError> {
        let message = response.pointer("/choices/0/message");
        let has_text = message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty());
        let has_calls = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
            .is_some_and(|calls| !calls.is_empty());

        select_formatter_call(has_text || has_calls, self.extract_tool_calls(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::formats::FORMATTER_TOOL_NAME;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            }
        }],
        "usage": {
            "input_tokens": 10,
            "output_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let message = Message::user().with_text("Hello");
        let spec = OpenAiFormat.messages_to_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_with_tools() {
        let messages = vec![
            Message::assistant().with_tool_request(ToolCall::new(
                "call_1",
                "lookup",
                json!({"q": "x"}),
            )),
            Message::user().with_tool_response("call_1", "found it", false),
        ];
        let spec = OpenAiFormat.messages_to_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "assistant");
        assert_eq!(spec[0]["tool_calls"][0]["function"]["name"], "lookup");
        assert_eq!(
            spec[0]["tool_calls"][0]["function"]["arguments"],
            r#"{"q":"x"}"#
        );
        assert_eq!(spec[1]["role"], "tool");
        assert_eq!(spec[1]["tool_call_id"], "call_1");
        assert_eq!(spec[1]["content"], "found it");
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "Test parameter"
                    }
                },
                "required": ["input"]
            }),
        );

        let spec = OpenAiFormat.tools_to_spec(&[tool]);

        assert_eq!(spec.as_array().unwrap().len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
    }

    #[test]
    fn test_extract_tool_calls() {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        let calls = OpenAiFormat.extract_tool_calls(&response);
        assert_eq!(
            calls,
            vec![ToolCall::new("1", "example_fn", json!({"param": "value"}))]
        );
    }

    #[test]
    fn test_extract_tool_calls_json_decode_error() {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");

        let calls = OpenAiFormat.extract_tool_calls(&response);
        assert_eq!(calls[0].arguments, json!("invalid json {"));
    }

    #[test]
    fn test_extract_text_and_no_calls() {
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello!", "tool_calls": null}
            }]
        });
        assert!(OpenAiFormat.extract_tool_calls(&response).is_empty());
        assert_eq!(OpenAiFormat.extract_text(&response).as_deref(), Some("Hello!"));
    }

    #[test]
    fn test_extract_formatter_output() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": FORMATTER_TOOL_NAME,
                            "arguments": "{\"thinking\": \"t\", \"conversation\": [{\"type\": \"text\", \"content\": \"done\"}]}"
                        }
                    }]
                }
            }]
        });
        let output = OpenAiFormat.extract_formatter_output(&response).unwrap();
        assert_eq!(output.thinking.as_deref(), Some("t"));
        assert_eq!(output.conversation.len(), 1);
    }

    #[test]
    fn test_extract_formatter_output_failures() {
        assert_eq!(
            OpenAiFormat.extract_formatter_output(&json!({"choices": []})),
            Err(FormatExtractionError::EmptyResponse)
        );
        let text_only = json!({"choices": [{"message": {"content": "just text"}}]});
        assert!(matches!(
            OpenAiFormat.extract_formatter_output(&text_only),
            Err(FormatExtractionError::MissingToolCall { .. })
        ));
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        assert!(matches!(
            OpenAiFormat.extract_formatter_output(&response),
            Err(FormatExtractionError::WrongTool { .. })
        ));
    }
}
