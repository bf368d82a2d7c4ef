//! Conversions between the internal models and each backend's wire format.
//!
//! Every backend gets one adapter struct implementing both [`ToolCallAdapter`] and
//! [`FormatterAdapter`]. The agent picks the adapter once per request with [`format_for`]
//! and never inspects raw responses itself.
pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use indoc::indoc;
use serde_json::{json, Value};

use super::base::Backend;
use crate::errors::FormatExtractionError;
use crate::models::message::Message;
use crate::models::response::{FormatterOutput, StoreFormat};
use crate::models::tool::{Tool, ToolCall};

pub const FORMATTER_TOOL_NAME: &str = "response_formatter";

/// Provider neutral tool choice hint
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    /// The model decides whether to call a tool
    Auto,
    /// The model must call the named tool
    Tool(String),
}

pub trait ToolCallAdapter: Send + Sync {
    /// Convert the canonical catalog into the backend tool schema
    fn tools_to_spec(&self, tools: &[Tool]) -> Value;

    /// Pull tool invocations out of a raw response. An empty list means the model is done.
    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall>;

    /// Free text the model produced next to (or instead of) its tool calls
    fn extract_text(&self, response: &Value) -> Option<String>;

    /// Convert the session history into backend messages
    fn messages_to_spec(&self, messages: &[Message]) -> Vec<Value>;

    /// `None` when the backend has no notion of a tool choice
    fn tool_choice(&self, choice: &ToolChoice) -> Option<Value>;
}

pub trait FormatterAdapter: Send + Sync {
    /// The catalog containing only the formatter tool
    fn formatter_tool(&self) -> Value;

    fn extract_formatter_output(
        &self,
        response: &Value,
    ) -> Result<FormatterOutput, FormatExtractionError>;

    fn to_store_format(&self, output: FormatterOutput) -> StoreFormat {
        output.into_store_format()
    }
}

/// Both halves of a backend format
pub trait ModelFormat: ToolCallAdapter + FormatterAdapter {}

impl<T: ToolCallAdapter + FormatterAdapter> ModelFormat for T {}

pub fn format_for(backend: Backend) -> Box<dyn ModelFormat> {
    match backend {
        Backend::Anthropic => Box::new(anthropic::AnthropicFormat),
        Backend::OpenAi => Box::new(openai::OpenAiFormat),
        Backend::Gemini => Box::new(gemini::GeminiFormat),
        Backend::Ollama => Box::new(ollama::OllamaFormat),
    }
}

/// The canonical descriptor of the formatter tool
pub fn formatter_tool() -> Tool {
    Tool::new(
        FORMATTER_TOOL_NAME,
        indoc! {"
            Format the final answer for the user. Always call this tool exactly once with the
            complete response. Put prose into text segments and code, tables, documents or
            diagrams into artifact segments.
        "},
        json!({
            "type": "object",
            "properties": {
                "thinking": {
                    "type": "string",
                    "description": "Optional short summary of the reasoning behind the answer"
                },
                "conversation": {
                    "type": "array",
                    "description": "The answer as an ordered list of segments",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "enum": ["text", "artifact"]
                            },
                            "content": {
                                "type": "string",
                                "description": "Markdown text, for text segments"
                            },
                            "artifact": {
                                "type": "object",
                                "description": "The artifact, for artifact segments",
                                "properties": {
                                    "type": {"type": "string"},
                                    "title": {"type": "string"},
                                    "content": {"type": "string"},
                                    "language": {"type": "string"}
                                },
                                "required": ["type", "title", "content"]
                            }
                        },
                        "required": ["type"]
                    }
                }
            },
            "required": ["conversation"]
        }),
    )
}

/// Shared tail of every `extract_formatter_output`: pick the formatter call out of the
/// invocations a backend found and decode its arguments.
pub fn select_formatter_call(
    has_content: bool,
    calls: Vec<ToolCall>,
) -> Result<FormatterOutput, FormatExtractionError> {
    if !has_content {
        return Err(FormatExtractionError::EmptyResponse);
    }

    let Some(first) = calls.first() else {
        return Err(FormatExtractionError::MissingToolCall {
            expected: FORMATTER_TOOL_NAME.to_string(),
        });
    };

    let call = match calls.iter().find(|call| call.name == FORMATTER_TOOL_NAME) {
        Some(call) => call,
        None => {
            return Err(FormatExtractionError::WrongTool {
                expected: FORMATTER_TOOL_NAME.to_string(),
                found: first.name.clone(),
            })
        }
    };

    serde_json::from_value(call.arguments.clone())
        .map_err(|e| FormatExtractionError::InvalidInput(e.to_string()))
}
