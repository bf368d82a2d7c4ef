use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::models::tool::Tool;

lazy_static! {
    static ref INVALID_FUNCTION_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Backends only accept `[a-zA-Z0-9_-]+` as function names
pub fn sanitize_function_name(name: &str) -> String {
    INVALID_FUNCTION_CHARS.replace_all(name, "_").to_string()
}

/// Drop repeated tool names, keeping the first. Converting a catalog never fails.
pub fn unique_tools(tools: &[Tool]) -> Vec<&Tool> {
    let mut seen = HashSet::new();
    tools
        .iter()
        .filter(|tool| {
            let fresh = seen.insert(sanitize_function_name(&tool.name));
            if !fresh {
                tracing::warn!(tool = %tool.name, "Dropping duplicate tool name from catalog");
            }
            fresh
        })
        .collect()
}

/// Try each json pointer in turn and return the first non-empty string found
pub fn text_at_pointers(response: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|pointer| response.pointer(pointer))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Parse a json-encoded arguments string. Unparseable input is kept as a plain
/// string so the tool can reject it and the model can see why.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Could not interpret tool use parameters");
            Value::String(raw.to_string())
        }
    }
}

/// Map the response status the same way for every backend
pub async fn handle_response(payload: &Value, response: Response) -> Result<Value> {
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
            Err(anyhow!("Server error: {}", status))
        }
        status => {
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!(%payload, "Rejected payload");
            Err(anyhow!("Request failed: {} - {}", status, error_text))
        }
    }
}

/// Read `prompt_tokens`/`completion_tokens` style usage blocks
pub fn token_count(usage: &Value, key: &str) -> Option<i32> {
    usage.get(key).and_then(|v| v.as_i64()).map(|v| v as i32)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
