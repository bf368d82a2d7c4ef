use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Backend, Provider, QueryRequest, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{check_openai_context_length_error, handle_response, token_count};

pub const OPENAI_HOST: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Usage block shared by every chat completions compatible api
pub fn chat_completion_usage(data: &Value) -> Usage {
    let Some(usage) = data.get("usage") else {
        return Usage::default();
    };

    let input_tokens = token_count(usage, "prompt_tokens");
    let output_tokens = token_count(usage, "completion_tokens");
    let total_tokens = token_count(usage, "total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &QueryRequest) -> Value {
        // create messages array with system message first
        let mut messages_array = vec![json!({
            "role": "system",
            "content": request.system
        })];
        messages_array.extend(request.messages.iter().cloned());

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });

        if let Some(tools) = &request.tools {
            payload["tools"] = tools.clone();
            if let Some(choice) = &request.tool_choice {
                payload["tool_choice"] = choice.clone();
            }
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = request.max_tokens.or(self.config.max_tokens) {
            payload["max_tokens"] = json!(tokens);
        }

        payload
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn backend(&self) -> Backend {
        Backend::OpenAi
    }

    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)> {
        let payload = self.build_payload(request);
        tracing::debug!(model = %self.config.model, "Sending openai request");

        let response = self.post(payload).await?;

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err.into());
            }
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let usage = chat_completion_usage(&response);
        Ok((response, usage))
    }
}
