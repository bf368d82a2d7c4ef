use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Backend, Provider, QueryRequest, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{handle_response, token_count};

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let Some(usage) = data.get("usage") else {
            return Usage::default();
        };

        let input_tokens = token_count(usage, "input_tokens");
        let output_tokens = token_count(usage, "output_tokens");
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(&self, request: &QueryRequest) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": request.messages,
            "max_tokens": request
                .max_tokens
                .or(self.config.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !request.system.is_empty() {
            payload["system"] = json!(request.system);
        }
        if let Some(tools) = &request.tools {
            payload["tools"] = tools.clone();
            if let Some(choice) = &request.tool_choice {
                payload["tool_choice"] = choice.clone();
            }
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            payload["temperature"] = json!(temp);
        }

        payload
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn backend(&self) -> Backend {
        Backend::Anthropic
    }

    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)> {
        let payload = self.build_payload(request);
        tracing::debug!(model = %self.config.model, "Sending anthropic request");

        let response = self.post(payload).await?;
        let usage = Self::get_usage(&response);

        Ok((response, usage))
    }
}
