use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Backend, Provider, QueryRequest, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{handle_response, token_count};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let input_tokens = token_count(data, "prompt_eval_count");
        let output_tokens = token_count(data, "eval_count");
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(&self, request: &QueryRequest) -> Value {
        let mut messages_array = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages_array.push(json!({"role": "system", "content": request.system}));
        }
        messages_array.extend(request.messages.iter().cloned());

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
            "stream": false,
        });

        if let Some(tools) = &request.tools {
            payload["tools"] = tools.clone();
        }

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = request.max_tokens.or(self.config.max_tokens) {
            options.insert("num_predict".to_string(), json!(tokens));
        }
        if !options.is_empty() {
            payload["options"] = Value::Object(options);
        }

        payload
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));

        let response = self.client.post(&url).json(&payload).send().await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn backend(&self) -> Backend {
        Backend::Ollama
    }

    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)> {
        let payload = self.build_payload(request);
        tracing::debug!(model = %self.config.model, "Sending ollama request");

        let response = self.post(payload).await?;
        let usage = Self::get_usage(&response);

        Ok((response, usage))
    }
}
