use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Backend, Provider, QueryRequest, Usage};
use super::configs::GeminiProviderConfig;
use super::utils::{handle_response, token_count};

pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let Some(usage) = data.get("usageMetadata") else {
            return Usage::default();
        };

        Usage::new(
            token_count(usage, "promptTokenCount"),
            token_count(usage, "candidatesTokenCount"),
            token_count(usage, "totalTokenCount"),
        )
    }

    fn build_payload(&self, request: &QueryRequest) -> Value {
        let mut payload = json!({ "contents": request.messages });

        if !request.system.is_empty() {
            payload["systemInstruction"] = json!({"parts": [{"text": request.system}]});
        }
        if let Some(tools) = &request.tools {
            payload["tools"] = tools.clone();
            if let Some(choice) = &request.tool_choice {
                payload["toolConfig"] = choice.clone();
            }
        }

        let mut generation = serde_json::Map::new();
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            generation.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = request.max_tokens.or(self.config.max_tokens) {
            generation.insert("maxOutputTokens".to_string(), json!(tokens));
        }
        if !generation.is_empty() {
            payload["generationConfig"] = Value::Object(generation);
        }

        payload
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn backend(&self) -> Backend {
        Backend::Gemini
    }

    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)> {
        let payload = self.build_payload(request);
        tracing::debug!(model = %self.config.model, "Sending gemini request");

        let response = self.post(payload).await?;
        let usage = Self::get_usage(&response);

        Ok((response, usage))
    }
}
