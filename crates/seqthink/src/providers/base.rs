use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

/// The wire formats a model backend can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Accumulate usage across several queries
    pub fn add(&mut self, other: &Usage) {
        fn sum(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + b),
                (a, None) => a,
                (None, b) => b,
            }
        }
        self.input_tokens = sum(self.input_tokens, other.input_tokens);
        self.output_tokens = sum(self.output_tokens, other.output_tokens);
        self.total_tokens = sum(self.total_tokens, other.total_tokens);
    }
}

/// Everything a backend needs for one completion, already in its own wire format
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub system: String,
    /// Backend formatted history, the live prompt last
    pub messages: Vec<Value>,
    /// Backend formatted tool catalog, `None` when no tools are offered
    pub tools: Option<Value>,
    /// Backend formatted tool choice hint
    pub tool_choice: Option<Value>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

/// Base trait for model backends (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// The wire format this provider speaks, used to pick the matching format adapter
    fn backend(&self) -> Backend;

    /// Run one completion and hand back the raw response
    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)>;
}
