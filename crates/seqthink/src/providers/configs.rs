use super::base::Backend;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    OpenAi(OpenAiProviderConfig),
    Gemini(GeminiProviderConfig),
    Ollama(OllamaProviderConfig),
}

impl ProviderConfig {
    pub fn backend(&self) -> Backend {
        match self {
            ProviderConfig::Anthropic(_) => Backend::Anthropic,
            ProviderConfig::OpenAi(_) => Backend::OpenAi,
            ProviderConfig::Gemini(_) => Backend::Gemini,
            ProviderConfig::Ollama(_) => Backend::Ollama,
        }
    }
}

// Define specific config structs for each provider
#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}
