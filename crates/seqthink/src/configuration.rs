use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::agent::AgentOptions;
use crate::providers::{
    anthropic,
    base::Backend,
    configs::{
        AnthropicProviderConfig, GeminiProviderConfig, OllamaProviderConfig, OpenAiProviderConfig,
        ProviderConfig,
    },
    gemini, ollama, openai,
};
use crate::termination::{DEFAULT_MAX_STEPS, DEFAULT_NEED_MORE_DATA_MARKER};

const ENV_PREFIX: &str = "SEQTHINK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// `provider.api_key` -> `SEQTHINK_PROVIDER__API_KEY`. Bare field names belong to the provider
/// section, the only one with required fields.
pub fn to_env_var(field_path: &str) -> String {
    let path = if field_path.contains('.') {
        field_path.to_string()
    } else {
        format!("provider.{}", field_path)
    };
    format!("{}_{}", ENV_PREFIX, path.replace('.', "__").to_uppercase())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Gemini {
        #[serde(default = "default_gemini_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_gemini_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn backend(&self) -> Backend {
        match self {
            ProviderSettings::Anthropic { .. } => Backend::Anthropic,
            ProviderSettings::OpenAi { .. } => Backend::OpenAi,
            ProviderSettings::Gemini { .. } => Backend::Gemini,
            ProviderSettings::Ollama { .. } => Backend::Ollama,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Gemini {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Gemini(GeminiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

/// Loop defaults; converted into the per-call [`AgentOptions`]
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    #[serde(default)]
    pub self_reasoning_tool: Option<String>,
    #[serde(default = "default_marker")]
    pub need_more_data_marker: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_steps: default_max_steps(),
            blocked_tools: Vec::new(),
            self_reasoning_tool: None,
            need_more_data_marker: default_marker(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl AgentSettings {
    pub fn to_options(&self) -> AgentOptions {
        AgentOptions {
            system_prompt: self.system_prompt.clone(),
            max_steps: self.max_steps,
            blocked_tools: self.blocked_tools.clone(),
            self_reasoning_tool: self.self_reasoning_tool.clone(),
            need_more_data_marker: self.need_more_data_marker.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            pinned_artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    pub provider: ProviderSettings,
}

impl Settings {
    /// Defaults overlaid with `SEQTHINK_` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the TOML file if given, then environment variables
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("agent.max_steps", default_max_steps() as i64)?
            .set_default("agent.need_more_data_marker", default_marker())?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("agent.blocked_tools")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_marker() -> String {
    DEFAULT_NEED_MORE_DATA_MARKER.to_string()
}

fn default_anthropic_host() -> String {
    anthropic::ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_openai_host() -> String {
    openai::OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_gemini_host() -> String {
    gemini::GEMINI_HOST.to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}
