//! These models represent the objects passed around by the agent loop
//!
//! There are several different related formats we need to interact with:
//! - anthropic messages/tools, sent from the agent to the LLM
//! - openai chat completion messages/tools, sent from the agent to the LLM
//! - gemini contents/function declarations, sent from the agent to the LLM
//! - ollama chat messages/tools, sent from the agent to the LLM
//! - tool results, sent from the tool executor back to the agent
//! - the store format, returned from the agent to the caller
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers in `providers::formats`. Because of the
//! need for compatibility, the internal models are not an exact match to any of these formats.
pub mod artifact;
pub mod content;
pub mod message;
pub mod response;
pub mod role;
pub mod tool;
