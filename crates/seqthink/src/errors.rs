use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors local to a single tool call. None of these abort the loop.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// The mandatory formatter call was missing or malformed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatExtractionError {
    #[error("The model response had no content")]
    EmptyResponse,

    #[error("The model response did not invoke the {expected} tool")]
    MissingToolCall { expected: String },

    #[error("Expected a call to {expected} but the model called {found}")]
    WrongTool { expected: String, found: String },

    #[error("Could not interpret formatter input: {0}")]
    InvalidInput(String),
}

/// A side channel contribution from a tool could not be interpreted
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Dropped malformed {field}: {reason}")]
pub struct SideChannelError {
    pub field: &'static str,
    pub reason: String,
}

impl SideChannelError {
    pub fn new<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Hard failures of a request. These are the only errors that reach the caller.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    FormatExtraction(#[from] FormatExtractionError),

    #[error("Model query failed: {0}")]
    Model(String),

    #[error("Could not render prompt: {0}")]
    Prompt(#[from] tera::Error),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::FormatExtraction(_) => "format_extraction",
            RequestError::Model(_) => "model",
            RequestError::Prompt(_) => "prompt",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured error handed to the caller instead of a partial response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}
