use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// A typed content block returned by a tool
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

/// The primary payload of a tool result. Tools may answer with a bare string
/// or with a list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Text(String),
    Blocks(Vec<Content>),
}

impl ToolContent {
    /// The first text payload, which is what gets folded back into the conversation
    pub fn first_text(&self) -> Option<&str> {
        match self {
            ToolContent::Text(text) => Some(text),
            ToolContent::Blocks(blocks) => blocks.iter().find_map(Content::as_text),
        }
    }
}

impl Default for ToolContent {
    fn default() -> Self {
        ToolContent::Blocks(Vec::new())
    }
}

impl From<String> for ToolContent {
    fn from(text: String) -> Self {
        ToolContent::Text(text)
    }
}

impl From<&str> for ToolContent {
    fn from(text: &str) -> Self {
        ToolContent::Text(text.to_string())
    }
}

impl From<Vec<Content>> for ToolContent {
    fn from(blocks: Vec<Content>) -> Self {
        ToolContent::Blocks(blocks)
    }
}
