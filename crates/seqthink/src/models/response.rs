use serde::{Deserialize, Serialize};

use super::artifact::{Artifact, ArtifactDraft};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// One piece of the final answer, as emitted through the formatter tool
pub enum ConversationSegment {
    Text { content: String },
    Artifact { artifact: ArtifactDraft },
}

impl ConversationSegment {
    pub fn text<S: Into<String>>(content: S) -> Self {
        ConversationSegment::Text {
            content: content.into(),
        }
    }

    pub fn artifact(artifact: ArtifactDraft) -> Self {
        ConversationSegment::Artifact { artifact }
    }
}

/// The arguments of the formatter tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatterOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub conversation: Vec<ConversationSegment>,
}

impl FormatterOutput {
    pub fn from_text<S: Into<String>>(text: S) -> Self {
        Self {
            thinking: None,
            conversation: vec![ConversationSegment::text(text)],
        }
    }

    /// Join the text segments with blank lines, keep the artifacts in order
    pub fn into_store_format(self) -> StoreFormat {
        let mut texts = Vec::new();
        let mut artifacts = Vec::new();

        for segment in self.conversation {
            match segment {
                ConversationSegment::Text { content } => texts.push(content),
                ConversationSegment::Artifact { artifact } => {
                    let position = artifacts.len();
                    artifacts.push(artifact.into_artifact(position));
                }
            }
        }

        StoreFormat {
            thinking: self.thinking,
            conversation: Conversation::Text(texts.join("\n\n")),
            artifacts: if artifacts.is_empty() {
                None
            } else {
                Some(artifacts)
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Conversation {
    Text(String),
    Segments(Vec<ConversationSegment>),
}

impl Conversation {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Conversation::Text(text) => Some(text),
            Conversation::Segments(_) => None,
        }
    }
}

/// The terminal output of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub conversation: Conversation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
}

impl StoreFormat {
    pub fn artifact_count(&self) -> usize {
        self.artifacts.as_ref().map_or(0, Vec::len)
    }
}
