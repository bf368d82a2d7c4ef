use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::artifact::{ArtifactDraft, BinaryOutput, Citation};
use super::content::ToolContent;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The canonical name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON Schema object defining the expected parameters for the tool
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Backend assigned id, used to pair the call with its result
    pub id: String,
    /// The canonical name of the tool to execute
    pub name: String,
    /// The parameters for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, name: S, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// `name:{json}` identity of the call, independent of its id
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, canonical_json(&self.arguments))
    }
}

/// Compact json with object keys sorted, so equal inputs always render the same
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let fields: Vec<String> = sorted
                .into_iter()
                .map(|(key, value)| format!("{}:{}", Value::from(key.as_str()), canonical_json(value)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Join the signatures of every call made in one step
pub fn step_signature(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(ToolCall::signature)
        .collect::<Vec<_>>()
        .join("|")
}

/// What a tool hands back to the loop. Everything besides `content` is a
/// side channel contribution that accumulates across steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: ToolContent,
    /// Set when the tool reports a runtime failure inside its own content
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bibliography: Option<Vec<Citation>>,
    /// Kept as raw json; it is validated when merged into the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<ArtifactDraft>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_output: Option<BinaryOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_document: Option<String>,
}

impl ToolResult {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: ToolContent::Text(text.into()),
            ..Default::default()
        }
    }

    pub fn with_bibliography(mut self, bibliography: Vec<Citation>) -> Self {
        self.bibliography = Some(bibliography);
        self
    }

    pub fn with_knowledge_graph(mut self, graph: Value) -> Self {
        self.knowledge_graph = Some(graph);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactDraft) -> Self {
        self.artifacts.get_or_insert_with(Vec::new).push(artifact);
        self
    }

    pub fn with_binary_output(mut self, output: BinaryOutput) -> Self {
        self.binary_output = Some(output);
        self
    }

    pub fn with_long_document<S: Into<String>>(mut self, document: S) -> Self {
        self.long_document = Some(document.into());
        self
    }
}
