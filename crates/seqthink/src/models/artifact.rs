use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const BIBLIOGRAPHY_TYPE: &str = "application/vnd.bibliography";
pub const KNOWLEDGE_GRAPH_TYPE: &str = "application/vnd.knowledge-graph";
pub const MARKDOWN_TYPE: &str = "text/markdown";

/// An artifact as described by the model or a tool, before it has an id or position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ArtifactDraft {
    pub fn new<T, N, C>(artifact_type: T, title: N, content: C) -> Self
    where
        T: Into<String>,
        N: Into<String>,
        C: Into<String>,
    {
        Self {
            artifact_type: artifact_type.into(),
            title: title.into(),
            content: content.into(),
            language: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn is_knowledge_graph(&self) -> bool {
        self.artifact_type == KNOWLEDGE_GRAPH_TYPE
    }

    /// Give the draft a fresh id and its place in the response
    pub fn into_artifact(self, position: usize) -> Artifact {
        Artifact {
            id: Uuid::new_v4().to_string(),
            artifact_type: self.artifact_type,
            title: self.title,
            content: self.content,
            position,
            language: self.language,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub title: String,
    pub content: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Artifact {
    pub fn is_knowledge_graph(&self) -> bool {
        self.artifact_type == KNOWLEDGE_GRAPH_TYPE
    }

    /// Strip the id and position so the artifact can be placed again
    pub fn to_draft(&self) -> ArtifactDraft {
        ArtifactDraft {
            artifact_type: self.artifact_type.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            language: self.language.clone(),
        }
    }
}

/// Non-text output produced by a tool (plots, tables, files)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryOutput {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl BinaryOutput {
    pub fn to_draft(&self) -> ArtifactDraft {
        ArtifactDraft {
            artifact_type: self.output_type.clone(),
            title: self
                .title
                .clone()
                .unwrap_or_else(|| "Generated output".to_string()),
            content: self.data.clone(),
            language: self.language.clone(),
        }
    }
}

/// A bibliography entry. Only the identifier is interpreted; everything else is carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(alias = "pmid")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Citation {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl GraphLink {
    fn key(&self) -> (&str, &str, Option<&str>) {
        (&self.source, &self.target, self.label.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default, alias = "edges")]
    pub links: Vec<GraphLink>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }

    /// Set union: nodes keyed by id, links keyed by (source, target, label).
    /// The first occurrence of a key wins, so merging the same graph again is a no-op.
    pub fn merge(&mut self, other: &KnowledgeGraph) {
        for node in &other.nodes {
            if !self.nodes.iter().any(|existing| existing.id == node.id) {
                self.nodes.push(node.clone());
            }
        }
        for link in &other.links {
            if !self.links.iter().any(|existing| existing.key() == link.key()) {
                self.links.push(link.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: Value) -> KnowledgeGraph {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_citation_accepts_pmid() {
        let citation: Citation =
            serde_json::from_value(json!({"pmid": "123", "title": "A paper"})).unwrap();
        assert_eq!(citation.id, "123");
        assert_eq!(citation.fields["title"], json!("A paper"));
    }

    #[test]
    fn test_graph_accepts_edges_alias() {
        let g = graph(json!({
            "nodes": [{"id": "a"}, {"id": "b"}],
            "edges": [{"source": "a", "target": "b", "label": "treats"}]
        }));
        assert_eq!(g.links.len(), 1);
        assert_eq!(g.links[0].label.as_deref(), Some("treats"));
    }

    #[test]
    fn test_graph_merge_is_idempotent() {
        let g = graph(json!({
            "nodes": [{"id": "a", "name": "Aspirin"}, {"id": "b"}],
            "links": [{"source": "a", "target": "b", "label": "treats"}]
        }));

        let mut once = KnowledgeGraph::default();
        once.merge(&g);
        let mut twice = once.clone();
        twice.merge(&g);

        assert_eq!(once, twice);
        assert_eq!(twice.nodes.len(), 2);
        assert_eq!(twice.links.len(), 1);
    }

    #[test]
    fn test_graph_merge_unions_links_by_label() {
        let mut g = graph(json!({
            "nodes": [{"id": "a"}, {"id": "b"}],
            "links": [{"source": "a", "target": "b", "label": "treats"}]
        }));
        g.merge(&graph(json!({
            "nodes": [{"id": "b"}, {"id": "c"}],
            "links": [
                {"source": "a", "target": "b", "label": "causes"},
                {"source": "a", "target": "b", "label": "treats"}
            ]
        })));

        let ids: Vec<&str> = g.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(g.links.len(), 2);
    }

    #[test]
    fn test_draft_into_artifact_assigns_position() {
        let artifact = ArtifactDraft::new("text/csv", "Table", "a,b")
            .with_language("csv")
            .into_artifact(3);
        assert_eq!(artifact.position, 3);
        assert!(!artifact.id.is_empty());
        assert_eq!(artifact.language.as_deref(), Some("csv"));

        let serialized = serde_json::to_value(&artifact).unwrap();
        assert_eq!(serialized["type"], json!("text/csv"));
    }
}
