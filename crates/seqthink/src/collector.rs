use serde::Serialize;

use crate::models::artifact::{
    Artifact, ArtifactDraft, BIBLIOGRAPHY_TYPE, KNOWLEDGE_GRAPH_TYPE, MARKDOWN_TYPE,
};
use crate::models::response::StoreFormat;
use crate::session::SideChannelBag;

/// Appends everything gathered outside the formatter to the final response.
///
/// Order is fixed: pinned artifacts, bibliography, knowledge graph, direct
/// artifacts, binary outputs, long document. Each gets a fresh id and the next
/// position. The conversation is left alone.
pub struct ArtifactCollector<'a> {
    pinned: &'a [Artifact],
    side_channel: &'a SideChannelBag,
}

impl<'a> ArtifactCollector<'a> {
    pub fn new(pinned: &'a [Artifact], side_channel: &'a SideChannelBag) -> Self {
        Self {
            pinned,
            side_channel,
        }
    }

    pub fn collect(&self, mut response: StoreFormat) -> StoreFormat {
        let drafts = self.drafts();
        if drafts.is_empty() {
            return response;
        }

        let artifacts = response.artifacts.get_or_insert_with(Vec::new);
        for draft in drafts {
            let position = artifacts.len();
            artifacts.push(draft.into_artifact(position));
        }
        response
    }

    fn drafts(&self) -> Vec<ArtifactDraft> {
        let bag = self.side_channel;
        let mut drafts: Vec<ArtifactDraft> = self
            .pinned
            .iter()
            // pinned graphs were merged into the session graph up front
            .filter(|artifact| !artifact.is_knowledge_graph())
            .map(Artifact::to_draft)
            .collect();

        if !bag.bibliography().is_empty() {
            if let Some(draft) = json_draft(BIBLIOGRAPHY_TYPE, "Bibliography", bag.bibliography()) {
                drafts.push(draft);
            }
        }

        if let Some(graph) = bag.knowledge_graph() {
            if let Some(draft) = json_draft(KNOWLEDGE_GRAPH_TYPE, "Knowledge Graph", graph) {
                drafts.push(draft);
            }
        }

        drafts.extend(bag.direct_artifacts().iter().cloned());
        drafts.extend(bag.binary_outputs().iter().map(|output| output.to_draft()));

        if let Some(document) = bag.long_document() {
            drafts.push(ArtifactDraft::new(MARKDOWN_TYPE, "Full Report", document));
        }

        drafts
    }
}

fn json_draft<T: Serialize + ?Sized>(artifact_type: &str, title: &str, value: &T) -> Option<ArtifactDraft> {
    match serde_json::to_string(value) {
        Ok(content) => Some(ArtifactDraft::new(artifact_type, title, content)),
        Err(e) => {
            tracing::warn!(artifact_type, error = %e, "Could not serialize side channel artifact");
            None
        }
    }
}
