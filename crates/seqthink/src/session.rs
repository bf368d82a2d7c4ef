//! Per-request state of the loop.
//!
//! A [`Session`] owns the conversation for one request. Messages can only be
//! appended. Tool results feed the [`SideChannelBag`], which accumulates
//! citations, graphs and generated outputs until the collector turns them into
//! artifacts.

use std::collections::HashSet;

use crate::errors::SideChannelError;
use crate::models::artifact::{ArtifactDraft, BinaryOutput, Citation, KnowledgeGraph};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{step_signature, ToolCall, ToolResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideChannelBag {
    bibliography: Vec<Citation>,
    knowledge_graph: Option<KnowledgeGraph>,
    direct_artifacts: Vec<ArtifactDraft>,
    binary_outputs: Vec<BinaryOutput>,
    long_document: Option<String>,
}

impl SideChannelBag {
    pub fn bibliography(&self) -> &[Citation] {
        &self.bibliography
    }

    pub fn knowledge_graph(&self) -> Option<&KnowledgeGraph> {
        self.knowledge_graph.as_ref()
    }

    pub fn direct_artifacts(&self) -> &[ArtifactDraft] {
        &self.direct_artifacts
    }

    pub fn binary_outputs(&self) -> &[BinaryOutput] {
        &self.binary_outputs
    }

    pub fn long_document(&self) -> Option<&str> {
        self.long_document.as_deref()
    }

    /// Union the graph into the accumulated one
    pub fn merge_graph(&mut self, graph: &KnowledgeGraph) {
        match &mut self.knowledge_graph {
            Some(existing) => existing.merge(graph),
            None => self.knowledge_graph = Some(graph.clone()),
        }
    }

    /// Fold every side channel field of a tool result into the bag.
    ///
    /// Malformed contributions are dropped and returned; the rest of the result
    /// is still merged.
    pub fn merge_result(&mut self, result: &ToolResult) -> Vec<SideChannelError> {
        let mut dropped = Vec::new();

        if let Some(citations) = &result.bibliography {
            for citation in citations {
                if citation.id.trim().is_empty() {
                    dropped.push(SideChannelError::new(
                        "bibliography",
                        "citation without an id",
                    ));
                } else if !self.bibliography.iter().any(|c| c.id == citation.id) {
                    self.bibliography.push(citation.clone());
                }
            }
        }

        if let Some(raw) = &result.knowledge_graph {
            match serde_json::from_value::<KnowledgeGraph>(raw.clone()) {
                Ok(graph) => self.merge_graph(&graph),
                Err(e) => dropped.push(SideChannelError::new("knowledgeGraph", e.to_string())),
            }
        }

        if let Some(artifacts) = &result.artifacts {
            for artifact in artifacts {
                if artifact.is_knowledge_graph() {
                    match serde_json::from_str::<KnowledgeGraph>(&artifact.content) {
                        Ok(graph) => self.merge_graph(&graph),
                        Err(e) => dropped.push(SideChannelError::new("artifacts", e.to_string())),
                    }
                } else {
                    self.direct_artifacts.push(artifact.clone());
                }
            }
        }

        if let Some(output) = &result.binary_output {
            self.binary_outputs.push(output.clone());
        }

        if let Some(document) = &result.long_document {
            match &mut self.long_document {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(document);
                }
                None => self.long_document = Some(document.clone()),
            }
        }

        dropped
    }
}

/// Conversation, step signatures and side channel data for one request
#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<Message>,
    /// Step signatures of the assistant turns found in the history
    history_signatures: HashSet<String>,
    last_signature: Option<String>,
    previous_calls: Vec<ToolCall>,
    side_channel: SideChannelBag,
}

impl Session {
    /// Start from prior history. Each assistant turn that made calls seeds a step signature.
    pub fn new(history: Vec<Message>) -> Self {
        let mut session = Self::default();
        for message in history {
            if message.role == Role::Assistant {
                let calls: Vec<ToolCall> = message.tool_calls().into_iter().cloned().collect();
                if !calls.is_empty() {
                    session.history_signatures.insert(step_signature(&calls));
                    session.previous_calls.extend(calls);
                }
            }
            session.messages.push(message);
        }
        session
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True when the step repeats the step right before it. Before the first
    /// step of this request, any assistant turn of the history counts as that step.
    pub fn repeats_previous_step(&self, signature: &str) -> bool {
        match &self.last_signature {
            Some(last) => last == signature,
            None => self.history_signatures.contains(signature),
        }
    }

    pub fn record_step(&mut self, signature: String) {
        self.last_signature = Some(signature);
    }

    /// Remember an executed call for the system prompt
    pub fn record_call(&mut self, call: ToolCall) {
        self.previous_calls.push(call);
    }

    pub fn previous_calls(&self) -> &[ToolCall] {
        &self.previous_calls
    }

    /// Append the model's call and the tool's answer as a pair of messages
    pub fn push_exchange(&mut self, call: ToolCall, output: String, is_error: bool) {
        let id = call.id.clone();
        self.push(Message::assistant().with_tool_request(call));
        self.push(
            Message::user().with_content(MessageContent::tool_response(id, output, is_error)),
        );
    }

    pub fn side_channel(&self) -> &SideChannelBag {
        &self.side_channel
    }

    pub fn side_channel_mut(&mut self) -> &mut SideChannelBag {
        &mut self.side_channel
    }
}
