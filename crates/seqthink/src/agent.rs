use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn, Instrument};

use crate::collector::ArtifactCollector;
use crate::context::{RequestContext, StatusUpdate};
use crate::errors::RequestError;
use crate::models::artifact::{Artifact, KnowledgeGraph};
use crate::models::message::Message;
use crate::models::response::{FormatterOutput, StoreFormat};
use crate::models::tool::{step_signature, Tool, ToolCall};
use crate::prompt_template;
use crate::providers::base::{Provider, QueryRequest, Usage};
use crate::providers::formats::{format_for, ModelFormat, ToolChoice, FORMATTER_TOOL_NAME};
use crate::providers::utils::sanitize_function_name;
use crate::session::Session;
use crate::systems::ToolExecutor;
use crate::termination::{
    Decision, StepObservation, TerminationPolicy, TerminationReason, DEFAULT_MAX_STEPS,
    DEFAULT_NEED_MORE_DATA_MARKER,
};

/// Per-call configuration. The agent never reads global configuration itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub system_prompt: String,
    pub max_steps: usize,
    /// Canonical names hidden from the model and never executed
    pub blocked_tools: Vec<String>,
    /// Canonical name of the tool whose JSON answer carries a `continue` flag
    pub self_reasoning_tool: Option<String>,
    pub need_more_data_marker: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub pinned_artifacts: Vec<Artifact>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
            blocked_tools: Vec::new(),
            self_reasoning_tool: None,
            need_more_data_marker: DEFAULT_NEED_MORE_DATA_MARKER.to_string(),
            temperature: None,
            max_tokens: None,
            pinned_artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Prior conversation, oldest first
    pub history: Vec<Message>,
    /// The live user message
    pub message: Message,
    pub options: AgentOptions,
}

impl AgentRequest {
    pub fn new(message: Message) -> Self {
        Self {
            history: Vec::new(),
            message,
            options: AgentOptions::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }
}

/// How the loop went, for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub steps: usize,
    pub termination: TerminationReason,
    pub tool_executions: usize,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub response: StoreFormat,
    pub report: LoopReport,
}

/// Mutable state of one reply, dropped once the response is built
struct LoopState {
    session: Session,
    policy: TerminationPolicy,
    reasoning: Vec<String>,
    usage: Usage,
    steps: usize,
    tool_executions: usize,
}

impl LoopState {
    fn reasoning_text(&self) -> String {
        self.reasoning.join("\n\n")
    }
}

/// Agent drives a model through repeated tool calls until it has enough to answer
pub struct Agent {
    provider: Box<dyn Provider>,
    executor: Box<dyn ToolExecutor>,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider>, executor: Box<dyn ToolExecutor>) -> Self {
        Self { provider, executor }
    }

    /// Run the loop for one request and return the formatted answer.
    ///
    /// Only a failed or malformed final formatter call is an error; tool
    /// failures, unknown tools and malformed side channel data are reported on
    /// the status channel and the loop carries on.
    pub async fn reply(
        &self,
        request: AgentRequest,
        ctx: &RequestContext,
    ) -> Result<AgentReply, RequestError> {
        let span = tracing::info_span!("reply", request_id = %ctx.request_id);
        self.reply_inner(request, ctx).instrument(span).await
    }

    async fn reply_inner(
        &self,
        request: AgentRequest,
        ctx: &RequestContext,
    ) -> Result<AgentReply, RequestError> {
        let AgentRequest {
            history,
            message,
            options,
        } = request;
        let format = format_for(self.provider.backend());

        let mut state = LoopState {
            session: self.init_session(history, message, &options, ctx),
            policy: TerminationPolicy::new(options.max_steps, &options.need_more_data_marker),
            reasoning: Vec::new(),
            usage: Usage::default(),
            steps: 0,
            tool_executions: 0,
        };

        let mut termination = self.run_loop(format.as_ref(), &mut state, &options, ctx).await?;
        info!(
            reason = %termination,
            steps = state.steps,
            tool_executions = state.tool_executions,
            "Loop finished"
        );

        let response = if termination == TerminationReason::Cancelled {
            None
        } else {
            ctx.report(StatusUpdate::Terminated {
                reason: termination,
                steps: state.steps,
            });
            self.format_response(format.as_ref(), &mut state, &options, ctx)
                .await?
        };

        let response = match response {
            Some(response) => response,
            None => {
                // cancelled: answer with whatever reasoning was gathered
                termination = TerminationReason::Cancelled;
                ctx.report(StatusUpdate::Terminated {
                    reason: termination,
                    steps: state.steps,
                });
                FormatterOutput::from_text(state.reasoning_text()).into_store_format()
            }
        };

        let response =
            ArtifactCollector::new(&options.pinned_artifacts, state.session.side_channel())
                .collect(response);

        Ok(AgentReply {
            response,
            report: LoopReport {
                steps: state.steps,
                termination,
                tool_executions: state.tool_executions,
                usage: state.usage,
            },
        })
    }

    /// History, then pinned artifacts, then the live message
    fn init_session(
        &self,
        history: Vec<Message>,
        message: Message,
        options: &AgentOptions,
        ctx: &RequestContext,
    ) -> Session {
        let mut session = Session::new(history);

        for artifact in &options.pinned_artifacts {
            if artifact.is_knowledge_graph() {
                match serde_json::from_str::<KnowledgeGraph>(&artifact.content) {
                    Ok(graph) => session.side_channel_mut().merge_graph(&graph),
                    Err(e) => {
                        warn!(title = %artifact.title, error = %e, "Dropping pinned graph");
                        ctx.report(StatusUpdate::SideChannelDropped {
                            name: artifact.title.clone(),
                            error: e.to_string(),
                        });
                        continue;
                    }
                }
                session.push(Message::assistant().with_text(format!(
                    "I have loaded the knowledge graph \"{}\" and will build on it.",
                    artifact.title
                )));
            } else {
                session.push(Message::user().with_text(format!(
                    "Context artifact \"{}\" ({}):\n\n{}",
                    artifact.title, artifact.artifact_type, artifact.content
                )));
                session.push(Message::assistant().with_text(format!(
                    "I have read \"{}\" and will use it as context.",
                    artifact.title
                )));
            }
        }

        session.push(message);
        session
    }

    /// Tools offered this step, and a lookup from the names the backend sees back to canonical names
    fn catalog(&self, options: &AgentOptions) -> (Vec<Tool>, HashMap<String, String>) {
        let tools: Vec<Tool> = self
            .executor
            .tools()
            .into_iter()
            .filter(|tool| !options.blocked_tools.contains(&tool.name))
            .collect();

        let names = tools
            .iter()
            .map(|tool| (sanitize_function_name(&tool.name), tool.name.clone()))
            .collect();

        (tools, names)
    }

    async fn run_loop(
        &self,
        format: &dyn ModelFormat,
        state: &mut LoopState,
        options: &AgentOptions,
        ctx: &RequestContext,
    ) -> Result<TerminationReason, RequestError> {
        loop {
            state.steps += 1;
            let step = state.steps;
            ctx.report(StatusUpdate::StepStarted { step });
            debug!(step, "Starting step");

            let (catalog, names) = self.catalog(options);
            let system = prompt_template::system_prompt(
                &options.system_prompt,
                state.session.previous_calls(),
                &options.need_more_data_marker,
            )?;

            let tools = (!catalog.is_empty()).then(|| format.tools_to_spec(&catalog));
            let tool_choice = tools
                .as_ref()
                .and_then(|_| format.tool_choice(&ToolChoice::Auto));
            let query = QueryRequest {
                system,
                messages: format.messages_to_spec(state.session.messages()),
                tools,
                tool_choice,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            };

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                result = self.provider.complete(&query) => Some(result),
            };
            let raw = match outcome {
                None => return Ok(TerminationReason::Cancelled),
                Some(Ok((raw, usage))) => {
                    state.usage.add(&usage);
                    raw
                }
                Some(Err(e)) => {
                    warn!(step, error = %e, "Model query failed");
                    return Ok(TerminationReason::ModelError);
                }
            };

            let calls: Vec<ToolCall> = format
                .extract_tool_calls(&raw)
                .into_iter()
                .map(|call| match names.get(&call.name) {
                    Some(canonical) => ToolCall::new(call.id, canonical.as_str(), call.arguments),
                    None => call,
                })
                .collect();
            let text = format.extract_text(&raw);
            if let Some(text) = &text {
                state.reasoning.push(text.clone());
            }

            let signature = step_signature(&calls);
            let observation = StepObservation {
                step,
                text: text.as_deref(),
                call_count: calls.len(),
                repeated: !calls.is_empty() && state.session.repeats_previous_step(&signature),
            };
            if let Decision::Stop(reason) = state.policy.before_execution(observation) {
                return Ok(reason);
            }
            state.session.record_step(signature);

            if let Some(reason) = self.execute_calls(calls, &names, state, options, ctx).await {
                return Ok(reason);
            }

            if let Decision::Stop(reason) = state.policy.after_execution(step) {
                return Ok(reason);
            }
        }
    }

    /// Run the step's calls in order. Returns a reason when the loop must stop after them.
    async fn execute_calls(
        &self,
        calls: Vec<ToolCall>,
        names: &HashMap<String, String>,
        state: &mut LoopState,
        options: &AgentOptions,
        ctx: &RequestContext,
    ) -> Option<TerminationReason> {
        let mut stop = None;

        for call in calls {
            if ctx.is_cancelled() {
                return Some(TerminationReason::Cancelled);
            }

            if options.blocked_tools.contains(&call.name) {
                debug!(tool = %call.name, "Skipping blocked tool");
                ctx.report(StatusUpdate::ToolSkipped {
                    name: call.name.clone(),
                    reason: "blocked".to_string(),
                });
                continue;
            }

            let resolved = names
                .values()
                .any(|canonical| canonical == &call.name)
                .then(|| self.executor.resolve(&call.name))
                .flatten();
            let Some((server, tool)) = resolved else {
                warn!(tool = %call.name, "Skipping unresolved tool");
                ctx.report(StatusUpdate::ToolSkipped {
                    name: call.name.clone(),
                    reason: "unresolved".to_string(),
                });
                continue;
            };

            ctx.report(StatusUpdate::ToolStarted {
                name: call.name.clone(),
            });

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                result = self.executor.call_tool(&server, &tool, call.arguments.clone()) => Some(result),
            };
            let Some(result) = outcome else {
                return Some(TerminationReason::Cancelled);
            };
            state.tool_executions += 1;

            let (output, is_error) = match result {
                Ok(result) => {
                    let output = result.content.first_text().unwrap_or_default().to_string();
                    if result.is_error {
                        ctx.report(StatusUpdate::ToolFailed {
                            name: call.name.clone(),
                            error: output.clone(),
                        });
                    }
                    for dropped in state.session.side_channel_mut().merge_result(&result) {
                        warn!(tool = %call.name, error = %dropped, "Dropped side channel data");
                        ctx.report(StatusUpdate::SideChannelDropped {
                            name: call.name.clone(),
                            error: dropped.to_string(),
                        });
                    }
                    (output, result.is_error)
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    ctx.report(StatusUpdate::ToolFailed {
                        name: call.name.clone(),
                        error: e.to_string(),
                    });
                    (format!("Error: {}", e), true)
                }
            };

            if !is_error && options.self_reasoning_tool.as_deref() == Some(call.name.as_str()) {
                if let Some(should_continue) = continue_signal(&output) {
                    if let Decision::Stop(reason) = state.policy.self_reasoning(should_continue) {
                        stop = Some(reason);
                    }
                }
            }

            state.session.push_exchange(call.clone(), output, is_error);
            state.session.record_call(call);
        }

        stop
    }

    /// Ask for the final answer through the formatter tool. `None` when cancelled.
    async fn format_response(
        &self,
        format: &dyn ModelFormat,
        state: &mut LoopState,
        options: &AgentOptions,
        ctx: &RequestContext,
    ) -> Result<Option<StoreFormat>, RequestError> {
        let reasoning = state.reasoning_text();
        let instruction =
            prompt_template::formatter_prompt(FORMATTER_TOOL_NAME, Some(reasoning.as_str()))?;

        let mut messages = state.session.messages().to_vec();
        messages.push(Message::user().with_text(instruction));

        let query = QueryRequest {
            system: options.system_prompt.clone(),
            messages: format.messages_to_spec(&messages),
            tools: Some(format.formatter_tool()),
            tool_choice: format.tool_choice(&ToolChoice::Tool(FORMATTER_TOOL_NAME.to_string())),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = self.provider.complete(&query) => Some(result),
        };
        let Some(result) = outcome else {
            return Ok(None);
        };
        let (raw, usage) = result.map_err(|e| RequestError::Model(e.to_string()))?;
        state.usage.add(&usage);

        let output = format.extract_formatter_output(&raw)?;
        Ok(Some(format.to_store_format(output)))
    }
}

/// `continue` (or `nextThoughtNeeded`) from a self-reasoning tool's JSON answer
fn continue_signal(output: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(output).ok()?;
    value
        .get("continue")
        .or_else(|| value.get("nextThoughtNeeded"))
        .and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, AgentResult, FormatExtractionError};
    use crate::models::artifact::{ArtifactDraft, Citation, BIBLIOGRAPHY_TYPE, KNOWLEDGE_GRAPH_TYPE};
    use crate::models::response::Conversation;
    use crate::models::tool::ToolResult;
    use crate::providers::base::Backend;
    use crate::providers::mock::MockProvider;
    use crate::systems::{System, SystemRegistry, ThinkingSystem};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Records every call; `search` returns citations keyed by `ids`, `fail` errors
    #[derive(Clone, Default)]
    struct ResearchSystem {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
        tools: Vec<Tool>,
    }

    impl ResearchSystem {
        fn new() -> Self {
            let schema = json!({"type": "object"});
            Self {
                calls: Arc::default(),
                tools: vec![
                    Tool::new("search", "Searches the literature", schema.clone()),
                    Tool::new("fail", "Always fails", schema.clone()),
                    Tool::new("graph", "Returns a malformed graph", schema),
                ],
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl System for ResearchSystem {
        fn name(&self) -> &str {
            "research"
        }

        fn description(&self) -> &str {
            "A mock research system"
        }

        fn instructions(&self) -> &str {
            "Mock instructions"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_name: &str, arguments: Value) -> AgentResult<ToolResult> {
            self.calls
                .lock()
                .unwrap()
                .push((tool_name.to_string(), arguments.clone()));
            match tool_name {
                "search" => {
                    let citations = arguments["ids"]
                        .as_array()
                        .map(|ids| {
                            ids.iter()
                                .filter_map(Value::as_str)
                                .map(Citation::new)
                                .collect()
                        })
                        .unwrap_or_default();
                    Ok(ToolResult::text("found papers").with_bibliography(citations))
                }
                "fail" => Err(AgentError::ExecutionError("backend offline".to_string())),
                "graph" => Ok(ToolResult::text("graph")
                    .with_knowledge_graph(json!({"nodes": 3}))
                    .with_long_document("report")),
                _ => Err(AgentError::ToolNotFound(tool_name.to_string())),
            }
        }
    }

    fn tool_use(text: &str, calls: &[(&str, &str, Value)]) -> Value {
        let mut content = vec![json!({"type": "text", "text": text})];
        for (id, name, input) in calls {
            content.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
        }
        json!({"role": "assistant", "content": content, "stop_reason": "tool_use"})
    }

    fn text_reply(text: &str) -> Value {
        json!({"role": "assistant", "content": [{"type": "text", "text": text}], "stop_reason": "end_turn"})
    }

    fn formatter_reply(arguments: Value) -> Value {
        tool_use("", &[("fmt", FORMATTER_TOOL_NAME, arguments)])
    }

    fn formatted_text(text: &str) -> Value {
        formatter_reply(json!({"conversation": [{"type": "text", "content": text}]}))
    }

    fn agent(responses: Vec<Value>, system: ResearchSystem) -> Agent {
        let registry = SystemRegistry::new()
            .with_system(Box::new(system))
            .with_system(Box::new(ThinkingSystem::new()));
        Agent::new(
            Box::new(MockProvider::new(Backend::Anthropic, responses)),
            Box::new(registry),
        )
    }

    fn request(text: &str) -> AgentRequest {
        AgentRequest::new(Message::user().with_text(text))
    }

    fn options_with_marker() -> AgentOptions {
        AgentOptions {
            need_more_data_marker: "MORE:".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_text_only_answer_stops_after_one_step() {
        let system = ResearchSystem::new();
        let agent = agent(vec![text_reply("pong"), formatted_text("pong")], system.clone());

        let reply = agent.reply(request("ping"), &RequestContext::new()).await.unwrap();

        assert_eq!(reply.report.steps, 1);
        assert_eq!(reply.report.termination, TerminationReason::NoToolCalls);
        assert_eq!(reply.report.tool_executions, 0);
        assert_eq!(system.call_count(), 0);
        assert_eq!(reply.response.conversation, Conversation::Text("pong".to_string()));
        assert_eq!(reply.response.artifacts, None);

        let serialized = serde_json::to_value(&reply.response).unwrap();
        assert!(serialized.get("artifacts").is_none());
    }

    #[tokio::test]
    async fn test_repeated_step_stops_on_second_step() {
        let system = ResearchSystem::new();
        let call = ("c1", "research__search", json!({"query": "x"}));
        let agent = agent(
            vec![
                tool_use("MORE: looking", &[call.clone()]),
                tool_use("MORE: looking again", &[("c2", call.1, call.2.clone())]),
                formatted_text("done"),
            ],
            system.clone(),
        );

        let reply = agent
            .reply(request("q").with_options(options_with_marker()), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.steps, 2);
        assert_eq!(reply.report.termination, TerminationReason::NoProgress);
        assert_eq!(reply.report.tool_executions, 1);
        assert_eq!(system.call_count(), 1);
    }

    #[tokio::test]
    async fn test_returning_to_an_earlier_call_is_progress() {
        let system = ResearchSystem::new();
        let a = json!({"ids": ["a"]});
        let b = json!({"ids": ["b"]});
        let agent = agent(
            vec![
                tool_use("MORE: a", &[("c1", "research__search", a.clone())]),
                tool_use("MORE: b", &[("c2", "research__search", b)]),
                tool_use("MORE: a again", &[("c3", "research__search", a)]),
                tool_use("MORE: c", &[("c4", "research__search", json!({"ids": ["c"]}))]),
                text_reply("enough"),
                formatted_text("done"),
            ],
            system.clone(),
        );

        let reply = agent
            .reply(request("q").with_options(options_with_marker()), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::NoToolCalls);
        assert_eq!(reply.report.steps, 5);
        assert_eq!(reply.report.tool_executions, 4);
        assert_eq!(system.call_count(), 4);
    }

    #[tokio::test]
    async fn test_subset_of_previous_step_is_a_new_step() {
        let system = ResearchSystem::new();
        let a = ("c1", "research__search", json!({"ids": ["a"]}));
        let agent = agent(
            vec![
                tool_use(
                    "MORE: both",
                    &[a.clone(), ("c2", "research__search", json!({"ids": ["b"]}))],
                ),
                tool_use("MORE: just a", &[("c3", a.1, a.2.clone())]),
                text_reply("enough"),
                formatted_text("done"),
            ],
            system.clone(),
        );

        let reply = agent
            .reply(request("q").with_options(options_with_marker()), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::NoToolCalls);
        assert_eq!(reply.report.steps, 3);
        assert_eq!(reply.report.tool_executions, 3);
    }

    #[tokio::test]
    async fn test_call_from_history_counts_as_previous_step() {
        let system = ResearchSystem::new();
        let input = json!({"q": "x"});
        let history = vec![
            Message::user().with_text("look up x"),
            Message::assistant()
                .with_tool_request(ToolCall::new("h1", "research__search", input.clone())),
            Message::user().with_tool_response("h1", "found papers", false),
            Message::assistant().with_text("x is covered by two papers"),
        ];
        let agent = agent(
            vec![
                tool_use("MORE: again", &[("c1", "research__search", input)]),
                formatted_text("same as before"),
            ],
            system.clone(),
        );

        let reply = agent
            .reply(
                request("and x?").with_history(history).with_options(options_with_marker()),
                &RequestContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::NoProgress);
        assert_eq!(reply.report.steps, 1);
        assert_eq!(reply.report.tool_executions, 0);
        assert_eq!(system.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bibliography_is_deduplicated_into_one_artifact() {
        let system = ResearchSystem::new();
        let agent = agent(
            vec![
                tool_use("MORE: start", &[("c1", "research__search", json!({"ids": ["1", "2"]}))]),
                tool_use("MORE: more", &[("c2", "research__search", json!({"ids": ["2", "3"]}))]),
                text_reply("enough"),
                formatted_text("summary"),
            ],
            system.clone(),
        );

        let reply = agent
            .reply(request("q").with_options(options_with_marker()), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::NoToolCalls);
        let artifacts = reply.response.artifacts.unwrap();
        let bibliographies: Vec<&Artifact> = artifacts
            .iter()
            .filter(|a| a.artifact_type == BIBLIOGRAPHY_TYPE)
            .collect();
        assert_eq!(bibliographies.len(), 1);

        let citations: Vec<Citation> = serde_json::from_str(&bibliographies[0].content).unwrap();
        let ids: Vec<&str> = citations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_unresolved_and_blocked_tools_are_skipped() {
        let system = ResearchSystem::new();
        let agent = agent(
            vec![
                tool_use(
                    "trying",
                    &[
                        ("c1", "nowhere__tool", json!({})),
                        ("c2", "research__fail", json!({})),
                        ("c3", "research__search", json!({"ids": ["9"]})),
                    ],
                ),
                text_reply("done"),
                formatted_text("done"),
            ],
            system.clone(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new().with_status(tx);
        let options = AgentOptions {
            blocked_tools: vec!["research__fail".to_string()],
            ..Default::default()
        };
        let reply = agent.reply(request("q").with_options(options), &ctx).await.unwrap();

        assert_eq!(reply.report.tool_executions, 1);
        assert_eq!(system.call_count(), 1);

        let mut skipped = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let StatusUpdate::ToolSkipped { name, reason } = update {
                skipped.push((name, reason));
            }
        }
        assert_eq!(
            skipped,
            vec![
                ("nowhere__tool".to_string(), "unresolved".to_string()),
                ("research__fail".to_string(), "blocked".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_errors_are_folded_into_the_conversation() {
        let system = ResearchSystem::new();
        let provider = MockProvider::new(
            Backend::Anthropic,
            vec![
                tool_use("trying", &[("c1", "research__fail", json!({}))]),
                text_reply("it failed"),
                formatted_text("sorry"),
            ],
        );
        let registry = SystemRegistry::new().with_system(Box::new(system));
        let provider = Arc::new(provider);
        let agent = Agent::new(Box::new(SharedProvider(provider.clone())), Box::new(registry));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new().with_status(tx);
        let reply = agent.reply(request("q"), &ctx).await.unwrap();
        assert_eq!(reply.report.tool_executions, 1);

        // the second query carries the error as a tool result
        let requests = provider.requests();
        let messages = &requests[1].messages;
        let result_block = &messages[messages.len() - 1]["content"][0];
        assert_eq!(result_block["type"], "tool_result");
        assert_eq!(result_block["is_error"], json!(true));
        assert_eq!(
            result_block["content"],
            "Error: Tool execution failed: backend offline"
        );

        let failed = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|update| matches!(update, StatusUpdate::ToolFailed { .. }));
        assert!(failed);
    }

    #[tokio::test]
    async fn test_malformed_side_channel_is_dropped() {
        let system = ResearchSystem::new();
        let agent = agent(
            vec![
                tool_use("graph", &[("c1", "research__graph", json!({}))]),
                text_reply("done"),
                formatted_text("done"),
            ],
            system,
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new().with_status(tx);
        let reply = agent.reply(request("q"), &ctx).await.unwrap();

        let artifacts = reply.response.artifacts.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].content, "report");

        let dropped = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|update| matches!(update, StatusUpdate::SideChannelDropped { .. }));
        assert!(dropped);
    }

    #[tokio::test]
    async fn test_synthesis_step_then_stop() {
        let system = ResearchSystem::new();
        let agent = agent(
            vec![
                tool_use("start", &[("c1", "research__search", json!({"ids": ["1"]}))]),
                tool_use("probably enough", &[("c2", "research__search", json!({"ids": ["2"]}))]),
                tool_use("final check", &[("c3", "research__search", json!({"ids": ["3"]}))]),
                formatted_text("done"),
            ],
            system.clone(),
        );

        let reply = agent.reply(request("q"), &RequestContext::new()).await.unwrap();

        assert_eq!(reply.report.termination, TerminationReason::SynthesisComplete);
        assert_eq!(reply.report.steps, 3);
        assert_eq!(system.call_count(), 2);
    }

    #[tokio::test]
    async fn test_step_budget() {
        let system = ResearchSystem::new();
        let responses = (0..3)
            .map(|i| {
                tool_use(
                    "NEED MORE DATA: next",
                    &[("c", "research__search", json!({"ids": [i.to_string()]}))],
                )
            })
            .chain(std::iter::once(formatted_text("done")))
            .collect();
        let agent = agent(responses, system.clone());

        let options = AgentOptions {
            max_steps: 3,
            ..Default::default()
        };
        let reply = agent
            .reply(request("q").with_options(options), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::StepBudgetExhausted);
        assert_eq!(reply.report.steps, 3);
        assert_eq!(system.call_count(), 3);
    }

    #[tokio::test]
    async fn test_self_reasoning_tool_stops_the_loop() {
        let system = ResearchSystem::new();
        let thought = json!({
            "thought": "I have what I need",
            "thoughtNumber": 1,
            "totalThoughts": 1,
            "nextThoughtNeeded": false
        });
        let agent = agent(
            vec![
                tool_use("", &[("c1", "thinking__sequential_thinking", thought)]),
                formatted_text("done"),
            ],
            system,
        );

        let options = AgentOptions {
            self_reasoning_tool: Some(crate::systems::self_reasoning_tool_name()),
            ..Default::default()
        };
        let reply = agent
            .reply(request("q").with_options(options), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply.report.termination, TerminationReason::SelfReasoningComplete);
        assert_eq!(reply.report.tool_executions, 1);
    }

    #[tokio::test]
    async fn test_formatter_wrong_tool_is_a_hard_failure() {
        let agent = agent(
            vec![
                text_reply("answer"),
                tool_use("", &[("c1", "research__search", json!({}))]),
            ],
            ResearchSystem::new(),
        );

        let error = agent
            .reply(request("q"), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            RequestError::FormatExtraction(FormatExtractionError::WrongTool { .. })
        ));
        assert_eq!(error.to_response().kind, "format_extraction");
    }

    #[tokio::test]
    async fn test_termination_is_reported_when_formatting_fails() {
        let agent = agent(
            vec![text_reply("answer"), text_reply("no formatter call")],
            ResearchSystem::new(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new().with_status(tx);
        let error = agent.reply(request("q"), &ctx).await.unwrap_err();
        assert_eq!(error.kind(), "format_extraction");

        let terminated: Vec<StatusUpdate> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|update| matches!(update, StatusUpdate::Terminated { .. }))
            .collect();
        assert_eq!(
            terminated,
            vec![StatusUpdate::Terminated {
                reason: TerminationReason::NoToolCalls,
                steps: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_model_error_mid_loop_still_formats() {
        let provider = MockProvider::with_failures(
            Backend::Anthropic,
            vec![
                Some(tool_use("MORE: go", &[("c1", "research__search", json!({"ids": ["1"]}))])),
                None,
                Some(formatted_text("partial")),
            ],
        );
        let registry = SystemRegistry::new().with_system(Box::new(ResearchSystem::new()));
        let agent = Agent::new(Box::new(provider), Box::new(registry));

        let reply = agent.reply(request("q"), &RequestContext::new()).await.unwrap();
        assert_eq!(reply.report.termination, TerminationReason::ModelError);
        assert_eq!(reply.response.artifact_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request_keeps_partial_state() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let agent = agent(vec![text_reply("never")], ResearchSystem::new());

        let options = AgentOptions {
            pinned_artifacts: vec![ArtifactDraft::new("text/markdown", "Notes", "n").into_artifact(0)],
            ..Default::default()
        };
        let ctx = RequestContext::new().with_cancellation(cancel);
        let reply = agent.reply(request("q").with_options(options), &ctx).await.unwrap();

        assert_eq!(reply.report.termination, TerminationReason::Cancelled);
        assert_eq!(reply.response.artifact_count(), 1);
    }

    #[tokio::test]
    async fn test_pinned_artifacts_seed_the_conversation() {
        let provider = Arc::new(MockProvider::new(
            Backend::Anthropic,
            vec![text_reply("ok"), formatted_text("ok")],
        ));
        let agent = Agent::new(
            Box::new(SharedProvider(provider.clone())),
            Box::new(SystemRegistry::new()),
        );

        let options = AgentOptions {
            pinned_artifacts: vec![
                ArtifactDraft::new("text/markdown", "Notes", "BRCA1 notes").into_artifact(0),
                ArtifactDraft::new(KNOWLEDGE_GRAPH_TYPE, "Graph", r#"{"nodes": [{"id": "a"}]}"#)
                    .into_artifact(1),
            ],
            ..Default::default()
        };
        let history = vec![Message::user().with_text("earlier"), Message::assistant().with_text("reply")];
        let reply = agent
            .reply(
                request("live").with_history(history).with_options(options),
                &RequestContext::new(),
            )
            .await
            .unwrap();

        let first = &provider.requests()[0];
        assert!(first.tools.is_none());
        let roles: Vec<&str> = first.messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant", "assistant", "user"]);
        assert!(first.messages[2]["content"].as_str().unwrap().contains("BRCA1 notes"));
        assert_eq!(first.messages[5]["content"], "live");

        let types: Vec<&str> = reply
            .response
            .artifacts
            .as_ref()
            .unwrap()
            .iter()
            .map(|a| a.artifact_type.as_str())
            .collect();
        assert_eq!(types, vec!["text/markdown", KNOWLEDGE_GRAPH_TYPE]);
    }

    #[tokio::test]
    async fn test_previous_calls_reach_the_system_prompt() {
        let provider = Arc::new(MockProvider::new(
            Backend::Anthropic,
            vec![
                tool_use("MORE: go", &[("c1", "research__search", json!({"ids": ["1"]}))]),
                text_reply("done"),
                formatted_text("done"),
            ],
        ));
        let registry = SystemRegistry::new().with_system(Box::new(ResearchSystem::new()));
        let agent = Agent::new(Box::new(SharedProvider(provider.clone())), Box::new(registry));

        agent.reply(request("q"), &RequestContext::new()).await.unwrap();

        let requests = provider.requests();
        assert!(!requests[0].system.contains("research__search"));
        assert!(requests[1].system.contains(r#"research__search {"ids":["1"]}"#));
        assert_eq!(requests[2].tool_choice, Some(json!({"type": "tool", "name": FORMATTER_TOOL_NAME})));

        let last = requests[2].messages.last().unwrap();
        assert_eq!(last["role"], "user");
        assert!(last["content"].as_str().unwrap().contains(FORMATTER_TOOL_NAME));
    }

    #[test]
    fn test_continue_signal() {
        assert_eq!(continue_signal(r#"{"continue": false}"#), Some(false));
        assert_eq!(continue_signal(r#"{"nextThoughtNeeded": true}"#), Some(true));
        assert_eq!(continue_signal("plain text"), None);
    }

    /// Lets a test keep a handle on the provider it gave away
    struct SharedProvider(Arc<MockProvider>);

    #[async_trait]
    impl Provider for SharedProvider {
        fn backend(&self) -> Backend {
            self.0.backend()
        }

        async fn complete(&self, request: &QueryRequest) -> anyhow::Result<(Value, Usage)> {
            self.0.complete(request).await
        }
    }
}
