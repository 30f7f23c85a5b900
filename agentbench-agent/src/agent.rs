//! Agent loop - orchestrates model <-> tool rounds
//!
//! ```text
//! AwaitingModel -> AssemblingResponse -> ExecutingTools -> Done
//!       ^                                      |
//!       +--------------------------------------+  (tool calls requested)
//! ```
//!
//! The loop stops only when the model answers without tool calls. It has no
//! iteration bound of its own; callers that need one wrap `run` in a
//! deadline (see `trial::run_trial`).

use agentbench_core::error::from_provider;
use agentbench_core::{
    assemble, AssembledTurn, ChatMessage, CompletionRequest, Conversation, Fragment,
    FragmentCallback, LlmProvider, Result, ToolRegistry, Usage, UsageTracker,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. When the user asks you a question, if useful, you can make use of the tools available to you to answer.\nThe system will show you the result of any tool calls, and let you continue working until you decide you are done. \n";

/// Configuration for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Overrides the provider's default model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Stream responses fragment by fragment instead of one-shot completion
    pub stream: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            temperature: None,
            stream: true,
        }
    }
}

impl AgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// No task has been given yet
    Idle,
    AwaitingModel,
    AssemblingResponse,
    ExecutingTools,
    Done,
}

/// Counters for one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub rounds: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub usage: Usage,
}

/// Observer for every message appended to the conversation
pub type MessageCallback = Box<dyn Fn(&ChatMessage) + Send + Sync>;

/// The agent loop. Owns its conversation; one instance per task execution.
pub struct AgentLoop<P: LlmProvider> {
    provider: P,
    registry: ToolRegistry,
    config: AgentConfig,
    conversation: Conversation,
    state: LoopState,
    usage: UsageTracker,
    summary: RunSummary,
    on_fragment: Option<FragmentCallback>,
    on_message: Option<MessageCallback>,
}

impl<P: LlmProvider> AgentLoop<P> {
    pub fn new(provider: P, registry: ToolRegistry, config: AgentConfig) -> Self {
        let conversation = Conversation::new(config.system_prompt.clone());
        Self {
            provider,
            registry,
            config,
            conversation,
            state: LoopState::Idle,
            usage: UsageTracker::new(),
            summary: RunSummary::default(),
            on_fragment: None,
            on_message: None,
        }
    }

    /// Observe streamed fragments as they arrive (e.g. live printing)
    pub fn with_fragment_callback(mut self, callback: impl Fn(&Fragment) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Box::new(callback));
        self
    }

    /// Observe messages as they are appended
    pub fn with_message_callback(mut self, callback: impl Fn(&ChatMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Counters of the current or most recent run. Still meaningful after
    /// `run` failed or was cancelled part way.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Model used for requests: the configured override or the provider default
    pub fn model(&self) -> &str {
        self.config
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Run a task until the model stops requesting tools.
    ///
    /// A provider that fails to start a round aborts the run with an error;
    /// everything that goes wrong inside a tool is reported back to the
    /// model as the tool result instead.
    pub async fn run(&mut self, task: &str) -> Result<RunSummary> {
        self.append(ChatMessage::user(task))?;
        self.state = LoopState::AwaitingModel;

        self.summary = RunSummary::default();
        info!(model = %self.model(), tools = self.registry.len(), "starting task");

        loop {
            let turn = match self.next_turn().await {
                Ok(turn) => turn,
                Err(err) => {
                    warn!(error = %err, round = self.summary.rounds + 1, "model round failed to start");
                    return Err(err);
                }
            };
            self.summary.rounds += 1;

            if let Some(usage) = &turn.usage {
                let model = self.model().to_string();
                self.usage.track(&model, usage);
                self.summary.usage.prompt_tokens += usage.prompt_tokens;
                self.summary.usage.completion_tokens += usage.completion_tokens;
                self.summary.usage.total_tokens += usage.total_tokens;
            }
            if !turn.reasoning().is_empty() {
                debug!(reasoning = %turn.reasoning(), "model reasoning");
            }
            if turn.interrupted {
                warn!(round = self.summary.rounds, "model turn ended early");
            }

            let tool_calls = turn.tool_calls().to_vec();
            info!(
                round = self.summary.rounds,
                tool_calls = tool_calls.len(),
                finish_reason = ?turn.finish_reason,
                "model turn assembled"
            );
            self.append(turn.message)?;

            self.state = LoopState::ExecutingTools;
            if tool_calls.is_empty() {
                self.state = LoopState::Done;
                break;
            }

            for call in &tool_calls {
                self.summary.tool_calls += 1;
                let content = match self.registry.dispatch(call).await {
                    Ok(output) => {
                        debug!(tool = %call.name, call_id = %call.id, output = %truncate(&output, 200), "tool succeeded");
                        output
                    }
                    Err(err) => {
                        self.summary.tool_errors += 1;
                        warn!(tool = %call.name, call_id = %call.id, kind = %err.kind(), error = %err.message(), "tool call failed");
                        err.message().to_string()
                    }
                };
                self.append(ChatMessage::tool_result(&call.id, content))?;
            }

            self.state = LoopState::AwaitingModel;
        }

        info!(
            rounds = self.summary.rounds,
            tool_calls = self.summary.tool_calls,
            tool_errors = self.summary.tool_errors,
            "task finished"
        );
        Ok(self.summary.clone())
    }

    /// Answer every tool call still waiting for a result with `reason`, so
    /// the conversation stays well formed after `run` was cancelled mid-round.
    /// Returns the number of calls answered.
    pub fn cancel_pending(&mut self, reason: &str) -> Result<usize> {
        let pending: Vec<String> = self
            .conversation
            .pending_tool_calls()
            .iter()
            .map(|call| call.id.clone())
            .collect();
        for id in &pending {
            self.append(ChatMessage::tool_result(id, reason))?;
        }
        if !pending.is_empty() {
            warn!(calls = pending.len(), reason, "pending tool calls cancelled");
        }
        self.state = LoopState::Done;
        Ok(pending.len())
    }

    async fn next_turn(&mut self) -> Result<AssembledTurn> {
        let mut request = CompletionRequest::new(self.conversation.messages().to_vec())
            .with_model(self.model())
            .with_tools(self.registry.catalog())
            .with_streaming(self.config.stream);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        if self.config.stream {
            let stream = self.provider.stream(request).await.map_err(from_provider)?;
            self.state = LoopState::AssemblingResponse;
            Ok(assemble(stream, self.on_fragment.as_ref()).await)
        } else {
            let response = self.provider.complete(request).await.map_err(from_provider)?;
            self.state = LoopState::AssemblingResponse;
            Ok(AssembledTurn::from(response))
        }
    }

    fn append(&mut self, message: ChatMessage) -> Result<()> {
        if let Some(callback) = &self.on_message {
            callback(&message);
        }
        self.conversation.push(message)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
