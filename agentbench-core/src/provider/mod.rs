//! # LLM Provider Interface
//!
//! A trait-based abstraction for communicating with LLM backends.
//!
//! ## Design
//! - `LlmProvider` trait: given a conversation and a tool catalog, produce
//!   either one complete response or an incremental stream of fragments
//! - `OpenAIProvider` speaks the OpenAI-compatible chat API (OpenAI, Groq,
//!   local servers)
//! - `ScriptedProvider` replays canned rounds for tests and dry runs
//! - Usage tracking

pub mod openai;
pub mod scripted;

pub use openai::OpenAIProvider;
pub use scripted::ScriptedProvider;

use crate::error::{Error, Result};
use crate::message::{ChatMessage, ToolCall};
use crate::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

// ============================================================================
// Core Types
// ============================================================================

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Offer a tool catalog. An empty catalog is not sent at all.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        if tools.is_empty() {
            self.tools = None;
            self.tool_choice = None;
        } else {
            self.tools = Some(tools);
            self.tool_choice = Some(ToolChoice::Auto);
        }
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

/// Response from a one-shot completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// One incremental piece of a streamed model response.
///
/// Each fragment carries at most one kind of payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Text content delta
    Text(String),
    /// Reasoning trace delta (observability only)
    Reasoning(String),
    /// Piece of a tool call, keyed by the call's index within the turn
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    /// End of turn
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    /// The transport broke mid-stream
    Error(String),
}

impl Fragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Fragment::Text(delta.into())
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Fragment::Reasoning(delta.into())
    }

    /// A complete tool call delivered in a single fragment
    pub fn tool_call(
        index: usize,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Fragment::ToolCallDelta {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_delta: Some(arguments.into()),
        }
    }

    /// A continuation piece of a tool call's argument string
    pub fn arguments(index: usize, delta: impl Into<String>) -> Self {
        Fragment::ToolCallDelta {
            index,
            id: None,
            name: None,
            arguments_delta: Some(delta.into()),
        }
    }

    pub fn done(finish_reason: FinishReason) -> Self {
        Fragment::Done {
            finish_reason,
            usage: None,
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request
    InvalidRequest(String),
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "groq")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a completion request and stream the response.
    ///
    /// An `Err` means the round never started. Failures after the first
    /// fragment arrive in-band as `Fragment::Error`.
    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError>;
}

impl<P: LlmProvider> LlmProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn default_model(&self) -> &str {
        (**self).default_model()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        (**self).complete(request).await
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        (**self).stream(request).await
    }
}

/// A lazy, finite sequence of fragments for one model turn
pub struct FragmentStream {
    inner: Pin<Box<dyn futures_core::Stream<Item = Fragment> + Send>>,
}

impl FragmentStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = Fragment> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream that yields the given fragments and ends
    pub fn from_fragments(fragments: Vec<Fragment>) -> Self {
        Self::new(futures_util::stream::iter(fragments))
    }
}

impl futures_core::Stream for FragmentStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Fragment>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    Groq,
    Local,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Groq => "groq",
            ProviderType::Local => "local",
        }
    }
}

impl ProviderConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some(OPENAI_BASE_URL.into()),
            default_model: Some("gpt-4o".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Groq,
            api_key: Some(api_key.into()),
            base_url: Some(GROQ_BASE_URL.into()),
            default_model: Some("llama-3.3-70b-versatile".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    /// A local OpenAI-compatible server (vLLM, Ollama, ...)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Local,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// - `AGENTBENCH_PROVIDER`: `groq` (default), `openai` or `local`
    /// - `GROQ_API_KEY` / `OPENAI_API_KEY`: required for the hosted providers
    /// - `AGENTBENCH_BASE_URL`: overrides the endpoint (required for `local`)
    /// - `AGENTBENCH_MODEL`: overrides the default model
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = lookup("AGENTBENCH_PROVIDER").unwrap_or_else(|| "groq".to_string());
        let base_url = lookup("AGENTBENCH_BASE_URL").filter(|s| !s.is_empty());
        let model = lookup("AGENTBENCH_MODEL").filter(|s| !s.is_empty());

        let require_key = |var: &'static str| {
            lookup(var).filter(|s| !s.is_empty()).ok_or_else(|| {
                Error::config_invalid(format!("{} is not set", var)).with_context("variable", var)
            })
        };

        let mut config = match provider.to_ascii_lowercase().as_str() {
            "groq" => Self::groq(require_key("GROQ_API_KEY")?),
            "openai" => Self::openai(require_key("OPENAI_API_KEY")?),
            "local" => {
                let url = base_url.clone().ok_or_else(|| {
                    Error::config_invalid("AGENTBENCH_BASE_URL is required for a local provider")
                })?;
                Self::local(url, model.clone().unwrap_or_else(|| "default".to_string()))
            }
            other => {
                return Err(Error::config_invalid(format!("unknown provider '{}'", other))
                    .with_context("variable", "AGENTBENCH_PROVIDER"))
            }
        };

        if let Some(url) = base_url {
            config.base_url = Some(url);
        }
        if let Some(model) = model {
            config.default_model = Some(model);
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gpt-4o")
            .with_temperature(0.7)
            .with_max_tokens(1000)
            .with_streaming(true);

        assert_eq!(request.model, Some("gpt-4o".into()));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert!(request.stream);
    }

    #[test]
    fn test_empty_catalog_is_omitted() {
        let request = CompletionRequest::new(vec![]).with_tools(vec![]);
        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());

        let request = CompletionRequest::new(vec![])
            .with_tools(vec![ToolDefinition::new("echo", "Echo text")]);
        assert_eq!(request.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("eos"), FinishReason::Unknown);
    }

    #[test]
    fn test_fragment_stream_yields_in_order() {
        let stream = FragmentStream::from_fragments(vec![
            Fragment::text("a"),
            Fragment::text("b"),
            Fragment::done(FinishReason::Stop),
        ]);
        let collected: Vec<Fragment> = tokio_test::block_on(stream.collect());
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0], Fragment::text("a"));
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::openai("sk-test");
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.default_model, Some("gpt-4o".into()));

        let config = ProviderConfig::groq("gsk-test").with_model("deepseek-r1-distill-llama-70b");
        assert_eq!(config.base_url.as_deref(), Some(GROQ_BASE_URL));
        assert_eq!(config.default_model.as_deref(), Some("deepseek-r1-distill-llama-70b"));
    }

    #[test]
    fn test_provider_config_from_lookup() {
        let env: HashMap<&str, &str> = [("GROQ_API_KEY", "gsk-test")].into_iter().collect();
        let config = ProviderConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.provider_type, ProviderType::Groq);
        assert_eq!(config.api_key.as_deref(), Some("gsk-test"));

        let env: HashMap<&str, &str> = [
            ("AGENTBENCH_PROVIDER", "local"),
            ("AGENTBENCH_BASE_URL", "http://localhost:8000/v1"),
            ("AGENTBENCH_MODEL", "qwen"),
        ]
        .into_iter()
        .collect();
        let config = ProviderConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.provider_type, ProviderType::Local);
        assert_eq!(config.default_model.as_deref(), Some("qwen"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_provider_config_missing_key() {
        let err = ProviderConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
        assert!(err.message().contains("GROQ_API_KEY"));

        let err = ProviderConfig::from_lookup(|k| {
            (k == "AGENTBENCH_PROVIDER").then(|| "bedrock".to_string())
        })
        .unwrap_err();
        assert!(err.message().contains("bedrock"));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.track("llama-3.3-70b-versatile", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("llama-3.3-70b-versatile", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["llama-3.3-70b-versatile"].total_tokens, 450);
    }
}
