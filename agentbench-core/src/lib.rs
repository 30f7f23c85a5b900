//! # agentbench core
//!
//! Building blocks for an LLM tool-use loop.
//!
//! ## Core Concepts
//! - **Conversation**: ordered, typed message history with one system prompt
//! - **Tools**: named async capabilities plus a registry that dispatches
//!   model tool calls and turns every failure into model-readable text
//! - **Provider**: trait-based LLM communication (OpenAI-compatible, scripted)
//! - **Assembler**: folds a streamed response into one assistant turn
//! - **Isolation**: per-trial working directories

pub mod assembler;
pub mod error;
pub mod isolation;
pub mod message;
pub mod provider;
pub mod tool;

pub use assembler::{assemble, AssembledTurn, FragmentCallback, TurnAccumulator};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use isolation::{make_path_safe, with_isolated_dir, IsolatedDir};
pub use message::{ChatMessage, Conversation, ToolCall};
pub use provider::{
    CompletionRequest, CompletionResponse, FinishReason, Fragment, FragmentStream, LlmProvider,
    OpenAIProvider, ProviderConfig, ProviderError, ProviderType, ScriptedProvider, ToolChoice,
    Usage, UsageTracker,
};
pub use tool::{require_i64, require_str, Tool, ToolArguments, ToolDefinition, ToolRegistry};
