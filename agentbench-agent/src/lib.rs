//! # agentbench agent
//!
//! The agent loop and the benchmark around it:
//! 1. A trial enters a fresh working directory
//! 2. The agent sends the conversation and tool catalog to the model
//! 3. Requested tools run in order; every result goes back to the model
//! 4. Rounds repeat until the model answers without tool calls
//! 5. A grader inspects what the agent left behind
//! 6. The outcome is appended to a JSON ledger

pub mod agent;
pub mod grader;
pub mod ledger;
pub mod tools;
pub mod trial;

pub use agent::{AgentConfig, AgentLoop, LoopState, RunSummary, DEFAULT_SYSTEM_PROMPT};
pub use grader::{FileChecksumGrader, FileSizeGrader, GradeReport, Grader};
pub use ledger::{Ledger, ModelStats};
pub use tools::{benchmark_registry, EchoTool, EcmwfClient, EcmwfDownloadTool};
pub use trial::{run_trial, TaskPrompt, TrialConfig, TrialOutcome, TrialRecord};
