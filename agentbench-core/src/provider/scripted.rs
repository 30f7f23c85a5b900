//! Scripted provider
//!
//! Replays pre-configured rounds in order and records every request it
//! receives. Used by tests and by `agentbench run --dry-run`.

use super::*;
use crate::assembler::TurnAccumulator;
use std::collections::VecDeque;
use std::sync::Mutex;

type Round = std::result::Result<Vec<Fragment>, ProviderError>;

/// A provider that returns canned fragment sequences, one per round
#[derive(Default)]
pub struct ScriptedProvider {
    model: String,
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            model: "scripted".into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a round that streams the given fragments
    pub fn with_round(self, fragments: Vec<Fragment>) -> Self {
        self.lock_rounds().push_back(Ok(fragments));
        self
    }

    /// Queue a plain text answer with no tool calls
    pub fn with_text_reply(self, text: impl Into<String>) -> Self {
        self.with_round(vec![Fragment::text(text), Fragment::done(FinishReason::Stop)])
    }

    /// Queue a round that fails before producing anything
    pub fn with_failure(self, error: ProviderError) -> Self {
        self.lock_rounds().push_back(Err(error));
        self
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Rounds not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock_rounds().len()
    }

    fn lock_rounds(&self) -> std::sync::MutexGuard<'_, VecDeque<Round>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_round(&self, request: CompletionRequest) -> Round {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        // an exhausted script answers with an empty final turn
        self.lock_rounds()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![Fragment::done(FinishReason::Stop)]))
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let fragments = self.next_round(request)?;

        let mut acc = TurnAccumulator::new();
        for fragment in fragments {
            if let Fragment::Error(e) = &fragment {
                return Err(ProviderError::Network(e.clone()));
            }
            if !acc.push(fragment) {
                break;
            }
        }
        let turn = acc.finish();
        let reasoning = turn.reasoning().to_string();

        Ok(CompletionResponse {
            id: format!("scripted-{}", self.requests.lock().map(|r| r.len()).unwrap_or(0)),
            model,
            content: Some(turn.message.content().to_string()),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls: turn.message.tool_calls().to_vec(),
            finish_reason: turn.finish_reason.unwrap_or(FinishReason::Stop),
            usage: turn.usage.unwrap_or_default(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let fragments = self.next_round(request)?;
        Ok(FragmentStream::from_fragments(fragments))
    }
}
