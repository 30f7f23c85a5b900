//! Streaming response assembly
//!
//! Folds the fragments of one model turn into a single assistant message:
//! text and reasoning deltas are concatenated in arrival order, tool-call
//! pieces are merged per call index and id and emitted in first-seen order.
//! A transport error mid-stream ends the turn early with a diagnostic note
//! in the content instead of failing the round.

use crate::message::{ChatMessage, ToolCall};
use crate::provider::{CompletionResponse, FinishReason, Fragment, Usage};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, trace, warn};

/// Callback invoked for every fragment as it arrives (e.g. live printing)
pub type FragmentCallback = Box<dyn Fn(&Fragment) + Send + Sync>;

/// One complete assistant turn
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTurn {
    /// Always a `ChatMessage::Assistant`
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// The stream broke before its finish marker
    pub interrupted: bool,
}

impl AssembledTurn {
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls()
    }

    pub fn reasoning(&self) -> &str {
        match &self.message {
            ChatMessage::Assistant { reasoning, .. } => reasoning,
            _ => "",
        }
    }
}

impl From<CompletionResponse> for AssembledTurn {
    fn from(response: CompletionResponse) -> Self {
        Self {
            message: ChatMessage::Assistant {
                content: response.content.unwrap_or_default(),
                reasoning: response.reasoning.unwrap_or_default(),
                tool_calls: response.tool_calls,
            },
            finish_reason: Some(response.finish_reason),
            usage: Some(response.usage),
            interrupted: false,
        }
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

/// Accumulator for one turn's fragments
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    interrupted: bool,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment in. Returns `false` once the turn is over.
    pub fn push(&mut self, fragment: Fragment) -> bool {
        match fragment {
            Fragment::Text(delta) => {
                trace!(delta = %delta, "text");
                self.content.push_str(&delta);
            }
            Fragment::Reasoning(delta) => {
                trace!(delta = %delta, "reasoning");
                self.reasoning.push_str(&delta);
            }
            Fragment::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            } => {
                let id = id.filter(|id| !id.is_empty());
                let call = self.slot(index, id.as_deref());
                if let Some(id) = id {
                    call.id = id;
                }
                if let Some(name) = name {
                    call.name.push_str(&name);
                }
                if let Some(delta) = arguments_delta {
                    call.arguments.push_str(&delta);
                }
            }
            Fragment::Done {
                finish_reason,
                usage,
            } => {
                debug!(?finish_reason, "finish");
                self.finish_reason = Some(finish_reason);
                if usage.is_some() {
                    self.usage = usage;
                }
                return false;
            }
            Fragment::Error(e) => {
                warn!(error = %e, "model stream interrupted");
                self.content.push_str(&format!("\nMESSAGE ERROR: {}", e));
                self.interrupted = true;
                return false;
            }
        }
        true
    }

    /// The call a piece belongs to. Pieces are keyed by index and id: a new
    /// id on an index whose latest call already has a different id starts
    /// another call, id-less pieces continue the latest call at that index.
    fn slot(&mut self, index: usize, id: Option<&str>) -> &mut PartialToolCall {
        let latest = self.tool_calls.iter().rposition(|c| c.index == index);
        let position = match latest {
            Some(position)
                if id.map_or(true, |id| {
                    let current = &self.tool_calls[position].id;
                    current.is_empty() || current == id
                }) =>
            {
                position
            }
            _ => {
                self.tool_calls.push(PartialToolCall {
                    index,
                    ..Default::default()
                });
                self.tool_calls.len() - 1
            }
        };
        &mut self.tool_calls[position]
    }

    pub fn finish(self) -> AssembledTurn {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: if c.id.is_empty() {
                    format!("call_{}", c.index)
                } else {
                    c.id
                },
                name: c.name,
                arguments: c.arguments,
            })
            .collect();

        AssembledTurn {
            message: ChatMessage::Assistant {
                content: self.content,
                reasoning: self.reasoning,
                tool_calls,
            },
            finish_reason: self.finish_reason,
            usage: self.usage,
            interrupted: self.interrupted,
        }
    }
}

/// Consume a fragment stream and produce exactly one assistant turn.
pub async fn assemble<S>(stream: S, on_fragment: Option<&FragmentCallback>) -> AssembledTurn
where
    S: Stream<Item = Fragment> + Unpin,
{
    let mut stream = stream;
    let mut acc = TurnAccumulator::new();

    while let Some(fragment) = stream.next().await {
        if let Some(callback) = on_fragment {
            callback(&fragment);
        }
        if !acc.push(fragment) {
            break;
        }
    }

    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FragmentStream;
    use std::sync::{Arc, Mutex};

    fn run(fragments: Vec<Fragment>) -> AssembledTurn {
        tokio_test::block_on(assemble(FragmentStream::from_fragments(fragments), None))
    }

    #[test]
    fn test_text_and_reasoning_concatenate_separately() {
        let turn = run(vec![
            Fragment::reasoning("let me "),
            Fragment::text("Hel"),
            Fragment::reasoning("think"),
            Fragment::text("lo"),
            Fragment::done(FinishReason::Stop),
        ]);

        assert_eq!(turn.message.content(), "Hello");
        assert_eq!(turn.reasoning(), "let me think");
        assert!(turn.tool_calls().is_empty());
        assert_eq!(turn.finish_reason, Some(FinishReason::Stop));
        assert!(!turn.interrupted);
    }

    #[test]
    fn test_partial_tool_calls_are_merged() {
        let turn = run(vec![
            Fragment::ToolCallDelta {
                index: 0,
                id: Some("call_a".into()),
                name: Some("ecmwf_download".into()),
                arguments_delta: Some("{\"year\": ".into()),
            },
            Fragment::ToolCallDelta {
                index: 1,
                id: Some("call_b".into()),
                name: Some("echo".into()),
                arguments_delta: None,
            },
            Fragment::arguments(0, "2025}"),
            Fragment::arguments(1, "{\"text\": \"hi\"}"),
            Fragment::done(FinishReason::ToolCalls),
        ]);

        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ToolCall::new("call_a", "ecmwf_download", "{\"year\": 2025}"));
        assert_eq!(calls[1], ToolCall::new("call_b", "echo", "{\"text\": \"hi\"}"));
    }

    #[test]
    fn test_distinct_ids_on_one_index_stay_separate() {
        let turn = run(vec![
            Fragment::tool_call(0, "call_a", "echo", "{\"text\":"),
            Fragment::arguments(0, "\"a\"}"),
            Fragment::tool_call(0, "call_b", "echo", "{\"text\":\"b\"}"),
            // the id repeated on a continuation piece
            Fragment::ToolCallDelta {
                index: 0,
                id: Some("call_b".into()),
                name: None,
                arguments_delta: None,
            },
            Fragment::done(FinishReason::ToolCalls),
        ]);

        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ToolCall::new("call_a", "echo", "{\"text\":\"a\"}"));
        assert_eq!(calls[1], ToolCall::new("call_b", "echo", "{\"text\":\"b\"}"));
    }

    #[test]
    fn test_tool_calls_keep_first_seen_order() {
        let turn = run(vec![
            Fragment::tool_call(3, "x", "echo", "{}"),
            Fragment::tool_call(1, "y", "echo", "{}"),
            Fragment::arguments(3, ""),
        ]);
        let ids: Vec<&str> = turn.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let turn = run(vec![Fragment::ToolCallDelta {
            index: 2,
            id: None,
            name: Some("echo".into()),
            arguments_delta: Some("{}".into()),
        }]);
        assert_eq!(turn.tool_calls()[0].id, "call_2");
    }

    #[test]
    fn test_stream_error_is_folded_into_content() {
        let turn = run(vec![
            Fragment::text("partial"),
            Fragment::tool_call(0, "call_a", "echo", "{}"),
            Fragment::Error("connection reset".into()),
            Fragment::text("never seen"),
        ]);

        assert!(turn.interrupted);
        assert_eq!(turn.message.content(), "partial\nMESSAGE ERROR: connection reset");
        assert_eq!(turn.tool_calls().len(), 1);
        assert!(turn.finish_reason.is_none());
    }

    #[test]
    fn test_fragments_after_done_are_ignored() {
        let turn = run(vec![
            Fragment::text("a"),
            Fragment::Done {
                finish_reason: FinishReason::Stop,
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                }),
            },
            Fragment::text("b"),
        ]);
        assert_eq!(turn.message.content(), "a");
        assert_eq!(turn.usage.map(|u| u.total_tokens), Some(3));
    }

    #[test]
    fn test_empty_stream_yields_empty_turn() {
        let turn = run(vec![]);
        assert!(turn.message.is_assistant());
        assert_eq!(turn.message.content(), "");
        assert!(turn.tool_calls().is_empty());
    }

    #[test]
    fn test_callback_sees_every_fragment() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: FragmentCallback = Box::new(move |f| sink.lock().unwrap().push(f.clone()));

        let stream = FragmentStream::from_fragments(vec![
            Fragment::text("a"),
            Fragment::done(FinishReason::Stop),
        ]);
        tokio_test::block_on(assemble(stream, Some(&callback)));

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_from_completion_response() {
        let turn = AssembledTurn::from(CompletionResponse {
            id: "r1".into(),
            model: "m".into(),
            content: None,
            reasoning: Some("hmm".into()),
            tool_calls: vec![ToolCall::new("c", "echo", "{}")],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        });
        assert_eq!(turn.message.content(), "");
        assert_eq!(turn.reasoning(), "hmm");
        assert_eq!(turn.tool_calls().len(), 1);
    }
}
