//! # Conversation Model
//!
//! The typed representation of one task execution's message history.
//!
//! - `ChatMessage`: system / user / assistant / tool-result entries
//! - `ToolCall`: a model's request to invoke a named tool
//! - `Conversation`: the ordered history, owned by exactly one agent loop
//!
//! Assistant reasoning is kept on the in-memory message for observability
//! but is never serialized, so it is neither sent back to the model nor
//! written into transcripts.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A tool call requested by the model.
///
/// The id is assigned by the provider and is opaque here; it is threaded
/// through to the matching tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse arguments as JSON
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing)]
        reasoning: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            reasoning: String::new(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            reasoning: String::new(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    /// Tool calls of an assistant message; empty for every other role
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// Pretty print the message to stdout
    pub fn pretty_print(&self) {
        println!("[{}]", self.role_name().to_uppercase());
        if !self.content().is_empty() {
            println!("{}", self.content());
        }
        for tc in self.tool_calls() {
            println!("  tool_call: {}({})", tc.name, tc.arguments);
        }
        if let Self::Tool { tool_call_id, .. } = self {
            println!("  tool_call_id: {}", tool_call_id);
        }
        println!();
    }
}

/// Ordered message history for one task execution.
///
/// Exactly one system message, always first, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ChatMessage>", into = "Vec<ChatMessage>")]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    /// Rebuild a conversation from a transcript
    pub fn from_messages(messages: Vec<ChatMessage>) -> Result<Self> {
        match messages.first() {
            Some(ChatMessage::System { .. }) => {}
            _ => {
                return Err(Error::invalid_argument(
                    "conversation must start with a system message",
                ))
            }
        }
        if messages[1..].iter().any(|m| matches!(m, ChatMessage::System { .. })) {
            return Err(Error::invalid_argument(
                "conversation may hold only one system message",
            ));
        }
        Ok(Self { messages })
    }

    pub fn system_prompt(&self) -> &str {
        self.messages[0].content()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message. A second system message is rejected.
    pub fn push(&mut self, message: ChatMessage) -> Result<()> {
        if matches!(message, ChatMessage::System { .. }) {
            return Err(Error::invalid_argument(
                "system message is fixed at construction",
            ));
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    /// Append a model turn. Only assistant messages are accepted.
    pub fn push_assistant(&mut self, message: ChatMessage) -> Result<()> {
        if !message.is_assistant() {
            return Err(Error::invalid_argument(format!(
                "expected an assistant message, got '{}'",
                message.role_name()
            )));
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.messages.push(ChatMessage::tool_result(tool_call_id, content));
    }

    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    /// Number of assistant turns, i.e. completed model rounds
    pub fn rounds(&self) -> usize {
        self.messages.iter().filter(|m| m.is_assistant()).count()
    }

    /// Total tool calls requested across all rounds
    pub fn tool_call_count(&self) -> usize {
        self.messages.iter().map(|m| m.tool_calls().len()).sum()
    }

    /// Tool calls of the latest assistant turn that have no result yet
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        let Some(position) = self.messages.iter().rposition(|m| m.is_assistant()) else {
            return &[];
        };
        let calls = self.messages[position].tool_calls();
        let answered = self.messages[position + 1..]
            .iter()
            .filter(|m| matches!(m, ChatMessage::Tool { .. }))
            .count();
        calls.get(answered..).unwrap_or(&[])
    }

    /// Verify that every assistant turn's tool calls are answered by tool
    /// results directly after it: one per call, in request order, with no
    /// extra or stray results.
    pub fn check_tool_results(&self) -> Result<()> {
        let mut pending: &[ToolCall] = &[];
        let mut answered = 0;

        for (position, message) in self.messages.iter().enumerate() {
            match message {
                ChatMessage::Tool { tool_call_id, .. } => {
                    let expected = pending.get(answered).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "tool result '{}' at position {} has no matching tool call",
                            tool_call_id, position
                        ))
                    })?;
                    if &expected.id != tool_call_id {
                        return Err(Error::invalid_argument(format!(
                            "tool result at position {} answers '{}', expected '{}'",
                            position, tool_call_id, expected.id
                        )));
                    }
                    answered += 1;
                }
                other => {
                    if answered < pending.len() {
                        return Err(Error::invalid_argument(format!(
                            "tool call '{}' was never answered",
                            pending[answered].id
                        )));
                    }
                    pending = other.tool_calls();
                    answered = 0;
                }
            }
        }

        if answered < pending.len() {
            return Err(Error::invalid_argument(format!(
                "tool call '{}' was never answered",
                pending[answered].id
            )));
        }
        Ok(())
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

impl TryFrom<Vec<ChatMessage>> for Conversation {
    type Error = Error;

    fn try_from(messages: Vec<ChatMessage>) -> Result<Self> {
        Self::from_messages(messages)
    }
}

impl From<Conversation> for Vec<ChatMessage> {
    fn from(conversation: Conversation) -> Self {
        conversation.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_call(id: &str) -> ToolCall {
        ToolCall::new(id, "echo", r#"{"text": "hi"}"#)
    }

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful");
        assert_eq!(sys.role_name(), "system");
        assert_eq!(sys.content(), "You are helpful");

        let asst = ChatMessage::assistant_with_tools("", vec![echo_call("a")]);
        assert!(asst.is_assistant());
        assert_eq!(asst.tool_calls().len(), 1);

        let tool = ChatMessage::tool_result("a", "hi");
        assert!(tool.tool_calls().is_empty());
    }

    #[test]
    fn test_parse_arguments() {
        let call = echo_call("a");
        let args: serde_json::Value = call.parse_arguments().unwrap();
        assert_eq!(args["text"], "hi");
    }

    #[test]
    fn test_reasoning_is_not_serialized() {
        let message = ChatMessage::Assistant {
            content: "done".into(),
            reasoning: "thinking about it".into(),
            tool_calls: vec![],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "done"}));
    }

    #[test]
    fn test_tool_message_serialization() {
        let value = serde_json::to_value(ChatMessage::tool_result("call_1", "ok")).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "tool_call_id": "call_1", "content": "ok"})
        );
    }

    #[test]
    fn test_conversation_system_message_is_fixed() {
        let mut conversation = Conversation::new("sys");
        assert!(conversation.push(ChatMessage::system("again")).is_err());
        assert!(conversation.push_assistant(ChatMessage::user("x")).is_err());
        conversation.push_user("task");
        assert_eq!(conversation.system_prompt(), "sys");
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_from_messages_requires_leading_system() {
        assert!(Conversation::from_messages(vec![ChatMessage::user("hi")]).is_err());
        assert!(Conversation::from_messages(vec![]).is_err());
        assert!(Conversation::from_messages(vec![
            ChatMessage::system("a"),
            ChatMessage::system("b"),
        ])
        .is_err());
    }

    #[test]
    fn test_transcript_deserialization_validates() {
        let ok: Conversation = serde_json::from_value(json!([
            {"role": "system", "content": "sys"},
            {"role": "user", "content": "task"},
        ]))
        .unwrap();
        assert_eq!(ok.len(), 2);

        let bad = serde_json::from_value::<Conversation>(json!([
            {"role": "user", "content": "task"},
        ]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_check_tool_results_accepts_matched_rounds() {
        let mut conversation = Conversation::new("sys");
        conversation.push_user("task");
        conversation
            .push(ChatMessage::assistant_with_tools("", vec![echo_call("a"), echo_call("b")]))
            .unwrap();
        conversation.push_tool_result("a", "hi");
        conversation.push_tool_result("b", "hi");
        conversation.push(ChatMessage::assistant("done")).unwrap();

        assert!(conversation.check_tool_results().is_ok());
        assert_eq!(conversation.rounds(), 2);
        assert_eq!(conversation.tool_call_count(), 2);
        assert_eq!(conversation.last_assistant().map(|m| m.content()), Some("done"));
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut conversation = Conversation::new("sys");
        conversation.push_user("task");
        assert!(conversation.pending_tool_calls().is_empty());

        conversation
            .push(ChatMessage::assistant_with_tools("", vec![echo_call("a"), echo_call("b")]))
            .unwrap();
        assert_eq!(conversation.pending_tool_calls().len(), 2);

        conversation.push_tool_result("a", "hi");
        assert_eq!(conversation.pending_tool_calls(), &[echo_call("b")]);

        conversation.push_tool_result("b", "hi");
        assert!(conversation.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_check_tool_results_rejects_violations() {
        // out of order
        let mut conversation = Conversation::new("sys");
        conversation.push_user("task");
        conversation
            .push(ChatMessage::assistant_with_tools("", vec![echo_call("a"), echo_call("b")]))
            .unwrap();
        conversation.push_tool_result("b", "hi");
        conversation.push_tool_result("a", "hi");
        assert!(conversation.check_tool_results().is_err());

        // dropped
        let mut conversation = Conversation::new("sys");
        conversation.push_user("task");
        conversation
            .push(ChatMessage::assistant_with_tools("", vec![echo_call("a")]))
            .unwrap();
        conversation.push(ChatMessage::assistant("done")).unwrap();
        assert!(conversation.check_tool_results().is_err());

        // duplicated
        let mut conversation = Conversation::new("sys");
        conversation.push_user("task");
        conversation
            .push(ChatMessage::assistant_with_tools("", vec![echo_call("a")]))
            .unwrap();
        conversation.push_tool_result("a", "hi");
        conversation.push_tool_result("a", "hi");
        assert!(conversation.check_tool_results().is_err());
    }
}
