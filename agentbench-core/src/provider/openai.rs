//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, Groq, vLLM, Ollama, and other OpenAI-compatible APIs.
//! Groq reasoning models stream their trace in `delta.reasoning`; it is
//! surfaced as `Fragment::Reasoning`.

use super::*;
use crate::error::Error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                Error::config_invalid(format!("failed to create HTTP client: {}", e))
                    .with_operation("OpenAIProvider::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)
    }

    fn build_request(&self, request: CompletionRequest, stream: bool) -> OpenAIRequest {
        let model = request
            .model
            .unwrap_or_else(|| self.default_model().to_string());

        OpenAIRequest {
            model,
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".into(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect()
            }),
            tool_choice: request.tool_choice.as_ref().map(|tc| match tc {
                ToolChoice::Auto => serde_json::json!("auto"),
                ToolChoice::None => serde_json::json!("none"),
                ToolChoice::Required => serde_json::json!("required"),
                ToolChoice::Function { name } => serde_json::json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            }),
            stop: request.stop,
        }
    }

    async fn send(&self, body: &OpenAIRequest) -> Result<reqwest::Response, ProviderError> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(body);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        debug!(model = %body.model, messages = body.messages.len(), stream = ?body.stream, "chat completion request");

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat completion rejected");

            return Err(match status {
                429 => ProviderError::RateLimited { retry_after },
                401 => ProviderError::AuthenticationFailed,
                404 => ProviderError::ModelNotFound(body.model.clone()),
                _ => ProviderError::Api {
                    status,
                    message: text,
                },
            });
        }

        Ok(response)
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        self.config.provider_type.as_str()
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let api_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .map(|tcs| {
                tcs.into_iter()
                    .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content,
            reasoning: choice.message.reasoning,
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::parse)
                .unwrap_or(FinishReason::Unknown),
            usage: api_response.usage.map(Usage::from).unwrap_or_default(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        for fragment in parser.feed(&bytes) {
                            let done = matches!(fragment, Fragment::Done { .. });
                            yield fragment;
                            if done {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield Fragment::Error(e.to_string());
                        return;
                    }
                }
            }

            for fragment in parser.finish() {
                yield fragment;
            }
        };

        Ok(FragmentStream::new(stream))
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for `data:` server-sent events.
///
/// Raw bytes are buffered until an event is complete, so a multi-byte
/// character split across network chunks is decoded intact.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    usage: Option<Usage>,
    done: bool,
}

/// Diagnostic for a body that closed without a finish reason or `[DONE]`
const TRUNCATED_STREAM: &str = "stream ended before finish marker";

impl SseParser {
    /// Feed raw bytes and return the fragments of every complete event.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(bytes);
        let mut fragments = Vec::new();

        while !self.done {
            let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") else {
                break;
            };
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.event(&String::from_utf8_lossy(&event), &mut fragments);
        }

        fragments
    }

    /// The body ended. Decodes a trailing event that lacked its blank line
    /// and reports a stream that never reached its finish marker.
    fn finish(&mut self) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let event = std::mem::take(&mut self.buffer);
            self.event(&String::from_utf8_lossy(&event), &mut fragments);
        }
        if !self.done {
            warn!("{}", TRUNCATED_STREAM);
            fragments.push(Fragment::Error(TRUNCATED_STREAM.to_string()));
        }
        fragments
    }

    fn event(&mut self, event: &str, fragments: &mut Vec<Fragment>) {
        for line in event.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                fragments.push(Fragment::Done {
                    finish_reason: FinishReason::Stop,
                    usage: self.usage.take(),
                });
                self.done = true;
                return;
            }
            match serde_json::from_str::<OpenAIStreamChunk>(data) {
                Ok(chunk) => self.decode(chunk, fragments),
                Err(e) => debug!(error = %e, data, "skipping undecodable event"),
            }
            if self.done {
                return;
            }
        }
    }

    fn decode(&mut self, chunk: OpenAIStreamChunk, fragments: &mut Vec<Fragment>) {
        if let Some(usage) = chunk.usage.or(chunk.x_groq.and_then(|x| x.usage)) {
            self.usage = Some(usage.into());
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(reasoning) = choice.delta.reasoning.filter(|s| !s.is_empty()) {
            fragments.push(Fragment::Reasoning(reasoning));
        }
        if let Some(content) = choice.delta.content.filter(|s| !s.is_empty()) {
            fragments.push(Fragment::Text(content));
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments_delta) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            fragments.push(Fragment::ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments_delta,
            });
        }
        if let Some(reason) = choice.finish_reason {
            fragments.push(Fragment::Done {
                finish_reason: FinishReason::parse(&reason),
                usage: self.usage.take(),
            });
            self.done = true;
        }
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing)]
    reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(msg: &ChatMessage) -> Self {
        let mut out = Self {
            role: msg.role_name().into(),
            content: Some(msg.content().to_string()),
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
        };

        match msg {
            ChatMessage::Assistant { content, tool_calls, .. } if !tool_calls.is_empty() => {
                if content.is_empty() {
                    out.content = None;
                }
                out.tool_calls = Some(
                    tool_calls
                        .iter()
                        .map(|tc| OpenAIToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: OpenAIFunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect(),
                );
            }
            ChatMessage::Tool { tool_call_id, .. } => {
                out.tool_call_id = Some(tool_call_id.clone());
            }
            _ => {}
        }
        out
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: String,
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<OpenAIUsage> for Usage {
    fn from(u: OpenAIUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    x_groq: Option<GroqExtension>,
}

#[derive(Debug, Deserialize)]
struct GroqExtension {
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion() {
        let msg = OpenAIMessage::from(&ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "echo", r#"{"text":"hi"}"#)],
        ));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("content").is_none());
        assert_eq!(value["tool_calls"][0]["function"]["name"], "echo");
        assert_eq!(value["tool_calls"][0]["type"], "function");

        let msg = OpenAIMessage::from(&ChatMessage::tool_result("call_1", "hi"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["content"], "hi");
    }

    #[test]
    fn test_reasoning_is_not_sent_back() {
        let msg = OpenAIMessage::from(&ChatMessage::Assistant {
            content: "answer".into(),
            reasoning: "private".into(),
            tool_calls: vec![],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("reasoning").is_none());
        assert_eq!(value["content"], "answer");
    }

    #[test]
    fn test_request_uses_config_model() {
        let provider = OpenAIProvider::new(ProviderConfig::groq("gsk-test")).unwrap();
        assert_eq!(provider.name(), "groq");

        let body = provider.build_request(
            CompletionRequest::new(vec![ChatMessage::user("hi")])
                .with_tools(vec![ToolDefinition::new("echo", "Echo")]),
            true,
        );
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "llama-3.3-70b-versatile");
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["tools"][0]["function"]["name"], "echo");
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn test_sse_parser_splits_across_chunks() {
        let mut parser = SseParser::default();
        let first = parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());

        let rest = parser.feed(
            b"lo\"},\"finish_reason\":null}]}\n\ndata: {\"choices\":[{\"delta\":{\"reasoning\":\"hmm\"},\"finish_reason\":null}]}\n\n",
        );
        assert_eq!(
            rest,
            vec![Fragment::text("Hello"), Fragment::reasoning("hmm")]
        );
    }

    #[test]
    fn test_sse_parser_tool_calls_and_finish() {
        let mut parser = SseParser::default();
        let fragments = parser.feed(concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"echo\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{}\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"x_groq\":{\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}}\n\n",
        ).as_bytes());

        assert_eq!(fragments.len(), 3);
        assert_eq!(
            fragments[0],
            Fragment::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("echo".into()),
                arguments_delta: Some(String::new()),
            }
        );
        assert_eq!(fragments[1], Fragment::arguments(0, "{}"));
        match &fragments[2] {
            Fragment::Done { finish_reason, usage } => {
                assert_eq!(*finish_reason, FinishReason::ToolCalls);
                assert_eq!(usage.as_ref().map(|u| u.total_tokens), Some(7));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_sse_parser_done_marker() {
        let mut parser = SseParser::default();
        let fragments = parser.feed(b": keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(fragments, vec![Fragment::done(FinishReason::Stop)]);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_sse_parser_keeps_split_utf8() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"},\"finish_reason\":null}]}\n\n";
        let bytes = event.as_bytes();
        // cut inside the two-byte é
        let cut = event.find('é').unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.feed(&bytes[..cut]).is_empty());
        assert_eq!(parser.feed(&bytes[cut..]), vec![Fragment::text("café")]);
    }

    #[test]
    fn test_sse_parser_reports_truncated_stream() {
        let mut parser = SseParser::default();
        let fragments = parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"},\"finish_reason\":null}]}\n\n",
        );
        assert_eq!(fragments, vec![Fragment::text("partial")]);
        assert_eq!(
            parser.finish(),
            vec![Fragment::Error("stream ended before finish marker".into())]
        );
    }

    #[test]
    fn test_sse_parser_decodes_unterminated_last_event() {
        let mut parser = SseParser::default();
        assert!(parser
            .feed(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}")
            .is_empty());
        assert_eq!(parser.finish(), vec![Fragment::done(FinishReason::Stop)]);
    }
}
