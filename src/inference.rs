use std::io;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::InferenceError;

pub(crate) const WEB_SEARCH_TOOL: &str = "web_search";

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SamplingOptions {
    pub(crate) temperature: f64,
    pub(crate) num_ctx: u32,
    pub(crate) top_p: f64,
}

impl SamplingOptions {
    pub(crate) const TOOLS: Self = Self {
        temperature: 0.4,
        num_ctx: 8192,
        top_p: 0.9,
    };

    pub(crate) const GENERATE: Self = Self {
        temperature: 0.7,
        num_ctx: 4096,
        top_p: 0.95,
    };

    fn to_json(self) -> Value {
        json!({
            "temperature": self.temperature,
            "num_ctx": self.num_ctx,
            "top_p": self.top_p,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolCall {
    pub(crate) id: Option<String>,
    pub(crate) name: String,
    pub(crate) arguments: Map<String, Value>,
}

impl ToolCall {
    pub(crate) fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChatMessage {
    pub(crate) role: String,
    pub(crate) content: String,
    pub(crate) tool_calls: Vec<ToolCall>,
    pub(crate) name: Option<String>,
    pub(crate) tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
        }
    }

    pub(crate) fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub(crate) fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub(crate) fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new("assistant", content)
        }
    }

    pub(crate) fn tool(name: &str, content: impl Into<String>, call_id: Option<String>) -> Self {
        Self {
            name: Some(name.to_string()),
            tool_call_id: call_id,
            ..Self::new("tool", content)
        }
    }

    pub(crate) fn to_json(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("role".into(), json!(self.role));
        entry.insert("content".into(), json!(self.content));
        if !self.tool_calls.is_empty() {
            let calls: Vec<Value> = self
                .tool_calls
                .iter()
                .map(|call| {
                    let mut out = json!({
                        "function": {"name": call.name, "arguments": call.arguments},
                    });
                    if let Some(id) = &call.id {
                        out["id"] = json!(id);
                    }
                    out
                })
                .collect();
            entry.insert("tool_calls".into(), Value::Array(calls));
        }
        if let Some(name) = &self.name {
            entry.insert("name".into(), json!(name));
        }
        if let Some(id) = &self.tool_call_id {
            entry.insert("tool_call_id".into(), json!(id));
        }
        Value::Object(entry)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ChatReply {
    pub(crate) content: String,
    pub(crate) tool_calls: Vec<ToolCall>,
}

/// Per-request knobs for a chat call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChatOptions {
    pub(crate) with_tools: bool,
    pub(crate) sampling: SamplingOptions,
    pub(crate) timeout: Duration,
}

pub(crate) trait InferenceClient: Send + Sync {
    /// Cheap round trip used once at startup to decide between chat and generate mode.
    fn probe(&self) -> Result<(), InferenceError>;
    fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatReply, InferenceError>;
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError>;
}

pub(crate) fn web_search_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": WEB_SEARCH_TOOL,
            "description": "Search the web using DuckDuckGo to retrieve current and accurate information when built-in knowledge is insufficient or outdated.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A well-formed search query to retrieve relevant information."
                    }
                },
                "required": ["query"]
            }
        }
    })
}

/// Tool arguments arrive as an object or a JSON-encoded string. Anything else becomes `{}`.
fn normalize_arguments(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

pub(crate) fn parse_chat_reply(payload: &Value) -> Result<ChatReply, InferenceError> {
    if !payload.is_object() {
        return Err(InferenceError::Decode("chat response is not an object".into()));
    }
    let Some(message) = payload.get("message").filter(|m| !m.is_null()) else {
        return Ok(ChatReply::default());
    };
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let function = call.get("function");
                    ToolCall {
                        id: call.get("id").and_then(|v| v.as_str()).map(str::to_string),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        arguments: normalize_arguments(function.and_then(|f| f.get("arguments"))),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ChatReply { content, tool_calls })
}

pub(crate) fn parse_generate_reply(payload: &Value) -> Result<String, InferenceError> {
    if !payload.is_object() {
        return Err(InferenceError::Decode("generate response is not an object".into()));
    }
    Ok(payload
        .get("response")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string())
}

fn io_error(err: io::Error) -> InferenceError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => InferenceError::Timeout,
        _ if err.to_string().contains("timed out") => InferenceError::Timeout,
        _ => InferenceError::Decode(err.to_string()),
    }
}

fn transport_error(err: ureq::Transport) -> InferenceError {
    let text = err.to_string();
    let io_timeout = std::error::Error::source(&err)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock));
    if io_timeout || text.contains("timed out") {
        InferenceError::Timeout
    } else {
        InferenceError::Transport(text)
    }
}

/// Swap the `/api/chat` endpoint for `/api/generate` on the same host.
pub(crate) fn generate_url_for(chat_url: &str) -> String {
    match chat_url.strip_suffix("/api/chat") {
        Some(base) => format!("{base}/api/generate"),
        None => chat_url.to_string(),
    }
}

/// Ollama-compatible HTTP client.
pub(crate) struct OllamaClient {
    chat_url: String,
    generate_url: String,
    model: String,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub(crate) fn new(chat_url: &str, model: &str, probe_timeout: Duration) -> Self {
        Self {
            chat_url: chat_url.to_string(),
            generate_url: generate_url_for(chat_url),
            model: model.to_string(),
            probe_timeout,
        }
    }

    pub(crate) fn chat_payload(&self, messages: &[ChatMessage], options: ChatOptions) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages.iter().map(ChatMessage::to_json).collect::<Vec<_>>(),
            "stream": false,
            "options": options.sampling.to_json(),
        });
        if options.with_tools {
            payload["tools"] = json!([web_search_tool()]);
        }
        payload
    }

    fn post(&self, url: &str, payload: &Value, timeout: Duration) -> Result<Value, InferenceError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        match agent
            .post(url)
            .set("content-type", "application/json")
            .send_json(payload.clone())
        {
            Ok(resp) => resp.into_json::<Value>().map_err(io_error),
            Err(ureq::Error::Status(code, resp)) => Err(InferenceError::Status {
                code,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(transport_error(err)),
        }
    }
}

impl InferenceClient for OllamaClient {
    fn probe(&self) -> Result<(), InferenceError> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": "test"}],
            "stream": false,
        });
        self.post(&self.chat_url, &payload, self.probe_timeout).map(|_| ())
    }

    fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatReply, InferenceError> {
        let payload = self.chat_payload(messages, options);
        let body = self.post(&self.chat_url, &payload, options.timeout)?;
        parse_chat_reply(&body)
    }

    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": SamplingOptions::GENERATE.to_json(),
        });
        let body = self.post(&self.generate_url, &payload, timeout)?;
        parse_generate_reply(&body)
    }
}
