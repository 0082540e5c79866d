//! OpenAI-compatible wire types for the chat completions surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat completions request. Only the fields the bridge acts on are
/// modeled; everything else is accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsRequest {
    pub model: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(rename = "providerOptions")]
    pub provider_options: Option<ProviderOptions>,
}

impl ChatCompletionsRequest {
    /// The `providerOptions.windsurf.variant` override, if any.
    #[must_use]
    pub fn variant_override(&self) -> Option<&str> {
        self.provider_options
            .as_ref()?
            .windsurf
            .as_ref()?
            .variant
            .as_deref()
    }

    /// The planner handles requests that carry tools, and follow-up turns
    /// of a tool conversation even when the caller omits the tool list.
    #[must_use]
    pub fn wants_planner(&self) -> bool {
        if !self.tools.is_empty() {
            return true;
        }
        self.messages.iter().flatten().any(|message| {
            message.role == "tool"
                || (message.role == "assistant"
                    && message
                        .tool_calls
                        .as_ref()
                        .is_some_and(|calls| !calls.is_empty()))
        })
    }
}

/// One conversation message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<Value>>,
}

impl ChatMessage {
    /// Flattened text content; text parts joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        }
    }
}

/// `content` is either a plain string or an array of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tool {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderOptions {
    pub windsurf: Option<WindsurfOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindsurfOptions {
    pub variant: Option<String>,
}

/// Join outbound text the way the cascade expects: system messages first,
/// then user messages, blank-line separated. Assistant and tool turns are
/// dropped; the vendor session has no history of its own.
pub fn outbound_text(messages: &[ChatMessage]) -> String {
    let mut sections = Vec::new();
    for role in ["system", "user"] {
        for message in messages.iter().filter(|m| m.role == role) {
            let text = message.text();
            if !text.is_empty() {
                sections.push(text);
            }
        }
    }
    sections.join("\n\n")
}

// ---- response side ----

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Serialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}

#[derive(Debug, Serialize)]
pub struct FunctionCall {
    pub name: String,
    /// Always a JSON-encoded string, per the OpenAI wire shape.
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Whitespace-token estimate; the vendor reports no real counts.
    #[must_use]
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let count = |text: &str| text.split_whitespace().count() as u32;
        let prompt_tokens = count(prompt);
        let completion_tokens = count(completion);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Serialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}
