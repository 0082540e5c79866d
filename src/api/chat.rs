//! Chat completions endpoint (OpenAI-compatible).
//!
//! Translates OpenAI JSON into one cascade session per request and re-emits
//! the result either as a single JSON completion or as SSE chunks. When the
//! request carries tools, the planner wraps the conversation into a
//! constrained prompt and the reply is parsed back into OpenAI tool calls.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use super::types::{
    self, ChatCompletion, ChatCompletionChunk, ChatCompletionsRequest, Choice, ChunkChoice,
    Delta, FunctionCall, ResponseMessage, ToolCall, ToolCallDelta, Usage,
};
use crate::cascade::TextStream;
use crate::error::{BridgeError, BridgeResult};
use crate::models;
use crate::planner::{self, PlannedCall, ToolCallPlan};
use crate::AppState;

/// Create the chat router. `/chat/completions` is an alias some clients
/// expect.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
}

async fn chat_completions(State(state): State<AppState>, body: String) -> Response {
    match handle(state, body).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn handle(state: AppState, body: String) -> BridgeResult<Response> {
    let request: ChatCompletionsRequest = serde_json::from_str(&body)?;
    let messages = match &request.messages {
        Some(messages) if !messages.is_empty() => messages.clone(),
        _ => return Err(BridgeError::BadRequest("'messages' is required".to_string())),
    };

    let requested_model = request.model.clone().unwrap_or_default();
    let resolved = models::resolve(&requested_model, request.variant_override());
    // Chunks echo the client's requested string, not the resolved id.
    let model_echo = if requested_model.is_empty() {
        resolved.canonical_id.clone()
    } else {
        requested_model
    };

    let planner_mode = request.wants_planner();
    let outbound = if planner_mode {
        planner::build_prompt(&request.tools, &messages)
    } else {
        types::outbound_text(&messages)
    };

    tracing::info!(
        model = %resolved.wire_name(),
        stream = request.stream,
        planner = planner_mode,
        "Chat completion"
    );

    let chunks = state.cascade.complete(&resolved, outbound.clone()).await?;
    let emission = Emission::new(model_echo);

    if planner_mode {
        // The plan decision needs the full reply regardless of streaming.
        let text = collect_text(chunks).await?;
        return Ok(match planner::parse_tool_plan(&text) {
            Some(ToolCallPlan::ToolCalls { calls }) => {
                if request.stream {
                    stream_tool_calls(emission, calls)
                } else {
                    respond_tool_calls(emission, calls, &outbound)
                }
            }
            Some(ToolCallPlan::Final { content }) => {
                if request.stream {
                    stream_text(emission, content)
                } else {
                    respond_text(emission, content, &outbound)
                }
            }
            // Unparseable reply: the raw text is the final answer.
            None => {
                if request.stream {
                    stream_text(emission, text)
                } else {
                    respond_text(emission, text, &outbound)
                }
            }
        });
    }

    if request.stream {
        Ok(stream_chunks(emission, chunks))
    } else {
        let text = collect_text(chunks).await?;
        Ok(respond_text(emission, text, &outbound))
    }
}

/// Drain the cascade stream into one string, propagating the first error.
async fn collect_text(mut chunks: TextStream) -> BridgeResult<String> {
    let mut out = String::new();
    let mut received = false;
    while let Some(chunk) = chunks.next().await {
        out.push_str(&chunk?);
        received = true;
    }
    if !received {
        return Err(BridgeError::stream(0, "cascade produced no response"));
    }
    Ok(out)
}

/// Identifiers stable across every chunk of one response.
struct Emission {
    id: String,
    created: i64,
    model: String,
}

impl Emission {
    fn new(model: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model,
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    fn content_chunk(&self, text: String) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                content: Some(text),
                tool_calls: None,
            },
            None,
        )
    }

    fn stop_chunk(&self, reason: &'static str) -> ChatCompletionChunk {
        self.chunk(Delta::default(), Some(reason))
    }

    fn completion(
        &self,
        message: ResponseMessage,
        finish_reason: &'static str,
        usage: Usage,
    ) -> ChatCompletion {
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage,
        }
    }
}

fn sse_json<T: Serialize>(value: &T) -> Result<Event, Infallible> {
    Ok(Event::default().data(serde_json::to_string(value).unwrap_or_default()))
}

fn done_event() -> Result<Event, Infallible> {
    Ok(Event::default().data("[DONE]"))
}

/// Pass cascade chunks through as SSE, strictly ordered. A mid-stream error
/// is emitted as an OpenAI error body followed by `[DONE]`; a dropped
/// client ends the stream and the producer with it.
fn stream_chunks(emission: Emission, mut chunks: TextStream) -> Response {
    let stream = async_stream::stream! {
        loop {
            match chunks.next().await {
                Some(Ok(text)) => yield sse_json(&emission.content_chunk(text)),
                Some(Err(error)) => {
                    tracing::error!(%error, "Cascade stream failed");
                    yield sse_json(&super::error_body(&error.to_string()));
                    yield done_event();
                    return;
                }
                None => break,
            }
        }
        yield sse_json(&emission.stop_chunk("stop"));
        yield done_event();
    };
    Sse::new(stream).into_response()
}

/// Stream a fully-known text as one content chunk, a stop chunk, `[DONE]`.
fn stream_text(emission: Emission, text: String) -> Response {
    let stream = async_stream::stream! {
        yield sse_json(&emission.content_chunk(text));
        yield sse_json(&emission.stop_chunk("stop"));
        yield done_event();
    };
    Sse::new(stream).into_response()
}

fn stream_tool_calls(emission: Emission, calls: Vec<PlannedCall>) -> Response {
    let deltas = tool_call_deltas(&calls);
    let stream = async_stream::stream! {
        yield sse_json(&emission.chunk(
            Delta { content: None, tool_calls: Some(deltas) },
            None,
        ));
        yield sse_json(&emission.stop_chunk("tool_calls"));
        yield done_event();
    };
    Sse::new(stream).into_response()
}

fn respond_text(emission: Emission, text: String, prompt: &str) -> Response {
    let usage = Usage::estimate(prompt, &text);
    let completion = emission.completion(
        ResponseMessage {
            role: "assistant",
            content: Some(text),
            tool_calls: None,
        },
        "stop",
        usage,
    );
    Json(completion).into_response()
}

fn respond_tool_calls(emission: Emission, calls: Vec<PlannedCall>, prompt: &str) -> Response {
    let tool_calls = calls
        .iter()
        .map(|call| ToolCall {
            id: synthesized_id(),
            kind: "function",
            function: function_call(call),
        })
        .collect();
    let completion = emission.completion(
        ResponseMessage {
            role: "assistant",
            content: None,
            tool_calls: Some(tool_calls),
        },
        "tool_calls",
        Usage::estimate(prompt, ""),
    );
    Json(completion).into_response()
}

fn tool_call_deltas(calls: &[PlannedCall]) -> Vec<ToolCallDelta> {
    calls
        .iter()
        .enumerate()
        .map(|(index, call)| ToolCallDelta {
            index: index as u32,
            id: synthesized_id(),
            kind: "function",
            function: function_call(call),
        })
        .collect()
}

fn function_call(call: &PlannedCall) -> FunctionCall {
    FunctionCall {
        name: call.name.clone(),
        // Arguments always travel as a JSON-encoded string.
        arguments: serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn synthesized_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}
