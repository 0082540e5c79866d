//! Prompt-engineered tool-call planner.
//!
//! The language server has no native tool-calling surface, so when a
//! request carries tools the bridge asks the model to answer with a single
//! constrained JSON object and parses that reply back into either a final
//! answer or a tool-call plan. Models drift from the format under pressure,
//! hence the layered parser: a brace-window JSON parse first, then a
//! `<tool_call>` tag scan, then giving up and letting the caller emit the
//! raw text as a final answer.

use serde_json::Value;

use crate::api::types::{ChatMessage, Tool};

/// One planned tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub name: String,
    pub arguments: Value,
}

/// The parsed planner reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallPlan {
    Final { content: String },
    ToolCalls { calls: Vec<PlannedCall> },
}

const PREAMBLE: &str = "You are an AI assistant with access to tools. \
Decide whether the user's request needs a tool call or can be answered directly.";

const RULES: &str = r#"Respond with exactly one JSON object and nothing else: no prose, no markdown fences, no XML tags. To call tools, the object must have "action": "tool_call" and a "tool_calls" array; each entry has a "name" and an "arguments" object matching the tool's parameter schema. To answer directly, use "action": "final" with the answer in "content"."#;

const EXAMPLES: &str = r#"Example tool call:
{"action": "tool_call", "tool_calls": [{"name": "read_file", "arguments": {"path": "src/main.rs"}}]}

Example final answer:
{"action": "final", "content": "The file contains the entry point."}"#;

/// Build the planner prompt from the tool catalog and conversation.
pub fn build_prompt(tools: &[Tool], messages: &[ChatMessage]) -> String {
    let mut prompt = String::from(PREAMBLE);

    let system_text = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(ChatMessage::text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !system_text.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&system_text);
    }

    prompt.push_str("\n\nAvailable tools:\n");
    for tool in tools {
        match &tool.function.description {
            Some(description) => {
                prompt.push_str(&format!("- {}: {}\n", tool.function.name, description));
            }
            None => prompt.push_str(&format!("- {}\n", tool.function.name)),
        }
        if let Some(parameters) = &tool.function.parameters {
            let schema = serde_json::to_string_pretty(parameters).unwrap_or_default();
            prompt.push_str("  parameters:\n");
            for line in schema.lines() {
                prompt.push_str(&format!("  {line}\n"));
            }
        }
    }

    prompt.push_str("\n");
    prompt.push_str(RULES);
    prompt.push_str("\n\n");
    prompt.push_str(EXAMPLES);

    prompt.push_str("\n\nConversation so far:\n");
    for message in messages {
        match message.role.as_str() {
            "system" => {}
            "tool" => {
                let id = message.tool_call_id.as_deref().unwrap_or("unknown");
                prompt.push_str(&format!("tool result ({id}): {}\n", message.text()));
            }
            "assistant" => {
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        prompt.push_str(&format!(
                            "assistant (tool call): {}\n",
                            serde_json::to_string(call).unwrap_or_default()
                        ));
                    }
                }
                let text = message.text();
                if !text.is_empty() {
                    prompt.push_str(&format!("assistant: {text}\n"));
                }
            }
            role => prompt.push_str(&format!("{role}: {}\n", message.text())),
        }
    }
    prompt.push_str("\nRespond now with the single JSON object.");

    prompt
}

/// Parse a planner reply into a plan, or `None` when nothing parses.
pub fn parse_tool_plan(reply: &str) -> Option<ToolCallPlan> {
    if let Some(plan) = parse_json_window(reply) {
        return Some(plan);
    }
    let calls = parse_tagged_calls(reply);
    if !calls.is_empty() {
        return Some(ToolCallPlan::ToolCalls { calls });
    }
    None
}

/// The substring between the first `{` and the last `}`, parsed as the
/// constrained plan object. Any other shape is rejected.
fn parse_json_window(reply: &str) -> Option<ToolCallPlan> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;

    match value.get("action")?.as_str()? {
        "final" => {
            let content = value.get("content")?.as_str()?.to_string();
            Some(ToolCallPlan::Final { content })
        }
        "tool_call" => {
            let entries = value.get("tool_calls")?.as_array()?;
            let calls: Vec<PlannedCall> = entries
                .iter()
                .filter_map(|entry| {
                    let name = entry.get("name")?.as_str()?.to_string();
                    let arguments = normalize_arguments(
                        entry.get("arguments").cloned().unwrap_or(Value::Null),
                    );
                    Some(PlannedCall { name, arguments })
                })
                .collect();
            (!calls.is_empty()).then_some(ToolCallPlan::ToolCalls { calls })
        }
        _ => None,
    }
}

/// Models frequently double-encode arguments as JSON strings; unwrap those
/// recursively, leaving anything that is not clearly JSON untouched.
fn normalize_arguments(value: Value) -> Value {
    match value {
        Value::String(text) => {
            if looks_like_json(&text) {
                match serde_json::from_str(&text) {
                    Ok(parsed) => normalize_arguments(parsed),
                    Err(_) => Value::String(text),
                }
            } else {
                Value::String(text)
            }
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(normalize_arguments).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize_arguments(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Conservative test: brace-delimited and non-trivial. The parse attempt
/// itself is the final arbiter.
fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Fallback for replies shaped like `<tool_call>name {json}`, repeated.
fn parse_tagged_calls(reply: &str) -> Vec<PlannedCall> {
    let mut calls = Vec::new();
    for (index, _) in reply.match_indices("<tool_call>") {
        let rest = &reply[index + "<tool_call>".len()..];
        let rest = rest.trim_start();
        let Some(name_end) = rest.find(|c: char| c.is_whitespace() || c == '{') else {
            continue;
        };
        let name = rest[..name_end].trim();
        if name.is_empty() {
            continue;
        }
        let Some(brace) = rest.find('{') else {
            continue;
        };
        let Some(object) = balanced_object(&rest[brace..]) else {
            continue;
        };
        let Ok(arguments) = serde_json::from_str::<Value>(object) else {
            continue;
        };
        calls.push(PlannedCall {
            name: name.to_string(),
            arguments: normalize_arguments(arguments),
        });
    }
    calls
}

/// The balanced `{...}` prefix of `text`, string-literal aware.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
