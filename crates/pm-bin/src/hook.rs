//! Hook producer.
//!
//! One invocation reads the hook JSON from stdin, records its events in a
//! fresh buffer and runs the final flush. Session start opens the session
//! before any event is sent; stop and session end close it after. The
//! invoking tool must never be blocked or failed by delivery, so every
//! outcome ends in the same `{"continue":true}` response.

use clap::ValueEnum;
use event_outbox::{
    BatchTransport, BufferConfig, EventBuffer, EventRecord, FlowEventType, FlushOutcome,
    HttpBatchTransport, SessionClose, SessionRegistry,
};
use pm_config_and_utils::Config;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest prompt text kept in a `prompt` event, in characters.
const MAX_PROMPT_CHARS: usize = 500;

/// Tools whose invocation changes a file.
const FILE_TOOLS: [&str; 3] = ["Write", "Edit", "NotebookEdit"];

/// Workflow hook that triggered this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookKind {
    SessionStart,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    SubagentStart,
    SubagentStop,
    Stop,
    SessionEnd,
}

/// Session id from the hook input, or a fresh one.
pub fn session_id(input: &Value) -> String {
    ["session_id", "sessionId"]
        .iter()
        .find_map(|key| {
            input
                .get(key)
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// First non-null value among `keys`.
fn first(input: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|key| input.get(key))
        .find(|value| !value.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Events emitted for one hook invocation.
pub fn records(kind: HookKind, input: &Value, session_id: &str) -> Vec<EventRecord> {
    let event = |event_type: FlowEventType, payload: Value| {
        EventRecord::now(session_id, event_type, object(payload))
    };

    match kind {
        HookKind::SessionStart => {
            let cwd = match first(input, &["cwd"]) {
                Value::Null => std::env::current_dir()
                    .map(|dir| Value::String(dir.display().to_string()))
                    .unwrap_or(Value::Null),
                cwd => cwd,
            };
            vec![event(
                FlowEventType::SessionStart,
                json!({ "cwd": cwd, "start_time": now() }),
            )]
        }
        HookKind::PreToolUse => vec![event(
            FlowEventType::ToolCall,
            json!({
                "tool_name": first(input, &["tool_name", "toolName"]),
                "phase": "start",
                "parameters": first(input, &["tool_input", "input"]),
            }),
        )],
        HookKind::PostToolUse => {
            let tool_name = first(input, &["tool_name", "toolName"]);
            let parameters = first(input, &["tool_input", "input"]);
            let mut records = vec![event(
                FlowEventType::ToolCall,
                json!({
                    "tool_name": tool_name,
                    "phase": "end",
                    "parameters": parameters,
                    "duration_ms": first(input, &["duration_ms"]),
                    "success": first(input, &["error"]).is_null(),
                }),
            )];

            let tool = tool_name.as_str().unwrap_or_default();
            if FILE_TOOLS.contains(&tool) {
                if let Some(file_path) = parameters.get("file_path").filter(|p| p.is_string()) {
                    let change_type = if tool == "Write" { "created" } else { "modified" };
                    records.push(event(
                        FlowEventType::FileChange,
                        json!({
                            "file_path": file_path,
                            "change_type": change_type,
                            "tool_name": tool,
                        }),
                    ));
                }
            }
            records
        }
        HookKind::UserPromptSubmit => {
            let prompt = first(input, &["prompt", "message"]);
            let prompt: String = prompt
                .as_str()
                .unwrap_or_default()
                .chars()
                .take(MAX_PROMPT_CHARS)
                .collect();
            vec![event(
                FlowEventType::Prompt,
                json!({
                    "prompt_text": prompt,
                    "token_count": first(input, &["token_count"]),
                }),
            )]
        }
        HookKind::SubagentStart => vec![event(
            FlowEventType::AgentSpawn,
            json!({
                "agent_type": first(input, &["agent_type", "subagent_type"]),
                "model": first(input, &["model"]),
                "task_description": first(input, &["task_description", "description"]),
            }),
        )],
        HookKind::SubagentStop => {
            let status = match first(input, &["status"]) {
                Value::Null => Value::String("completed".into()),
                status => status,
            };
            vec![event(
                FlowEventType::AgentComplete,
                json!({
                    "agent_type": first(input, &["agent_type", "subagent_type"]),
                    "model": first(input, &["model"]),
                    "status": status,
                    "duration_ms": first(input, &["duration_ms"]),
                    "token_usage": first(input, &["token_usage"]),
                }),
            )]
        }
        HookKind::Stop | HookKind::SessionEnd => vec![event(
            FlowEventType::SessionEnd,
            json!({
                "end_time": now(),
                "token_usage": first(input, &["token_usage"]),
                "summary": first(input, &["summary"]),
            }),
        )],
    }
}

/// Session fields written by stop and session-end hooks.
pub fn session_close(input: &Value) -> SessionClose {
    SessionClose {
        end_time: now(),
        token_usage: Some(first(input, &["token_usage"])).filter(|usage| !usage.is_null()),
        summary: input
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Deliver one invocation through `transport`.
///
/// Session registration failures are logged and delivery continues; the
/// control plane decides whether it accepts the events.
pub async fn deliver<T>(
    kind: HookKind,
    input: &Value,
    session_id: &str,
    config: BufferConfig,
    transport: Arc<T>,
) -> FlushOutcome
where
    T: BatchTransport + SessionRegistry + 'static,
{
    if kind == HookKind::SessionStart {
        if let Err(e) = transport.open_session(session_id, None).await {
            warn!(session_id = %session_id, error = %e, "Cannot open session");
        }
    }

    let batches: Arc<dyn BatchTransport> = transport.clone();
    let buffer = EventBuffer::start(config, batches);
    for record in records(kind, input, session_id) {
        buffer.record(record);
    }
    let outcome = buffer.shutdown().await;

    if matches!(kind, HookKind::Stop | HookKind::SessionEnd) {
        if let Err(e) = transport
            .close_session(session_id, &session_close(input))
            .await
        {
            warn!(session_id = %session_id, error = %e, "Cannot close session");
        }
    }

    outcome
}

/// Record the events of one invocation and flush them.
///
/// Returns `None` when no transport could be built; delivery failures are
/// only logged.
pub async fn run(kind: HookKind, config: &Config, raw_input: &str) -> Option<FlushOutcome> {
    let input = match serde_json::from_str::<Value>(raw_input) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            debug!(hook = ?kind, "Hook input is not a JSON object");
            Value::Object(Map::new())
        }
    };
    let session_id = session_id(&input);

    let timeout = Duration::from_millis(config.batch.request_timeout_ms);
    let transport = match HttpBatchTransport::new(&config.api_url, timeout) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(error = %e, "Cannot build batch transport");
            return None;
        }
    };

    let outcome = deliver(
        kind,
        &input,
        &session_id,
        BufferConfig::from(&config.batch),
        Arc::new(transport),
    )
    .await;
    info!(hook = ?kind, session_id = %session_id, outcome = ?outcome, "Hook processed");
    Some(outcome)
}

/// The response the workflow tool expects on stdout.
pub fn response() -> Value {
    json!({ "continue": true })
}
