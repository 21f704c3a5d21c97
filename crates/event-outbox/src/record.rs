//! Event records emitted by hook invocations.

use crate::OutboxError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of activity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventType {
    TaskStart,
    TaskEnd,
    SkillCall,
    ToolCall,
    AgentSpawn,
    AgentComplete,
    SessionStart,
    SessionEnd,
    Error,
    FileChange,
    Commit,
    Prompt,
}

impl FlowEventType {
    /// All event types, in wire order.
    pub const ALL: [FlowEventType; 12] = [
        FlowEventType::TaskStart,
        FlowEventType::TaskEnd,
        FlowEventType::SkillCall,
        FlowEventType::ToolCall,
        FlowEventType::AgentSpawn,
        FlowEventType::AgentComplete,
        FlowEventType::SessionStart,
        FlowEventType::SessionEnd,
        FlowEventType::Error,
        FlowEventType::FileChange,
        FlowEventType::Commit,
        FlowEventType::Prompt,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowEventType::TaskStart => "task_start",
            FlowEventType::TaskEnd => "task_end",
            FlowEventType::SkillCall => "skill_call",
            FlowEventType::ToolCall => "tool_call",
            FlowEventType::AgentSpawn => "agent_spawn",
            FlowEventType::AgentComplete => "agent_complete",
            FlowEventType::SessionStart => "session_start",
            FlowEventType::SessionEnd => "session_end",
            FlowEventType::Error => "error",
            FlowEventType::FileChange => "file_change",
            FlowEventType::Commit => "commit",
            FlowEventType::Prompt => "prompt",
        }
    }
}

impl fmt::Display for FlowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowEventType {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlowEventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OutboxError::UnknownEventType(s.to_string()))
    }
}

/// A single telemetry record.
///
/// Records are created once and never mutated; the buffer moves them
/// between its collections by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Producer-assigned identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub session_id: String,
    pub event_type: FlowEventType,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    /// Create a record stamped with the current UTC time.
    pub fn now(
        session_id: impl Into<String>,
        event_type: FlowEventType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            event_type,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            payload,
        }
    }

    /// Attach a producer-assigned identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
