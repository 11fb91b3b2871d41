//! Live stream events
//!
//! Wire shape: `{"type": ..., "data": ..., "timestamp": <epoch seconds>, "job_id": ...}`.
//! Events are ephemeral: built, broadcast to the hub, dropped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStart,
    Stdout,
    Stderr,
    /// Structured-state update parsed from a prefixed stdout line
    JointState,
    TestStart,
    ExecutionComplete,
    Error,
    /// Relayed from an observer, not produced by a job
    JointPositionConfirmed,
}

impl EventKind {
    /// Whether this event ends a job's feed
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::ExecutionComplete | EventKind::Error)
    }
}

/// A unit of observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl StreamEvent {
    /// Build an event stamped with the current time
    pub fn new(kind: EventKind, job_id: Option<Uuid>, data: impl Into<serde_json::Value>) -> Self {
        StreamEvent {
            kind,
            data: data.into(),
            timestamp: now_seconds(),
            job_id,
        }
    }

    pub fn execution_start(job_id: Uuid) -> Self {
        Self::new(EventKind::ExecutionStart, Some(job_id), "Starting execution...")
    }

    pub fn stdout(job_id: Uuid, line: impl Into<String>) -> Self {
        Self::new(EventKind::Stdout, Some(job_id), serde_json::Value::String(line.into()))
    }

    pub fn stderr(job_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(EventKind::Stderr, Some(job_id), serde_json::Value::String(text.into()))
    }

    pub fn joint_state(job_id: Uuid, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::new(EventKind::JointState, Some(job_id), serde_json::Value::Object(payload))
    }

    pub fn test_start(job_id: Uuid) -> Self {
        Self::new(EventKind::TestStart, Some(job_id), "Running tests...")
    }

    pub fn execution_complete(job_id: Uuid, exit_code: i32) -> Self {
        Self::new(
            EventKind::ExecutionComplete,
            Some(job_id),
            format!("Execution finished with exit code: {}", exit_code),
        )
    }

    pub fn error(job_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, job_id, serde_json::Value::String(message.into()))
    }

    pub fn position_confirmed(data: serde_json::Value) -> Self {
        Self::new(EventKind::JointPositionConfirmed, None, data)
    }

    /// Serialize for a text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn now_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let id = Uuid::new_v4();
        let event = StreamEvent::stdout(id, "hello");
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "stdout");
        assert_eq!(json["data"], "hello");
        assert_eq!(json["job_id"], id.to_string());
        assert!(json["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
    }

    #[test]
    fn test_relayed_event_has_no_job() {
        let event = StreamEvent::position_confirmed(serde_json::json!({"elbow": 0.5}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "joint_position_confirmed");
        assert!(json.get("job_id").is_none());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::ExecutionComplete.is_terminal());
        assert!(EventKind::Error.is_terminal());
        assert!(!EventKind::Stdout.is_terminal());
        assert_eq!(
            StreamEvent::execution_complete(Uuid::nil(), 3).data,
            "Execution finished with exit code: 3"
        );
    }
}
