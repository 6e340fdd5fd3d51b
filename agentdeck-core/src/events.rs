//! Outbound domain events
//!
//! Every component that observes or controls sessions emits [`SessionEvent`]s
//! into one unbounded channel created by the consumer and handed in at
//! construction or start. Delivery order is guaranteed per source (per
//! transcript file, per subprocess stream) and unspecified across sources:
//! concurrent sessions interleave arbitrarily.
//!
//! The serde representation uses the kebab-case event names consumers see on
//! the wire (`session-snapshot-updated`, `new-message`, ...), so serializing
//! an event yields a self-describing JSON object with an `event` tag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{Message, SessionStatus};

/// Sender half handed to the repository consumer, tailer, and controller
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half kept by the consumer
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the outbound event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// An event emitted at the core's boundary
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// A watched transcript produced new messages; consumers wanting the full
    /// aggregate re-query the repository.
    #[serde(rename_all = "camelCase")]
    SessionSnapshotUpdated {
        session_id: Uuid,
        last_activity_at: DateTime<Utc>,
    },

    /// One newly appended message, in source line order per file
    #[serde(rename_all = "camelCase")]
    NewMessage { session_id: Uuid, message: Message },

    /// Lifecycle status change reported by the process controller
    #[serde(rename_all = "camelCase")]
    SessionStatusChanged {
        session_id: Uuid,
        status: SessionStatus,
    },

    /// Verbatim line from a supervised subprocess's stdout
    #[serde(rename_all = "camelCase")]
    RawOutput { session_id: Uuid, chunk: String },

    /// Line from a supervised subprocess's stderr; diagnostic, non-fatal
    #[serde(rename_all = "camelCase")]
    ProcessStderr { session_id: Uuid, chunk: String },

    /// Typed record recognized in a supervised subprocess's stdout
    #[serde(rename_all = "camelCase")]
    StructuredOutput {
        session_id: Uuid,
        #[serde(flatten)]
        output: StructuredOutput,
    },
}

/// Structured records recognized in subprocess stdout.
///
/// Assistant records reuse the transcript parser's record-shape recognition;
/// tool records are carried as raw JSON since their stream shape is owned by
/// the external tool.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StructuredOutput {
    AssistantMessage { message: Box<Message> },
    ToolUse { payload: serde_json::Value },
    ToolResult { payload: serde_json::Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_on_the_wire() {
        let snapshot = SessionEvent::SessionSnapshotUpdated {
            session_id: Uuid::new_v4(),
            last_activity_at: Utc::now(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["event"], "session-snapshot-updated");

        let status = SessionEvent::SessionStatusChanged {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Completed,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["event"], "session-status-changed");
        assert_eq!(value["status"], "completed");

        let raw = SessionEvent::RawOutput {
            session_id: Uuid::new_v4(),
            chunk: "hello".to_string(),
        };
        let value = serde_json::to_value(&raw).unwrap();
        assert_eq!(value["event"], "raw-output");
        assert_eq!(value["chunk"], "hello");
    }

    #[test]
    fn test_structured_output_kinds() {
        let event = SessionEvent::StructuredOutput {
            session_id: Uuid::new_v4(),
            output: StructuredOutput::ToolUse {
                payload: serde_json::json!({"name": "Bash"}),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "structured-output");
        assert_eq!(value["kind"], "tool-use");
        assert_eq!(value["payload"]["name"], "Bash");
    }
}
