//! Core domain types for agentdeck
//!
//! These types model externally-running Claude Code sessions as reconstructed
//! from their transcripts: the Session aggregate, the Agents working inside
//! it, and the Messages exchanged. Nothing here touches the filesystem; the
//! repository, tailer, and controller produce and mutate these values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================
// Session
// ============================================

/// Lifecycle status of a session.
///
/// Derived from transcript modification recency unless the process controller
/// has reported an explicit status (spawn/exit), which takes precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Activity within the last 30 seconds
    Active,
    /// 30 seconds to 5 minutes since last activity
    Idle,
    /// More than 5 minutes since last activity, or clean exit
    Completed,
    /// Supervised subprocess exited with a nonzero status
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    /// Compute status from the last activity time
    pub fn from_last_activity(last_activity: DateTime<Utc>) -> Self {
        let elapsed = Utc::now().signed_duration_since(last_activity);
        let seconds = elapsed.num_seconds();

        if seconds < 30 {
            SessionStatus::Active
        } else if seconds < 300 {
            SessionStatus::Idle
        } else {
            SessionStatus::Completed
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "completed" => Ok(SessionStatus::Completed),
            "error" => Ok(SessionStatus::Error),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// A session reconstructed from one transcript file.
///
/// One Session exists per valid-UUID transcript under the projects tree. The
/// message list held by the repository is the full transcript; summaries
/// returned by discovery truncate it (see [`Session::summary`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session UUID assigned by the originating tool (transcript file stem)
    pub id: Uuid,
    /// Encoded workspace directory name containing the transcript
    pub workspace_id: String,
    /// Decoded display name (final segment of the decoded workspace path)
    pub workspace_name: String,
    /// Absolute path to the transcript file
    pub file_path: PathBuf,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Agents active in this session; the implicit main agent is first
    pub agents: Vec<Agent>,
    /// Messages parsed from the transcript
    pub messages: Vec<Message>,
    /// First message timestamp, or file creation time
    pub created_at: DateTime<Utc>,
    /// Last message timestamp, or file modification time
    pub last_message_at: DateTime<Utc>,
    /// Whether a supervised subprocess is attached to this session
    pub is_controlled: bool,
    /// Decoded workspace path, used as the takeover working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl Session {
    /// Clone with the message list truncated to the `limit` most recent
    /// entries, for list views that do not need full history.
    pub fn summary(&self, limit: usize) -> Session {
        let mut session = self.clone();
        if session.messages.len() > limit {
            session.messages = session.messages[session.messages.len() - limit..].to_vec();
        }
        session
    }
}

// ============================================
// Agents
// ============================================

/// Inferred kind of an agent, from the text of its first message.
///
/// A display hint, not a verified classification; inference lives in
/// [`crate::repo::infer_agent_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Explore,
    Plan,
    Bash,
    GeneralPurpose,
    Unknown,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Explore => "explore",
            AgentKind::Plan => "plan",
            AgentKind::Bash => "bash",
            AgentKind::GeneralPurpose => "general-purpose",
            AgentKind::Unknown => "unknown",
        }
    }

    /// Returns the display name for agents of this kind
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::Explore => "Explorer",
            AgentKind::Plan => "Planner",
            AgentKind::Bash => "Bash Runner",
            AgentKind::GeneralPurpose => "Worker",
            AgentKind::Unknown => "Agent",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explore" => Ok(AgentKind::Explore),
            "plan" => Ok(AgentKind::Plan),
            "bash" => Ok(AgentKind::Bash),
            "general-purpose" => Ok(AgentKind::GeneralPurpose),
            "unknown" => Ok(AgentKind::Unknown),
            _ => Err(format!("unknown agent kind: {}", s)),
        }
    }
}

/// Activity status of an agent, same thresholds as [`SessionStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Activity within the last 30 seconds
    Working,
    /// 30 seconds to 5 minutes since last activity
    Idle,
    /// More than 5 minutes since last activity
    Completed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Working => "working",
            AgentStatus::Idle => "idle",
            AgentStatus::Completed => "completed",
        }
    }

    /// Compute status from the last activity time
    pub fn from_last_activity(last_activity: DateTime<Utc>) -> Self {
        let elapsed = Utc::now().signed_duration_since(last_activity);
        let seconds = elapsed.num_seconds();

        if seconds < 30 {
            AgentStatus::Working
        } else if seconds < 300 {
            AgentStatus::Idle
        } else {
            AgentStatus::Completed
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An agent working within a session.
///
/// The root conversation is the implicit `"main"` agent; secondary agents are
/// parsed from `agent-<id>.jsonl` files in the session's subagents directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// `"main"` for the root agent, else the id from the transcript filename
    pub id: String,
    /// Display name ("Main Agent", "Explorer", ...)
    pub name: String,
    /// Inferred kind
    pub kind: AgentKind,
    /// Current activity status
    pub status: AgentStatus,
    /// Number of messages in this agent's transcript
    pub message_count: usize,
    /// Timestamp of the agent's most recent message
    pub last_activity: DateTime<Utc>,
}

/// Reserved id of the implicit root agent
pub const MAIN_AGENT_ID: &str = "main";

/// Display name of the implicit root agent
pub const MAIN_AGENT_NAME: &str = "Main Agent";

// ============================================
// Messages
// ============================================

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One block of message content.
///
/// Closed tagged union; every match over it is exhaustive so a new block kind
/// is a compile-time-checked change. Block kinds this tool does not consume
/// (images, thinking) decode as [`ContentBlock::Unknown`] rather than
/// rejecting the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },
    /// Tool invocation request
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Result of a tool invocation
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Unrecognized block kind, carried as a marker only
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Returns the text for a `Text` block
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
            ContentBlock::Unknown => None,
        }
    }
}

/// A message parsed from a transcript record.
///
/// Immutable once parsed. The `uuid` is carried verbatim from the source
/// record (which does not guarantee well-formed UUIDs) or freshly generated
/// when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Record id from the source, or a generated v4 UUID string
    pub uuid: String,
    /// Parent record id; forms a tree across branches and sidechains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    /// Owning session id as recorded in the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Owning agent id for subagent transcripts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Author role
    pub role: Role,
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
    /// Record timestamp, defaulting to parse time when absent
    pub timestamp: DateTime<Utc>,
    /// Whether this message belongs to a branch/side-exploration
    #[serde(default)]
    pub is_sidechain: bool,
}

impl Message {
    /// Concatenated text of all `Text` blocks, one per line
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================
// Control
// ============================================

/// How a message is delivered to a supervised subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Write to stdin; the subprocess picks it up at its next prompt
    Queue,
    /// SIGINT first, settle briefly, then write
    Interrupt,
}

impl SendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMode::Queue => "queue",
            SendMode::Interrupt => "interrupt",
        }
    }
}

impl std::str::FromStr for SendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(SendMode::Queue),
            "interrupt" => Ok(SendMode::Interrupt),
            _ => Err(format!("unknown send mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_status_thresholds() {
        let now = Utc::now();
        assert_eq!(
            SessionStatus::from_last_activity(now - Duration::seconds(5)),
            SessionStatus::Active
        );
        assert_eq!(
            SessionStatus::from_last_activity(now - Duration::seconds(60)),
            SessionStatus::Idle
        );
        assert_eq!(
            SessionStatus::from_last_activity(now - Duration::seconds(900)),
            SessionStatus::Completed
        );
    }

    #[test]
    fn test_agent_status_thresholds() {
        let now = Utc::now();
        assert_eq!(
            AgentStatus::from_last_activity(now - Duration::seconds(5)),
            AgentStatus::Working
        );
        assert_eq!(
            AgentStatus::from_last_activity(now - Duration::seconds(60)),
            AgentStatus::Idle
        );
        assert_eq!(
            AgentStatus::from_last_activity(now - Duration::seconds(301)),
            AgentStatus::Completed
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Idle,
            SessionStatus::Completed,
            SessionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_agent_kind_round_trip() {
        for kind in [
            AgentKind::Explore,
            AgentKind::Plan,
            AgentKind::Bash,
            AgentKind::GeneralPurpose,
            AgentKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_agent_kind_display_names() {
        assert_eq!(AgentKind::Explore.display_name(), "Explorer");
        assert_eq!(AgentKind::Plan.display_name(), "Planner");
        assert_eq!(AgentKind::Bash.display_name(), "Bash Runner");
        assert_eq!(AgentKind::GeneralPurpose.display_name(), "Worker");
        assert_eq!(AgentKind::Unknown.display_name(), "Agent");
    }

    #[test]
    fn test_content_block_tagging() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(block.text(), Some("hi"));

        let block: ContentBlock = serde_json::from_str(
            r#"{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}"#,
        )
        .unwrap();
        assert!(matches!(block, ContentBlock::ToolUse { .. }));

        let block: ContentBlock = serde_json::from_str(
            r#"{"type":"tool_result","tool_use_id":"t1","content":"ok"}"#,
        )
        .unwrap();
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(!is_error);
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_block_kind_is_tolerated() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"image","source":{"data":"..."}}"#).unwrap();
        assert_eq!(block, ContentBlock::Unknown);
    }

    #[test]
    fn test_session_summary_truncates() {
        let now = Utc::now();
        let message = |n: usize| Message {
            uuid: format!("m{}", n),
            parent_uuid: None,
            session_id: None,
            agent_id: None,
            role: Role::User,
            content: vec![],
            timestamp: now,
            is_sidechain: false,
        };
        let session = Session {
            id: Uuid::new_v4(),
            workspace_id: "-tmp-ws".to_string(),
            workspace_name: "ws".to_string(),
            file_path: PathBuf::from("/tmp/x.jsonl"),
            status: SessionStatus::Idle,
            agents: vec![],
            messages: (0..10).map(message).collect(),
            created_at: now,
            last_message_at: now,
            is_controlled: false,
            working_directory: None,
        };

        let summary = session.summary(4);
        assert_eq!(summary.messages.len(), 4);
        assert_eq!(summary.messages[0].uuid, "m6");
        assert_eq!(session.messages.len(), 10);
    }
}
