//! Session discovery and lookup
//!
//! Walks the Claude Code projects tree (`<root>/projects/<workspace>/*.jsonl`)
//! and reconstructs a [`Session`] per transcript whose file stem is a
//! hyphenated UUID. Discovery is a full rescan that rebuilds the in-memory
//! index; per-file failures are logged and skipped, never fatal.
//!
//! The repository also carries the two pieces of state the filesystem cannot
//! express: status overrides reported by the process controller, and the set
//! of sessions currently under subprocess control. An override holds until
//! the transcript is modified after it was set, at which point recency wins
//! again.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::ClaudeConfig;
use crate::error::{Error, Result};
use crate::transcript::TranscriptLines;
use crate::types::{
    Agent, AgentKind, AgentStatus, Message, Session, SessionStatus, MAIN_AGENT_ID, MAIN_AGENT_NAME,
};

/// Messages retained per session in discovery results
pub const SUMMARY_MESSAGE_LIMIT: usize = 50;

/// Controller-reported status and when it was reported.
#[derive(Debug, Clone, Copy)]
struct StatusOverride {
    status: SessionStatus,
    set_at: DateTime<Utc>,
}

/// In-memory index of discovered sessions.
pub struct SessionRepository {
    projects_dir: PathBuf,
    sessions: HashMap<Uuid, Session>,
    overrides: HashMap<Uuid, StatusOverride>,
    controlled: HashSet<Uuid>,
}

impl SessionRepository {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self::with_projects_dir(config.projects_dir())
    }

    pub fn with_projects_dir(projects_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            sessions: HashMap::new(),
            overrides: HashMap::new(),
            controlled: HashSet::new(),
        }
    }

    /// Rescan the projects tree and rebuild the session index.
    ///
    /// Returns summaries (messages truncated to [`SUMMARY_MESSAGE_LIMIT`])
    /// sorted by last activity, most recent first. A missing projects tree is
    /// an empty result, not an error.
    pub fn discover(&mut self) -> Result<Vec<Session>> {
        self.discover_with_progress(|_, _| {})
    }

    /// Like [`Self::discover`], reporting `(parsed, total)` after each file.
    pub fn discover_with_progress<F>(&mut self, mut progress: F) -> Result<Vec<Session>>
    where
        F: FnMut(usize, usize),
    {
        let pattern = self.projects_dir.join("*").join("*.jsonl");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid projects pattern: {}", e)))?;

        // Files without a hyphenated-UUID stem are not sessions
        let files: Vec<(Uuid, PathBuf)> = entries
            .flatten()
            .filter_map(|path| parse_session_uuid(&path).map(|id| (id, path)))
            .collect();
        let total = files.len();

        let mut sessions = HashMap::with_capacity(total);
        for (done, (id, path)) in files.into_iter().enumerate() {
            match self.load_session(id, &path) {
                Ok(session) => {
                    sessions.insert(id, session);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable transcript");
                }
            }
            progress(done + 1, total);
        }

        self.sessions = sessions;
        let sessions = &self.sessions;
        self.overrides.retain(|id, _| sessions.contains_key(id));

        let mut list: Vec<Session> = self
            .sessions
            .values()
            .map(|s| s.summary(SUMMARY_MESSAGE_LIMIT))
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(list)
    }

    /// Full message history for a known session, re-read from disk so the
    /// result reflects lines appended since the last discovery.
    pub fn messages(&self, id: Uuid) -> Result<Vec<Message>> {
        let session = self.sessions.get(&id).ok_or(Error::SessionNotFound(id))?;
        let file = File::open(&session.file_path)?;
        Ok(TranscriptLines::new(BufReader::new(file)).collect())
    }

    /// Re-parse a single known session, updating the index in place.
    pub fn refresh(&mut self, id: Uuid) -> Result<Session> {
        let path = match self.sessions.get(&id) {
            Some(session) => session.file_path.clone(),
            None => return Err(Error::SessionNotFound(id)),
        };
        let session = self.load_session(id, &path)?;
        let summary = session.summary(SUMMARY_MESSAGE_LIMIT);
        self.sessions.insert(id, session);
        Ok(summary)
    }

    /// The indexed session, as of the last discovery or refresh
    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn is_controlled(&self, id: Uuid) -> bool {
        self.controlled.contains(&id)
    }

    /// Mark a session as under (or released from) subprocess control.
    pub fn set_controlled(&mut self, id: Uuid, controlled: bool) {
        if controlled {
            self.controlled.insert(id);
        } else {
            self.controlled.remove(&id);
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            session.is_controlled = controlled;
        }
    }

    /// Record a controller-reported status.
    ///
    /// The override takes precedence over recency-derived status until the
    /// transcript is modified after this call.
    pub fn apply_status(&mut self, id: Uuid, status: SessionStatus) {
        self.overrides.insert(
            id,
            StatusOverride {
                status,
                set_at: Utc::now(),
            },
        );
        if let Some(session) = self.sessions.get_mut(&id) {
            session.status = status;
        }
    }

    fn load_session(&self, id: Uuid, path: &Path) -> Result<Session> {
        let metadata = std::fs::metadata(path)?;
        let now = Utc::now();
        let modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(now);
        let created = metadata
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);

        let file = File::open(path)?;
        let mut lines = TranscriptLines::new(BufReader::new(file));
        let messages: Vec<Message> = lines.by_ref().collect();
        if lines.malformed_count() > 0 {
            tracing::warn!(
                path = %path.display(),
                malformed = lines.malformed_count(),
                "transcript contains malformed lines"
            );
        }

        let workspace_id = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let working_directory = decode_workspace_path(&workspace_id);
        let workspace_name = workspace_display_name(&workspace_id);

        let created_at = messages.first().map(|m| m.timestamp).unwrap_or(created);
        let last_message_at = messages.last().map(|m| m.timestamp).unwrap_or(modified);

        let mut status = SessionStatus::from_last_activity(modified);
        if let Some(over) = self.overrides.get(&id) {
            // A transcript modified after the override means the session came
            // back to life outside our control; recency wins again.
            if modified <= over.set_at {
                status = over.status;
            }
        }

        let agents = discover_agents(path, &messages, modified);

        Ok(Session {
            id,
            workspace_id,
            workspace_name,
            file_path: path.to_path_buf(),
            status,
            agents,
            messages,
            created_at,
            last_message_at,
            is_controlled: self.controlled.contains(&id),
            working_directory,
        })
    }
}

// ============================================
// Path conventions
// ============================================

/// Extract the session UUID from a transcript path.
///
/// Strict hyphenated form only; `Uuid::parse_str` alone also accepts the
/// un-hyphenated and braced variants, which real session files never use.
pub(crate) fn parse_session_uuid(path: &Path) -> Option<Uuid> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 36 {
        return None;
    }
    Uuid::parse_str(stem).ok()
}

/// Decode an encoded workspace directory name back to a path.
///
/// Claude Code encodes `/home/user/dev/app` as `-home-user-dev-app`. The
/// encoding is lossy for paths containing literal dashes; this is the best
/// reconstruction available without the original path.
fn decode_workspace_path(workspace_id: &str) -> Option<PathBuf> {
    if !workspace_id.starts_with('-') {
        return None;
    }
    Some(PathBuf::from(
        workspace_id.replacen('-', "/", 1).replace('-', "/"),
    ))
}

/// Final path segment of the encoded workspace name, for display
fn workspace_display_name(workspace_id: &str) -> String {
    workspace_id
        .rsplit('-')
        .find(|segment| !segment.is_empty())
        .unwrap_or(workspace_id)
        .to_string()
}

// ============================================
// Agents
// ============================================

/// Infer what kind of agent a transcript belongs to from its first message.
///
/// Keyword sniffing over the spawning prompt; a display hint only.
pub fn infer_agent_kind(messages: &[Message]) -> AgentKind {
    let first = match messages.first() {
        Some(message) => message,
        None => return AgentKind::Unknown,
    };
    let text = first.text_content().to_lowercase();

    if text.contains("explore") || text.contains("codebase") {
        AgentKind::Explore
    } else if text.contains("plan") || text.contains("implementation") {
        AgentKind::Plan
    } else if text.contains("bash") || text.contains("command") {
        AgentKind::Bash
    } else {
        AgentKind::GeneralPurpose
    }
}

/// Build the agent list for a session: the implicit main agent first, then
/// any subagents found under `<session-dir>/subagents/agent-*.jsonl`.
fn discover_agents(path: &Path, messages: &[Message], modified: DateTime<Utc>) -> Vec<Agent> {
    let last_activity = messages.last().map(|m| m.timestamp).unwrap_or(modified);
    let mut agents = vec![Agent {
        id: MAIN_AGENT_ID.to_string(),
        name: MAIN_AGENT_NAME.to_string(),
        kind: infer_agent_kind(messages),
        status: AgentStatus::from_last_activity(modified),
        message_count: messages.len(),
        last_activity,
    }];

    // `<workspace>/<session-uuid>/subagents/` sits next to the transcript
    let subagents_dir = path.with_extension("").join("subagents");
    if !subagents_dir.is_dir() {
        return agents;
    }

    let pattern = subagents_dir.join("agent-*.jsonl");
    let entries = match glob::glob(&pattern.to_string_lossy()) {
        Ok(entries) => entries,
        Err(_) => return agents,
    };

    let mut subagents = Vec::new();
    for entry in entries.flatten() {
        match load_agent(&entry) {
            Ok(agent) => subagents.push(agent),
            Err(e) => {
                tracing::warn!(path = %entry.display(), error = %e, "skipping unreadable agent transcript");
            }
        }
    }
    subagents.sort_by(|a, b| a.id.cmp(&b.id));
    agents.extend(subagents);
    agents
}

fn load_agent(path: &Path) -> Result<Agent> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now);

    let file = File::open(path)?;
    let messages: Vec<Message> = TranscriptLines::new(BufReader::new(file)).collect();

    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.strip_prefix("agent-").unwrap_or(stem).to_string())
        .unwrap_or_default();

    let kind = infer_agent_kind(&messages);
    Ok(Agent {
        id,
        name: kind.display_name().to_string(),
        kind,
        status: AgentStatus::from_last_activity(modified),
        message_count: messages.len(),
        last_activity: messages.last().map(|m| m.timestamp).unwrap_or(modified),
    })
}
