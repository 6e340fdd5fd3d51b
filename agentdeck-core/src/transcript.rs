//! Claude Code transcript parsing
//!
//! Parses session transcripts from `~/.claude/projects/<encoded-path>/*.jsonl`
//! and subagent transcripts beneath them. One JSON object per line,
//! append-only; the parser is built to survive whatever shows up in a log
//! format it does not own:
//!
//! - **Malformed JSON lines**: skipped and counted, never fatal.
//! - **Missing fields**: defaulted via `#[serde(default)]`; a record with no
//!   `uuid` gets a freshly generated one rather than being rejected.
//! - **Foreign record types**: only `user` and `assistant` records become
//!   messages; `queue-operation` is recognized and discarded; anything else
//!   is ignored.
//! - **Content shape drift**: content may be a bare string, an array of
//!   blocks, a single object, or absent. All four normalize to a block list.
//!
//! Parsing is stateless except for the caller-supplied starting line offset,
//! so full-file reads (repository) and incremental reads (tailer) share the
//! same loop via [`TranscriptLines`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::io::BufRead;
use uuid::Uuid;

use crate::types::{ContentBlock, Message, Role};

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// One line of a transcript, fields defaulted so partial records survive.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    parent_uuid: Option<String>,
    session_id: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    /// RFC 3339 string or integer epoch milliseconds
    timestamp: Option<serde_json::Value>,
    is_sidechain: Option<bool>,
    agent_id: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    content: Option<serde_json::Value>,
}

/// Decode one value as a content block, tolerating foreign block kinds.
fn block_from_value(value: serde_json::Value) -> ContentBlock {
    serde_json::from_value(value).unwrap_or(ContentBlock::Unknown)
}

/// Normalize the four accepted content encodings to a block list:
/// bare string, array of blocks, absent, or a single object.
fn normalize_content(content: Option<serde_json::Value>) -> Vec<ContentBlock> {
    match content {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(text)) => vec![ContentBlock::Text { text }],
        Some(serde_json::Value::Array(items)) => {
            items.into_iter().map(block_from_value).collect()
        }
        Some(other) => vec![block_from_value(other)],
    }
}

/// Parse a record timestamp, falling back to the current time.
fn parse_timestamp(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    match value {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

/// Convert a raw record into a domain message.
///
/// Returns `None` for records that are valid JSON but not conversation
/// messages: `queue-operation` (recognized, discarded) and any foreign type.
fn message_from_record(raw: RawRecord) -> Option<Message> {
    let role = match raw.record_type.as_deref()? {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        // Queued sends the tool has not consumed yet; not conversation.
        "queue-operation" => return None,
        _ => return None,
    };

    Some(Message {
        uuid: raw
            .uuid
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        parent_uuid: raw.parent_uuid,
        session_id: raw.session_id,
        agent_id: raw.agent_id,
        role,
        content: normalize_content(raw.message.and_then(|m| m.content)),
        timestamp: parse_timestamp(raw.timestamp.as_ref()),
        is_sidechain: raw.is_sidechain.unwrap_or(false),
    })
}

/// Parse a single transcript line.
///
/// Shared with the process controller, which runs the subprocess's stdout
/// through the same record-shape recognition as file parsing.
pub fn parse_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<RawRecord>(trimmed)
        .ok()
        .and_then(message_from_record)
}

// ============================================
// Streaming line reader
// ============================================

/// Lazy message iterator over a transcript byte stream.
///
/// Tracks the total number of lines consumed (including skipped and malformed
/// ones) so callers can persist a line-based resume position, and counts
/// malformed lines for diagnostics. `skip_lines` restarts a previous read at
/// a recorded position; the skipped lines still advance the line counter.
pub struct TranscriptLines<R> {
    lines: std::io::Lines<R>,
    line_no: u64,
    skip: u64,
    malformed: u64,
}

impl<R: BufRead> TranscriptLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            skip: 0,
            malformed: 0,
        }
    }

    /// Skip the first `n` lines (already consumed by a previous read)
    pub fn skip_lines(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    /// Total lines seen so far, counting skipped and malformed ones
    pub fn line_count(&self) -> u64 {
        self.line_no
    }

    /// Number of lines that were not valid JSON
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl<R: BufRead> Iterator for TranscriptLines<R> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                // Undecodable bytes mid-file; treat the rest as unreadable.
                Err(_) => return None,
            };
            self.line_no += 1;

            if self.line_no <= self.skip {
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<RawRecord>(trimmed) {
                Ok(raw) => {
                    if let Some(message) = message_from_record(raw) {
                        return Some(message);
                    }
                }
                Err(e) => {
                    tracing::debug!(line = self.line_no, error = %e, "skipping malformed record");
                    self.malformed += 1;
                }
            }
        }
    }
}
