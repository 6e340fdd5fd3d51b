//! Incremental transcript tailing
//!
//! Watches the projects tree and turns transcript appends into events: one
//! `new-message` per parsed line, then a single `session-snapshot-updated`
//! per processed change. Each file is debounced independently with a
//! restartable window so a burst of writes is read once, and tracked by a
//! line/size position so only new lines are parsed. A file whose size
//! shrinks is treated as truncated and re-read from the top.
//!
//! All positions and timers are owned by one supervisor task fed from an
//! unbounded channel; the `notify` watcher callback only forwards paths. Stop
//! flips a stop flag, drops the watcher, and awaits the supervisor, so no
//! event can fire after [`TranscriptTailer::stop`] returns.

use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ClaudeConfig, WatchConfig};
use crate::error::Result;
use crate::events::{EventSender, SessionEvent};
use crate::repo::parse_session_uuid;
use crate::transcript::TranscriptLines;
use crate::types::Message;

/// Read position within one watched transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FilePosition {
    last_line: u64,
    last_size: u64,
}

enum TailMessage {
    /// Raw watcher notification, debounced per path
    Changed(PathBuf),
    /// Debounce window elapsed, read the file now
    Process(PathBuf),
    Shutdown,
}

/// Watches a projects tree and emits session events for transcript appends.
pub struct TranscriptTailer {
    projects_dir: PathBuf,
    debounce: Duration,
    running: Option<Running>,
}

struct Running {
    // Keeps the OS watch registered; dropped first on stop
    watcher: RecommendedWatcher,
    tx: mpsc::UnboundedSender<TailMessage>,
    stopping: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TranscriptTailer {
    pub fn new(claude: &ClaudeConfig, watch: &WatchConfig) -> Self {
        Self::with_projects_dir(
            claude.projects_dir(),
            Duration::from_millis(watch.debounce_ms),
        )
    }

    pub fn with_projects_dir(projects_dir: PathBuf, debounce: Duration) -> Self {
        Self {
            projects_dir,
            debounce,
            running: None,
        }
    }

    /// Begin watching the projects tree, emitting into `events`.
    ///
    /// Idempotent; a second call while running is a no-op. Fails if the
    /// projects tree does not exist.
    pub fn start(&mut self, events: EventSender) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let watcher_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
                    ) {
                        return;
                    }
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                            let _ = watcher_tx.send(TailMessage::Changed(path));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "filesystem watch error");
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.projects_dir, RecursiveMode::Recursive)?;

        let supervisor = Supervisor {
            tx: tx.clone(),
            events,
            debounce: self.debounce,
            positions: HashMap::new(),
            debounce_tasks: HashMap::new(),
            stopping: stopping.clone(),
        };
        let task = tokio::spawn(supervisor.run(rx));

        tracing::info!(path = %self.projects_dir.display(), "watching projects tree");
        self.running = Some(Running {
            watcher,
            tx,
            stopping,
            task,
        });
        Ok(())
    }

    /// Stop watching and wait for in-flight processing to finish.
    ///
    /// Idempotent. Pending debounce timers are cancelled and all retained
    /// positions discarded; no event fires after this returns.
    pub async fn stop(&mut self) {
        let running = match self.running.take() {
            Some(running) => running,
            None => return,
        };
        running.stopping.store(true, Ordering::SeqCst);
        drop(running.watcher);
        let _ = running.tx.send(TailMessage::Shutdown);
        let _ = running.task.await;
        tracing::info!("stopped watching projects tree");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

struct Supervisor {
    tx: mpsc::UnboundedSender<TailMessage>,
    events: EventSender,
    debounce: Duration,
    positions: HashMap<PathBuf, FilePosition>,
    debounce_tasks: HashMap<PathBuf, JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TailMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                TailMessage::Changed(path) => self.schedule(path),
                TailMessage::Process(path) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        continue;
                    }
                    self.debounce_tasks.remove(&path);
                    if let Err(e) = self.process(&path) {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to process transcript change"
                        );
                    }
                }
                TailMessage::Shutdown => break,
            }
        }
        for (_, handle) in self.debounce_tasks.drain() {
            handle.abort();
        }
    }

    /// Restart the file's debounce window.
    fn schedule(&mut self, path: PathBuf) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.debounce_tasks.remove(&path) {
            handle.abort();
        }

        let tx = self.tx.clone();
        let debounce = self.debounce;
        let scheduled = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(TailMessage::Process(scheduled));
        });
        self.debounce_tasks.insert(path, handle);
    }

    fn process(&mut self, path: &Path) -> Result<()> {
        let session_id = match session_id_for_path(path) {
            Some(id) => id,
            None => return Ok(()),
        };
        if !path.exists() {
            self.positions.remove(path);
            return Ok(());
        }

        let position = self.positions.entry(path.to_path_buf()).or_default();
        let (messages, new_position) = read_new_messages(path, *position)?;
        *position = new_position;

        // A change that yields no messages (rewrite in place, partial flush)
        // emits nothing
        if messages.is_empty() {
            return Ok(());
        }

        for message in messages {
            let _ = self.events.send(SessionEvent::NewMessage {
                session_id,
                message,
            });
        }
        // Stamped at observation time; the records' own timestamps can be
        // back-dated or lag a slow sync
        let _ = self.events.send(SessionEvent::SessionSnapshotUpdated {
            session_id,
            last_activity_at: Utc::now(),
        });
        Ok(())
    }
}

/// Read messages appended past `position`, returning them with the updated
/// position. A shrunken file is treated as truncated and re-read from line 0.
fn read_new_messages(path: &Path, mut position: FilePosition) -> Result<(Vec<Message>, FilePosition)> {
    let size = std::fs::metadata(path)?.len();
    if size < position.last_size {
        position = FilePosition::default();
    }

    let file = File::open(path)?;
    let mut lines = TranscriptLines::new(BufReader::new(file)).skip_lines(position.last_line);
    let messages: Vec<Message> = lines.by_ref().collect();

    Ok((
        messages,
        FilePosition {
            last_line: lines.line_count(),
            last_size: size,
        },
    ))
}

/// Resolve which session a changed file belongs to.
///
/// Session transcripts carry the id as their own stem; subagent transcripts
/// (`<session>/subagents/agent-*.jsonl`) carry it two directories up. Any
/// other file is not ours.
fn session_id_for_path(path: &Path) -> Option<Uuid> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    if let Some(id) = parse_session_uuid(path) {
        return Some(id);
    }

    let stem = path.file_stem()?.to_str()?;
    if !stem.starts_with("agent-") {
        return None;
    }
    parse_session_uuid(path.parent()?.parent()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::fs;
    use std::io::Write;
    use tokio::time::timeout;

    fn user_line(uuid: &str, text: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{}","timestamp":"2025-03-01T12:00:00Z","message":{{"content":"{}"}}}}"#,
            uuid, text
        )
    }

    #[test]
    fn test_session_id_for_path() {
        let session = Path::new("/p/-tmp-ws/11111111-1111-4111-8111-111111111111.jsonl");
        assert!(session_id_for_path(session).is_some());

        let agent = Path::new(
            "/p/-tmp-ws/11111111-1111-4111-8111-111111111111/subagents/agent-abc.jsonl",
        );
        assert_eq!(
            session_id_for_path(agent),
            Some("11111111-1111-4111-8111-111111111111".parse().unwrap())
        );

        assert!(session_id_for_path(Path::new("/p/-tmp-ws/notes.jsonl")).is_none());
        assert!(session_id_for_path(Path::new("/p/-tmp-ws/notes.txt")).is_none());
        assert!(session_id_for_path(Path::new(
            "/p/-tmp-ws/not-a-session/subagents/agent-abc.jsonl"
        ))
        .is_none());
    }

    #[test]
    fn test_read_new_messages_is_incremental() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.jsonl");
        fs::write(
            &path,
            format!("{}\n{}\n", user_line("a", "one"), user_line("b", "two")),
        )
        .unwrap();

        let (messages, position) = read_new_messages(&path, FilePosition::default()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(position.last_line, 2);

        // Unchanged file yields nothing
        let (messages, position) = read_new_messages(&path, position).unwrap();
        assert!(messages.is_empty());
        assert_eq!(position.last_line, 2);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", user_line("c", "three")).unwrap();

        let (messages, position) = read_new_messages(&path, position).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uuid, "c");
        assert_eq!(position.last_line, 3);
    }

    #[test]
    fn test_read_new_messages_detects_truncation() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.jsonl");
        fs::write(
            &path,
            format!(
                "{}\n{}\n{}\n",
                user_line("a", "one"),
                user_line("b", "two"),
                user_line("c", "three")
            ),
        )
        .unwrap();

        let (_, position) = read_new_messages(&path, FilePosition::default()).unwrap();
        assert_eq!(position.last_line, 3);

        // Rewrite with fewer bytes; the position restarts from the top
        fs::write(&path, format!("{}\n", user_line("d", "fresh"))).unwrap();
        let (messages, position) = read_new_messages(&path, position).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uuid, "d");
        assert_eq!(position.last_line, 1);
    }

    #[tokio::test]
    async fn test_watch_emits_messages_then_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = temp.path().join("-tmp-demo");
        fs::create_dir_all(&workspace).unwrap();
        let path = workspace.join("11111111-1111-4111-8111-111111111111.jsonl");
        fs::write(&path, format!("{}\n", user_line("a", "before"))).unwrap();

        let mut tailer = TranscriptTailer::with_projects_dir(
            temp.path().to_path_buf(),
            Duration::from_millis(50),
        );
        let (tx, mut rx) = events::channel();
        tailer.start(tx).unwrap();
        assert!(tailer.is_running());

        // Let the watch registration settle before writing
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Utc::now();
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", user_line("b", "after")).unwrap();
        file.flush().unwrap();
        drop(file);

        // First change reads the whole file: both messages, then one snapshot
        let mut uuids = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for tail events")
                .expect("event channel closed early");
            match event {
                SessionEvent::NewMessage { message, .. } => uuids.push(message.uuid),
                SessionEvent::SessionSnapshotUpdated {
                    session_id,
                    last_activity_at,
                } => {
                    assert_eq!(
                        session_id,
                        "11111111-1111-4111-8111-111111111111".parse::<Uuid>().unwrap()
                    );
                    // Observation time, not the 2025 stamp the records carry
                    assert!(last_activity_at >= started);
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(uuids, vec!["a".to_string(), "b".to_string()]);

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_clean_and_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("-tmp-demo")).unwrap();

        let mut tailer = TranscriptTailer::with_projects_dir(
            temp.path().to_path_buf(),
            Duration::from_millis(50),
        );
        let (tx, mut rx) = events::channel();
        tailer.start(tx).unwrap();

        // Second start while running is a no-op
        let (tx2, _rx2) = events::channel();
        tailer.start(tx2).unwrap();

        tailer.stop().await;
        assert!(!tailer.is_running());
        tailer.stop().await;

        // The supervisor owned the only sender; the channel is now closed
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_tree() {
        let temp = tempfile::tempdir().unwrap();
        let mut tailer = TranscriptTailer::with_projects_dir(
            temp.path().join("missing"),
            Duration::from_millis(50),
        );
        let (tx, _rx) = events::channel();
        assert!(tailer.start(tx).is_err());
    }
}
