//! Subprocess control of discovered sessions
//!
//! Takes over an externally-created session by resuming it under a supervised
//! `claude --resume <id>` subprocess with piped standard streams. At most one
//! subprocess exists per session id; the invariant is enforced by map
//! membership inside a single supervisor task that owns all controlled-session
//! state and serves commands over a channel, so no locking is involved. Each
//! child's stdin belongs to a per-child writer task; the supervisor only
//! enqueues writes, so a stalled pipe or an interrupt settle never holds up
//! commands for other sessions.
//!
//! Subprocess output flows back as events: every stdout line verbatim as
//! `raw-output`, recognized records additionally as typed structured events,
//! stderr lines as their own event kind. Exit emits a final status
//! (`completed` for a zero exit code, otherwise `error`) and drops the entry.
//!
//! Forking is the one operation that runs outside the supervisor: it spawns a
//! fresh non-interactive process and touches no shared state, so a slow fork
//! never stalls sends or releases.

use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{home_dir, ClaudeConfig, ControlConfig};
use crate::error::{Error, Result};
use crate::events::{EventSender, SessionEvent, StructuredOutput};
use crate::transcript;
use crate::types::{SendMode, SessionStatus};

/// Graceful-exit directive understood by the resumed process
const EXIT_DIRECTIVE: &[u8] = b"/exit\n";

/// Handle to the supervisor task managing all controlled sessions.
pub struct ProcessController {
    tx: mpsc::UnboundedSender<ControlCommand>,
    executable: String,
}

/// One actively-supervised session.
struct ControlledSession {
    pid: u32,
    /// Feeds the writer task that owns the child's stdin
    writer: mpsc::UnboundedSender<StdinWrite>,
    /// Cleared by the exit-wait task the moment the child is reaped
    alive: Arc<AtomicBool>,
    working_dir: PathBuf,
}

/// One queued write to a controlled child's stdin
struct StdinWrite {
    payload: Vec<u8>,
    /// Signal first and wait out the settle delay before writing
    interrupt: bool,
}

enum ControlCommand {
    Take {
        session_id: Uuid,
        working_dir: Option<PathBuf>,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        session_id: Uuid,
        text: String,
        mode: SendMode,
        reply: oneshot::Sender<()>,
    },
    Release {
        session_id: Uuid,
        reply: oneshot::Sender<()>,
    },
    ReleaseAll {
        reply: oneshot::Sender<()>,
    },
    IsControlled {
        session_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    /// Fed back by the per-child exit-wait task
    Exited {
        session_id: Uuid,
        code: Option<i32>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl ProcessController {
    /// Spawn the supervisor task. Requires a running tokio runtime.
    pub fn new(claude: &ClaudeConfig, control: &ControlConfig, events: EventSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            executable: claude.executable.clone(),
            interrupt_delay: Duration::from_millis(control.interrupt_delay_ms),
            release_grace: Duration::from_millis(control.release_grace_ms),
            events,
            tx: tx.downgrade(),
            sessions: HashMap::new(),
            grace_tasks: HashMap::new(),
        };
        tokio::spawn(supervisor.run(rx));

        Self {
            tx,
            executable: claude.executable.clone(),
        }
    }

    /// Resume the session under a supervised subprocess.
    ///
    /// A session already under control is a no-op success, never a second
    /// spawn. A relative or missing working directory falls back to the home
    /// directory.
    pub async fn take_control(&self, session_id: Uuid, working_dir: Option<PathBuf>) -> Result<()> {
        self.request(|reply| ControlCommand::Take {
            session_id,
            working_dir,
            reply,
        })
        .await?
    }

    /// Deliver `text` to the controlled session's input stream.
    ///
    /// Returns once the write is queued to the session's writer task, not
    /// once it lands. `queue` writes directly; the process picks it up at its
    /// next prompt. `interrupt` sends SIGINT first and lets the process
    /// settle before writing. A session not under control is logged and
    /// ignored.
    pub async fn send_message(&self, session_id: Uuid, text: &str, mode: SendMode) -> Result<()> {
        self.request(|reply| ControlCommand::Send {
            session_id,
            text: text.to_string(),
            mode,
            reply,
        })
        .await
    }

    /// Hand the session back: queue the graceful-exit directive, then SIGTERM
    /// after a grace period if the process lingers. The entry is removed
    /// immediately, not when the process confirms.
    pub async fn release(&self, session_id: Uuid) -> Result<()> {
        self.request(|reply| ControlCommand::Release { session_id, reply })
            .await
    }

    /// Release every controlled session; used on shutdown.
    pub async fn release_all(&self) -> Result<()> {
        self.request(|reply| ControlCommand::ReleaseAll { reply })
            .await
    }

    pub async fn is_controlled(&self, session_id: Uuid) -> bool {
        self.request(|reply| ControlCommand::IsControlled { session_id, reply })
            .await
            .unwrap_or(false)
    }

    /// Fork the session into a new one, returning the new session id.
    ///
    /// Runs the executable non-interactively and parses its final JSON output
    /// for a `sessionId`. Unparsable output returns the original id (the fork
    /// is then a no-op from the caller's perspective); a nonzero exit is
    /// [`Error::Fork`].
    pub async fn fork(&self, session_id: Uuid, working_dir: Option<PathBuf>) -> Result<Uuid> {
        let dir = resolve_working_dir(working_dir);
        tracing::info!(%session_id, dir = %dir.display(), "forking session");

        let mut child = Command::new(&self.executable)
            .args([
                "--resume",
                &session_id.to_string(),
                "--fork-session",
                "--print",
                "--output-format",
                "json",
            ])
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.executable, e))?;

        // --print mode still reads one line of input before running
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"\n").await;
            let _ = stdin.flush().await;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::Fork {
                code: output.status.code(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_forked_session_id(&stdout).unwrap_or(session_id))
    }

    /// Release everything and stop the supervisor.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ControlCommand::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| Error::ControllerClosed)?;
        reply_rx.await.map_err(|_| Error::ControllerClosed)
    }
}

// ============================================
// Supervisor task
// ============================================

struct Supervisor {
    executable: String,
    interrupt_delay: Duration,
    release_grace: Duration,
    events: EventSender,
    /// Held weakly; only exit-wait tasks keep upgraded clones, so once every
    /// [`ProcessController`] is dropped and the children are reaped, the
    /// command channel closes and the supervisor runs down on its own
    tx: mpsc::WeakUnboundedSender<ControlCommand>,
    sessions: HashMap<Uuid, ControlledSession>,
    grace_tasks: HashMap<Uuid, JoinHandle<()>>,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ControlCommand::Take {
                    session_id,
                    working_dir,
                    reply,
                } => {
                    let _ = reply.send(self.handle_take(session_id, working_dir));
                }
                ControlCommand::Send {
                    session_id,
                    text,
                    mode,
                    reply,
                } => {
                    self.handle_send(session_id, &text, mode);
                    let _ = reply.send(());
                }
                ControlCommand::Release { session_id, reply } => {
                    self.handle_release(session_id);
                    let _ = reply.send(());
                }
                ControlCommand::ReleaseAll { reply } => {
                    self.release_all();
                    let _ = reply.send(());
                }
                ControlCommand::IsControlled { session_id, reply } => {
                    let _ = reply.send(self.sessions.contains_key(&session_id));
                }
                ControlCommand::Exited { session_id, code } => {
                    self.handle_exited(session_id, code);
                }
                ControlCommand::Shutdown { reply } => {
                    self.release_all();
                    for (_, handle) in self.grace_tasks.drain() {
                        handle.abort();
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn handle_take(&mut self, session_id: Uuid, working_dir: Option<PathBuf>) -> Result<()> {
        if self.sessions.contains_key(&session_id) {
            tracing::debug!(%session_id, "session already under control");
            return Ok(());
        }

        // A live caller implies a strong command sender somewhere, so the
        // upgrade only fails while the controller is tearing down
        let tx = match self.tx.upgrade() {
            Some(tx) => tx,
            None => return Err(Error::ControllerClosed),
        };

        let dir = resolve_working_dir(working_dir);
        let mut child = Command::new(&self.executable)
            .args(["--resume", &session_id.to_string()])
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.executable, e))?;

        let pid = child.id().unwrap_or(0);
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => return Err(Error::Spawn(std::io::Error::other("child stdin not piped"))),
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => return Err(Error::Spawn(std::io::Error::other("child stdout not piped"))),
        };
        let stderr = child.stderr.take();

        tracing::info!(%session_id, pid, dir = %dir.display(), "took control of session");
        let alive = Arc::new(AtomicBool::new(true));

        // Every stdout line goes out raw and unfiltered, then through record
        // recognition
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let _ = events.send(SessionEvent::RawOutput {
                    session_id,
                    chunk: line.clone(),
                });
                emit_structured(&events, session_id, &line);
            }
        });

        if let Some(stderr) = stderr {
            let events = self.events.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = events.send(SessionEvent::ProcessStderr {
                        session_id,
                        chunk: line,
                    });
                }
            });
        }

        let exit_alive = alive.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            exit_alive.store(false, Ordering::SeqCst);
            let code = status.ok().and_then(|s| s.code());
            let _ = tx.send(ControlCommand::Exited { session_id, code });
        });

        let writer = spawn_writer(session_id, pid, stdin, self.interrupt_delay);
        self.sessions.insert(
            session_id,
            ControlledSession {
                pid,
                writer,
                alive,
                working_dir: dir,
            },
        );
        let _ = self.events.send(SessionEvent::SessionStatusChanged {
            session_id,
            status: SessionStatus::Active,
        });
        Ok(())
    }

    fn handle_send(&self, session_id: Uuid, text: &str, mode: SendMode) {
        let entry = match self.sessions.get(&session_id) {
            Some(entry) => entry,
            None => {
                tracing::warn!(%session_id, "send ignored: session not under control");
                return;
            }
        };
        let _ = entry.writer.send(StdinWrite {
            payload: format!("{}\n", text).into_bytes(),
            interrupt: mode == SendMode::Interrupt,
        });
    }

    fn handle_release(&mut self, session_id: Uuid) {
        let entry = match self.sessions.remove(&session_id) {
            Some(entry) => entry,
            None => return,
        };
        tracing::info!(%session_id, dir = %entry.working_dir.display(), "releasing session");

        // Dropping the entry closes the writer channel; the task drains this
        // write and then drops stdin, so a well-behaved process sees the
        // directive and then EOF
        let _ = entry.writer.send(StdinWrite {
            payload: EXIT_DIRECTIVE.to_vec(),
            interrupt: false,
        });

        // Escalate if the process is still around after the grace period
        let pid = entry.pid;
        let alive = entry.alive.clone();
        let grace = self.release_grace;
        if let Some(handle) = self.grace_tasks.remove(&session_id) {
            handle.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if alive.load(Ordering::SeqCst) {
                tracing::info!(%session_id, pid, "escalating release to SIGTERM");
                terminate_process(pid);
            }
        });
        self.grace_tasks.insert(session_id, handle);
    }

    fn release_all(&mut self) {
        let ids: Vec<Uuid> = self.sessions.keys().copied().collect();
        for id in ids {
            self.handle_release(id);
        }
    }

    fn handle_exited(&mut self, session_id: Uuid, code: Option<i32>) {
        self.sessions.remove(&session_id);
        if let Some(handle) = self.grace_tasks.remove(&session_id) {
            handle.abort();
        }

        let status = match code {
            Some(0) => SessionStatus::Completed,
            _ => SessionStatus::Error,
        };
        tracing::info!(%session_id, code = ?code, status = %status, "controlled process exited");
        let _ = self.events.send(SessionEvent::SessionStatusChanged { session_id, status });
    }
}

/// Spawn the writer task owning one child's stdin.
///
/// Interrupt-mode writes deliver the signal and wait out the settle delay
/// here, per child, keeping the supervisor free to serve other sessions.
/// The task ends when the last sender drops, which also drops stdin and
/// gives a released process its EOF.
fn spawn_writer(
    session_id: Uuid,
    pid: u32,
    mut stdin: ChildStdin,
    interrupt_delay: Duration,
) -> mpsc::UnboundedSender<StdinWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel::<StdinWrite>();
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            if write.interrupt {
                // Writing immediately after the signal risks the input being
                // consumed before the process re-enters its input loop
                interrupt_process(pid);
                tokio::time::sleep(interrupt_delay).await;
            }
            if let Err(e) = stdin.write_all(&write.payload).await {
                tracing::warn!(%session_id, error = %e, "failed to write to controlled session");
                continue;
            }
            let _ = stdin.flush().await;
        }
    });
    tx
}

// ============================================
// Output recognition
// ============================================

/// Run one stdout line through the same record-shape recognition as the
/// transcript parser, emitting typed structured events for what it finds.
fn emit_structured(events: &EventSender, session_id: Uuid, line: &str) {
    // Blank lines are padding between records, never records
    if line.trim().is_empty() {
        return;
    }
    let value: Value = match serde_json::from_str(line.trim()) {
        Ok(value) => value,
        // Non-record output already went out as raw-output
        Err(_) => return,
    };

    match value.get("type").and_then(|v| v.as_str()) {
        Some("assistant") => {
            if let Some(message) = transcript::parse_line(line) {
                let _ = events.send(SessionEvent::StructuredOutput {
                    session_id,
                    output: StructuredOutput::AssistantMessage {
                        message: Box::new(message),
                    },
                });
            }
            for block in content_blocks(&value) {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let _ = events.send(SessionEvent::StructuredOutput {
                        session_id,
                        output: StructuredOutput::ToolUse {
                            payload: block.clone(),
                        },
                    });
                }
            }
        }
        // Tool results ride inside user records
        Some("user") => {
            for block in content_blocks(&value) {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_result") {
                    let _ = events.send(SessionEvent::StructuredOutput {
                        session_id,
                        output: StructuredOutput::ToolResult {
                            payload: block.clone(),
                        },
                    });
                }
            }
        }
        _ => {}
    }
}

fn content_blocks(value: &Value) -> &[Value] {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(|blocks| blocks.as_slice())
        .unwrap_or(&[])
}

fn parse_forked_session_id(stdout: &str) -> Option<Uuid> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    value
        .get("sessionId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn resolve_working_dir(dir: Option<PathBuf>) -> PathBuf {
    match dir {
        Some(dir) if dir.is_absolute() => dir,
        _ => home_dir(),
    }
}

fn spawn_error(executable: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::ExecutableNotFound(executable.to_string())
    } else {
        Error::Spawn(e)
    }
}

// ============================================
// Signals
// ============================================

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) {
    if pid == 0 {
        return;
    }
    // SAFETY: plain syscall with a known pid and signal constant; the worst
    // outcome is ESRCH for an already-reaped process.
    unsafe {
        if libc::kill(pid as libc::pid_t, signal) != 0 {
            tracing::debug!(pid, signal, "kill failed, process likely gone");
        }
    }
}

#[cfg(unix)]
fn interrupt_process(pid: u32) {
    send_signal(pid, libc::SIGINT);
}

#[cfg(not(unix))]
fn interrupt_process(_pid: u32) {
    tracing::warn!("interrupt delivery requires unix signals");
}

#[cfg(unix)]
fn terminate_process(pid: u32) {
    send_signal(pid, libc::SIGTERM);
}

#[cfg(not(unix))]
fn terminate_process(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events;
    use crate::events::EventReceiver;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio::time::timeout;

    fn controller(executable: &str) -> (ProcessController, EventReceiver) {
        let claude = ClaudeConfig {
            root: None,
            executable: executable.to_string(),
        };
        let (tx, rx) = events::channel();
        (
            ProcessController::new(&claude, &ControlConfig::default(), tx),
            rx,
        )
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    async fn next_event(rx: &mut EventReceiver) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for controller event")
            .expect("event channel closed early")
    }

    #[tokio::test]
    async fn test_send_to_unsupervised_session_is_ignored() {
        let (controller, mut rx) = controller("true");
        controller
            .send_message(Uuid::new_v4(), "hello", SendMode::Queue)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_take_control_spawns_at_most_once() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("marker");
        let script = write_script(
            temp.path(),
            "fake-agent",
            &format!("echo $$ >> {}\nsleep 5", marker.display()),
        );

        let (controller, _rx) = controller(&script);
        let id = Uuid::new_v4();
        controller.take_control(id, None).await.unwrap();
        controller.take_control(id, None).await.unwrap();
        assert!(controller.is_controlled(id).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let spawns = fs::read_to_string(&marker).unwrap();
        assert_eq!(spawns.lines().count(), 1);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_exit_reports_completed() {
        let (controller, mut rx) = controller("true");
        let id = Uuid::new_v4();
        controller.take_control(id, None).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::SessionStatusChanged {
                status: SessionStatus::Active,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::SessionStatusChanged {
                status: SessionStatus::Completed,
                ..
            }
        ));
        assert!(!controller.is_controlled(id).await);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_error() {
        let (controller, mut rx) = controller("false");
        controller.take_control(Uuid::new_v4(), None).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::SessionStatusChanged {
                status: SessionStatus::Active,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::SessionStatusChanged {
                status: SessionStatus::Error,
                ..
            }
        ));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_raw_output_is_verbatim_including_blank_lines() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path(), "fake-agent", "echo first\necho\necho last");

        let (controller, mut rx) = controller(&script);
        controller.take_control(Uuid::new_v4(), None).await.unwrap();

        let mut chunks = Vec::new();
        while chunks.len() < 3 {
            if let SessionEvent::RawOutput { chunk, .. } = next_event(&mut rx).await {
                chunks.push(chunk);
            }
        }
        assert_eq!(chunks, vec!["first", "", "last"]);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_interrupt_settle_runs_off_the_supervisor() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(
            temp.path(),
            "fake-agent",
            "trap '' INT\nwhile read line; do :; done",
        );
        let claude = ClaudeConfig {
            root: None,
            executable: script,
        };
        let control = ControlConfig {
            interrupt_delay_ms: 500,
            release_grace_ms: 200,
        };
        let (tx, _rx) = events::channel();
        let controller = ProcessController::new(&claude, &control, tx);

        let id = Uuid::new_v4();
        controller.take_control(id, None).await.unwrap();

        // While one session's interrupt settles, the supervisor must keep
        // answering for everyone else
        let (send_result, elapsed) = tokio::join!(
            controller.send_message(id, "wrap up", SendMode::Interrupt),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let started = std::time::Instant::now();
                assert!(!controller.is_controlled(Uuid::new_v4()).await);
                started.elapsed()
            }
        );
        send_result.unwrap();
        assert!(
            elapsed < Duration::from_millis(300),
            "supervisor stalled for {:?} during an interrupt settle",
            elapsed
        );

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_all_handles_stops_the_supervisor() {
        let (controller, mut rx) = controller("true");
        controller.take_control(Uuid::new_v4(), None).await.unwrap();
        drop(controller);

        // The exit-wait task holds the last command sender; once the child
        // is reaped the supervisor runs down and the event channel closes
        while let Some(_event) = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("supervisor kept running after all handles were dropped")
        {}
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let (controller, _rx) = controller("agentdeck-test-no-such-binary");
        let err = controller
            .take_control(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound(_)));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_removes_entry_immediately() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path(), "fake-agent", "sleep 5");

        let (controller, _rx) = controller(&script);
        let id = Uuid::new_v4();
        controller.take_control(id, None).await.unwrap();
        assert!(controller.is_controlled(id).await);

        controller.release(id).await.unwrap();
        assert!(!controller.is_controlled(id).await);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_fork_nonzero_exit_is_hard_failure() {
        let (controller, _rx) = controller("false");
        let err = controller.fork(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, Error::Fork { code: Some(1) }));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_fork_unparsable_output_returns_original_id() {
        // echo prints the arguments back, which is not a JSON document
        let (controller, _rx) = controller("echo");
        let id = Uuid::new_v4();
        assert_eq!(controller.fork(id, None).await.unwrap(), id);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_fork_parses_new_session_id() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(
            temp.path(),
            "fake-agent",
            r#"cat > /dev/null
echo '{"sessionId":"99999999-9999-4999-8999-999999999999","result":"ok"}'"#,
        );

        let (controller, _rx) = controller(&script);
        let forked = controller.fork(Uuid::new_v4(), None).await.unwrap();
        assert_eq!(
            forked,
            "99999999-9999-4999-8999-999999999999".parse::<Uuid>().unwrap()
        );
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_structured_output_recognition() {
        let (tx, mut rx) = events::channel();
        let id = Uuid::new_v4();

        let line = r#"{"type":"assistant","uuid":"m1","message":{"content":[{"type":"text","text":"running it"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#;
        emit_structured(&tx, id, line);

        match rx.try_recv().unwrap() {
            SessionEvent::StructuredOutput {
                output: StructuredOutput::AssistantMessage { message },
                ..
            } => assert_eq!(message.uuid, "m1"),
            other => panic!("expected assistant-message, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::StructuredOutput {
                output: StructuredOutput::ToolUse { payload },
                ..
            } => assert_eq!(payload["name"], "Bash"),
            other => panic!("expected tool-use, got {:?}", other),
        }

        let line = r#"{"type":"user","uuid":"m2","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#;
        emit_structured(&tx, id, line);
        match rx.try_recv().unwrap() {
            SessionEvent::StructuredOutput {
                output: StructuredOutput::ToolResult { payload },
                ..
            } => assert_eq!(payload["tool_use_id"], "t1"),
            other => panic!("expected tool-result, got {:?}", other),
        }

        // Plain terminal output produces no structured event
        emit_structured(&tx, id, "plain progress text");
        assert!(rx.try_recv().is_err());

        // Neither do blank lines; they are raw-output only
        emit_structured(&tx, id, "   ");
        assert!(rx.try_recv().is_err());
    }
}
