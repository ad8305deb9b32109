//! Child process abstraction (spec.md §4.D, §5)
//!
//! Grounded on the `clawde-io-apps` daemon's session runners
//! (`session/claude.rs`, `session/codex.rs`): a `Child` held behind a
//! lock with its stdout drained line-by-line on a dedicated task, its
//! pid tracked separately for signal delivery, and a cancel/kill path
//! that doesn't need the stdout task to cooperate. Adapted from their
//! one-shot-per-turn spawn to a persistent process with a standing
//! stdin writer, since spec.md's supervisor keeps one child alive per
//! project across many turns rather than respawning each message.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Everything the runtime needs from a running child, abstracted so
/// tests can substitute `FakeChildProcess` for a real OS process
/// (mirrors the teacher's `runtime::traits` split between a trait and
/// its production/fake implementations).
#[async_trait]
pub trait ChildProcess: Send + Sync {
    /// Write one line (newline appended) to the child's stdin.
    async fn write_line(&self, line: &str) -> std::io::Result<()>;

    /// Read the next line of stdout, or `None` on EOF.
    async fn next_line(&self) -> std::io::Result<Option<String>>;

    /// Read the next line of stderr, or `None` on EOF. Callers use
    /// this only for logging; stderr never feeds the message pipeline.
    async fn next_stderr_line(&self) -> std::io::Result<Option<String>>;

    /// Send SIGTERM (or platform equivalent), wait up to `grace` for
    /// exit, then escalate to SIGKILL. Idempotent after the child has
    /// already exited.
    async fn terminate(&self, grace: Duration);

    /// Pause the child via SIGSTOP (spec.md §4.D "paused" substate).
    async fn pause(&self) -> std::io::Result<()>;

    /// Resume a paused child via SIGCONT.
    async fn resume(&self) -> std::io::Result<()>;

    fn pid(&self) -> Option<u32>;

    /// Blocks until the child has exited, returning its exit status
    /// description. Used by the runtime's crash-detection task.
    async fn wait(&self) -> std::io::Result<std::process::ExitStatus>;
}

/// Real `tokio::process`-backed child (spec.md §4.D: spawn with piped
/// stdio, cwd set to the project's absolute path, env carrying any
/// mode-switch flags the supervisor computed).
pub struct SpawnedChild {
    child: Mutex<Child>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    stderr: Mutex<BufReader<tokio::process::ChildStderr>>,
    stdin: Mutex<tokio::process::ChildStdin>,
    pid: AtomicU32,
}

impl SpawnedChild {
    pub fn spawn(bin: &str, args: &[String], cwd: &std::path::Path, envs: &[(String, String)]) -> std::io::Result<Self> {
        let mut command = Command::new(bin);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in envs {
            command.env(k, v);
        }

        let mut child = command.spawn()?;
        let pid = child.id().unwrap_or(0);
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stdin = child.stdin.take().expect("piped stdin");

        Ok(Self {
            child: Mutex::new(child),
            stdout: Mutex::new(BufReader::new(stdout)),
            stderr: Mutex::new(BufReader::new(stderr)),
            stdin: Mutex::new(stdin),
            pid: AtomicU32::new(pid),
        })
    }
}

#[async_trait]
impl ChildProcess for SpawnedChild {
    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    async fn next_line(&self) -> std::io::Result<Option<String>> {
        let mut reader = self.stdout.lock().await;
        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    async fn next_stderr_line(&self) -> std::io::Result<Option<String>> {
        let mut reader = self.stderr.lock().await;
        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.ends_with('\n') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    async fn terminate(&self, grace: Duration) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return;
        }
        send_signal(pid, Signal::Term);

        let mut child = self.child.lock().await;
        let already_exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
        if !already_exited {
            send_signal(pid, Signal::Kill);
            let _ = child.wait().await;
        }
    }

    async fn pause(&self) -> std::io::Result<()> {
        let pid = self.pid.load(Ordering::SeqCst);
        send_signal(pid, Signal::Stop);
        Ok(())
    }

    async fn resume(&self) -> std::io::Result<()> {
        let pid = self.pid.load(Ordering::SeqCst);
        send_signal(pid, Signal::Cont);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        let pid = self.pid.load(Ordering::SeqCst);
        (pid != 0).then_some(pid)
    }

    async fn wait(&self) -> std::io::Result<std::process::ExitStatus> {
        let mut child = self.child.lock().await;
        child.wait().await
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
    Stop,
    Cont,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
        Signal::Stop => libc::SIGSTOP,
        Signal::Cont => libc::SIGCONT,
    };
    // Safety: `pid` came from `Child::id()` of a process we own; sending
    // it a signal is the documented way to ask tokio's child to stop
    // without racing `Child::kill`, which only knows SIGKILL.
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

/// Scripted test double: preloaded stdout lines, captured stdin
/// writes, a simulated exit. Lets `AgentRuntime`/`AgentSupervisor`
/// tests exercise the full turn lifecycle without a real subprocess.
pub struct FakeChildProcess {
    stdout_lines: Mutex<std::collections::VecDeque<String>>,
    stdin_log: Mutex<Vec<String>>,
    terminated: std::sync::atomic::AtomicBool,
    exit_notify: tokio::sync::Notify,
}

impl FakeChildProcess {
    pub fn new(scripted_stdout: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            stdout_lines: Mutex::new(scripted_stdout.into()),
            stdin_log: Mutex::new(Vec::new()),
            terminated: std::sync::atomic::AtomicBool::new(false),
            exit_notify: tokio::sync::Notify::new(),
        })
    }

    pub fn push_stdout(&self, line: impl Into<String>) {
        self.stdout_lines.blocking_lock().push_back(line.into());
    }

    pub async fn written_lines(&self) -> Vec<String> {
        self.stdin_log.lock().await.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChildProcess for FakeChildProcess {
    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        self.stdin_log.lock().await.push(line.to_string());
        Ok(())
    }

    async fn next_line(&self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.stdout_lines.lock().await.pop_front() {
                return Ok(Some(line));
            }
            if self.terminated.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.exit_notify.notified().await;
        }
    }

    async fn next_stderr_line(&self) -> std::io::Result<Option<String>> {
        Ok(None)
    }

    async fn terminate(&self, _grace: Duration) {
        self.terminated.store(true, Ordering::SeqCst);
        self.exit_notify.notify_waiters();
    }

    async fn pause(&self) -> std::io::Result<()> {
        Ok(())
    }

    async fn resume(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(1)
    }

    async fn wait(&self) -> std::io::Result<std::process::ExitStatus> {
        while !self.terminated.load(Ordering::SeqCst) {
            self.exit_notify.notified().await;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Ok(std::process::ExitStatus::from_raw(0))
        }
        #[cfg(not(unix))]
        {
            Ok(Command::new("true").status().await.unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_drains_scripted_lines_in_order() {
        let fake = FakeChildProcess::new(vec!["a".into(), "b".into()]);
        assert_eq!(fake.next_line().await.unwrap(), Some("a".into()));
        assert_eq!(fake.next_line().await.unwrap(), Some("b".into()));
        fake.terminate(Duration::from_millis(1)).await;
        assert_eq!(fake.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fake_records_written_lines() {
        let fake = FakeChildProcess::new(vec![]);
        fake.write_line("hello").await.unwrap();
        assert_eq!(fake.written_lines().await, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn fake_terminate_is_idempotent() {
        let fake = FakeChildProcess::new(vec![]);
        fake.terminate(Duration::from_millis(1)).await;
        fake.terminate(Duration::from_millis(1)).await;
        assert!(fake.is_terminated());
    }
}
