//! PTY session management.
//!
//! A [`PtySession`] owns one spawned shell process, the background drain
//! actor reading its output, and the buffer that output accumulates in.
//! Command execution is a fixed-wait protocol: write the line, sleep the
//! caller's budget, then atomically drain whatever arrived.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::sanitize::OutputCleaner;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host could not create the PTY or the shell process.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// Writing the command line to the shell failed.
    #[error("failed to write to shell: {0}")]
    WriteFailed(String),

    /// The shell process has already exited or the session was closed.
    #[error("shell process has terminated")]
    Terminated,
}

/// What to run and where, for every session this gateway spawns.
#[derive(Debug, Clone)]
pub struct ShellSpec {
    /// Shell program (path or name resolvable via PATH).
    pub program: String,

    /// Working directory for the shell; inherits the gateway's when `None`.
    pub cwd: Option<PathBuf>,
}

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Fixed terminal geometry; the protocol has no resize message.
const PTY_COLS: u16 = 80;
const PTY_ROWS: u16 = 24;

/// A PTY session with a shell process.
///
/// The session holds the only consumer end of the output buffer; the drain
/// actor is the only producer. [`run_command`](Self::run_command) and
/// [`collect_initial_output`](Self::collect_initial_output) serialize on an
/// internal lock so overlapping calls can never misattribute output.
pub struct PtySession {
    /// Keeps the PTY pair alive; never locked after construction.
    _master: StdMutex<Box<dyn MasterPty + Send>>,

    /// Writer side of the PTY (shell stdin).
    writer: Mutex<Box<dyn Write + Send>>,

    /// The child shell process.
    child: Mutex<Box<dyn Child + Send + Sync>>,

    /// Cleaned output accumulated by the drain actor since the last drain.
    buffer: Arc<StdMutex<String>>,

    /// False once the process exits, the PTY stream fails, or close() runs.
    running: Arc<AtomicBool>,

    /// Guards the clear -> write -> wait -> drain sequence.
    run_lock: Mutex<()>,

    /// Ensures close() side effects happen exactly once.
    closed: AtomicBool,

    /// Process ID of the shell.
    pid: Option<u32>,
}

impl PtySession {
    /// Spawns a shell and starts its drain actor.
    ///
    /// Fails with [`SessionError::SpawnFailed`] if the PTY pair or the
    /// process cannot be created (missing executable, permissions).
    pub fn spawn(spec: &ShellSpec) -> Result<Self, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        if let Some(ref dir) = spec.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let session = PtySession {
            _master: StdMutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            buffer: Arc::new(StdMutex::new(String::new())),
            running: Arc::new(AtomicBool::new(true)),
            run_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            pid,
        };

        session.start_drain_actor(reader);

        tracing::debug!(pid = ?pid, shell = %spec.program, "spawned PTY session");

        Ok(session)
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the shell process is still live.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits out the quiet period, then drains startup output (the shell
    /// banner and first prompt). Clears the buffer as a side effect.
    pub async fn collect_initial_output(&self, quiet: Duration) -> String {
        let _guard = self.run_lock.lock().await;
        tokio::time::sleep(quiet).await;
        self.drain()
    }

    /// Submits `cmd` to the shell and returns the output captured during
    /// `timeout`.
    ///
    /// Sequence: discard stale buffered output, write `cmd` plus the line
    /// terminator, sleep `timeout`, atomically drain. This is a bounded-wait
    /// heuristic, not completion detection: a command still running when the
    /// budget elapses returns partial output and keeps running, with the
    /// rest delivered by the next drain.
    pub async fn run_command(&self, cmd: &str, timeout: Duration) -> Result<String, SessionError> {
        let _guard = self.run_lock.lock().await;

        if !self.is_running() {
            return Err(SessionError::Terminated);
        }

        // Discard output that arrived after the previous drain window.
        self.drain();

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_all(cmd.as_bytes())
                .and_then(|()| writer.write_all(b"\r\n"))
                .and_then(|()| writer.flush())
                .map_err(|e| {
                    self.running.store(false, Ordering::SeqCst);
                    SessionError::WriteFailed(e.to_string())
                })?;
        }

        tokio::time::sleep(timeout).await;

        Ok(self.drain())
    }

    /// Stops the drain actor and terminates the shell process.
    ///
    /// Idempotent and safe to call from any task; repeat calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop the actor first so teardown never leaves a dangling reader.
        self.running.store(false, Ordering::SeqCst);

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "kill on close failed (process likely gone)");
        }
        if let Err(e) = child.wait() {
            tracing::debug!(pid = ?self.pid, error = %e, "wait on close failed");
        }

        tracing::debug!(pid = ?self.pid, "PTY session closed");
    }

    /// Atomically takes everything the drain actor has buffered.
    fn drain(&self) -> String {
        std::mem::take(&mut *lock_ignore_poison(&self.buffer))
    }

    /// Spawns the output drain actor.
    ///
    /// A blocking task that reads raw chunks from the PTY until EOF or a
    /// read error, cleans them, and appends to the session buffer. A read
    /// error leaves a diagnostic line in the buffer so the client sees why
    /// output stopped instead of being silently starved.
    fn start_drain_actor(&self, mut reader: Box<dyn Read + Send>) {
        let buffer = Arc::clone(&self.buffer);
        let running = Arc::clone(&self.running);
        let pid = self.pid;

        tokio::task::spawn_blocking(move || {
            let mut cleaner = OutputCleaner::new();
            let mut chunk = [0u8; READ_BUFFER_SIZE];
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        tracing::debug!(pid = ?pid, "PTY EOF, shell exited");
                        let tail = cleaner.finish();
                        if !tail.is_empty() {
                            lock_ignore_poison(&buffer).push_str(&tail);
                        }
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        let cleaned = cleaner.push(&chunk[..n]);
                        if !cleaned.is_empty() {
                            lock_ignore_poison(&buffer).push_str(&cleaned);
                        }
                    }
                    Err(e) => {
                        let tail = cleaner.finish();
                        let mut buf = lock_ignore_poison(&buffer);
                        buf.push_str(&tail);
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!(pid = ?pid, error = %e, "PTY read failed");
                            buf.push_str(&format!("\r\n[terminal read error: {e}]\r\n"));
                        }
                        drop(buf);
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
    }
}

/// Locks a std mutex, recovering the data if a prior holder panicked.
fn lock_ignore_poison<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_spec() -> ShellSpec {
        ShellSpec {
            program: "/bin/sh".to_string(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let spec = ShellSpec {
            program: "/nonexistent/shell/xyz".to_string(),
            cwd: None,
        };
        let result = PtySession::spawn(&spec);
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_spawn_and_close() {
        let session = PtySession::spawn(&sh_spec()).unwrap();
        assert!(session.is_running());
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = PtySession::spawn(&sh_spec()).unwrap();
        session.close().await;
        session.close().await;
        session.close().await;
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let session = PtySession::spawn(&sh_spec()).unwrap();

        let output = session
            .run_command("echo pty_test_marker", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(
            output.contains("pty_test_marker"),
            "missing marker in: {output:?}"
        );

        session.close().await;
    }

    #[tokio::test]
    async fn test_run_command_clears_stale_output() {
        let session = PtySession::spawn(&sh_spec()).unwrap();

        session
            .run_command("echo first_marker", Duration::from_secs(1))
            .await
            .unwrap();
        let output = session
            .run_command("echo second_marker", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(output.contains("second_marker"));
        assert!(
            !output.contains("first_marker"),
            "stale output leaked into: {output:?}"
        );

        session.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_run_commands_do_not_interleave() {
        let session = Arc::new(PtySession::spawn(&sh_spec()).unwrap());

        let a = Arc::clone(&session);
        let b = Arc::clone(&session);
        let (out_a, out_b) = tokio::join!(
            async move { a.run_command("echo window_alpha", Duration::from_secs(1)).await },
            async move { b.run_command("echo window_beta", Duration::from_secs(1)).await },
        );

        let out_a = out_a.unwrap();
        let out_b = out_b.unwrap();
        assert!(out_a.contains("window_alpha"));
        assert!(!out_a.contains("window_beta"));
        assert!(out_b.contains("window_beta"));
        assert!(!out_b.contains("window_alpha"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_collect_initial_output_drains_banner() {
        let session = PtySession::spawn(&sh_spec()).unwrap();

        // The first prompt should have arrived within the quiet period.
        let _banner = session
            .collect_initial_output(Duration::from_millis(500))
            .await;

        // Whatever the banner was, the buffer is now clear: the next command
        // window contains only its own output.
        let output = session
            .run_command("echo after_banner", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(output.contains("after_banner"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_run_command_after_close_fails() {
        let session = PtySession::spawn(&sh_spec()).unwrap();
        session.close().await;

        let result = session
            .run_command("echo nope", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(SessionError::Terminated)));
    }

    #[tokio::test]
    async fn test_shell_exit_flips_liveness() {
        let session = PtySession::spawn(&sh_spec()).unwrap();

        let _ = session.run_command("exit 0", Duration::from_secs(1)).await;

        // The drain actor observes EOF shortly after the shell exits.
        for _ in 0..50 {
            if !session.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!session.is_running());

        let result = session
            .run_command("echo nope", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(SessionError::Terminated)));

        session.close().await;
    }
}
