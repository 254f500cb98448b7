//! Relay process lifecycle: spawn, signal, reap.
//!
//! A waiter task owns the `Child` and reaps it as soon as it exits, so the
//! supervisor never holds a mutable borrow of the child while waiting.
//! Signals are addressed by pid through [`ProcessHandle`].

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use process_utils::{Signal, send_signal, supports_interrupt};
use serde::Serialize;
use tokio::process::ChildStderr;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::command::RelayInvocation;
use crate::{Error, Result};

/// Observable state of a relay process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    /// Exited on its own with status 0.
    Completed,
    /// Exited after an interrupt or kill was sent.
    SignaledStop,
    /// Exited on its own with a failure status.
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, or `128 + signal` when the process died from a signal.
    pub code: Option<i32>,
    pub state: ProcessState,
}

/// Cloneable control surface of a running relay process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    kill: CancellationToken,
    signaled: Arc<AtomicBool>,
    state: Arc<Mutex<ProcessState>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Ask the process to stop gracefully.
    ///
    /// Falls back to a forced kill where interrupts cannot be delivered.
    pub fn interrupt(&self) {
        if !self.is_running() {
            return;
        }
        self.signaled.store(true, Ordering::SeqCst);

        if !supports_interrupt() {
            self.kill.cancel();
            return;
        }
        match send_signal(self.pid, Signal::Interrupt) {
            Ok(()) => debug!(pid = self.pid, "Sent interrupt to relay process"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(pid = self.pid, "Interrupt failed ({}), killing instead", e);
                self.kill.cancel();
            }
        }
    }

    /// Terminate the process immediately.
    pub fn kill(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        self.kill.cancel();
    }
}

/// A spawned relay process.
pub struct RelayProcess {
    handle: ProcessHandle,
    stderr: Option<ChildStderr>,
    exit_rx: oneshot::Receiver<ExitOutcome>,
}

impl RelayProcess {
    /// Spawn the invocation with stdin closed and stderr captured.
    pub fn spawn(invocation: &RelayInvocation) -> Result<Self> {
        let mut child = process_utils::tokio_command(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", invocation.program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::SpawnFailed("process exited before reporting a pid".into()))?;
        let stderr = child.stderr.take();

        let handle = ProcessHandle {
            pid,
            kill: CancellationToken::new(),
            signaled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ProcessState::Running)),
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let waiter = handle.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = waiter.kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, "Failed to kill relay process: {}", e);
                    }
                    child.wait().await
                }
            };
            let outcome = classify(status, waiter.signaled.load(Ordering::SeqCst));
            *waiter.state.lock() = outcome.state;
            debug!(pid, ?outcome, "Relay process reaped");
            let _ = exit_tx.send(outcome);
        });

        Ok(Self {
            handle,
            stderr,
            exit_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to be reaped.
    pub async fn wait(self) -> ExitOutcome {
        match self.exit_rx.await {
            Ok(outcome) => outcome,
            // The waiter task only goes away without sending if the runtime is shutting down.
            Err(_) => ExitOutcome {
                code: None,
                state: ProcessState::Crashed,
            },
        }
    }
}

fn classify(status: io::Result<ExitStatus>, signaled: bool) -> ExitOutcome {
    let code = match &status {
        Ok(status) => exit_code(status),
        Err(_) => None,
    };
    let state = match status {
        _ if signaled => ProcessState::SignaledStop,
        Ok(status) if status.success() => ProcessState::Completed,
        _ => ProcessState::Crashed,
    };
    ExitOutcome { code, state }
}

fn exit_code(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|sig| 128 + sig))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> RelayInvocation {
        let config = crate::relay::FfmpegConfig {
            binary_path: "/bin/sh".into(),
            launcher_args: vec!["-c".into(), script.into(), "relay".into()],
            ingest_base_url: "rtmp://127.0.0.1/live2".into(),
        };
        let key = crate::domain::StreamKey::new("k");
        let input = std::path::Path::new("/dev/null");
        crate::relay::build_invocation(
            &config,
            &crate::relay::RelayPlan {
                input,
                stream_key: &key,
                loop_forever: false,
                duration_secs: None,
            },
        )
    }

    #[tokio::test]
    async fn test_clean_exit_is_completed() {
        let process = RelayProcess::spawn(&sh("exit 0")).unwrap();
        let outcome = process.wait().await;
        assert_eq!(outcome.state, ProcessState::Completed);
        assert_eq!(outcome.code, Some(0));
    }

    #[tokio::test]
    async fn test_failure_exit_is_crashed() {
        let process = RelayProcess::spawn(&sh("exit 3")).unwrap();
        let handle = process.handle();
        let outcome = process.wait().await;
        assert_eq!(outcome.state, ProcessState::Crashed);
        assert_eq!(outcome.code, Some(3));
        assert_eq!(handle.state(), ProcessState::Crashed);
    }

    #[tokio::test]
    async fn test_interrupt_stops_cooperative_process() {
        let process =
            RelayProcess::spawn(&sh("trap 'exit 0' INT; sleep 30 & wait $!")).unwrap();
        let handle = process.handle();
        assert!(handle.is_running());
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.interrupt();
        let outcome = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert_eq!(outcome.state, ProcessState::SignaledStop);
    }

    #[tokio::test]
    async fn test_kill_stops_process_ignoring_interrupt() {
        let process = RelayProcess::spawn(&sh("trap '' INT; sleep 30 & wait $!")).unwrap();
        let handle = process.handle();
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.interrupt();
        handle.kill();
        let outcome = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert_eq!(outcome.state, ProcessState::SignaledStop);
        assert_eq!(outcome.code, Some(128 + 9));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let mut inv = sh("exit 0");
        inv.program = "/nonexistent/relay-binary".into();
        let err = RelayProcess::spawn(&inv).err().unwrap();
        assert!(matches!(err, Error::SpawnFailed(_)));
    }
}
