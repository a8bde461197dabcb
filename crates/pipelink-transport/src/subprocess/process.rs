//! Process management for the helper subprocess

use super::conn::{DuplexPipe, StdioConn};
use crate::error::{Result, TransportError};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::{Child, Command};

/// Spawn `program` with `args` and connect to its stdin/stdout.
///
/// Stderr is inherited so the helper's diagnostics reach the operator
/// unchanged. On unix the child runs in its own process group; if our stdin
/// is a terminal that group is made the terminal's foreground group until
/// [`ProcessHandle::background`] is called.
///
/// Must be called from within a Tokio runtime. If the program cannot be
/// started, no pipe end outlives the error.
pub fn launch<S: AsRef<str>>(program: &str, args: &[S]) -> Result<(StdioConn, ProcessHandle)> {
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // both are always present with Stdio::piped()
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.start_kill();
        return Err(TransportError::Connection(
            "helper stdio pipes unavailable".to_string(),
        ));
    };

    let pid = child.id();
    let foreground = terminal::claim(pid);
    tracing::debug!(program, ?args, ?pid, foreground, "helper process started");

    let conn = DuplexPipe::new(stdout, stdin).with_pid(pid);
    let handle = ProcessHandle {
        child,
        program: program.to_string(),
        args,
        pid,
        foreground,
        backgrounded: AtomicBool::new(false),
    };

    Ok((conn, handle))
}

/// Handle to a running helper process
pub struct ProcessHandle {
    child: Child,
    program: String,
    args: Vec<String>,
    pid: Option<u32>,
    foreground: bool,
    backgrounded: AtomicBool,
}

impl ProcessHandle {
    /// Process id, captured at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program and arguments, space separated
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether the helper was started in its own process group
    pub fn has_own_process_group(&self) -> bool {
        cfg!(unix)
    }

    /// Whether the terminal's foreground group was handed to the helper
    pub fn is_foreground(&self) -> bool {
        self.foreground && !self.backgrounded.load(Ordering::Acquire)
    }

    /// Move the helper out of the terminal's foreground process group.
    ///
    /// Only the first call does anything; later calls are no-ops. Safe to
    /// call whether or not the handshake succeeded.
    pub fn background(&self) {
        if self.backgrounded.swap(true, Ordering::AcqRel) || !self.foreground {
            return;
        }
        match terminal::reclaim() {
            Ok(()) => tracing::debug!(pid = ?self.pid, "helper moved to background"),
            Err(e) => tracing::warn!(pid = ?self.pid, error = %e, "failed to reclaim terminal"),
        }
    }

    /// Check if the process is still alive
    pub fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Forcibly kill the process and reap it
    pub async fn kill(&mut self) -> Result<()> {
        self.background();
        self.child.kill().await.map_err(TransportError::Io)?;
        tracing::debug!(pid = ?self.pid, "helper killed");
        Ok(())
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        tracing::debug!(pid = ?self.pid, %status, "helper exited");
        Ok(status)
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command", &self.command_line())
            .field("pid", &self.pid)
            .field("foreground", &self.is_foreground())
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.background();
    }
}

#[cfg(unix)]
mod terminal {
    use nix::sys::signal::{SigSet, SigmaskHow, Signal};
    use nix::unistd::{Pid, getpgrp, tcsetpgrp};
    use std::io::{self, IsTerminal};
    use std::os::fd::AsFd;

    /// Make the helper's group the foreground group of our terminal.
    ///
    /// Returns whether the terminal was handed over.
    pub(super) fn claim(pid: Option<u32>) -> bool {
        let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
            return false;
        };
        if !io::stdin().is_terminal() {
            return false;
        }
        match set_foreground(Pid::from_raw(pid)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed to move helper to foreground");
                false
            }
        }
    }

    /// Hand the terminal back to our own process group.
    pub(super) fn reclaim() -> io::Result<()> {
        set_foreground(getpgrp())
    }

    fn set_foreground(pgrp: Pid) -> io::Result<()> {
        // tcsetpgrp from a background group raises SIGTTOU unless blocked
        let mut ttou = SigSet::empty();
        ttou.add(Signal::SIGTTOU);
        let previous = ttou.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;

        let stdin = io::stdin();
        let result = tcsetpgrp(stdin.as_fd(), pgrp);

        previous.thread_set_mask()?;
        result.map_err(io::Error::from)
    }
}

#[cfg(not(unix))]
mod terminal {
    pub(super) fn claim(_pid: Option<u32>) -> bool {
        false
    }

    pub(super) fn reclaim() -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let err = launch("/nonexistent/pipelink-helper", &["serve"]).unwrap_err();
        match err {
            TransportError::Spawn { program, source } => {
                assert_eq!(program, "/nonexistent/pipelink-helper");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_writes_before_child_reads_are_buffered() {
        let (mut conn, mut process) = launch("sh", &["-c", "sleep 0.2; cat"]).unwrap();

        conn.write_all(b"early bytes").await.unwrap();
        conn.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        conn.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"early bytes");

        assert!(process.wait().await.unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exits_on_stdin_eof() {
        let (mut conn, mut process) = launch("cat", &[] as &[&str]).unwrap();
        assert!(process.pid().is_some());
        assert_eq!(conn.peer_addr().pid(), process.pid());

        conn.close().unwrap();
        let status = process.wait().await.unwrap();
        assert!(status.success());
        assert!(!process.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_terminates_and_background_is_idempotent() {
        let (_conn, mut process) = launch("sleep", &["30"]).unwrap();
        assert!(process.is_alive());
        assert!(process.has_own_process_group());
        assert_eq!(process.command_line(), "sleep 30");

        process.background();
        process.background();
        assert!(!process.is_foreground());

        process.kill().await.unwrap();
        assert!(!process.is_alive());
        let status = process.wait().await.unwrap();
        assert!(!status.success());
    }
}
