//! A single supervision abstraction over a spawned child process, used by
//! both the capability probe (degenerate case: wait-with-timeout, discard
//! output) and the encode step of the job pipeline (stream stderr, support
//! cooperative cancellation via SIGTERM).

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};

/// A running child process plus its stderr, read line by line.
pub struct SupervisedProcess {
    child: Child,
    stderr_lines: Lines<BufReader<ChildStderr>>,
}

impl SupervisedProcess {
    /// Spawns `cmd` with stdin/stdout discarded and stderr piped.
    pub fn spawn(mut cmd: Command) -> std::io::Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        let stderr = child
            .stderr
            .take()
            .expect("stderr was piped at spawn time");
        let stderr_lines = BufReader::new(stderr).lines();
        Ok(SupervisedProcess {
            child,
            stderr_lines,
        })
    }

    /// Returns the next stderr line, or `None` once the pipe has closed.
    pub async fn next_stderr_line(&mut self) -> Option<String> {
        match self.stderr_lines.next_line().await {
            Ok(Some(line)) => Some(line),
            Ok(None) | Err(_) => None,
        }
    }

    /// Sends SIGTERM on unix; on other platforms falls back to a hard kill
    /// since there is no portable graceful-stop signal.
    pub fn cancel(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: pid is a live child of this process; sending SIGTERM is
                // the documented cooperative-cancellation mechanism here.
                unsafe {
                    libc_kill(pid as i32, SIGTERM);
                }
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Awaits process exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Best-effort immediate kill, used during shutdown sweeps.
    pub fn kill_now(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

#[cfg(unix)]
const SIGTERM: i32 = 15;

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    unsafe extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe {
        kill(pid, sig);
    }
}

/// The degenerate case of supervision: spawn, wait up to `timeout`, discard
/// all output, report only whether it exited zero within the deadline.
pub async fn run_with_timeout(cmd: Command, timeout: Duration) -> std::io::Result<bool> {
    let mut proc = SupervisedProcess::spawn(cmd)?;
    match tokio::time::timeout(timeout, proc.wait()).await {
        Ok(Ok(status)) => Ok(status.success()),
        Ok(Err(_)) => Ok(false),
        Err(_) => {
            let _ = proc.kill_now();
            let _ = proc.wait().await;
            Ok(false)
        }
    }
}
