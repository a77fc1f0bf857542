//! Step runners - spawn a step's shell process and stream its output

use crate::core::StepFailureReason;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A fully rendered command ready to run on a worker
#[derive(Debug, Clone)]
pub struct StepCommand {
    /// Qualified step id, for logging
    pub step_id: String,
    /// Shell program (`sh`, `bash`, ...)
    pub shell: String,
    /// Script passed to `<shell> -e -c`
    pub script: String,
    /// Working directory (the worker workspace)
    pub workdir: PathBuf,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Failure reason for a non-successful exit
    pub fn failure_reason(&self) -> Option<StepFailureReason> {
        match self.code {
            Some(0) => None,
            Some(code) => Some(StepFailureReason::ExitCode(code)),
            None => Some(StepFailureReason::Signal),
        }
    }
}

/// Receives output lines as a step produces them
pub trait OutputSink: Send + Sync {
    fn on_line(&self, line: &str);
}

/// Sink that drops everything
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_line(&self, _line: &str) {}
}

/// Trait for running step commands - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the command to completion, forwarding every output line to `sink`
    ///
    /// Dropping the returned future must stop the process.
    async fn run(
        &self,
        command: &StepCommand,
        sink: &dyn OutputSink,
    ) -> Result<ProcessExit, StepFailureReason>;
}

/// Runs steps as local shell subprocesses
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

/// How long output is still read once the shell has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Kills a step's process group when dropped
///
/// Steps run in a group of their own, so this also reaches pipelines and
/// background jobs the shell started (`yes | buildozer`, `server &`).
struct ProcessGroup {
    pid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_group(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// One output line without its terminator; invalid UTF-8 is replaced
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Read `reader` to EOF, sending each line to `tx`
///
/// The pipe stays drained even when nobody listens any more, so the
/// writer never sees it close early.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let _ = tx.send(decode_line(&buf));
                }
                Err(e) => {
                    warn!("Failed to read step output: {}", e);
                    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(
        &self,
        command: &StepCommand,
        sink: &dyn OutputSink,
    ) -> Result<ProcessExit, StepFailureReason> {
        debug!(
            "Spawning {} for step {} ({} bytes of script)",
            command.shell,
            command.step_id,
            command.script.len()
        );

        // `-e` makes multi-line scripts stop at the first failing command
        let mut cmd = Command::new(&command.shell);
        cmd.arg("-e")
            .arg("-c")
            .arg(&command.script)
            .current_dir(&command.workdir)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| StepFailureReason::Spawn(format!("{}: {}", command.shell, e)))?;
        let mut group = ProcessGroup { pid: child.id() };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        let mut output_open = true;
        let status = loop {
            tokio::select! {
                line = rx.recv(), if output_open => match line {
                    Some(line) => sink.on_line(&line),
                    None => output_open = false,
                },
                status = child.wait() => break status,
            }
        };
        let status = status
            .map_err(|e| StepFailureReason::Spawn(format!("failed to wait for process: {}", e)))?;

        // Whatever the shell left running ends with the step
        group.kill();
        let drained = timeout(DRAIN_GRACE, async {
            while let Some(line) = rx.recv().await {
                sink.on_line(&line);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Output of step {} still open {}s after exit, no longer reading it",
                command.step_id,
                DRAIN_GRACE.as_secs()
            );
        }

        debug!("Step {} exited with {:?}", command.step_id, status.code());
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}
