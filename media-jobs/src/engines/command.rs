//! Child process helper shared by the command-line engines.

use std::collections::VecDeque;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: std::process::ExitStatus,
    pub duration: f64,
    pub stdout: String,
    /// Last lines written to stderr.
    pub stderr_tail: Vec<String>,
}

impl CommandOutput {
    /// Turn a non-zero exit into a recoverable collaborator error.
    pub fn ensure_success(self, program: &str) -> Result<Self> {
        if self.status.success() {
            return Ok(self);
        }
        Err(Error::Collaborator(format!(
            "{program} exited with {}: {}",
            self.status,
            self.stderr_tail.join(" | ")
        )))
    }
}

/// Run a command, capturing stdout and the tail of stderr.
///
/// Failing to spawn is fatal: the binary is missing or not executable and a
/// retry would not help. The child is killed if the returned future is
/// dropped, so pipeline timeouts do not leak processes.
pub async fn run_command(command: &mut Command) -> Result<CommandOutput> {
    let start = std::time::Instant::now();
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::CollaboratorFatal(format!("Failed to spawn {program}: {e}")))?;

    let stdout_task = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.to_lowercase().contains("error") {
                    warn!("stderr: {}", line);
                } else {
                    debug!("stderr: {}", line);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail)
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Collaborator(format!("Failed to wait for {program}: {e}")))?;

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        status,
        duration: start.elapsed().as_secs_f64(),
        stdout,
        stderr_tail,
    })
}
