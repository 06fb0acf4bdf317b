use anyhow::{anyhow, bail, Context};
use std::time::Duration;
use subprocess::{Exec, NullFile, Popen};
use tokio::process::Command;
use tracing::{debug, warn};

/// Grace given to a process after terminate before escalating to kill.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Grace given to a process after kill before giving up on it.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Where a detached process sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// Discard stdout and stderr.
    Null,
    /// Leave stdout and stderr attached to the parent's streams.
    Parent,
}

/// How a command is launched and what the caller gets back.
#[derive(Debug, Clone, Copy)]
pub enum LaunchMode {
    /// Background process, fire and forget. Nobody terminates it.
    Spawn(Redirect),
    /// Background process whose lifetime the caller owns through the
    /// returned [`ProcessGuard`].
    SpawnTracked(Redirect),
    /// Run to completion and capture trimmed stdout.
    Capture,
}

/// The outcome of a [`launch`], one variant per [`LaunchMode`].
pub enum Launched {
    Spawned,
    Tracked(ProcessGuard),
    Captured(String),
}

impl Launched {
    pub fn into_handle(self) -> anyhow::Result<ProcessGuard> {
        match self {
            Launched::Tracked(guard) => Ok(guard),
            _ => Err(anyhow!("Launch outcome carries no process handle")),
        }
    }

    pub fn into_stdout(self) -> anyhow::Result<String> {
        match self {
            Launched::Captured(stdout) => Ok(stdout),
            _ => Err(anyhow!("Launch outcome carries no captured output")),
        }
    }
}

/// Breaks a shell-syntax command string into POSIX words.
pub(crate) fn parse_command(command: &str) -> anyhow::Result<Vec<String>> {
    let words = shlex::split(command)
        .with_context(|| format!("Command string is not POSIX compliant: {}", command))?;
    if words.is_empty() {
        bail!("Empty command");
    }
    Ok(words)
}

/// Launches the given command according to `mode`.
///
/// # Arguments
///
/// * command - The command to run, in shell syntax.
/// * mode - Whether to detach, track or capture the process.
///
/// # Returns
///
/// The [`Launched`] variant matching the requested mode.
pub async fn launch(command: &str, mode: LaunchMode) -> anyhow::Result<Launched> {
    // break command string into POSIX words
    let words = parse_command(command)?;

    match mode {
        LaunchMode::Spawn(redirect) => {
            let mut popen = spawn_detached(&words, redirect).with_context(|| {
                format!("Failed to spawn detached process, command: {}", command)
            })?;
            popen.detach();
            Ok(Launched::Spawned)
        }

        LaunchMode::SpawnTracked(redirect) => {
            let popen = spawn_detached(&words, redirect).with_context(|| {
                format!("Failed to spawn detached process, command: {}", command)
            })?;
            Ok(Launched::Tracked(ProcessGuard::new(popen, command)))
        }

        LaunchMode::Capture => {
            let output = Command::new(&words[0])
                .args(&words[1..])
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("Failed to run command: {}", command))?;

            // the exit status is deliberately not checked; a failing command
            // surfaces as empty or truncated output
            debug!("captured run `{}` exited with {}", command, output.status);
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Launched::Captured(stdout))
        }
    }
}

fn spawn_detached(words: &[String], redirect: Redirect) -> anyhow::Result<Popen> {
    match words {
        [command, args @ ..] => {
            let exec = Exec::cmd(command).args(args);

            let exec = match redirect {
                Redirect::Null => exec.stdout(NullFile).stderr(NullFile),
                Redirect::Parent => exec,
            };

            Ok(exec.detached().popen()?)
        }
        _ => Err(anyhow!("Empty command")),
    }
}

/// Owns a detached background process and guarantees it is terminated and
/// reaped on every exit path. [`ProcessGuard::stop`] reports failures to the
/// caller; `Drop` downgrades them to warnings.
pub struct ProcessGuard {
    popen: Popen,
    command: String,
}

impl ProcessGuard {
    fn new(popen: Popen, command: &str) -> Self {
        Self {
            popen,
            command: command.to_string(),
        }
    }

    /// The OS pid, if the process has one.
    pub fn pid(&self) -> Option<u32> {
        self.popen.pid()
    }

    /// Waits up to `timeout` for the process to exit on its own.
    ///
    /// # Returns
    ///
    /// true if the process has exited, false if it is still running.
    pub fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        Ok(self.popen.wait_timeout(timeout)?.is_some())
    }

    /// Terminates the process, escalating to a kill if it ignores the first
    /// request, and waits for it to be reaped.
    pub fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown()
            .with_context(|| format!("Failed to stop process: {}", self.command))
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.popen.poll().is_some() {
            return Ok(());
        }

        self.popen.terminate()?;
        if self.popen.wait_timeout(TERM_GRACE)?.is_some() {
            return Ok(());
        }

        warn!("process ignored terminate, killing: {}", self.command);
        self.popen.kill()?;
        if self.popen.wait_timeout(KILL_GRACE)?.is_none() {
            bail!("Process still running after kill");
        }

        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("Failed to stop process {}\n{}", self.command, err);
        }
    }
}
