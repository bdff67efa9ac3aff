//! Discovery process spawner.
//!
//! Spawns the discovery executable with:
//! - piped `stdin` (commands) and `stdout` (envelopes);
//! - inherited `stderr`, so the discovery's own diagnostics reach the
//!   operator's terminal;
//! - `kill_on_drop(true)`, so a dropped client never leaks its subprocess.

use std::path::PathBuf;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

/// How to launch a discovery executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Executable path or name looked up on `PATH`.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the child; inherits the caller's when `None`.
    pub working_dir: Option<PathBuf>,
}

impl SpawnConfig {
    /// Build a config from an argument vector whose first item is the program.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when `argv` is empty.
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Config("discovery command must not be empty".into()))?;
        Ok(Self {
            program,
            args: argv.collect(),
            working_dir: None,
        })
    }
}

/// Stdio connection to a freshly spawned discovery.
#[derive(Debug)]
pub struct DiscoveryProcess {
    /// Child process handle.
    pub child: Child,
    /// Discovery stdin, for commands.
    pub stdin: ChildStdin,
    /// Discovery stdout, for envelopes.
    pub stdout: ChildStdout,
}

/// Spawn the discovery described by `config`.
///
/// # Errors
///
/// - `AppError::Transport("failed to spawn discovery: …")` on OS spawn failure.
/// - `AppError::Transport("failed to capture discovery …")` if a pipe is missing.
pub fn spawn_discovery(config: &SpawnConfig, discovery_id: &str) -> Result<DiscoveryProcess> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Transport(format!(
            "failed to spawn discovery {discovery_id} ({}): {err}",
            config.program
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture discovery stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture discovery stdout".into()))?;

    info!(
        discovery_id,
        program = %config.program,
        pid = child.id(),
        "discovery process started"
    );

    Ok(DiscoveryProcess {
        child,
        stdin,
        stdout,
    })
}
