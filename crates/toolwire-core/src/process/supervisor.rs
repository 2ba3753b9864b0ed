//! Peer process supervision.
//!
//! The peer's stdin and stdout become the transport; its stderr is inherited
//! so diagnostics reach the operator untouched. A background task owns the
//! child, records its exit status and kills it on request.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::rpc::Correlator;
use crate::{Result, ToolwireError};

/// How to start the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env_vars: HashMap<String, String>,
    /// Working directory; inherits ours when unset.
    pub working_dir: Option<PathBuf>,
}

impl PeerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: HashMap::new(),
            working_dir: None,
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set all arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ToolwireError::Config {
                message: "peer program must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// How the peer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerExit {
    pub code: Option<i32>,
    pub success: bool,
}

impl From<ExitStatus> for PeerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for PeerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Pipes wired to the peer.
pub struct PeerPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Handle to a running peer.
///
/// Dropping the handle kills the peer.
pub struct PeerProcess {
    program: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<PeerExit>>,
    kill_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PeerProcess {
    /// Spawn the peer with piped stdin/stdout and inherited stderr.
    pub fn spawn(command: &PeerCommand) -> Result<(Self, PeerPipes)> {
        command.validate()?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env_vars)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ToolwireError::Launch {
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ToolwireError::Launch {
            program: command.program.clone(),
            message: "stdin was not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ToolwireError::Launch {
            program: command.program.clone(),
            message: "stdout was not piped".to_string(),
        })?;

        let pid = child.id();
        info!("Spawned peer {} (PID {:?})", command.program, pid);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let task = tokio::spawn(Self::supervise(
            child,
            command.program.clone(),
            exit_tx,
            kill_rx,
        ));

        Ok((
            Self {
                program: command.program.clone(),
                pid,
                exit_rx,
                kill_tx: Some(kill_tx),
                task: Some(task),
            },
            PeerPipes { stdin, stdout },
        ))
    }

    async fn supervise(
        mut child: Child,
        program: String,
        exit_tx: watch::Sender<Option<PeerExit>>,
        kill_rx: oneshot::Receiver<()>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            // Fires on an explicit kill and when the handle is dropped.
            _ = kill_rx => {
                debug!("Killing peer {}", program);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill peer {}: {}", program, e);
                }
                child.wait().await
            }
        };

        let exit = match status {
            Ok(status) => PeerExit::from(status),
            Err(e) => {
                error!("Failed to wait for peer {}: {}", program, e);
                PeerExit {
                    code: None,
                    success: false,
                }
            }
        };

        if exit.success {
            info!("Peer {} exited ({})", program, exit);
        } else {
            warn!("Peer {} exited ({})", program, exit);
        }
        let _ = exit_tx.send(Some(exit));
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Exit status, once the peer has ended.
    pub fn exit(&self) -> Option<PeerExit> {
        *self.exit_rx.borrow()
    }

    /// Abort `correlator` as soon as the peer ends.
    pub fn abort_on_exit(&self, correlator: Arc<Correlator>) -> JoinHandle<()> {
        let mut exit_rx = self.exit_rx.clone();
        let program = self.program.clone();
        tokio::spawn(async move {
            let exit = match exit_rx.wait_for(Option::is_some).await {
                Ok(exit) => *exit,
                Err(_) => None,
            };
            let reason = match exit {
                Some(exit) => format!("peer {} exited ({})", program, exit),
                None => format!("peer {} is no longer supervised", program),
            };
            correlator.abort(reason);
        })
    }

    /// Stop the peer.
    ///
    /// Waits up to `grace` for the peer to exit on its own (callers close its
    /// stdin first), then kills it.
    pub async fn shutdown(mut self, grace: Duration) -> Option<PeerExit> {
        if self.exit().is_none() {
            let mut exit_rx = self.exit_rx.clone();
            let exited = tokio::time::timeout(grace, exit_rx.wait_for(Option::is_some))
                .await
                .is_ok();
            if !exited {
                debug!("Peer {} still running after {:?}", self.program, grace);
                if let Some(kill_tx) = self.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
            }
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.exit()
    }
}

impl Drop for PeerProcess {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}
