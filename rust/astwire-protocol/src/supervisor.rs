//! Runs one persistent-stream generator process behind a [`Multiplexer`].

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{StderrMode, SupervisorConfig};
use crate::error::ProtocolError;
use crate::multiplexer::{ClosePolicy, Multiplexer, StreamHandle};

/// How long a process that stopped reading its input gets to exit on its
/// own before it is treated as a broken transport and killed.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// A generator process and the channel wired to its stdin/stdout.
///
/// The channel closes when the process exits: as [`ProtocolError::Eof`]
/// on a successful exit, otherwise with [`ProtocolError::ProcessExited`].
/// If the process closes its output but keeps running, the channel closes
/// as [`ProtocolError::Eof`] after a short grace period.
/// A channel closed for any other reason than end of file kills the
/// process.
pub struct Supervisor {
    mux: Multiplexer,
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitStatus>>,
}

impl Supervisor {
    /// Start the process and complete the handshake.
    pub async fn spawn(config: SupervisorConfig) -> Result<Self, ProtocolError> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .envs(config.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(match config.stderr {
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Null => Stdio::null(),
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ProtocolError::Spawn(format!("{}: {}", config.program.display(), e))
        })?;
        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ProtocolError::Spawn(format!(
                "{}: stdio not captured",
                config.program.display()
            )));
        };
        info!(pid, program = %config.program.display(), "Generator started");

        let mux = Multiplexer::start_with(stdout, stdin, config.multiplexer, ClosePolicy::Deferred);
        let (exit_tx, exit) = watch::channel(None);
        tokio::spawn(watch_process(child, mux.clone(), exit_tx));

        mux.ready().await?;
        Ok(Self { mux, pid, exit })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn create_stream(&self) -> Result<StreamHandle, ProtocolError> {
        self.mux.create_stream()
    }

    /// Open a stream and send one request on it.
    pub async fn request(
        &self,
        name: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<StreamHandle, ProtocolError> {
        let stream = self.mux.create_stream()?;
        stream.send(name, payload).await?;
        Ok(stream)
    }

    /// Stop sending requests. The process sees end of input and is left to
    /// exit on its own.
    pub fn close(&self) {
        self.mux.close(ProtocolError::Eof);
    }

    pub async fn closed(&self) -> ProtocolError {
        self.mux.closed().await
    }

    /// Wait for the process to be reaped.
    ///
    /// `None` if its status could not be collected.
    pub async fn wait(&self) -> Option<ExitStatus> {
        let mut exit = self.exit.clone();
        let reaped = match exit.wait_for(Option::is_some).await {
            Ok(status) => Some(*status),
            Err(_) => None,
        };
        match reaped {
            Some(status) => status,
            None => *exit.borrow(),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").field("pid", &self.pid).finish()
    }
}

async fn watch_process(
    mut child: Child,
    mux: Multiplexer,
    exit: watch::Sender<Option<ExitStatus>>,
) {
    let status = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => {
                    // frames still in the pipe belong to this run
                    mux.read_finished().await;
                    mux.close(exit_reason(status));
                    Some(status)
                }
                Err(e) => {
                    error!("Failed to wait for generator: {}", e);
                    mux.close(ProtocolError::ProcessExited(e.to_string()));
                    None
                }
            }
        }
        reason = mux.write_failed() => {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    mux.close(exit_reason(status));
                    Some(status)
                }
                _ => {
                    mux.close(reason);
                    kill(&mut child).await
                }
            }
        }
        _ = mux.read_finished() => {
            let state = mux.state();
            match state.close_reason() {
                Some(reason) if !reason.is_eof() => kill(&mut child).await,
                _ => match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => {
                        mux.close(exit_reason(status));
                        Some(status)
                    }
                    _ => {
                        // output ended while the process keeps running
                        mux.close(ProtocolError::Eof);
                        child.wait().await.ok()
                    }
                },
            }
        }
        reason = mux.closed() => {
            if reason.is_eof() {
                child.wait().await.ok()
            } else {
                kill(&mut child).await
            }
        }
    };

    match status {
        Some(status) if status.success() => info!("Generator exited"),
        Some(status) => warn!("Generator exited with {}", status),
        None => {}
    }
    exit.send_replace(status);
}

fn exit_reason(status: ExitStatus) -> ProtocolError {
    if status.success() {
        ProtocolError::Eof
    } else {
        ProtocolError::ProcessExited(status.to_string())
    }
}

async fn kill(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.start_kill() {
        debug!("Generator already gone: {}", e);
    }
    child.wait().await.ok()
}
