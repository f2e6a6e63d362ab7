//! Engine process spawning and signalling.

use std::io;
use std::process::ExitStatus;
use std::time::SystemTime;

use tokio::process::Child;

use crate::engine::command::EngineCommand;
use crate::engine::lifecycle::{LifecycleError, Result};

/// Handle to a running engine process.
///
/// Dropping the handle kills the process if it is still running.
#[derive(Debug)]
pub struct EngineProcess {
    pid: u32,
    started_at: SystemTime,
    child: Child,
    exit_status: Option<ExitStatus>,
}

impl EngineProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// False once the process has been observed to exit.
    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Non-blocking exit check. Reaps the process if it has exited.
    pub fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit_status.is_none() {
            self.exit_status = self.child.try_wait()?;
        }
        Ok(self.exit_status)
    }

    /// Wait for the process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Ask the process to stop (SIGTERM).
    pub fn terminate(&mut self) -> io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        send_terminate(self.pid).or_else(|e| {
            // ESRCH: exited between the liveness check and the signal.
            if e.raw_os_error() == Some(libc::ESRCH) {
                Ok(())
            } else {
                Err(e)
            }
        })
    }

    /// Kill the process (SIGKILL) and reap it.
    pub async fn kill(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        self.child.kill().await?;
        self.wait().await
    }
}

/// Spawn the engine described by `command` and return without waiting for it.
pub fn launch(command: &EngineCommand) -> Result<EngineProcess> {
    let spawn_failed = |source: io::Error| LifecycleError::SpawnFailed {
        program: command.program.clone(),
        source,
    };

    log::info!("Starting engine: {}", command);

    let child = command
        .to_command()
        .map_err(spawn_failed)?
        .spawn()
        .map_err(spawn_failed)?;

    let pid = child.id().ok_or_else(|| {
        LifecycleError::StartupFailed("engine exited before its pid could be read".into())
    })?;

    log::info!("Engine process {} started", pid);

    Ok(EngineProcess {
        pid,
        started_at: SystemTime::now(),
        child,
        exit_status: None,
    })
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> io::Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination requires unix signals",
    ))
}
