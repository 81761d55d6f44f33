//! External capture/encode pipeline processes
//!
//! Stopping is two-phase: interrupt, wait out the grace period, then kill.
//! Children are spawned with `kill_on_drop` so a handle dropped during a
//! failed call still takes its process down.

use super::MediaKind;
use crate::config::MediaConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running (never started, already exited, already stopped)
    NotRunning,
    /// Exited on its own within the grace period
    Exited,
    /// Force-killed after the grace period
    Killed,
}

/// A process the call controller owns for the duration of one call
#[async_trait]
pub trait SupervisedProcess: Send {
    fn kind(&self) -> MediaKind;

    /// Stop the process within `grace` plus the kill itself. Idempotent.
    async fn stop(&mut self, grace: Duration) -> StopOutcome;
}

/// Starts pipeline processes from a description string
pub trait PipelineLauncher: Send + Sync {
    /// Start the pipeline for `kind`; `None` when the process could not
    /// be started (the kind is skipped for this call)
    fn launch(&self, kind: MediaKind, description: &str) -> Option<Box<dyn SupervisedProcess>>;
}

/// One running pipeline process
pub struct PipelineProcess {
    kind: MediaKind,
    child: Option<Child>,
}

impl PipelineProcess {
    /// Spawn `program` with `args`, inheriting stdout/stderr
    pub fn spawn(kind: MediaKind, program: &str, args: &[String]) -> Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessError(format!("Failed to spawn {}: {}", program, e)))?;

        info!(kind = %kind, pid = ?child.id(), "Pipeline process started");

        Ok(Self {
            kind,
            child: Some(child),
        })
    }

    /// OS process id, if still running
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Whether the process is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    #[cfg(unix)]
    fn interrupt(child: &mut Child) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return;
        };

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            warn!("Failed to send SIGINT to {}: {}", pid, e);
            let _ = child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn interrupt(child: &mut Child) {
        let _ = child.start_kill();
    }
}

#[async_trait]
impl SupervisedProcess for PipelineProcess {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn stop(&mut self, grace: Duration) -> StopOutcome {
        let Some(mut child) = self.child.take() else {
            return StopOutcome::NotRunning;
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(kind = %self.kind, "Pipeline already exited: {}", status);
            return StopOutcome::NotRunning;
        }

        Self::interrupt(&mut child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(kind = %self.kind, "Pipeline exited: {}", status);
                return StopOutcome::Exited;
            }
            Ok(Err(e)) => warn!(kind = %self.kind, "Error waiting for pipeline: {}", e),
            Err(_) => warn!(
                kind = %self.kind,
                "Pipeline did not exit within {:?}, killing",
                grace
            ),
        }

        if let Err(e) = child.kill().await {
            warn!(kind = %self.kind, "Failed to kill pipeline: {}", e);
        }
        StopOutcome::Killed
    }
}

/// Launches `gst-launch-1.0 -e <description...>`
#[derive(Debug, Clone)]
pub struct GstLauncher {
    program: String,
    leading_args: Vec<String>,
}

impl GstLauncher {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.pipeline_program.clone(),
            config.pipeline_leading_args.clone(),
        )
    }

    /// Full argument list for a description
    pub fn args(&self, description: &str) -> Vec<String> {
        self.leading_args
            .iter()
            .cloned()
            .chain(description.split_whitespace().map(str::to_string))
            .collect()
    }
}

impl PipelineLauncher for GstLauncher {
    fn launch(&self, kind: MediaKind, description: &str) -> Option<Box<dyn SupervisedProcess>> {
        if description.trim().is_empty() {
            warn!(kind = %kind, "Empty pipeline description");
            return None;
        }

        match PipelineProcess::spawn(kind, &self.program, &self.args(description)) {
            Ok(process) => Some(Box::new(process)),
            Err(e) => {
                error!(kind = %kind, "Failed to start pipeline: {}", e);
                None
            }
        }
    }
}
