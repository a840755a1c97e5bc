//! Launching and tearing down the acquisition application.
//!
//! At most one instance may run. Before every launch, stragglers are swept by
//! process name and by whoever still listens on the control port; termination
//! escalates from a graceful signal to a forced kill and is confirmed before
//! returning.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::HarvestError;
use crate::traits::AppLauncher;

/// Pause after a sweep so the OS releases the control port.
const SWEEP_SETTLE: Duration = Duration::from_millis(500);

/// Checks made when confirming a terminated pid is gone.
const CONFIRM_CHECKS: u32 = 10;
const CONFIRM_INTERVAL: Duration = Duration::from_millis(200);

/// A running application instance.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Child,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

pub struct ProcessLauncher {
    config: AppConfig,
}

impl ProcessLauncher {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.binary);
        command.args(&self.config.args);
        if let Some(flag) = &self.config.control_port_flag {
            command.arg(format!("{}={}", flag, self.config.control_port));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Sweeps stragglers, spawns the binary and checks it survived the settle
    /// interval. Survival means alive, not ready to be driven.
    #[instrument(skip(self), fields(binary = %self.config.binary.display()))]
    pub async fn launch(&self) -> Result<ProcessHandle, HarvestError> {
        let swept = sweep_by_name(&self.config.process_name).await
            + sweep_port_owner(self.config.control_port).await;
        if swept > 0 {
            info!(swept, "Swept leftover application processes");
            sleep(SWEEP_SETTLE).await;
        }

        let mut child = self.command().spawn().map_err(|e| {
            HarvestError::LaunchFailed(format!("{}: {}", self.config.binary.display(), e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| HarvestError::LaunchFailed("process exited immediately".to_string()))?;
        debug!(pid, "Application spawned, waiting for it to settle");

        sleep(Duration::from_millis(self.config.settle_ms)).await;

        match child.try_wait() {
            Ok(None) => {
                info!(pid, port = self.config.control_port, "Application running");
                Ok(ProcessHandle { pid, child })
            }
            Ok(Some(status)) => Err(HarvestError::LaunchFailed(format!(
                "exited during settle with {}",
                status
            ))),
            Err(e) => Err(HarvestError::LaunchFailed(format!(
                "cannot query process state: {}",
                e
            ))),
        }
    }

    /// Graceful signal, grace period, forced kill, name sweep, confirmation.
    #[instrument(skip(self, handle), fields(pid = handle.pid))]
    pub async fn terminate(&self, handle: ProcessHandle) {
        let ProcessHandle { pid, mut child } = handle;
        let grace = Duration::from_millis(self.config.termination_grace_ms);

        request_shutdown(pid, &mut child);
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Application exited gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Failed waiting for application"),
            Err(_) => {
                warn!(grace_ms = self.config.termination_grace_ms, "Grace period elapsed, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Forced kill failed");
                }
            }
        }

        let swept = sweep_by_name(&self.config.process_name).await;
        if swept > 0 {
            debug!(swept, "Killed lingering child processes");
        }

        for _ in 0..CONFIRM_CHECKS {
            if !is_running(pid) {
                info!("Application terminated");
                return;
            }
            sleep(CONFIRM_INTERVAL).await;
        }
        warn!("Application still running after termination");
    }
}

#[async_trait]
impl AppLauncher for ProcessLauncher {
    type Handle = ProcessHandle;

    async fn launch(&self) -> Result<ProcessHandle, HarvestError> {
        ProcessLauncher::launch(self).await
    }

    async fn terminate(&self, handle: ProcessHandle) {
        ProcessLauncher::terminate(self, handle).await
    }
}

#[cfg(unix)]
fn request_shutdown(pid: u32, _child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn request_shutdown(pid: u32, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(pid, error = %e, "Kill request not delivered");
    }
}

/// Kills every process whose name or executable path contains `pattern`
/// (case-insensitive), except this one. Returns how many were signalled.
pub async fn sweep_by_name(pattern: &str) -> usize {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return 0;
    }

    tokio::task::spawn_blocking(move || {
        let own_pid = std::process::id();
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

        let mut killed = 0;
        for (pid, process) in system.processes() {
            if pid.as_u32() == own_pid {
                continue;
            }
            let name = process.name().to_string_lossy().to_lowercase();
            let exe_match = process
                .exe()
                .is_some_and(|exe| exe.to_string_lossy().to_lowercase().contains(&pattern));
            if (name.contains(&pattern) || exe_match) && process.kill() {
                debug!(pid = pid.as_u32(), %name, "Killed process by name");
                killed += 1;
            }
        }
        killed
    })
    .await
    .unwrap_or_else(|e| {
        warn!(error = %e, "Process sweep panicked");
        0
    })
}

/// Kills whatever still listens on `port`. Relies on `lsof`; when it is
/// unavailable the sweep is skipped.
pub async fn sweep_port_owner(port: u16) -> usize {
    let output = Command::new("lsof")
        .args(["-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            debug!(port, error = %e, "lsof unavailable, skipping port sweep");
            return 0;
        }
    };

    let own_pid = std::process::id();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .filter(|pid| {
            let killed = force_kill(*pid);
            if killed {
                debug!(pid, port, "Killed control port owner");
            }
            killed
        })
        .count()
}

#[cfg(unix)]
fn force_kill(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok()
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> bool {
    let mut system = System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).is_some_and(|p| p.kill())
}

#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_running(pid: u32) -> bool {
    let mut system = System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).is_some()
}
