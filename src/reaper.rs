//! Fleet reaper
//!
//! Emergency cleanup that finds transcoders by inspecting the OS process
//! table and terminates them. It ignores the registry entirely, so
//! supervisors may briefly hold handles to processes that are already gone.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, Signal, System};

use crate::config::RelayConfig;
use crate::error::{Error, Result};

/// Linux truncates process names to this many bytes
const COMM_LEN: usize = 15;

/// Kills transcoders matching a binary name and argument signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReaper {
    binary_name: String,
    signature: String,
}

impl FleetReaper {
    /// Create a reaper for `binary_name` processes whose arguments contain `signature`
    pub fn new(binary_name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            signature: signature.into(),
        }
    }

    /// Create a reaper matching the relay's transcoder
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.transcoder_name(), config.reap_signature.clone())
    }

    /// Send SIGTERM to every matching process
    ///
    /// Returns the pids that were signalled. Fails if the process table
    /// cannot be read on this platform.
    pub async fn kill_all(&self) -> Result<Vec<u32>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(Error::ProcessTable(
                "process listing is not supported on this platform".into(),
            ));
        }

        let reaper = self.clone();
        tokio::task::spawn_blocking(move || reaper.kill_matching())
            .await
            .map_err(|e| Error::ProcessTable(e.to_string()))
    }

    fn kill_matching(&self) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        let own_pid = sysinfo::get_current_pid().ok();

        let mut killed = Vec::new();
        for (pid, process) in system.processes() {
            if Some(*pid) == own_pid || !self.matches(process.name(), process.cmd()) {
                continue;
            }

            if terminate(process) {
                tracing::info!(pid = pid.as_u32(), "Reaped transcoder");
                killed.push(pid.as_u32());
            } else {
                tracing::warn!(pid = pid.as_u32(), "Failed to signal transcoder");
            }
        }

        killed
    }

    /// Whether a process with this name and command line is one of ours
    pub fn matches(&self, name: &OsStr, cmd: &[OsString]) -> bool {
        let is_transcoder = self.name_matches(name)
            || cmd
                .iter()
                .take(2)
                .any(|arg| Path::new(arg).file_name().is_some_and(|f| self.name_matches(f)));

        is_transcoder && cmd.iter().any(|arg| arg.as_os_str() == self.signature.as_str())
    }

    fn name_matches(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        if name == self.binary_name {
            return true;
        }
        // truncated comm name
        name.len() == COMM_LEN && self.binary_name.starts_with(&*name)
    }
}

fn terminate(process: &sysinfo::Process) -> bool {
    process
        .kill_with(Signal::Term)
        .unwrap_or_else(|| process.kill())
}
