use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ProcessSettings;
use crate::error::{Error, ErrorKind, Result};

pub mod system;

pub use system::SystemProcessTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// OS process table seam.
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> Result<Vec<ProcessInfo>>;
    /// `ErrorKind::NotFound` when the process is already gone,
    /// `ErrorKind::PermissionDenied` when it may not be signalled.
    fn signal(&self, pid: u32, signal: Signal) -> Result<()>;
    fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct TerminationReport {
    pub found: Vec<ProcessInfo>,
    /// Exited after the graceful signal.
    pub exited: Vec<ProcessInfo>,
    /// Exited after the forced signal.
    pub killed: Vec<ProcessInfo>,
    /// Still alive after both waits.
    pub survivors: Vec<ProcessInfo>,
    pub failures: Vec<(ProcessInfo, Error)>,
}

impl TerminationReport {
    /// True iff any matching process was found. Says nothing about whether they are gone.
    pub fn attempted(&self) -> bool {
        !self.found.is_empty()
    }

    pub fn all_stopped(&self) -> bool {
        self.survivors.is_empty()
    }
}

#[derive(Clone)]
pub struct ProcessGuard {
    table: Arc<dyn ProcessTable>,
    names: Vec<String>,
    terminate_timeout: Duration,
    kill_timeout: Duration,
    poll_interval: Duration,
}

impl ProcessGuard {
    pub fn new(table: Arc<dyn ProcessTable>, settings: &ProcessSettings) -> Self {
        Self {
            table,
            names: settings.names.clone(),
            terminate_timeout: settings.terminate_timeout(),
            kill_timeout: settings.kill_timeout(),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn system(settings: &ProcessSettings) -> Self {
        Self::new(Arc::new(SystemProcessTable), settings)
    }

    /// Allow-list match, ASCII case-insensitive, with or without the `.exe` suffix.
    pub fn matches(&self, name: &str) -> bool {
        self.names.iter().any(|n| {
            name.eq_ignore_ascii_case(n)
                || strip_exe(n).is_some_and(|stem| name.eq_ignore_ascii_case(stem))
        })
    }

    pub fn running(&self) -> Vec<ProcessInfo> {
        let procs = match self.table.list() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot enumerate processes");
                return Vec::new();
            }
        };
        procs
            .into_iter()
            .filter(|p| self.matches(&p.name))
            .inspect(|p| debug!(pid = p.pid, name = %p.name, "emulator process detected"))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        !self.running().is_empty()
    }

    /// Graceful terminate, bounded wait, forced kill of survivors, second bounded wait.
    pub fn terminate_all(&self) -> TerminationReport {
        let mut report = TerminationReport {
            found: self.running(),
            ..TerminationReport::default()
        };
        if report.found.is_empty() {
            info!("no emulator processes running");
            return report;
        }

        info!(count = report.found.len(), "terminating emulator processes");
        for p in &report.found {
            if let Err(e) = self.table.signal(p.pid, Signal::Terminate) {
                record_signal_failure(&mut report.failures, p, e);
            }
        }

        let alive = self.wait_for_exit(&report.found, self.terminate_timeout);
        report.exited = report
            .found
            .iter()
            .filter(|p| !alive.contains(p))
            .cloned()
            .collect();
        if alive.is_empty() {
            return report;
        }

        warn!(
            count = alive.len(),
            timeout_ms = self.terminate_timeout.as_millis() as u64,
            "processes ignored terminate; killing"
        );
        for p in &alive {
            if let Err(e) = self.table.signal(p.pid, Signal::Kill) {
                record_signal_failure(&mut report.failures, p, e);
            }
        }

        let remaining = self.wait_for_exit(&alive, self.kill_timeout);
        report.killed = alive
            .iter()
            .filter(|p| !remaining.contains(p))
            .cloned()
            .collect();
        for p in &remaining {
            warn!(pid = p.pid, name = %p.name, "process survived kill");
        }
        report.survivors = remaining;
        report
    }

    /// Poll until every process is gone or `timeout` elapses; returns the ones still alive.
    fn wait_for_exit(&self, procs: &[ProcessInfo], timeout: Duration) -> Vec<ProcessInfo> {
        let start = Instant::now();
        let mut remaining: Vec<ProcessInfo> = procs.to_vec();
        loop {
            remaining.retain(|p| self.table.is_alive(p.pid));
            let elapsed = start.elapsed();
            if remaining.is_empty() || elapsed >= timeout {
                return remaining;
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}

fn record_signal_failure(failures: &mut Vec<(ProcessInfo, Error)>, p: &ProcessInfo, e: Error) {
    match e.kind() {
        ErrorKind::NotFound => {
            debug!(pid = p.pid, name = %p.name, "process exited before signal");
        }
        ErrorKind::PermissionDenied => {
            error!(pid = p.pid, name = %p.name, "permission denied signalling process; try running elevated");
            failures.push((p.clone(), e));
        }
        _ => {
            error!(pid = p.pid, name = %p.name, error = %e, "failed to signal process");
            failures.push((p.clone(), e));
        }
    }
}

fn strip_exe(name: &str) -> Option<&str> {
    let cut = name.len().checked_sub(4)?;
    let (stem, ext) = (name.get(..cut)?, name.get(cut..)?);
    (ext.eq_ignore_ascii_case(".exe") && !stem.is_empty()).then_some(stem)
}
