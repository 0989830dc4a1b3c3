use crate::error::{Error, ErrorKind, Result};

use super::{ProcessInfo, ProcessTable, Signal};

/// The host's process table. Linux reads `/proc` and signals with `kill(2)`;
/// Windows goes through `sysinfo`. Other hosts enumerate nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn list(&self) -> Result<Vec<ProcessInfo>> {
        list_impl()
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        signal_impl(pid, signal)
    }

    fn is_alive(&self, pid: u32) -> bool {
        alive_impl(pid)
    }
}

#[cfg(target_os = "linux")]
fn list_impl() -> Result<Vec<ProcessInfo>> {
    use std::fs;

    let own = std::process::id();
    let entries = fs::read_dir("/proc").map_err(|e| Error::from_io("failed to list /proc", &e))?;
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own {
            continue;
        }
        // Processes can exit between listing and reading; those are simply skipped.
        if let Some(name) = process_name(pid) {
            out.push(ProcessInfo { pid, name });
        }
    }
    out.sort_by_key(|p| p.pid);
    Ok(out)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn list_impl() -> Result<Vec<ProcessInfo>> {
    tracing::debug!("process enumeration is not available on this host");
    Ok(Vec::new())
}

// Prefer the argv[0] basename: `comm` is truncated to 15 bytes, which cuts names
// like `HD-LogRotatorService.exe`. Wine-hosted executables also show their
// Windows path there.
#[cfg(target_os = "linux")]
fn process_name(pid: u32) -> Option<String> {
    use std::fs;

    if let Ok(cmdline) = fs::read(format!("/proc/{pid}/cmdline")) {
        let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
        if !argv0.is_empty() {
            let argv0 = String::from_utf8_lossy(argv0);
            let base = argv0.rsplit(['/', '\\']).next().unwrap_or_default().trim();
            if !base.is_empty() {
                return Some(base.to_string());
            }
        }
    }
    let comm = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let comm = comm.trim();
    (!comm.is_empty()).then(|| comm.to_string())
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may itself contain ')'.
    stat.rfind(')')
        .and_then(|i| stat[i + 1..].trim_start().chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal_impl(pid: u32, signal: Signal) -> Result<()> {
    let Ok(raw_pid) = i32::try_from(pid) else {
        return Err(Error::msg(format!("pid {pid} out of range")));
    };
    if raw_pid <= 0 {
        return Err(Error::msg(format!("refusing to signal pid {pid}")));
    }
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(raw_pid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    let kind = match err.raw_os_error() {
        Some(libc::ESRCH) => ErrorKind::NotFound,
        Some(libc::EPERM) => ErrorKind::PermissionDenied,
        _ => ErrorKind::Io,
    };
    Err(Error::new(kind, format!("{signal:?} pid {pid}: {err}")))
}

#[cfg(not(any(unix, windows)))]
fn signal_impl(pid: u32, signal: Signal) -> Result<()> {
    Err(Error::msg(format!(
        "{signal:?} pid {pid}: signals are not supported on this host"
    )))
}

#[cfg(unix)]
fn alive_impl(pid: u32) -> bool {
    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    if raw_pid <= 0 {
        return false;
    }
    // Signal 0 only checks existence; EPERM still means the process exists.
    let rc = unsafe { libc::kill(raw_pid, 0) };
    let exists = rc == 0
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

#[cfg(not(any(unix, windows)))]
fn alive_impl(_pid: u32) -> bool {
    false
}

#[cfg(windows)]
fn snapshot(update: sysinfo::ProcessesToUpdate<'_>) -> sysinfo::System {
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(update, true);
    sys
}

#[cfg(windows)]
fn list_impl() -> Result<Vec<ProcessInfo>> {
    let own = std::process::id();
    let sys = snapshot(sysinfo::ProcessesToUpdate::All);
    let mut out: Vec<ProcessInfo> = sys
        .processes()
        .iter()
        .map(|(pid, p)| ProcessInfo {
            pid: pid.as_u32(),
            name: p.name().to_string_lossy().into_owned(),
        })
        .filter(|p| p.pid != own && !p.name.is_empty())
        .collect();
    out.sort_by_key(|p| p.pid);
    Ok(out)
}

// Windows has no graceful signal; terminate and kill both end in TerminateProcess.
#[cfg(windows)]
fn signal_impl(pid: u32, signal: Signal) -> Result<()> {
    let target = sysinfo::Pid::from_u32(pid);
    let sys = snapshot(sysinfo::ProcessesToUpdate::Some(&[target]));
    let Some(process) = sys.process(target) else {
        return Err(Error::not_found(format!("{signal:?} pid {pid}: no such process")));
    };
    let sent = match signal {
        Signal::Terminate => process
            .kill_with(sysinfo::Signal::Term)
            .unwrap_or_else(|| process.kill()),
        Signal::Kill => process.kill(),
    };
    if sent {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::PermissionDenied,
            format!("{signal:?} pid {pid}: access denied"),
        ))
    }
}

#[cfg(windows)]
fn alive_impl(pid: u32) -> bool {
    let target = sysinfo::Pid::from_u32(pid);
    snapshot(sysinfo::ProcessesToUpdate::Some(&[target]))
        .process(target)
        .is_some_and(|p| p.status() != sysinfo::ProcessStatus::Zombie)
}
