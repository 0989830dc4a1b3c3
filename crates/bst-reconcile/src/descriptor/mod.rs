use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{DescriptorSettings, MasterLocation};
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;

pub mod attr;

pub const TOKEN_NORMAL: &str = "Normal";
pub const TOKEN_READONLY: &str = "Readonly";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RwMode {
    ReadWrite,
    ReadOnly,
    Unknown,
}

impl RwMode {
    /// The descriptor token that selects this mode.
    pub fn token(self) -> Option<&'static str> {
        match self {
            RwMode::ReadWrite => Some(TOKEN_NORMAL),
            RwMode::ReadOnly => Some(TOKEN_READONLY),
            RwMode::Unknown => None,
        }
    }

    /// ReadOnly and ReadWrite flip; Unknown has no legal toggle.
    pub fn toggled(self) -> Option<RwMode> {
        match self {
            RwMode::ReadWrite => Some(RwMode::ReadOnly),
            RwMode::ReadOnly => Some(RwMode::ReadWrite),
            RwMode::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != RwMode::Unknown
    }

    pub fn label(self) -> &'static str {
        match self {
            RwMode::ReadWrite => "read-write",
            RwMode::ReadOnly => "read-only",
            RwMode::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeWriteReport {
    pub files_scanned: usize,
    pub files_changed: Vec<PathBuf>,
    pub lines_changed: usize,
    /// Files that vanished between enumeration and rewrite.
    pub skipped: Vec<PathBuf>,
}

pub fn master_path(instance_dir: &Path, settings: &DescriptorSettings) -> PathBuf {
    match settings.master_location {
        MasterLocation::Instance => instance_dir.join(&settings.master),
        MasterLocation::Engine => instance_dir
            .parent()
            .unwrap_or(instance_dir)
            .join(&settings.master),
    }
}

const PATTERN_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn descriptor_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| Error::config(format!("invalid descriptor pattern '{pattern}': {e}")))
}

/// The master descriptor (when present) followed by the instance-local descriptors
/// in filename order. The master's name is excluded from the pattern matches.
pub fn descriptor_files(instance_dir: &Path, settings: &DescriptorSettings) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let master = master_path(instance_dir, settings);
    if master.is_file() {
        out.push(master);
    } else {
        debug!(path = %master.display(), "master descriptor not present");
    }

    let matcher = descriptor_pattern(&settings.pattern)?;
    let walker = walkdir::WalkDir::new(instance_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::io(format!(
                "failed to list descriptors in {}: {e}",
                instance_dir.display()
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name == settings.master || !matcher.matches_with(name, PATTERN_OPTIONS) {
            continue;
        }
        out.push(entry.into_path());
    }
    Ok(out)
}

/// Current R/W mode of an instance. Never fails: anything indeterminate is `Unknown`.
pub fn read_mode(instance_dir: &Path, settings: &DescriptorSettings) -> RwMode {
    if !instance_dir.is_dir() {
        warn!(dir = %instance_dir.display(), "instance directory not found for mode check");
        return RwMode::Unknown;
    }
    let files = match descriptor_files(instance_dir, settings) {
        Ok(files) => files,
        Err(e) => {
            warn!(dir = %instance_dir.display(), error = %e, "cannot enumerate descriptors");
            return RwMode::Unknown;
        }
    };
    if files.is_empty() {
        warn!(dir = %instance_dir.display(), "no descriptor files found");
        return RwMode::Unknown;
    }

    let mut found_relevant = false;
    for file in &files {
        let text = match fs::read_to_string(file) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %file.display(), "descriptor vanished during mode check; skipping");
                continue;
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "unreadable descriptor; mode unknown");
                return RwMode::Unknown;
            }
        };
        for (idx, line) in text.lines().enumerate() {
            if !attr::references_target(line, &settings.targets) {
                continue;
            }
            found_relevant = true;
            if attr::line_mode(line) == Some(RwMode::ReadOnly) {
                debug!(path = %file.display(), line = idx + 1, "target disk marked read-only");
                return RwMode::ReadOnly;
            }
        }
    }

    if found_relevant {
        RwMode::ReadWrite
    } else {
        warn!(
            dir = %instance_dir.display(),
            targets = ?settings.targets,
            "no descriptor line references a target disk"
        );
        RwMode::Unknown
    }
}

/// Point every target-disk line of the instance's descriptors at `mode`.
pub fn write_mode(
    instance_dir: &Path,
    settings: &DescriptorSettings,
    mode: RwMode,
) -> Result<ModeWriteReport> {
    let Some(token) = mode.token() else {
        return Err(Error::invalid_state(format!(
            "cannot write mode '{}' to {}",
            mode.label(),
            instance_dir.display()
        )));
    };
    if !instance_dir.is_dir() {
        return Err(Error::not_found(format!(
            "instance directory not found: {}",
            instance_dir.display()
        )));
    }
    let files = descriptor_files(instance_dir, settings)?;
    if files.is_empty() {
        return Err(Error::not_found(format!(
            "no descriptor files to modify in {}",
            instance_dir.display()
        )));
    }

    info!(dir = %instance_dir.display(), mode = mode.label(), "setting disk mode");
    let mut report = ModeWriteReport::default();
    for file in files {
        let text = match fs::read_to_string(&file) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %file.display(), "descriptor vanished before rewrite; skipping");
                report.skipped.push(file);
                continue;
            }
            Err(e) => {
                return Err(Error::file(
                    format!("failed to read descriptor {}", file.display()),
                    &e,
                ));
            }
        };
        report.files_scanned += 1;

        let mut out = String::with_capacity(text.len() + 16);
        let mut changed = 0usize;
        for line in text.split_inclusive('\n') {
            if attr::references_target(line, &settings.targets) {
                if let Some(new_line) = attr::rewrite_line(line, token) {
                    debug!(
                        path = %file.display(),
                        old = %sanitize_log_line(line),
                        new = %sanitize_log_line(&new_line),
                        "descriptor line rewritten"
                    );
                    out.push_str(&new_line);
                    changed += 1;
                    continue;
                }
            }
            out.push_str(line);
        }

        if changed == 0 {
            debug!(path = %file.display(), "descriptor already in requested mode");
            continue;
        }
        fs::write(&file, out).map_err(|e| {
            Error::file(format!("failed to write descriptor {}", file.display()), &e)
        })?;
        info!(path = %file.display(), lines = changed, mode = token, "descriptor updated");
        report.lines_changed += changed;
        report.files_changed.push(file);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching_ignores_case() {
        let p = descriptor_pattern("*.bstk").expect("pattern");
        assert!(p.matches_with("Nougat64.bstk", PATTERN_OPTIONS));
        assert!(p.matches_with("PIE64.BSTK", PATTERN_OPTIONS));
        assert!(!p.matches_with("Android.bstk.in", PATTERN_OPTIONS));
        assert!(!p.matches_with("Nougat64.bstk-prev", PATTERN_OPTIONS));

        let q = descriptor_pattern("disk?.bstk").expect("pattern");
        assert!(q.matches_with("disk1.bstk", PATTERN_OPTIONS));
        assert!(!q.matches_with("disk12.bstk", PATTERN_OPTIONS));
    }

    #[test]
    fn malformed_pattern_is_a_config_error() {
        let err = descriptor_pattern("[*.bstk").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn toggling_is_only_defined_for_known_modes() {
        assert_eq!(RwMode::ReadOnly.toggled(), Some(RwMode::ReadWrite));
        assert_eq!(RwMode::ReadWrite.toggled(), Some(RwMode::ReadOnly));
        assert_eq!(RwMode::Unknown.toggled(), None);
        assert_eq!(RwMode::Unknown.token(), None);
    }

    #[test]
    fn engine_master_location_uses_parent_dir() {
        let settings = DescriptorSettings {
            master_location: MasterLocation::Engine,
            ..DescriptorSettings::default()
        };
        let p = master_path(Path::new("/data/Engine/Pie64"), &settings);
        assert_eq!(p, Path::new("/data/Engine/Android.bstk.in"));
    }
}
