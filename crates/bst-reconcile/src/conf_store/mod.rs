use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::KeySettings;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;

pub mod line;

use line::{canonical_line, line_terminator, parse_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootFlag {
    On,
    Off,
    Unknown,
}

impl RootFlag {
    pub fn from_bool(on: bool) -> Self {
        if on { RootFlag::On } else { RootFlag::Off }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            RootFlag::On => Some(true),
            RootFlag::Off => Some(false),
            RootFlag::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != RootFlag::Unknown
    }

    pub fn label(self) -> &'static str {
        match self {
            RootFlag::On => "on",
            RootFlag::Off => "off",
            RootFlag::Unknown => "unknown",
        }
    }
}

impl KeySettings {
    pub fn instance_key(&self, name: &str) -> String {
        format!("{}{}{}", self.instance_prefix, name, self.root_suffix)
    }

    /// Extract the instance name from an instance-scoped key, matching the fixed
    /// prefix and suffix case-insensitively.
    pub fn instance_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        let prefix_len = self.instance_prefix.len();
        let suffix_len = self.root_suffix.len();
        if key.len() <= prefix_len + suffix_len {
            return None;
        }
        let head = key.get(..prefix_len)?;
        let tail = key.get(key.len() - suffix_len..)?;
        if !head.eq_ignore_ascii_case(&self.instance_prefix)
            || !tail.eq_ignore_ascii_case(&self.root_suffix)
        {
            return None;
        }
        let name = key.get(prefix_len..key.len() - suffix_len)?;
        if name.is_empty() || name.contains('.') {
            return None;
        }
        Some(name)
    }

    pub fn is_global_key(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(&self.global_root)
    }
}

/// Everything the catalog needs from one config file, gathered in a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfSnapshot {
    pub instances: BTreeMap<String, bool>,
    pub global: bool,
    /// Keys that occur more than once; only the first occurrence is honoured.
    pub duplicates: Vec<String>,
}

fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file(
            format!("failed to read config {}", path.display()),
            &e,
        )),
    }
}

pub fn read_instance_flag(path: &Path, name: &str, keys: &KeySettings) -> Result<RootFlag> {
    let Some(text) = read_text(path)? else {
        debug!(path = %path.display(), "config file missing; root flag unknown");
        return Ok(RootFlag::Unknown);
    };
    let key = keys.instance_key(name);
    for raw in text.lines() {
        let Some(entry) = parse_line(raw) else {
            continue;
        };
        if !entry.key_is(&key) {
            continue;
        }
        if let Some(v) = entry.quoted() {
            return Ok(RootFlag::from_bool(v == "1"));
        }
    }
    Ok(RootFlag::Unknown)
}

pub fn read_global_flag(path: &Path, keys: &KeySettings) -> Result<bool> {
    let Some(text) = read_text(path)? else {
        return Ok(false);
    };
    Ok(text
        .lines()
        .filter_map(parse_line)
        .find(|e| keys.is_global_key(e.key) && e.quoted().is_some())
        .and_then(|e| e.quoted())
        .is_some_and(|v| v == "1"))
}

pub fn read_all(path: &Path, keys: &KeySettings) -> Result<ConfSnapshot> {
    let Some(text) = read_text(path)? else {
        warn!(path = %path.display(), "config file not found while reading root flags");
        return Ok(ConfSnapshot::default());
    };
    Ok(scan(&text, keys, path))
}

pub fn read_all_instance_flags(path: &Path, keys: &KeySettings) -> Result<BTreeMap<String, bool>> {
    Ok(read_all(path, keys)?.instances)
}

fn scan(text: &str, keys: &KeySettings, path: &Path) -> ConfSnapshot {
    let mut out = ConfSnapshot::default();
    let mut seen = HashSet::<String>::new();

    for (idx, raw) in text.lines().enumerate() {
        let Some(entry) = parse_line(raw) else {
            continue;
        };
        let is_global = keys.is_global_key(entry.key);
        let name = keys.instance_name(entry.key);
        if !is_global && name.is_none() {
            continue;
        }

        let Some(value) = entry.quoted() else {
            debug!(
                line = idx + 1,
                text = %sanitize_log_line(raw),
                "config key without quoted value ignored"
            );
            continue;
        };

        if !seen.insert(entry.key.to_ascii_lowercase()) {
            if !out.duplicates.iter().any(|d| d.eq_ignore_ascii_case(entry.key)) {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    key = entry.key,
                    "duplicate config key; keeping the first occurrence"
                );
                out.duplicates.push(entry.key.to_string());
            }
            continue;
        }

        if is_global {
            out.global = value == "1";
        } else if let Some(name) = name {
            out.instances.insert(name.to_string(), value == "1");
        }
    }
    out
}

/// Render `content` with `key` set to `value`; `None` when nothing would change.
pub fn render_update(content: &str, key: &str, value: &str) -> Option<String> {
    let canonical = canonical_line(key, value);
    let mut out = String::with_capacity(content.len() + canonical.len() + 2);
    let mut found = false;
    let mut changed = false;

    for line in content.split_inclusive('\n') {
        if !found && parse_line(line).is_some_and(|e| e.key_is(key)) {
            found = true;
            if line.trim() != canonical {
                debug!(
                    old = %sanitize_log_line(line),
                    new = %canonical,
                    "rewriting config line"
                );
                out.push_str(&canonical);
                out.push_str(line_terminator(line));
                changed = true;
                continue;
            }
        }
        out.push_str(line);
    }

    if !found {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&canonical);
        out.push('\n');
        changed = true;
    }

    changed.then_some(out)
}

/// Set `key` to `value`, returning whether the file was rewritten.
pub fn write_flag(path: &Path, key: &str, value: &str) -> Result<bool> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::file(format!("failed to read config {}", path.display()), &e)
    })?;

    let Some(updated) = render_update(&content, key, value) else {
        debug!(path = %path.display(), key, value, "config already up to date");
        return Ok(false);
    };

    fs::write(path, updated).map_err(|e| {
        Error::file(format!("failed to write config {}", path.display()), &e)
    })?;
    info!(path = %path.display(), key, value, "config updated");
    Ok(true)
}
