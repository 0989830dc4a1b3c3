use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toml::Value;

use crate::error::{Error, Result};

pub const CONF_FILENAME: &str = "bluestacks.conf";
pub const INSTANCE_PREFIX: &str = "bst.instance.";
pub const ROOT_KEY_SUFFIX: &str = ".enable_root_access";
pub const GLOBAL_ROOT_KEY: &str = "bst.feature.rooting";

pub const MASTER_DESCRIPTOR: &str = "Android.bstk.in";
pub const DESCRIPTOR_PATTERN: &str = "*.bstk";
pub const FASTBOOT_VDI: &str = "fastboot.vdi";
pub const ROOT_VHD: &str = "Root.vhd";

pub const PROCESS_NAMES: &[&str] = &[
    "HD-Player.exe",
    "BlueStacks.exe",
    "HD-Agent.exe",
    "BstkSVC.exe",
    "HD-Frontend.exe",
    "HD-LogRotatorService.exe",
    "BlueStacksWebHelper.exe",
];

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub locator: LocatorSettings,
    pub keys: KeySettings,
    pub descriptors: DescriptorSettings,
    pub process: ProcessSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// Stop at the first registry root that yields both directories.
    #[default]
    First,
    /// Return one installation per usable registry root.
    All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRoot {
    pub source: String,
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    pub roots: Vec<RegistryRoot>,
    pub data_dir_value: String,
    pub user_dir_value: String,
    pub config_filename: String,
    pub discovery: DiscoveryPolicy,
    pub registry_file: Option<PathBuf>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            roots: vec![
                RegistryRoot {
                    source: "nxt".into(),
                    base_path: r"SOFTWARE\BlueStacks_nxt".into(),
                },
                RegistryRoot {
                    source: "msi5".into(),
                    base_path: r"SOFTWARE\BlueStacks_msi5".into(),
                },
            ],
            data_dir_value: "DataDir".into(),
            user_dir_value: "UserDefinedDir".into(),
            config_filename: CONF_FILENAME.into(),
            discovery: DiscoveryPolicy::First,
            registry_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MissingFlagPolicy {
    /// An instance without a config entry has an unknown root flag.
    #[default]
    Unknown,
    /// Legacy: treat a missing entry as "off".
    Off,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub instance_prefix: String,
    pub root_suffix: String,
    pub global_root: String,
    pub missing_flag: MissingFlagPolicy,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            instance_prefix: INSTANCE_PREFIX.into(),
            root_suffix: ROOT_KEY_SUFFIX.into(),
            global_root: GLOBAL_ROOT_KEY.into(),
            missing_flag: MissingFlagPolicy::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MasterLocation {
    /// The master descriptor sits inside the instance directory.
    #[default]
    Instance,
    /// The master descriptor sits in the engine directory (parent of the instance directory).
    Engine,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DescriptorSettings {
    pub master: String,
    pub pattern: String,
    pub master_location: MasterLocation,
    pub targets: Vec<String>,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        Self {
            master: MASTER_DESCRIPTOR.into(),
            pattern: DESCRIPTOR_PATTERN.into(),
            master_location: MasterLocation::Instance,
            targets: vec![FASTBOOT_VDI.into(), ROOT_VHD.into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub names: Vec<String>,
    pub terminate_timeout_ms: u64,
    pub kill_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            names: PROCESS_NAMES.iter().map(|s| s.to_string()).collect(),
            terminate_timeout_ms: 5_000,
            kill_timeout_ms: 2_000,
            poll_interval_ms: 100,
            settle_delay_ms: 1_500,
        }
    }
}

impl ProcessSettings {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.keys.instance_prefix.trim().is_empty() {
            return Err(Error::config("keys.instance_prefix must not be empty"));
        }
        if self.keys.global_root.trim().is_empty() {
            return Err(Error::config("keys.global_root must not be empty"));
        }
        if self.descriptors.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::config("descriptors.targets needs at least one filename"));
        }
        if self.descriptors.master.contains(['/', '\\']) {
            return Err(Error::config(format!(
                "descriptors.master '{}' must be a bare filename",
                self.descriptors.master
            )));
        }
        for root in &self.locator.roots {
            if root.source.trim().is_empty() {
                return Err(Error::config(format!(
                    "locator root '{}' has an empty source tag",
                    root.base_path
                )));
            }
        }
        Ok(())
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

pub fn resolve_ref_path(from_file: &Path, reference: &Path) -> PathBuf {
    if reference.is_absolute() {
        reference.to_path_buf()
    } else {
        from_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(reference)
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "settings extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::from_io(format!("failed to read settings {}", path.display()), &e))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    // Single-parent extends; the child overrides the parent key by key.
    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let base_path = resolve_ref_path(path, Path::new(ext));
        out = load_value_inner(&base_path, stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        anchor_registry_file(path, tbl);
    }

    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

// A relative registry_file is relative to the file that names it, not to the cwd.
fn anchor_registry_file(path: &Path, tbl: &mut toml::value::Table) {
    let Some(locator) = tbl.get_mut("locator").and_then(Value::as_table_mut) else {
        return;
    };
    let Some(raw) = locator.get("registry_file").and_then(Value::as_str) else {
        return;
    };
    let resolved = resolve_ref_path(path, Path::new(raw));
    locator.insert(
        "registry_file".into(),
        Value::String(resolved.to_string_lossy().into_owned()),
    );
}

pub fn parse(value: Value) -> Result<Settings> {
    let settings: Settings = value
        .try_into()
        .map_err(|e| Error::config(format!("invalid settings: {e}")))?;
    settings.validate()?;
    Ok(settings)
}

pub fn load(path: &Path) -> Result<Settings> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    parse(value)
}
