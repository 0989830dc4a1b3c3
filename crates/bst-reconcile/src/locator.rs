use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{DiscoveryPolicy, LocatorSettings};
use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installation {
    pub source_id: String,
    pub config_path: PathBuf,
    pub data_path: PathBuf,
}

pub trait Registry {
    /// Look up a string value. `Ok(None)` when the key or value is absent;
    /// `ErrorKind::PermissionDenied` when access is refused.
    fn lookup(&self, base_path: &str, value_name: &str) -> Result<Option<String>>;
}

/// In-memory registry, keyed by base path then value name.
#[derive(Debug, Clone, Default)]
pub struct MapRegistry {
    values: BTreeMap<String, BTreeMap<String, String>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(
        mut self,
        base_path: impl Into<String>,
        value_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.values
            .entry(base_path.into())
            .or_default()
            .insert(value_name.into(), value.into());
        self
    }
}

impl Registry for MapRegistry {
    fn lookup(&self, base_path: &str, value_name: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .get(base_path)
            .and_then(|vals| vals.get(value_name))
            .cloned())
    }
}

/// Registry snapshot stored as TOML, one table per base path:
///
/// ```toml
/// ['SOFTWARE\BlueStacks_nxt']
/// DataDir = '/srv/bluestacks/Engine'
/// UserDefinedDir = '/srv/bluestacks'
/// ```
#[derive(Debug, Clone)]
pub struct RegistryFile {
    inner: MapRegistry,
}

impl RegistryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            Error::from_io(format!("failed to read registry snapshot {}", path.display()), &e)
        })?;
        let value: toml::Value = toml::from_str(&data).map_err(|e| {
            Error::config(format!("TOML parse error in {}: {e}", path.display()))
        })?;
        let Some(tbl) = value.as_table() else {
            return Err(Error::config(format!(
                "registry snapshot {} must be a table of base paths",
                path.display()
            )));
        };

        let mut inner = MapRegistry::new();
        for (base, vals) in tbl {
            let Some(vals) = vals.as_table() else {
                warn!(base = %base, "registry snapshot entry is not a table; ignored");
                continue;
            };
            for (name, v) in vals {
                match v.as_str() {
                    Some(s) => inner = inner.with_value(base.as_str(), name.as_str(), s),
                    // Only string values are meaningful, like REG_SZ.
                    None => warn!(base = %base, value = %name, "registry value is not a string; ignored"),
                }
            }
        }
        Ok(Self { inner })
    }
}

impl Registry for RegistryFile {
    fn lookup(&self, base_path: &str, value_name: &str) -> Result<Option<String>> {
        self.inner.lookup(base_path, value_name)
    }
}

/// `HKEY_LOCAL_MACHINE`, read with `KEY_READ`. Only `REG_SZ` values are returned.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HklmRegistry;

#[cfg(windows)]
impl Registry for HklmRegistry {
    fn lookup(&self, base_path: &str, value_name: &str) -> Result<Option<String>> {
        use std::io;
        use winreg::RegKey;
        use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ};

        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let key = match hklm.open_subkey_with_flags(base_path, KEY_READ) {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::from_io(format!(r"HKLM\{base_path}"), &e));
            }
        };
        match key.get_value::<String, _>(value_name) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(base = base_path, value = value_name, "registry value is not a string; ignored");
                Ok(None)
            }
            Err(e) => Err(Error::from_io(format!(r"HKLM\{base_path}\{value_name}"), &e)),
        }
    }
}

/// Registry with nothing in it; used when no snapshot is configured off Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRegistry;

impl Registry for EmptyRegistry {
    fn lookup(&self, _base_path: &str, _value_name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

fn lookup_logged(reg: &dyn Registry, base: &str, name: &str) -> Option<String> {
    match reg.lookup(base, name) {
        Ok(Some(v)) if !v.trim().is_empty() => {
            debug!(base, name, value = %v, "registry value found");
            Some(v)
        }
        Ok(_) => {
            debug!(base, name, "registry value not found");
            None
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            error!(base, name, error = %e, "permission denied reading registry; try running elevated");
            None
        }
        Err(e) => {
            error!(base, name, error = %e, "registry read failed");
            None
        }
    }
}

/// Enumerate installations in the configured root order. Never fails: an empty
/// result means "nothing installed".
pub fn discover(reg: &dyn Registry, settings: &LocatorSettings) -> Vec<Installation> {
    let mut out = Vec::new();
    for root in &settings.roots {
        let Some(user_dir) = lookup_logged(reg, &root.base_path, &settings.user_dir_value) else {
            continue;
        };
        let Some(data_dir) = lookup_logged(reg, &root.base_path, &settings.data_dir_value) else {
            continue;
        };

        let inst = Installation {
            source_id: root.source.clone(),
            config_path: PathBuf::from(user_dir.trim()).join(&settings.config_filename),
            data_path: PathBuf::from(data_dir.trim()),
        };
        info!(
            source = %inst.source_id,
            config = %inst.config_path.display(),
            data = %inst.data_path.display(),
            "installation found"
        );
        out.push(inst);
        if settings.discovery == DiscoveryPolicy::First {
            break;
        }
    }
    if out.is_empty() {
        info!("no installations found");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeniedRegistry;

    impl Registry for DeniedRegistry {
        fn lookup(&self, _b: &str, _n: &str) -> Result<Option<String>> {
            Err(Error::new(ErrorKind::PermissionDenied, "access denied"))
        }
    }

    fn both_roots() -> MapRegistry {
        MapRegistry::new()
            .with_value(r"SOFTWARE\BlueStacks_nxt", "UserDefinedDir", "/bs/nxt")
            .with_value(r"SOFTWARE\BlueStacks_nxt", "DataDir", "/bs/nxt/Engine")
            .with_value(r"SOFTWARE\BlueStacks_msi5", "UserDefinedDir", "/bs/msi")
            .with_value(r"SOFTWARE\BlueStacks_msi5", "DataDir", "/bs/msi/Engine")
    }

    #[test]
    fn first_policy_stops_at_first_usable_root() {
        let found = discover(&both_roots(), &LocatorSettings::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_id, "nxt");
        assert_eq!(found[0].config_path, PathBuf::from("/bs/nxt/bluestacks.conf"));
        assert_eq!(found[0].data_path, PathBuf::from("/bs/nxt/Engine"));
    }

    #[test]
    fn all_policy_returns_every_usable_root() {
        let settings = LocatorSettings {
            discovery: DiscoveryPolicy::All,
            ..LocatorSettings::default()
        };
        let found = discover(&both_roots(), &settings);
        let sources: Vec<_> = found.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(sources, vec!["nxt", "msi5"]);
    }

    #[test]
    fn incomplete_root_is_skipped() {
        let reg = MapRegistry::new()
            .with_value(r"SOFTWARE\BlueStacks_nxt", "UserDefinedDir", "/bs/nxt")
            .with_value(r"SOFTWARE\BlueStacks_msi5", "UserDefinedDir", "/bs/msi")
            .with_value(r"SOFTWARE\BlueStacks_msi5", "DataDir", "/bs/msi/Engine");
        let found = discover(&reg, &LocatorSettings::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_id, "msi5");
    }

    #[test]
    fn errors_and_empty_registries_yield_nothing() {
        assert!(discover(&DeniedRegistry, &LocatorSettings::default()).is_empty());
        assert!(discover(&EmptyRegistry, &LocatorSettings::default()).is_empty());
    }

    #[test]
    fn registry_file_ignores_non_string_values() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("registry.toml");
        fs::write(
            &path,
            r#"
['SOFTWARE\BlueStacks_nxt']
UserDefinedDir = '/bs/nxt'
DataDir = '/bs/nxt/Engine'
Version = 5
"#,
        )
        .expect("write");
        let reg = RegistryFile::load(&path).expect("load");
        assert_eq!(
            reg.lookup(r"SOFTWARE\BlueStacks_nxt", "DataDir").expect("lookup"),
            Some("/bs/nxt/Engine".to_string())
        );
        assert_eq!(reg.lookup(r"SOFTWARE\BlueStacks_nxt", "Version").expect("lookup"), None);
    }
}
