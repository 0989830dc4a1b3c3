use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::conf_store::{self, ConfSnapshot, RootFlag};
use crate::config::{MissingFlagPolicy, Settings};
use crate::descriptor::{self, RwMode};
use crate::error::{Error, Result};
use crate::locator::Installation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub name: String,
    pub unique_id: String,
    pub source_id: String,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub individual_root: RootFlag,
    /// Installation-wide flag, copied onto each instance of the installation.
    pub global_root: bool,
    pub rw_mode: RwMode,
}

impl Instance {
    /// `global AND individual`; unknown while the individual flag is unknown.
    pub fn effective_root(&self) -> Option<bool> {
        self.individual_root.as_bool().map(|on| on && self.global_root)
    }

    pub fn is_displayable(&self) -> bool {
        self.individual_root.is_known() && self.rw_mode.is_known()
    }
}

pub fn unique_id(name: &str, source_id: &str) -> String {
    format!("{name} ({source_id})")
}

/// Immutable view of every known instance, built from scratch on each refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    instances: BTreeMap<String, Instance>,
}

impl Catalog {
    pub fn from_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|i| (i.unique_id.clone(), i))
                .collect(),
        }
    }

    pub fn refresh(installations: &[Installation], settings: &Settings) -> Self {
        let mut all = Vec::new();
        for inst in installations {
            all.extend(scan_installation(inst, settings));
        }
        let catalog = Self::from_instances(all);
        debug!(
            total = catalog.instances.len(),
            displayable = catalog.displayable().count(),
            "catalog refreshed"
        );
        catalog
    }

    pub fn get(&self, unique_id: &str) -> Option<&Instance> {
        self.instances.get(unique_id)
    }

    /// Every instance, including those whose status could not be determined.
    pub fn all(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Instances whose root flag and R/W mode are both known; the only ones actions accept.
    pub fn displayable(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values().filter(|i| i.is_displayable())
    }

    pub fn get_displayable(&self, unique_id: &str) -> Option<&Instance> {
        self.get(unique_id).filter(|i| i.is_displayable())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Resolve a caller-supplied id: an exact unique id, or a bare instance name
    /// that matches exactly one displayable instance.
    pub fn resolve(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        if self.get_displayable(raw).is_some() {
            return Ok(raw.to_string());
        }
        let matches: Vec<&Instance> = self.displayable().filter(|i| i.name == raw).collect();
        match matches.as_slice() {
            [one] => Ok(one.unique_id.clone()),
            [] => Err(Error::not_found(format!("no actionable instance '{raw}'"))),
            many => Err(Error::msg(format!(
                "instance name '{raw}' is ambiguous: {}",
                many.iter()
                    .map(|i| i.unique_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub(crate) fn get_mut(&mut self, unique_id: &str) -> Option<&mut Instance> {
        self.instances.get_mut(unique_id)
    }

    pub(crate) fn instances_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.instances.values_mut()
    }
}

fn list_instance_dirs(data_path: &Path) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let entries = match fs::read_dir(data_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %data_path.display(), error = %e, "cannot list data directory");
            return out;
        }
    };
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            out.insert(name.to_string());
        }
    }
    out
}

fn scan_installation(inst: &Installation, settings: &Settings) -> Vec<Instance> {
    let conf = match conf_store::read_all(&inst.config_path, &settings.keys) {
        Ok(c) => c,
        Err(e) => {
            warn!(config = %inst.config_path.display(), error = %e, "config unreadable; treating as empty");
            ConfSnapshot::default()
        }
    };

    let mut names: BTreeSet<String> = conf.instances.keys().cloned().collect();
    names.extend(list_instance_dirs(&inst.data_path));

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let data_dir = inst.data_path.join(&name);
        let rw_mode = if data_dir.is_dir() {
            descriptor::read_mode(&data_dir, &settings.descriptors)
        } else {
            RwMode::Unknown
        };
        let individual_root = match conf.instances.get(&name) {
            Some(&on) => RootFlag::from_bool(on),
            None => match settings.keys.missing_flag {
                MissingFlagPolicy::Unknown => RootFlag::Unknown,
                MissingFlagPolicy::Off => RootFlag::Off,
            },
        };
        let instance = Instance {
            unique_id: unique_id(&name, &inst.source_id),
            name,
            source_id: inst.source_id.clone(),
            config_path: inst.config_path.clone(),
            data_dir,
            individual_root,
            global_root: conf.global,
            rw_mode,
        };
        if !instance.is_displayable() {
            debug!(
                id = %instance.unique_id,
                root = instance.individual_root.label(),
                rw = instance.rw_mode.label(),
                "instance status indeterminate; hidden from actions"
            );
        }
        out.push(instance);
    }
    out
}
