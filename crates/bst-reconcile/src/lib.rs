pub mod catalog;
pub mod conf_store;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod locator;
pub mod log_sanitize;
pub mod logging;
pub mod process;
pub mod progress;

pub use catalog::{Catalog, Instance};
pub use config::Settings;
pub use engine::{BatchReport, BatchStatus, Engine, Operation};
pub use error::{Error, ErrorKind, Result};
pub use locator::Installation;

use tracing::warn;

use locator::{Registry, RegistryFile};

/// Registry backing discovery: the configured snapshot file, else the host registry.
pub fn registry_for(settings: &Settings) -> Result<Box<dyn Registry>> {
    match &settings.locator.registry_file {
        Some(path) => Ok(Box::new(RegistryFile::load(path)?)),
        None => Ok(host_registry()),
    }
}

#[cfg(windows)]
fn host_registry() -> Box<dyn Registry> {
    Box::new(locator::HklmRegistry)
}

#[cfg(not(windows))]
fn host_registry() -> Box<dyn Registry> {
    Box::new(locator::EmptyRegistry)
}

/// Find installed emulator copies. An unreadable registry snapshot is logged and
/// treated as "nothing installed".
pub fn discover_installations(settings: &Settings) -> Vec<Installation> {
    match registry_for(settings) {
        Ok(reg) => locator::discover(reg.as_ref(), &settings.locator),
        Err(e) => {
            warn!(error = %e, "registry unavailable");
            Vec::new()
        }
    }
}

pub fn refresh_catalog(installations: &[Installation], settings: &Settings) -> Catalog {
    Catalog::refresh(installations, settings)
}
