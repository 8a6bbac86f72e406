use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vultr_driver::{Driver, DriverConfig, ProvisionedMachine};

const RECORD_FILE: &str = "driver.json";

/// What is persisted between invocations for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub config: DriverConfig,
    pub machine: ProvisionedMachine,
}

impl DriverRecord {
    pub fn of(driver: &Driver) -> Self {
        Self {
            config: driver.config().clone(),
            machine: driver.machine().clone(),
        }
    }

    pub fn into_driver(self) -> Driver {
        Driver::new(self.config).restore(self.machine)
    }
}

/// `<store>/machines/<name>/driver.json`.
pub fn record_path(store: &Path, name: &str) -> PathBuf {
    store.join("machines").join(name).join(RECORD_FILE)
}

pub fn save(record: &DriverRecord) -> Result<()> {
    let path = record.config.resolve_store_path(RECORD_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "saved driver record");
    Ok(())
}

pub fn load(store: &Path, name: &str) -> Result<DriverRecord> {
    let path = record_path(store, name);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("machine {name} not found (no {})", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

/// Drop the machine's directory, including any generated key pair.
pub fn forget(store: &Path, name: &str) -> Result<()> {
    let dir = store.join("machines").join(name);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", dir.display())),
    }
}
