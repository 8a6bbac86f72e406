use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Addresses the provider reports before one is assigned.
pub const UNASSIGNED_ADDRESSES: &[&str] = &["0", "0.0.0.0"];

/// True if `addr` is a real, assigned address.
pub fn is_assigned(addr: &str) -> bool {
    !addr.is_empty() && !UNASSIGNED_ADDRESSES.contains(&addr)
}

/// Who is responsible for deleting a side resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// Created by this driver; removed on teardown.
    Created,
    /// Supplied by the caller; never removed.
    External,
}

/// A provider resource attached to the machine, with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attached<T> {
    pub id: T,
    pub ownership: Ownership,
}

impl<T> Attached<T> {
    pub fn created(id: T) -> Self {
        Self {
            id,
            ownership: Ownership::Created,
        }
    }

    pub fn external(id: T) -> Self {
        Self {
            id,
            ownership: Ownership::External,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::Created
    }
}

/// The machine this driver manages.
///
/// State is never cached here: it is re-read from the provider on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedMachine {
    /// Provider instance id, set once the create call returns.
    pub instance_id: Option<String>,
    pub public_ip: String,
    /// Empty when the machine has no private address.
    pub private_ip: String,
    /// Startup script referenced at creation (iPXE or boot).
    pub script: Option<Attached<u32>>,
    pub ssh_key: Option<Attached<String>>,
    /// SSH user, when provisioning overrode the configured one.
    pub ssh_user: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ProvisionedMachine {
    /// Script id to delete on teardown, if this driver created it.
    pub fn owned_script(&self) -> Option<u32> {
        self.script.as_ref().filter(|s| s.is_owned()).map(|s| s.id)
    }

    /// SSH key id to delete on teardown, if this driver created it.
    pub fn owned_ssh_key(&self) -> Option<&str> {
        self.ssh_key
            .as_ref()
            .filter(|k| k.is_owned())
            .map(|k| k.id.as_str())
    }

    pub fn has_address(&self) -> bool {
        is_assigned(&self.public_ip)
    }
}
