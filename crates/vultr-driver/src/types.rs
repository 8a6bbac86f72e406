use serde::{Deserialize, Serialize};

/// Raw server fields as reported by the provider.
///
/// Status strings are kept verbatim; [`crate::state::translate`] maps them to
/// a [`crate::MachineState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub status: String,
    pub server_state: String,
    pub power_status: String,
    pub main_ip: String,
    pub internal_ip: String,
}

/// An SSH key registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyRecord {
    pub id: String,
    pub name: String,
    pub public_key: String,
}

/// Startup script flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Runs on first boot of a regular image.
    Boot,
    /// iPXE chain script for the custom-OS image.
    Pxe,
}

/// Everything sent with a single create-server call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub region_id: u32,
    pub plan_id: u32,
    pub os_id: u32,
    pub ssh_key_id: Option<String>,
    pub script_id: Option<u32>,
    pub snapshot_id: Option<String>,
    /// Cloud-init payload, sent byte for byte; empty means none.
    pub user_data: Vec<u8>,
    pub ipv6: bool,
    pub private_networking: bool,
    pub backups: bool,
    pub tag: Option<String>,
    pub firewall_group_id: Option<String>,
    pub reserved_ip: Option<String>,
}

/// Account details fetched as a credential-liveness probe.
#[derive(Debug, Clone, Default)]
pub struct AccountSummary {
    pub balance: String,
    pub pending_charges: String,
}
