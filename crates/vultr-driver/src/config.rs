//! Driver configuration: the declared option table and the typed, immutable
//! [`DriverConfig`] built from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Image id of Vultr's "Custom OS", provisioned via an iPXE chain script.
pub const CUSTOM_OS_ID: u32 = 159;
/// The default image is the custom OS (RancherOS over iPXE).
pub const DEFAULT_OS_ID: u32 = CUSTOM_OS_ID;
/// Image id the API expects when restoring from a snapshot.
pub const SNAPSHOT_OS_ID: u32 = 164;
/// New Jersey.
pub const DEFAULT_REGION_ID: u32 = 1;
/// 1024 MB RAM.
pub const DEFAULT_PLAN_ID: u32 = 201;
pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_ROS_VERSION: &str = "v1.0.2";
pub const SSH_PORT: u16 = 22;
/// Port the Docker daemon listens on once provisioned.
pub const DOCKER_PORT: u16 = 2376;

/// Value type of a declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Int,
    Bool,
}

/// One configuration option as advertised to the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct DriverOption {
    pub name: &'static str,
    pub env_var: &'static str,
    pub usage: &'static str,
    pub kind: OptionKind,
    pub default: Option<&'static str>,
}

const fn opt(
    name: &'static str,
    env_var: &'static str,
    kind: OptionKind,
    default: Option<&'static str>,
    usage: &'static str,
) -> DriverOption {
    DriverOption {
        name,
        env_var,
        usage,
        kind,
        default,
    }
}

pub const OPT_API_KEY: &str = "vultr-api-key";
pub const OPT_API_ENDPOINT: &str = "vultr-api-endpoint";
pub const OPT_SSH_USER: &str = "vultr-ssh-user";
pub const OPT_REGION: &str = "vultr-region-id";
pub const OPT_PLAN: &str = "vultr-plan-id";
pub const OPT_OS: &str = "vultr-os-id";
pub const OPT_ROS_VERSION: &str = "vultr-ros-version";
pub const OPT_PXE_SCRIPT: &str = "vultr-pxe-script";
pub const OPT_BOOT_SCRIPT: &str = "vultr-boot-script";
pub const OPT_SSH_KEY: &str = "vultr-ssh-key-id";
pub const OPT_RESERVED_IP: &str = "vultr-reserved-ip";
pub const OPT_IPV6: &str = "vultr-ipv6";
pub const OPT_PRIVATE_NETWORKING: &str = "vultr-private-networking";
pub const OPT_BACKUPS: &str = "vultr-backups";
pub const OPT_USERDATA: &str = "vultr-userdata";
pub const OPT_SNAPSHOT: &str = "vultr-snapshot-id";
pub const OPT_TAG: &str = "vultr-tag";
pub const OPT_FIREWALL_GROUP: &str = "vultr-firewall-group";

/// Every option the driver accepts. `vultr-api-key` is mandatory.
pub const DRIVER_OPTIONS: &[DriverOption] = &[
    opt(OPT_API_KEY, "VULTR_API_KEY", OptionKind::String, None, "Vultr API key"),
    opt(
        OPT_API_ENDPOINT,
        "VULTR_API_ENDPOINT",
        OptionKind::String,
        Some(""),
        "Vultr API endpoint",
    ),
    opt(
        OPT_SSH_USER,
        "VULTR_SSH_USER",
        OptionKind::String,
        Some(DEFAULT_SSH_USER),
        "Vultr SSH username",
    ),
    opt(
        OPT_REGION,
        "VULTR_REGION",
        OptionKind::Int,
        Some("1"),
        "Vultr region ID. Default: 1 (New Jersey)",
    ),
    opt(
        OPT_PLAN,
        "VULTR_PLAN",
        OptionKind::Int,
        Some("201"),
        "Vultr plan ID. Default: 201 (1024 MB RAM)",
    ),
    opt(
        OPT_OS,
        "VULTR_OS",
        OptionKind::Int,
        Some("159"),
        "Vultr operating system ID. Default: RancherOS",
    ),
    opt(
        OPT_ROS_VERSION,
        "VULTR_ROS_VERSION",
        OptionKind::String,
        Some(DEFAULT_ROS_VERSION),
        "RancherOS version to use (eg. v0.6.0). Default: v1.0.2",
    ),
    opt(
        OPT_PXE_SCRIPT,
        "VULTR_PXE_SCRIPT",
        OptionKind::Int,
        Some("0"),
        "ID of a PXE script in your Vultr account",
    ),
    opt(
        OPT_BOOT_SCRIPT,
        "VULTR_BOOT_SCRIPT",
        OptionKind::Int,
        Some("0"),
        "ID of a boot script in your Vultr account. Mutually exclusive of --vultr-pxe-script",
    ),
    opt(
        OPT_SSH_KEY,
        "VULTR_SSH_KEY",
        OptionKind::String,
        None,
        "ID of an existing SSH key in your Vultr account",
    ),
    opt(
        OPT_RESERVED_IP,
        "VULTR_RESERVED_IP",
        OptionKind::String,
        None,
        "ID of a reserved IP in your Vultr account",
    ),
    opt(OPT_IPV6, "VULTR_IPV6", OptionKind::Bool, None, "Enable IPv6 for the VPS"),
    opt(
        OPT_PRIVATE_NETWORKING,
        "VULTR_PRIVATE_NETWORKING",
        OptionKind::Bool,
        None,
        "Enable private networking for the VPS",
    ),
    opt(
        OPT_BACKUPS,
        "VULTR_BACKUPS",
        OptionKind::Bool,
        None,
        "Enable automatic backups for the VPS",
    ),
    opt(
        OPT_USERDATA,
        "VULTR_USERDATA",
        OptionKind::String,
        None,
        "Path to a file containing cloud-init user data",
    ),
    opt(
        OPT_SNAPSHOT,
        "VULTR_SNAPSHOT",
        OptionKind::String,
        None,
        "ID of an existing Snapshot in your Vultr account",
    ),
    opt(OPT_TAG, "VULTR_TAG", OptionKind::String, None, "Tag to assign to the VPS"),
    opt(
        OPT_FIREWALL_GROUP,
        "VULTR_FIREWALL_GROUP",
        OptionKind::String,
        None,
        "ID of existing firewall group to assign",
    ),
];

/// Look up a declared option by name.
pub fn find_option(name: &str) -> Option<&'static DriverOption> {
    DRIVER_OPTIONS.iter().find(|o| o.name == name)
}

/// Raw option values, resolved as: explicit value, then the option's
/// environment variable (when enabled), then its declared default.
#[derive(Debug, Clone, Default)]
pub struct OptionValues {
    values: HashMap<String, String>,
    use_env: bool,
}

impl OptionValues {
    /// Values that fall back to each option's environment variable.
    pub fn from_env() -> Self {
        Self {
            values: HashMap::new(),
            use_env: true,
        }
    }

    /// Set an explicit value, overriding environment and default.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    fn raw(&self, name: &str) -> Option<String> {
        if let Some(v) = self.values.get(name) {
            return Some(v.clone());
        }
        let option = find_option(name)?;
        if self.use_env
            && let Ok(v) = std::env::var(option.env_var)
        {
            return Some(v);
        }
        option.default.map(str::to_string)
    }

    /// A string option; empty values count as unset.
    pub fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.trim().is_empty())
    }

    pub fn int(&self, name: &str) -> Result<u32> {
        match self.string(name) {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("--{name} must be a non-negative integer, got {v:?}"))),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.string(name).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::Config(format!("--{name} must be a boolean, got {v:?}"))),
            },
        }
    }
}

/// Typed provisioning parameters for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub machine_name: String,
    pub store_path: PathBuf,
    pub api_key: String,
    pub api_endpoint: Option<String>,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub region_id: u32,
    pub plan_id: u32,
    pub os_id: u32,
    pub ros_version: String,
    /// Caller-supplied iPXE script; requires the custom OS.
    pub pxe_script_id: Option<u32>,
    /// Caller-supplied boot script; forbidden with the custom OS.
    pub boot_script_id: Option<u32>,
    pub ssh_key_id: Option<String>,
    pub reserved_ip: Option<String>,
    pub ipv6: bool,
    pub private_networking: bool,
    pub backups: bool,
    pub user_data_file: Option<PathBuf>,
    pub snapshot_id: Option<String>,
    pub tag: Option<String>,
    pub firewall_group_id: Option<String>,
}

impl DriverConfig {
    /// A configuration with every option at its default.
    pub fn new(
        machine_name: impl Into<String>,
        store_path: impl Into<PathBuf>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            api_key: api_key.into(),
            api_endpoint: None,
            ssh_user: DEFAULT_SSH_USER.into(),
            ssh_port: SSH_PORT,
            region_id: DEFAULT_REGION_ID,
            plan_id: DEFAULT_PLAN_ID,
            os_id: DEFAULT_OS_ID,
            ros_version: DEFAULT_ROS_VERSION.into(),
            pxe_script_id: None,
            boot_script_id: None,
            ssh_key_id: None,
            reserved_ip: None,
            ipv6: false,
            private_networking: false,
            backups: false,
            user_data_file: None,
            snapshot_id: None,
            tag: None,
            firewall_group_id: None,
        }
    }

    /// Build from option values. Fails if the API key is missing or a
    /// numeric option does not parse.
    pub fn from_options(
        machine_name: impl Into<String>,
        store_path: impl Into<PathBuf>,
        values: &OptionValues,
    ) -> Result<Self> {
        let api_key = values.string(OPT_API_KEY).ok_or_else(|| {
            Error::Config(format!("Vultr driver requires the --{OPT_API_KEY} option"))
        })?;

        let nonzero = |v: u32| (v != 0).then_some(v);

        Ok(Self {
            api_endpoint: values.string(OPT_API_ENDPOINT),
            ssh_user: values
                .string(OPT_SSH_USER)
                .unwrap_or_else(|| DEFAULT_SSH_USER.into()),
            region_id: values.int(OPT_REGION)?,
            plan_id: values.int(OPT_PLAN)?,
            os_id: values.int(OPT_OS)?,
            ros_version: values
                .string(OPT_ROS_VERSION)
                .unwrap_or_else(|| DEFAULT_ROS_VERSION.into()),
            pxe_script_id: nonzero(values.int(OPT_PXE_SCRIPT)?),
            boot_script_id: nonzero(values.int(OPT_BOOT_SCRIPT)?),
            ssh_key_id: values.string(OPT_SSH_KEY),
            reserved_ip: values.string(OPT_RESERVED_IP),
            ipv6: values.bool(OPT_IPV6)?,
            private_networking: values.bool(OPT_PRIVATE_NETWORKING)?,
            backups: values.bool(OPT_BACKUPS)?,
            user_data_file: values.string(OPT_USERDATA).map(PathBuf::from),
            snapshot_id: values.string(OPT_SNAPSHOT),
            tag: values.string(OPT_TAG),
            firewall_group_id: values.string(OPT_FIREWALL_GROUP),
            ..Self::new(machine_name, store_path, api_key)
        })
    }

    /// Like [`Self::from_options`], reading every option from the
    /// environment (and a `.env` file, if present).
    pub fn from_env(machine_name: impl Into<String>, store_path: impl Into<PathBuf>) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_options(machine_name, store_path, &OptionValues::from_env())
    }

    pub fn is_custom_os(&self) -> bool {
        self.os_id == CUSTOM_OS_ID
    }

    /// The image id actually sent to the API.
    ///
    /// Restoring a snapshot onto the default image requires the provider's
    /// dedicated snapshot image id. Any other explicit image id is kept so a
    /// caller can follow future API changes.
    pub fn effective_os_id(&self) -> u32 {
        let has_snapshot = self.snapshot_id.as_deref().is_some_and(|s| !s.is_empty());
        if has_snapshot && self.os_id == DEFAULT_OS_ID {
            SNAPSHOT_OS_ID
        } else {
            self.os_id
        }
    }

    /// Per-machine directory under the store path.
    pub fn machine_dir(&self) -> PathBuf {
        self.store_path.join("machines").join(&self.machine_name)
    }

    pub fn resolve_store_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.machine_dir().join(file)
    }
}
