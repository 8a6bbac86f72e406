//! Boot material: the user-data payload and startup script sent with the
//! create call.
//!
//! On the custom-OS image the driver either defers to a caller-supplied iPXE
//! script or provisions RancherOS itself: it uploads an iPXE chain script
//! and passes a generated cloud-config. The cloud-config is assembled as a
//! typed document and serialised, so optional sections are either present
//! and well-formed or absent.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CUSTOM_OS_ID, DriverConfig};
use crate::machine::Attached;
use crate::types::ScriptKind;
use crate::{Error, ProviderClient, ProvisionError, Result};

/// SSH user baked into RancherOS.
pub const RANCHER_SSH_USER: &str = "rancher";

const CLOUD_CONFIG_HEADER: &str = "#cloud-config\n";

const STATE_DISK_SCRIPT_PATH: &str = "/opt/rancher/bin/start.sh";

/// Zeroes the state disk on first boot so RancherOS can format it, then
/// reboots. A no-op once the disk is mounted.
const STATE_DISK_SCRIPT: &str = r#"#!/bin/sh
mount | grep /dev/vda >/dev/null
RETVAL=$?
if [ $RETVAL -eq 0 ]; then
  exit 0
fi
sudo dd if=/dev/zero of=/dev/vda bs=1M count=1
logger -t start.sh "Prepared /dev/vda for use as Rancher state disk. Rebooting."
sudo reboot
"#;

/// Address template expanded by RancherOS at boot.
const PRIVATE_ADDRESS: &str = "$private_ipv4/16";
const PRIVATE_MTU: u32 = 1450;

/// iPXE chain script booting RancherOS `version` from the public releases.
pub fn ipxe_script(version: &str) -> String {
    format!(
        "#!ipxe\n\
         set base-url http://releases.rancher.com/os/{version}\n\
         kernel ${{base-url}}/vmlinuz rancher.state.dev=LABEL=RANCHER_STATE \
         rancher.state.autoformat=[/dev/vda] rancher.state.formatzero \
         rancher.cloud_init.datasources=[ec2]\n\
         initrd ${{base-url}}/initrd\n\
         boot"
    )
}

// ── Cloud-config document ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CloudConfig {
    pub hostname: String,
    pub ssh_authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<WriteFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rancher: Option<RancherConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteFile {
    pub path: String,
    pub permissions: String,
    pub owner: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RancherConfig {
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    pub interfaces: BTreeMap<String, InterfaceConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

/// Inputs to [`build_cloud_config`].
#[derive(Debug, Clone)]
pub struct CloudConfigParams<'a> {
    pub hostname: &'a str,
    pub public_key: &'a str,
    pub private_networking: bool,
    /// Emit the state-disk script and the RancherOS network section. Only
    /// set when the driver generated the iPXE script itself.
    pub state_disk: bool,
}

/// Assemble the cloud-config document. Fails on a missing hostname or key.
pub fn build_cloud_config(params: &CloudConfigParams<'_>) -> Result<CloudConfig> {
    let hostname = params.hostname.trim();
    if hostname.is_empty() {
        return Err(Error::Template("cloud-config requires a hostname".into()));
    }
    let public_key = params.public_key.trim();
    if public_key.is_empty() {
        return Err(Error::Template("cloud-config requires an SSH public key".into()));
    }

    let mut config = CloudConfig {
        hostname: hostname.to_string(),
        ssh_authorized_keys: vec![public_key.to_string()],
        write_files: Vec::new(),
        rancher: None,
    };

    if params.state_disk {
        config.write_files.push(WriteFile {
            path: STATE_DISK_SCRIPT_PATH.into(),
            permissions: "0755".into(),
            owner: "root".into(),
            content: STATE_DISK_SCRIPT.into(),
        });

        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "eth0".to_string(),
            InterfaceConfig {
                dhcp: Some(true),
                ..InterfaceConfig::default()
            },
        );
        if params.private_networking {
            interfaces.insert(
                "eth1".to_string(),
                InterfaceConfig {
                    address: Some(PRIVATE_ADDRESS.into()),
                    mtu: Some(PRIVATE_MTU),
                    ..InterfaceConfig::default()
                },
            );
        }
        config.rancher = Some(RancherConfig {
            network: NetworkConfig { interfaces },
        });
    }

    Ok(config)
}

/// Serialise to a `#cloud-config` user-data document.
pub fn render_cloud_config(config: &CloudConfig) -> Result<String> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| Error::Template(format!("cloud-config serialization: {e}")))?;
    Ok(format!("{CLOUD_CONFIG_HEADER}{yaml}"))
}

// ── Planning ─────────────────────────────────────────────────────────

/// Which kind of boot material a configuration calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootPlan {
    /// Custom OS with a caller-supplied iPXE script.
    ExternalPxe(u32),
    /// Custom OS; the driver uploads an iPXE script and a cloud-config.
    GeneratedPxe,
    /// Regular image with a user-data file, sent verbatim.
    UserData(PathBuf),
    /// Regular image, no user data. May still reference a boot script.
    Plain,
}

/// Decide the boot material for `config`. Uses the image id actually sent,
/// so a snapshot restore never takes the custom-OS path.
pub fn plan(config: &DriverConfig) -> BootPlan {
    if config.effective_os_id() == CUSTOM_OS_ID {
        return match config.pxe_script_id {
            Some(id) => BootPlan::ExternalPxe(id),
            None => BootPlan::GeneratedPxe,
        };
    }
    match &config.user_data_file {
        Some(path) => BootPlan::UserData(path.clone()),
        None => BootPlan::Plain,
    }
}

/// Everything the create call needs from this module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootMaterial {
    /// Passed through as bytes; empty when no user data is sent.
    pub user_data: Vec<u8>,
    /// Startup script to reference, with ownership.
    pub script: Option<Attached<u32>>,
    /// SSH user the provisioned image expects, if it differs from config.
    pub ssh_user: Option<String>,
}

/// Build boot material, uploading a generated iPXE script if needed.
///
/// `public_key` is the key that will be authorised on the machine.
pub async fn build(
    client: &dyn ProviderClient,
    config: &DriverConfig,
    public_key: &str,
) -> Result<BootMaterial> {
    let material = match plan(config) {
        BootPlan::ExternalPxe(id) => {
            info!(script_id = id, "using caller-supplied PXE script");
            BootMaterial {
                script: Some(Attached::external(id)),
                ..BootMaterial::default()
            }
        }
        BootPlan::GeneratedPxe => {
            info!(
                version = %config.ros_version,
                "provisioning RancherOS, SSH user set to '{RANCHER_SSH_USER}'"
            );
            // Render first so a bad document never leaves an orphaned script.
            let cloud_config = build_cloud_config(&CloudConfigParams {
                hostname: &config.machine_name,
                public_key,
                private_networking: config.private_networking,
                state_disk: true,
            })?;
            let user_data = render_cloud_config(&cloud_config)?.into_bytes();

            let script = ipxe_script(&config.ros_version);
            debug!(%script, "PXE script");
            let script_id = client
                .create_startup_script(&config.machine_name, &script, ScriptKind::Pxe)
                .await
                .map_err(ProvisionError::from)?;
            debug!(script_id, "created RancherOS PXE script");

            BootMaterial {
                user_data,
                script: Some(Attached::created(script_id)),
                ssh_user: Some(RANCHER_SSH_USER.into()),
            }
        }
        BootPlan::UserData(path) => {
            let user_data = tokio::fs::read(&path)
                .await
                .map_err(|source| ProvisionError::UserData {
                    path: path.clone(),
                    source,
                })?;
            BootMaterial {
                user_data,
                script: config.boot_script_id.map(Attached::external),
                ..BootMaterial::default()
            }
        }
        BootPlan::Plain => BootMaterial {
            script: config.boot_script_id.map(Attached::external),
            ..BootMaterial::default()
        },
    };

    if !material.user_data.is_empty() {
        debug!(
            user_data = %String::from_utf8_lossy(&material.user_data),
            "cloud-init user data"
        );
    }
    Ok(material)
}
